//! GW1000 LAN API command table, request builder and response parser.
//!
//! Every exchange is a single frame each way:
//!
//! ```text
//! FF FF  cmd  size(1|2)  payload..  checksum
//! ```
//!
//! `size` counts the command byte, the size field itself, the payload and
//! the checksum. The checksum is the 8-bit sum of everything between the
//! marker and the checksum. Requests always carry a one-byte size; a few
//! responses carry a two-byte size (see [`Command::size_class`]).
//!
//! All functions here are pure. The caller moves the bytes.

use bytes::{BufMut, Bytes};

use wxlink_codec::checksum::{self, declared_size, seal_size_prefixed};
use wxlink_codec::{ChecksumKind, ProtocolProfile, SizeClass, SYNC_LEN};

/// Frame marker.
pub const MARKER: [u8; SYNC_LEN] = [0xFF, 0xFF];

/// TCP port of the LAN API.
pub const DEFAULT_PORT: u16 = 45000;

/// Framing profile of the gateway API. Frames are length-prefixed, so the
/// profile carries no type-to-length table.
pub static PROFILE: ProtocolProfile = ProtocolProfile {
    name: "GW1000",
    sync: MARKER,
    type_offset: 0,
    length_includes_sync: false,
    packets: &[],
    checksum: ChecksumKind::SizePrefixed(SizeClass::OneByte),
};

/// Gateway API commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    WriteSsid = 0x11,
    Broadcast = 0x12,
    ReadEcowitt = 0x1E,
    WriteEcowitt = 0x1F,
    ReadWunderground = 0x20,
    WriteWunderground = 0x21,
    ReadWow = 0x22,
    WriteWow = 0x23,
    ReadWeathercloud = 0x24,
    WriteWeathercloud = 0x25,
    ReadStationMac = 0x26,
    LiveData = 0x27,
    ReadSoilCalibration = 0x28,
    WriteSoilCalibration = 0x29,
    ReadCustomized = 0x2A,
    WriteCustomized = 0x2B,
    ReadChannelOffsets = 0x2C,
    WriteChannelOffsets = 0x2D,
    ReadPm25Offsets = 0x2E,
    WritePm25Offsets = 0x2F,
    ReadSystem = 0x30,
    WriteSystem = 0x31,
    ReadRainData = 0x34,
    WriteRainData = 0x35,
    ReadGain = 0x36,
    WriteGain = 0x37,
    ReadCalibration = 0x38,
    WriteCalibration = 0x39,
    ReadSensorId = 0x3A,
    WriteSensorId = 0x3B,
    ReadSensorIdNew = 0x3C,
    Reboot = 0x40,
    Reset = 0x41,
    ReadFirmwareVersion = 0x50,
    ReadUserPath = 0x51,
    WriteUserPath = 0x52,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Width of the size field in this command's response.
    pub fn size_class(self) -> SizeClass {
        size_class(self.code())
    }
}

/// Response size class for a raw command code.
pub fn size_class(code: u8) -> SizeClass {
    match code {
        0x12 | 0x27 | 0x3C => SizeClass::TwoByte,
        _ => SizeClass::OneByte,
    }
}

/// Datagram that asks every gateway on the segment to announce itself.
///
/// Unlike ordinary requests it carries a two-byte size.
pub const DISCOVERY_REQUEST: [u8; 6] = [0xFF, 0xFF, 0x12, 0x00, 0x04, 0x16];

/// Largest payload a request can carry: the one-byte size also counts
/// the command, size and checksum bytes.
pub const MAX_REQUEST_PAYLOAD: usize = u8::MAX as usize - 3;

/// Build a request frame, or `None` if `payload` does not fit the one-byte
/// size field.
///
/// # Example
///
/// ```
/// use wxlink_ecowitt::commands::{build_request, Command};
///
/// assert_eq!(
///     build_request(Command::LiveData, &[]),
///     Some(vec![0xFF, 0xFF, 0x27, 0x03, 0x2A])
/// );
/// ```
pub fn build_request(command: Command, payload: &[u8]) -> Option<Vec<u8>> {
    // cmd + size + checksum
    let size = u8::try_from(payload.len() + 3).ok()?;
    let mut frame = Vec::with_capacity(SYNC_LEN + size as usize);
    frame.put_slice(&MARKER);
    frame.put_u8(command.code());
    frame.put_u8(size);
    frame.put_slice(payload);
    seal_size_prefixed(&mut frame);
    Some(frame)
}

/// A validated gateway response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub command: u8,
    /// Bytes between the size field and the checksum.
    pub payload: Bytes,
}

/// Reason a response was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResponseFault {
    #[error("response too short ({0} bytes)")]
    Truncated(usize),
    #[error("bad frame marker")]
    BadMarker,
    #[error("command mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    CommandMismatch { expected: u8, actual: u8 },
    #[error("checksum mismatch")]
    Checksum,
}

/// Validate a response to `expected` and extract its payload.
///
/// Bounds are checked against the declared size before any indexing; a
/// short or inconsistent response is a fault, never a panic.
pub fn parse_response(expected: u8, buf: &[u8]) -> Result<GatewayResponse, ResponseFault> {
    let class = size_class(expected);
    let header_len = SYNC_LEN + 1 + class.field_len();
    if buf.len() < header_len + 1 {
        return Err(ResponseFault::Truncated(buf.len()));
    }
    if buf[..SYNC_LEN] != MARKER {
        return Err(ResponseFault::BadMarker);
    }
    let actual = buf[SYNC_LEN];
    if actual != expected {
        return Err(ResponseFault::CommandMismatch { expected, actual });
    }
    let size = declared_size(buf, class).ok_or(ResponseFault::Truncated(buf.len()))?;
    if size + SYNC_LEN > buf.len() || size < 2 + class.field_len() {
        return Err(ResponseFault::Truncated(buf.len()));
    }
    if !checksum::validate_size_prefixed(buf, class) {
        return Err(ResponseFault::Checksum);
    }
    let end = SYNC_LEN + size - 1;
    Ok(GatewayResponse {
        command: actual,
        payload: Bytes::copy_from_slice(&buf[header_len..end]),
    })
}

/// Build a response frame the way a gateway does.
#[cfg(test)]
pub(crate) fn encode_response(command: u8, payload: &[u8]) -> Vec<u8> {
    let class = size_class(command);
    let size = 1 + class.field_len() + payload.len() + 1;
    let mut frame = Vec::with_capacity(SYNC_LEN + size);
    frame.put_slice(&MARKER);
    frame.put_u8(command);
    match class {
        SizeClass::OneByte => frame.put_u8(size as u8),
        SizeClass::TwoByte => frame.put_u16(size as u16),
    }
    frame.put_slice(payload);
    seal_size_prefixed(&mut frame);
    frame
}
