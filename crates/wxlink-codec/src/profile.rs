//! Protocol profiles: the per-station framing description.
//!
//! A [`ProtocolProfile`] is everything the frame synchronizer and checksum
//! validator need to know about a station protocol: the sync marker, the
//! type-code to length table, and the checksum algorithm. The field layout
//! of each packet type is named by its [`PacketKind`]; the station driver
//! owns the handler for each kind.
//!
//! Profiles are `'static` constants defined by the driver crates and are
//! never mutated at runtime.

/// Length of the two-byte sync marker every supported protocol uses.
pub const SYNC_LEN: usize = 2;

/// Field layout of a packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Wind gust, average and bearing (plus wind chill where present).
    Wind,
    /// Rainfall rate and accumulated total.
    Rain,
    /// Temperature and humidity from a channel-addressed sensor.
    ChannelClimate,
    /// Temperature only from a channel-addressed sensor.
    ChannelTemperature,
    /// Temperature and humidity from the dedicated outdoor sensor.
    OutdoorClimate,
    /// Indoor temperature/humidity with barometer and forecast.
    IndoorClimate,
    /// As [`IndoorClimate`](PacketKind::IndoorClimate) with the wider
    /// barometer encoding.
    ExtendedIndoorClimate,
    /// Barometric pressure and forecast.
    Pressure,
    /// UV index.
    Uv,
    /// Console clock/date. Valid, carries nothing to report.
    Clock,
    /// Auxiliary ("pond") temperature probe.
    Auxiliary,
}

/// One row of a profile's type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSpec {
    /// Type code as transmitted.
    pub code: u8,
    /// Declared length as published for the device. Whether it counts the
    /// sync marker is a property of the profile.
    pub length: usize,
    /// Field layout.
    pub kind: PacketKind,
}

/// Width of the size field in a size-prefixed (gateway) frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    OneByte,
    TwoByte,
}

impl SizeClass {
    /// Number of bytes the size field occupies.
    pub fn field_len(self) -> usize {
        match self {
            SizeClass::OneByte => 1,
            SizeClass::TwoByte => 2,
        }
    }
}

/// Checksum algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    /// 8-bit additive sum in one trailing byte. `include_sync` selects
    /// whether the sync marker is part of the sum.
    Sum8 { include_sync: bool },
    /// 16-bit additive sum of the bytes after the sync marker, in two
    /// trailing bytes, low byte first.
    Sum16Le,
    /// Gateway framing: a big-endian size field after the command byte,
    /// 8-bit sum of command, size and payload in the last counted byte.
    SizePrefixed(SizeClass),
}

impl ChecksumKind {
    /// Number of trailing checksum bytes.
    pub fn width(self) -> usize {
        match self {
            ChecksumKind::Sum16Le => 2,
            _ => 1,
        }
    }
}

/// Immutable framing description of one station protocol.
#[derive(Debug)]
pub struct ProtocolProfile {
    /// Human-readable protocol name for logs.
    pub name: &'static str,
    /// Two-byte sync marker.
    pub sync: [u8; SYNC_LEN],
    /// Bytes between the sync marker and the type code.
    pub type_offset: usize,
    /// Whether the lengths in `packets` count the sync marker.
    pub length_includes_sync: bool,
    /// Type code table.
    pub packets: &'static [PacketSpec],
    /// Checksum algorithm.
    pub checksum: ChecksumKind,
}

impl ProtocolProfile {
    /// Table row for a type code.
    pub fn packet(&self, code: u8) -> Option<&PacketSpec> {
        self.packets.iter().find(|p| p.code == code)
    }

    /// Declared length for a type code; `None` for unknown codes or a
    /// zero-length entry.
    pub fn declared_length(&self, code: u8) -> Option<usize> {
        self.packet(code).map(|p| p.length).filter(|&len| len > 0)
    }

    /// Number of bytes that follow the sync marker for a type code,
    /// including any prefix, the type byte, payload and checksum.
    ///
    /// `None` when the type is unknown or its declared length cannot even
    /// hold the prefix, the type byte and the checksum.
    pub fn body_length(&self, code: u8) -> Option<usize> {
        let declared = self.declared_length(code)?;
        let body = if self.length_includes_sync {
            declared.checked_sub(SYNC_LEN)?
        } else {
            declared
        };
        (body > self.type_offset + self.checksum.width()).then_some(body)
    }

    /// Field layout for a type code.
    pub fn kind(&self, code: u8) -> Option<PacketKind> {
        self.packet(code).map(|p| p.kind)
    }
}
