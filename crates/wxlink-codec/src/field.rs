//! Field decoders: pure conversions from raw packet bytes to values.
//!
//! Station consoles pack readings in four shapes:
//!
//! - BCD digit pairs, one decimal digit per nibble (WMR928)
//! - signed-magnitude binary fields spread across two bytes (WMR100)
//! - big-endian integers (GW1000 gateway)
//! - bit-flag bytes where each bit belongs to one channel
//!
//! BCD decoders return `None` when a nibble lies outside 0-9. Such a nibble
//! is a sensor glitch, so callers drop the affected field instead of
//! treating `0xA`-`0xF` as a digit.

/// Sign pattern in the high nibble of a signed-magnitude field.
pub const NEGATIVE_NIBBLE: u8 = 0x8;

/// Low nibble of a byte.
pub fn lo_nibble(byte: u8) -> u8 {
    byte & 0x0F
}

/// High nibble of a byte.
pub fn hi_nibble(byte: u8) -> u8 {
    (byte >> 4) & 0x0F
}

/// A single BCD digit, or `None` if the nibble is not 0-9.
pub fn bcd_digit(nibble: u8) -> Option<u8> {
    if nibble <= 9 {
        Some(nibble)
    } else {
        None
    }
}

/// Decode a BCD digit pair (`0x00`-`0x99`) into `0`-`99`.
///
/// # Example
///
/// ```
/// use wxlink_codec::field::bcd_pair;
///
/// assert_eq!(bcd_pair(0x42), Some(42));
/// assert_eq!(bcd_pair(0x4A), None);
/// ```
pub fn bcd_pair(byte: u8) -> Option<u8> {
    Some(bcd_digit(hi_nibble(byte))? * 10 + bcd_digit(lo_nibble(byte))?)
}

/// Encode `0`-`99` as a BCD digit pair. Values above 99 wrap per digit.
pub fn to_bcd_pair(value: u8) -> u8 {
    ((value / 10 % 10) << 4) | (value % 10)
}

/// Decode a three-digit BCD value in tenths with a sign bit.
///
/// `lo` carries the units digit (high nibble) and tenths digit (low
/// nibble); the low nibble of `hi` is the tens digit and bit 3 of its high
/// nibble flags a negative value. Used for WMR928 temperatures.
pub fn bcd_signed_tenths(lo: u8, hi: u8) -> Option<f64> {
    let tens = bcd_digit(lo_nibble(hi))?;
    let magnitude = tens as f64 * 10.0 + bcd_pair(lo)? as f64 / 10.0;
    if hi_nibble(hi) & NEGATIVE_NIBBLE != 0 {
        Some(-magnitude)
    } else {
        Some(magnitude)
    }
}

/// Decode a two-byte signed-magnitude field in tenths.
///
/// `lo` is the low magnitude byte; the low nibble of `hi` is the high
/// magnitude part and a high nibble of exactly `0x8` marks a negative
/// value: `sign * (lo + (hi & 0x0F) * 256) / 10`.
///
/// # Example
///
/// ```
/// use wxlink_codec::field::signed_magnitude_tenths;
///
/// assert_eq!(signed_magnitude_tenths(0x69, 0x80), -10.5);
/// assert_eq!(signed_magnitude_tenths(0x69, 0x00), 10.5);
/// ```
pub fn signed_magnitude_tenths(lo: u8, hi: u8) -> f64 {
    let magnitude = (lo as u32 + lo_nibble(hi) as u32 * 256) as f64 / 10.0;
    if hi_nibble(hi) == NEGATIVE_NIBBLE {
        -magnitude
    } else {
        magnitude
    }
}

/// Encode a value in tenths as a signed-magnitude pair `(lo, hi)`.
///
/// The magnitude is clamped to the 12-bit range the format can carry.
pub fn to_signed_magnitude_tenths(value: f64) -> (u8, u8) {
    let magnitude = ((value.abs() * 10.0).round() as u32).min(0x0FFF);
    let lo = (magnitude & 0xFF) as u8;
    let mut hi = ((magnitude >> 8) & 0x0F) as u8;
    if value < 0.0 {
        hi |= NEGATIVE_NIBBLE << 4;
    }
    (lo, hi)
}

fn array_at<const N: usize>(buf: &[u8], offset: usize) -> Option<[u8; N]> {
    let end = offset.checked_add(N)?;
    buf.get(offset..end)?.try_into().ok()
}

/// Big-endian `u16` at `offset`, or `None` if the buffer is too short.
pub fn be_u16(buf: &[u8], offset: usize) -> Option<u16> {
    array_at(buf, offset).map(u16::from_be_bytes)
}

/// Big-endian `i16` at `offset`.
pub fn be_i16(buf: &[u8], offset: usize) -> Option<i16> {
    array_at(buf, offset).map(i16::from_be_bytes)
}

/// Big-endian `u32` at `offset`.
pub fn be_u32(buf: &[u8], offset: usize) -> Option<u32> {
    array_at(buf, offset).map(u32::from_be_bytes)
}

/// Big-endian `i32` at `offset`.
pub fn be_i32(buf: &[u8], offset: usize) -> Option<i32> {
    array_at(buf, offset).map(i32::from_be_bytes)
}

/// Little-endian `u16` at `offset`.
pub fn le_u16(buf: &[u8], offset: usize) -> Option<u16> {
    array_at(buf, offset).map(u16::from_le_bytes)
}

/// Per-channel boolean set decoded from a bit-flag byte.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelFlags {
    flags: Vec<(u8, bool)>,
}

impl ChannelFlags {
    /// State of `channel`, or `None` if the layout has no bit for it.
    pub fn get(&self, channel: u8) -> Option<bool> {
        self.flags
            .iter()
            .find(|(ch, _)| *ch == channel)
            .map(|(_, set)| *set)
    }

    /// Iterate `(channel, set)` pairs in bit order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, bool)> + '_ {
        self.flags.iter().copied()
    }
}

/// Decode a bit-flag byte with a fixed bit-to-channel layout.
///
/// `layout[i]` names the channel owning bit `i`; layouts longer than eight
/// entries are truncated.
///
/// # Example
///
/// ```
/// use wxlink_codec::field::bit_flags;
///
/// let flags = bit_flags(0b0000_0101, &[1, 2, 3]);
/// assert_eq!(flags.get(1), Some(true));
/// assert_eq!(flags.get(2), Some(false));
/// assert_eq!(flags.get(3), Some(true));
/// ```
pub fn bit_flags(byte: u8, layout: &[u8]) -> ChannelFlags {
    let flags = layout
        .iter()
        .take(8)
        .enumerate()
        .map(|(bit, &channel)| (channel, byte & (1 << bit) != 0))
        .collect();
    ChannelFlags { flags }
}

/// Render bytes as space-separated uppercase hex for diagnostics.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
