//! Checksum validation for complete frames.
//!
//! Every supported protocol uses an additive checksum: a wrapping sum of a
//! contiguous byte range compared against trailing checksum byte(s). The
//! profiles only differ in the range and the width.

use crate::profile::{ChecksumKind, SizeClass, SYNC_LEN};
use crate::sync::RawFrame;

/// Wrapping 8-bit sum.
pub fn sum8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Wrapping 16-bit sum.
pub fn sum16(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

/// Validate a frame emitted by the synchronizer.
///
/// Returns `false` for frames too short to carry the checksum.
pub fn validate(frame: &RawFrame, kind: ChecksumKind) -> bool {
    let bytes = frame.bytes();
    match kind {
        ChecksumKind::Sum8 { include_sync } => {
            let Some((&expected, covered)) = bytes.split_last() else {
                return false;
            };
            let start = if include_sync { 0 } else { SYNC_LEN };
            covered.len() >= start && sum8(&covered[start..]) == expected
        }
        ChecksumKind::Sum16Le => {
            let len = bytes.len();
            if len < SYNC_LEN + 2 {
                return false;
            }
            let expected = u16::from_le_bytes([bytes[len - 2], bytes[len - 1]]);
            sum16(&bytes[SYNC_LEN..len - 2]) == expected
        }
        ChecksumKind::SizePrefixed(class) => validate_size_prefixed(bytes, class),
    }
}

/// Declared size of a size-prefixed frame: the count of bytes from the
/// command byte through the checksum.
pub fn declared_size(buf: &[u8], class: SizeClass) -> Option<usize> {
    let at = SYNC_LEN + 1;
    match class {
        SizeClass::OneByte => buf.get(at).map(|&b| b as usize),
        SizeClass::TwoByte => crate::field::be_u16(buf, at).map(usize::from),
    }
}

/// Validate a gateway frame `FF FF cmd size.. payload.. cs`.
///
/// The checksum sits at index `2 + size - 1` and covers the command byte
/// through the last payload byte. A declared size that does not fit in
/// `buf` fails validation instead of reading out of bounds.
pub fn validate_size_prefixed(buf: &[u8], class: SizeClass) -> bool {
    let Some(size) = declared_size(buf, class) else {
        return false;
    };
    if size < 2 + class.field_len() || size + SYNC_LEN > buf.len() {
        return false;
    }
    let cs_index = SYNC_LEN + size - 1;
    sum8(&buf[SYNC_LEN..cs_index]) == buf[cs_index]
}

/// Append an 8-bit checksum over `frame[SYNC_LEN..]`, as used by outgoing
/// gateway commands.
pub fn seal_size_prefixed(frame: &mut Vec<u8>) {
    let cs = sum8(frame.get(SYNC_LEN..).unwrap_or(&[]));
    frame.push(cs);
}
