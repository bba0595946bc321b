//! Byte codec
//!
//! Stateless helpers for turning integers into fixed-width byte runs,
//! patching byte runs into a buffer, and the XOR (LRC) checksum.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::ProtocolError;

/// Byte order for integer encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    /// Most significant byte first (the wire default)
    #[default]
    Big,
    /// Least significant byte first
    Little,
}

/// Encode `value` into exactly `width` bytes.
///
/// Fails instead of truncating when the value needs more than `width` bytes.
pub fn int_to_bytes(value: u64, width: usize, endianness: Endianness) -> Result<Vec<u8>, ProtocolError> {
    if width == 0 || width > 8 {
        return Err(ProtocolError::Encoding { value, width });
    }
    if width < 8 && value >> (width * 8) != 0 {
        return Err(ProtocolError::Encoding { value, width });
    }

    let mut buf = vec![0u8; width];
    match endianness {
        Endianness::Big => BigEndian::write_uint(&mut buf, value, width),
        Endianness::Little => LittleEndian::write_uint(&mut buf, value, width),
    }
    Ok(buf)
}

/// Write `addition` into `base` starting at `offset`, growing `base` if needed.
///
/// Gaps between the old end of `base` and `offset` are zero-filled.
pub fn overlay(base: &mut Vec<u8>, addition: &[u8], offset: usize) {
    let end = offset + addition.len();
    if end > base.len() {
        base.resize(end, 0);
    }
    base[offset..end].copy_from_slice(addition);
}

/// Longitudinal redundancy check: XOR of every byte, 0 for empty input
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}
