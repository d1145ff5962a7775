//! Size-prefix framing shared by the pipe and message queue transports.
//!
//! Frame format: `[4-byte length (little-endian)]` followed by the payload,
//! sent separately through a chunked channel.

use crate::error::TransportError;
use bytes::{Buf, BufMut};

/// Length of the size field in bytes.
pub const SIZE_FIELD_LEN: usize = 4;

/// Encodes a payload length as a size field.
///
/// # Errors
/// Returns [`TransportError::Framing`] if `len` does not fit in a `u32`.
pub fn encode_size(len: usize) -> Result<[u8; SIZE_FIELD_LEN], TransportError> {
    let len = u32::try_from(len).map_err(|_| {
        TransportError::framing(format!(
            "payload of {len} bytes exceeds the {} byte size field",
            SIZE_FIELD_LEN
        ))
    })?;
    let mut out = [0u8; SIZE_FIELD_LEN];
    let mut cursor = &mut out[..];
    cursor.put_u32_le(len);
    Ok(out)
}

/// Decodes a size field.
///
/// # Errors
/// Returns [`TransportError::Framing`] unless `bytes` is exactly
/// [`SIZE_FIELD_LEN`] long; a partially read size is never used.
pub fn decode_size(mut bytes: &[u8]) -> Result<usize, TransportError> {
    if bytes.len() != SIZE_FIELD_LEN {
        return Err(TransportError::framing(format!(
            "size field is {} bytes, expected {SIZE_FIELD_LEN}",
            bytes.len()
        )));
    }
    Ok(bytes.get_u32_le() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_size_little_endian() {
        assert_eq!(encode_size(4096).unwrap(), [0x00, 0x10, 0x00, 0x00]);
        assert_eq!(decode_size(&[0x00, 0x10, 0x00, 0x00]).unwrap(), 4096);
    }

    #[test]
    fn test_short_size_field() {
        assert!(matches!(
            decode_size(&[0x00, 0x10]),
            Err(TransportError::Framing { .. })
        ));
        assert!(decode_size(&[]).is_err());
    }

    #[test]
    fn test_size_too_large() {
        let too_big = u32::MAX as usize + 1;
        assert!(matches!(
            encode_size(too_big),
            Err(TransportError::Framing { .. })
        ));
    }
}
