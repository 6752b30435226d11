//! Variable-length integer encoding utilities.
//!
//! Unsigned LEB128: 7 bits per byte with a continuation bit, so small deltas
//! (the common case in posting lists) take a single byte.

use crate::error::{LexisError, Result};

/// Append the varint encoding of `value` to `out`. Returns the number of bytes written.
pub fn encode_u64_into(value: u64, out: &mut Vec<u8>) -> usize {
    let mut val = value;
    let mut written = 0;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80;
        }

        out.push(byte);
        written += 1;

        if val == 0 {
            return written;
        }
    }
}

/// Encode a u64 value using variable-length encoding.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(10);
    encode_u64_into(value, &mut bytes);
    bytes
}

/// Decode a u64 value from the start of `bytes`.
///
/// Returns the value and the number of bytes consumed. Truncated or
/// over-long encodings are reported as corruption since varints only ever
/// appear inside segment files.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;

    for (i, &byte) in bytes.iter().enumerate() {
        if shift >= 64 || (shift == 63 && byte > 1) {
            return Err(LexisError::corrupt("varint overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, i + 1));
        }

        shift += 7;
    }

    Err(LexisError::corrupt("incomplete varint"))
}

/// Decode a varint that must fit in a u32.
pub fn decode_u32(bytes: &[u8]) -> Result<(u32, usize)> {
    let (value, len) = decode_u64(bytes)?;
    let value = u32::try_from(value)
        .map_err(|_| LexisError::corrupt(format!("varint {value} does not fit in u32")))?;
    Ok((value, len))
}

/// Number of bytes `value` occupies when varint-encoded.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_u64() {
        let test_values = [0, 1, 127, 128, 255, 256, 16383, 16384, u32::MAX as u64, u64::MAX];

        for &value in &test_values {
            let encoded = encode_u64(value);
            let (decoded, bytes_read) = decode_u64(&encoded).unwrap();

            assert_eq!(value, decoded);
            assert_eq!(encoded.len(), bytes_read);
            assert_eq!(encoded.len(), encoded_len(value));
        }
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buffer = vec![0xAA];
        let written = encode_u64_into(300, &mut buffer);
        assert_eq!(written, 2);
        assert_eq!(buffer.len(), 3);

        let (decoded, read) = decode_u64(&buffer[1..]).unwrap();
        assert_eq!(decoded, 300);
        assert_eq!(read, 2);
    }

    #[test]
    fn test_encoding_efficiency() {
        assert_eq!(encode_u64(0).len(), 1);
        assert_eq!(encode_u64(127).len(), 1);
        assert_eq!(encode_u64(128).len(), 2);
        assert_eq!(encode_u64(16383).len(), 2);
        assert_eq!(encode_u64(16384).len(), 3);
        assert_eq!(encode_u64(u64::MAX).len(), 10);
    }

    #[test]
    fn test_incomplete_varint() {
        let incomplete = vec![0x80];
        assert!(matches!(
            decode_u64(&incomplete),
            Err(LexisError::CorruptSegment(_))
        ));
        assert!(decode_u64(&[]).is_err());
    }

    #[test]
    fn test_overflow() {
        let overflow_data = vec![0xFF; 11];
        assert!(decode_u64(&overflow_data).is_err());

        let too_big_for_u32 = encode_u64(u32::MAX as u64 + 1);
        assert!(decode_u32(&too_big_for_u32).is_err());
    }
}
