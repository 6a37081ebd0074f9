//! Compressed-unsigned-long codec (§4.B): a 7-bits-per-byte varint where the
//! high bit of a byte marks it as the final byte of the value.
//!
//! Same shape of problem as the prefix-free universal codes used
//! elsewhere in this kind of log format: decode byte by byte, fail loudly
//! on malformed input. The wire format here is the simpler
//! continuation-bit varint this log format actually uses.

use crate::cursor::ByteCursor;
use crate::error::{Error, Result};

const MAX_ENCODED_LEN: usize = 9;

/// Decodes a compressed unsigned long from `cursor`, advancing it past the
/// encoded bytes.
///
/// Accumulates 7-bit groups into a 64-bit unsigned value; the byte whose
/// top bit is set terminates the sequence and contributes its low 7 bits.
/// Fails with [`Error::Overflow`] if more than 9 bytes are consumed without
/// finding a terminal byte, and with [`Error::Truncated`] if the cursor is
/// exhausted first.
pub fn decode(cursor: &mut ByteCursor) -> Result<u64> {
    let mut value: u64 = 0;
    for i in 0..MAX_ENCODED_LEN {
        let b = match cursor.next() {
            Ok(b) => b,
            Err(Error::EndOfInput) => return Err(Error::Truncated),
            Err(e) => return Err(e),
        };
        value = (value << 7) | (b & 0x7f) as u64;
        if b & 0x80 != 0 {
            return Ok(value);
        }
        if i == MAX_ENCODED_LEN - 1 {
            return Err(Error::Overflow);
        }
    }
    unreachable!()
}

/// Encodes `value` as a compressed unsigned long, minimal length, inverse
/// of [`decode`].
pub fn encode(value: u64) -> Vec<u8> {
    // Split into 7-bit groups, most significant first, so the terminal
    // (high-bit-set) byte lands last and lines up with `decode`'s
    // left-shift accumulation.
    let mut groups = Vec::with_capacity(MAX_ENCODED_LEN);
    let mut v = value;
    loop {
        groups.push((v & 0x7f) as u8);
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    groups.reverse();
    let last = groups.len() - 1;
    groups[last] |= 0x80;
    groups
}

/// Checks that a decoded `childAddressLength` falls in `[1, 8]`, per
/// spec invariant IV-2. The packed header formula below masks the length
/// field to 3 bits, so `(i & 7) + 1` is always in range for input
/// produced by [`encode_children_header`] — this check exists because
/// `decode_children_header` is also the place any future on-disk format
/// revision, or a corrupted header read out of band, would surface an
/// out-of-range length.
pub fn validate_child_address_length(len: u8) -> Result<()> {
    if (1..=8).contains(&len) {
        Ok(())
    } else {
        Err(Error::InvalidAddressLength(len as u32))
    }
}

/// Decodes the packed `(childrenCount, childAddressLength)` header used by
/// a Patricia node's children section: one compressed unsigned long `i`
/// where `childrenCount = i >> 3` and `childAddressLength = (i & 7) + 1`.
pub fn decode_children_header(cursor: &mut ByteCursor) -> Result<(u16, u8)> {
    let i = decode(cursor)?;
    let children_count = (i >> 3) as u16;
    let child_address_length = ((i & 7) + 1) as u8;
    validate_child_address_length(child_address_length)?;
    Ok((children_count, child_address_length))
}

/// Encodes a `(childrenCount, childAddressLength)` pair into its single
/// compressed-unsigned-long wire form.
pub fn encode_children_header(children_count: u16, child_address_length: u8) -> Vec<u8> {
    debug_assert!((1..=8).contains(&child_address_length));
    let i = ((children_count as u64) << 3) | (child_address_length as u64 - 1);
    encode(i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn cursor(bytes: &[u8]) -> ByteCursor {
        ByteCursor::new(Arc::new(bytes.to_vec()))
    }

    fn roundtrip(value: u64) {
        let bytes = encode(value);
        let mut c = cursor(&bytes);
        let decoded = decode(&mut c).unwrap();
        assert_eq!(decoded, value, "roundtrip failed for {value}");
        assert_eq!(c.position(), bytes.len(), "decode did not consume all bytes for {value}");
    }

    #[test]
    fn roundtrip_boundaries() {
        roundtrip(0);
        roundtrip(0x7F);
        roundtrip(0x80);
        roundtrip(0x3FFF);
        roundtrip(1u64 << 63);
        roundtrip(u64::MAX);
    }

    #[test]
    fn encode_is_minimal_length() {
        assert_eq!(encode(0).len(), 1);
        assert_eq!(encode(0x7f).len(), 1);
        assert_eq!(encode(0x80).len(), 2);
        assert_eq!(encode(u64::MAX).len(), MAX_ENCODED_LEN);
    }

    #[test]
    fn overflow_after_nine_bytes() {
        // nine bytes, none with the high bit set: never terminates.
        let bytes = [0u8; 9];
        let mut c = cursor(&bytes);
        assert!(matches!(decode(&mut c), Err(Error::Overflow)));
    }

    #[test]
    fn truncated_on_exhaustion() {
        let bytes = [0x00u8, 0x00];
        let mut c = cursor(&bytes);
        assert!(matches!(decode(&mut c), Err(Error::Truncated)));
    }

    #[test]
    fn children_header_roundtrip() {
        let bytes = encode_children_header(5, 2);
        let mut c = cursor(&bytes);
        let (count, len) = decode_children_header(&mut c).unwrap();
        assert_eq!(count, 5);
        assert_eq!(len, 2);
    }

    #[test]
    fn out_of_range_child_address_length_is_rejected() {
        // Unreachable through the packed header formula (which bounds the
        // field to [1, 8] by construction) but exercised directly against
        // the validation the decoder relies on, per spec scenario 3.
        assert!(matches!(validate_child_address_length(9), Err(Error::InvalidAddressLength(9))));
        assert!(matches!(validate_child_address_length(0), Err(Error::InvalidAddressLength(0))));
        assert!(validate_child_address_length(8).is_ok());
    }
}
