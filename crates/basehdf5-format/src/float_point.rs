//! IEEE-754 floating-point value codec.
//!
//! Only the binary32 and binary64 interchange formats are handled. Other
//! declared sizes are rejected rather than approximated.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::byte_order::DatatypeByteOrder;
use crate::error::FormatError;

fn check(size: u32, byte_order: DatatypeByteOrder) -> Result<(), FormatError> {
    if size != 4 && size != 8 {
        return Err(FormatError::UnsupportedFloatSize(size));
    }
    if byte_order == DatatypeByteOrder::Vax {
        return Err(FormatError::UnsupportedByteOrder);
    }
    Ok(())
}

/// Decode a 4- or 8-byte float.
pub fn decode(bytes: &[u8], size: u32, byte_order: DatatypeByteOrder) -> Result<f64, FormatError> {
    check(size, byte_order)?;
    if bytes.len() != size as usize {
        return Err(FormatError::ValueSizeMismatch {
            expected: size as usize,
            actual: bytes.len(),
        });
    }
    let be = byte_order == DatatypeByteOrder::BigEndian;
    Ok(match (size, be) {
        (4, false) => f64::from(LittleEndian::read_f32(bytes)),
        (4, true) => f64::from(BigEndian::read_f32(bytes)),
        (_, false) => LittleEndian::read_f64(bytes),
        (_, true) => BigEndian::read_f64(bytes),
    })
}

/// Encode a value as a 4- or 8-byte float.
///
/// Narrowing to 4 bytes rounds to the nearest `f32`.
pub fn encode(value: f64, size: u32, byte_order: DatatypeByteOrder) -> Result<Vec<u8>, FormatError> {
    check(size, byte_order)?;
    let mut out = vec![0u8; size as usize];
    let be = byte_order == DatatypeByteOrder::BigEndian;
    match (size, be) {
        (4, false) => LittleEndian::write_f32(&mut out, value as f32),
        (4, true) => BigEndian::write_f32(&mut out, value as f32),
        (_, false) => LittleEndian::write_f64(&mut out, value),
        (_, true) => BigEndian::write_f64(&mut out, value),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f64_both_orders() {
        let le = encode(1.5, 8, DatatypeByteOrder::LittleEndian).unwrap();
        assert_eq!(le, 1.5f64.to_le_bytes());
        let be = encode(1.5, 8, DatatypeByteOrder::BigEndian).unwrap();
        assert_eq!(be, 1.5f64.to_be_bytes());
        assert_eq!(decode(&be, 8, DatatypeByteOrder::BigEndian).unwrap(), 1.5);
    }

    #[test]
    fn f32_narrowing() {
        let b = encode(0.1, 4, DatatypeByteOrder::LittleEndian).unwrap();
        assert_eq!(b, 0.1f32.to_le_bytes());
        let v = decode(&b, 4, DatatypeByteOrder::LittleEndian).unwrap();
        assert_eq!(v, f64::from(0.1f32));
    }

    #[test]
    fn rejects_other_sizes() {
        assert_eq!(
            encode(1.0, 2, DatatypeByteOrder::LittleEndian),
            Err(FormatError::UnsupportedFloatSize(2))
        );
        assert_eq!(
            decode(&[0; 16], 16, DatatypeByteOrder::LittleEndian),
            Err(FormatError::UnsupportedFloatSize(16))
        );
    }

    #[test]
    fn window_must_match_size() {
        assert!(matches!(
            decode(&[0; 4], 8, DatatypeByteOrder::LittleEndian),
            Err(FormatError::ValueSizeMismatch {
                expected: 8,
                actual: 4
            })
        ));
    }

    #[test]
    fn nan_survives() {
        let b = encode(f64::NAN, 8, DatatypeByteOrder::BigEndian).unwrap();
        assert!(decode(&b, 8, DatatypeByteOrder::BigEndian).unwrap().is_nan());
    }
}
