//! Fixed-point value codec.
//!
//! A fixed-point field is `size` bytes wide and holds `precision` significant
//! bits starting `offset` bits above the least significant bit. Widths are
//! not limited to the machine sizes: a 12-bit value in a 2-byte field or a
//! 40-bit value in a 5-byte field decode the same way.

use byteorder::{ByteOrder, LittleEndian};

use crate::byte_order::{reorder, DatatypeByteOrder};
use crate::error::FormatError;

/// Layout of one fixed-point field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPointLayout {
    /// Field size in bytes (1..=16).
    pub size: u32,
    /// Byte order of the stored field.
    pub byte_order: DatatypeByteOrder,
    /// Two's complement when true.
    pub signed: bool,
    /// Bit offset of the first significant bit.
    pub bit_offset: u16,
    /// Number of significant bits (1..=64).
    pub bit_precision: u16,
}

/// A decoded fixed-point value, keeping the signedness of its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedPointValue {
    Signed(i64),
    Unsigned(u64),
}

impl FixedPointLayout {
    /// A plain integer occupying the whole field.
    pub fn integer(size: u32, signed: bool, byte_order: DatatypeByteOrder) -> Self {
        Self {
            size,
            byte_order,
            signed,
            bit_offset: 0,
            bit_precision: (size * 8) as u16,
        }
    }

    fn check(&self) -> Result<(), FormatError> {
        let ok = (1..=16).contains(&self.size)
            && (1..=64).contains(&self.bit_precision)
            && u32::from(self.bit_offset) + u32::from(self.bit_precision) <= self.size * 8;
        if !ok {
            return Err(FormatError::UnsupportedPrecision {
                size: self.size,
                precision: self.bit_precision,
                offset: self.bit_offset,
            });
        }
        if self.byte_order == DatatypeByteOrder::Vax {
            return Err(FormatError::UnsupportedByteOrder);
        }
        Ok(())
    }

    fn mask(&self) -> u128 {
        (1u128 << self.bit_precision) - 1
    }

    /// Decode a field.
    pub fn decode(&self, bytes: &[u8]) -> Result<FixedPointValue, FormatError> {
        self.check()?;
        let size = self.size as usize;
        if bytes.len() != size {
            return Err(FormatError::ValueSizeMismatch {
                expected: size,
                actual: bytes.len(),
            });
        }
        let le = reorder(bytes, self.byte_order, DatatypeByteOrder::LittleEndian);
        let raw = LittleEndian::read_uint128(&le, size);
        let bits = (raw >> self.bit_offset) & self.mask();
        let value = if self.signed {
            let shift = 128 - u32::from(self.bit_precision);
            FixedPointValue::Signed((((bits << shift) as i128) >> shift) as i64)
        } else {
            FixedPointValue::Unsigned(bits as u64)
        };
        Ok(value)
    }

    /// Encode a signed integer.
    pub fn encode_signed(&self, value: i64) -> Result<Vec<u8>, FormatError> {
        self.check()?;
        let p = u32::from(self.bit_precision);
        let fits = if self.signed {
            let min = -(1i128 << (p - 1));
            let max = (1i128 << (p - 1)) - 1;
            (min..=max).contains(&i128::from(value))
        } else {
            value >= 0 && (value as u128) <= self.mask()
        };
        if !fits {
            return Err(FormatError::ValueOutOfRange {
                value: value.to_string(),
                precision: self.bit_precision,
            });
        }
        Ok(self.place(value as i128 as u128))
    }

    /// Encode an unsigned integer.
    pub fn encode_unsigned(&self, value: u64) -> Result<Vec<u8>, FormatError> {
        self.check()?;
        let p = u32::from(self.bit_precision);
        let max = if self.signed {
            (1u128 << (p - 1)) - 1
        } else {
            self.mask()
        };
        if u128::from(value) > max {
            return Err(FormatError::ValueOutOfRange {
                value: value.to_string(),
                precision: self.bit_precision,
            });
        }
        Ok(self.place(u128::from(value)))
    }

    fn place(&self, bits: u128) -> Vec<u8> {
        let size = self.size as usize;
        let raw = (bits & self.mask()) << self.bit_offset;
        let mut le = vec![0u8; size];
        LittleEndian::write_uint128(&mut le, raw, size);
        reorder(&le, DatatypeByteOrder::LittleEndian, self.byte_order)
    }
}
