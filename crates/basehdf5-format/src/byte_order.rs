//! Byte order of stored numeric values.

/// Byte order of numeric data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatatypeByteOrder {
    LittleEndian,
    BigEndian,
    Vax,
}

impl DatatypeByteOrder {
    /// The byte order of the running machine.
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            DatatypeByteOrder::BigEndian
        } else {
            DatatypeByteOrder::LittleEndian
        }
    }
}

/// Reverse `bytes` in place.
///
/// Applying it twice restores the original bytes.
pub fn swap(bytes: &mut [u8]) {
    bytes.reverse();
}

/// Copy `bytes` stored in `from` order into `to` order.
///
/// Orders that agree copy unchanged; little and big endian differ by a full
/// reversal.
pub fn reorder(bytes: &[u8], from: DatatypeByteOrder, to: DatatypeByteOrder) -> Vec<u8> {
    let mut out = bytes.to_vec();
    if from != to {
        swap(&mut out);
    }
    out
}
