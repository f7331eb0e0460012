//! Little-endian field helpers shared by every structure parser.
//!
//! HDF5 stores addresses ("offsets") and sizes ("lengths") in a width chosen
//! by the superblock, so most structures read them through these helpers
//! instead of fixed-width integer reads.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;

/// The all-ones address HDF5 uses for "not allocated".
pub const UNDEFINED_ADDRESS: u64 = u64::MAX;

/// Check that `needed` bytes are available at `offset`.
pub fn ensure_len(data: &[u8], offset: usize, needed: usize) -> Result<(), FormatError> {
    match offset.checked_add(needed) {
        Some(end) if end <= data.len() => Ok(()),
        _ => Err(FormatError::UnexpectedEof {
            expected: offset.saturating_add(needed),
            available: data.len(),
        }),
    }
}

/// Read an address of `size` bytes.
pub fn read_offset(data: &[u8], pos: usize, size: u8) -> Result<u64, FormatError> {
    match size {
        2 | 4 | 8 => {}
        _ => return Err(FormatError::InvalidOffsetSize(size)),
    }
    ensure_len(data, pos, size as usize)?;
    Ok(LittleEndian::read_uint(&data[pos..], size as usize))
}

/// Read a length of `size` bytes.
pub fn read_length(data: &[u8], pos: usize, size: u8) -> Result<u64, FormatError> {
    match size {
        2 | 4 | 8 => {}
        _ => return Err(FormatError::InvalidLengthSize(size)),
    }
    ensure_len(data, pos, size as usize)?;
    Ok(LittleEndian::read_uint(&data[pos..], size as usize))
}

/// Read an address, mapping the all-ones pattern to `None`.
pub fn read_address(data: &[u8], pos: usize, size: u8) -> Result<Option<u64>, FormatError> {
    let value = read_offset(data, pos, size)?;
    if is_undefined(data, pos, size) {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}

/// Check if all bytes of the field are 0xFF (undefined address).
pub fn is_undefined(data: &[u8], pos: usize, size: u8) -> bool {
    data.get(pos..pos + size as usize)
        .is_some_and(|s| s.iter().all(|&b| b == 0xFF))
}

/// Append an address or length of `size` bytes.
///
/// [`UNDEFINED_ADDRESS`] is written as all ones regardless of width.
pub fn write_offset(buf: &mut Vec<u8>, value: u64, size: u8) {
    let n = size as usize;
    if value == UNDEFINED_ADDRESS {
        buf.extend(std::iter::repeat(0xFF).take(n));
        return;
    }
    let mut tmp = [0u8; 8];
    LittleEndian::write_u64(&mut tmp, value);
    buf.extend_from_slice(&tmp[..n]);
}

/// Round up to next multiple of 8.
pub fn pad8(x: usize) -> usize {
    (x + 7) & !7
}

/// Check that `address..address + len` lies inside a file of `file_len` bytes.
pub fn check_range(address: u64, len: u64, file_len: usize) -> Result<(), FormatError> {
    let file_len = file_len as u64;
    match address.checked_add(len) {
        Some(end) if end <= file_len => Ok(()),
        _ => Err(FormatError::AddressOutOfBounds { address, file_len }),
    }
}
