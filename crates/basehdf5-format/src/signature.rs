//! HDF5 file signature (magic bytes) detection.

use log::debug;

use crate::error::FormatError;

/// The 8-byte HDF5 magic signature.
pub const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1A, b'\n'];

/// Offsets where a superblock may start: 0, then 512 doubling upwards.
///
/// Files with a user block put the superblock after it, so the signature
/// can sit at any of these offsets that lie inside the file.
pub fn candidate_offsets(file_len: usize) -> impl Iterator<Item = usize> {
    std::iter::once(0)
        .chain(std::iter::successors(Some(512usize), |o| o.checked_mul(2)))
        .take_while(move |o| o.saturating_add(HDF5_SIGNATURE.len()) <= file_len)
}

/// True when the signature starts at `offset`.
pub fn has_signature_at(data: &[u8], offset: usize) -> bool {
    data.get(offset..offset + HDF5_SIGNATURE.len()) == Some(&HDF5_SIGNATURE[..])
}

/// Search for the HDF5 signature and return the first offset holding it.
pub fn find_signature(data: &[u8]) -> Result<usize, FormatError> {
    let offset = candidate_offsets(data.len())
        .find(|&o| has_signature_at(data, o))
        .ok_or(FormatError::SignatureNotFound)?;
    if offset > 0 {
        debug!("HDF5 signature found after a {offset}-byte user block");
    }
    Ok(offset)
}
