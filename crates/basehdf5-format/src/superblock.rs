//! HDF5 Superblock parsing and serialization for versions 0 and 1.
//!
//! Both versions end with the root group's symbol table entry; version 1
//! adds the indexed storage K value and two reserved bytes.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::error::FormatError;
use crate::fields::{ensure_len, read_address, read_offset, write_offset, UNDEFINED_ADDRESS};
use crate::signature::HDF5_SIGNATURE;
use crate::symbol_table::SymbolTableEntry;

/// Default group leaf node K.
pub const DEFAULT_GROUP_LEAF_K: u16 = 4;
/// Default group internal node K.
pub const DEFAULT_GROUP_INTERNAL_K: u16 = 16;
/// Default indexed storage internal node K (version 1 only).
pub const DEFAULT_INDEXED_STORAGE_K: u16 = 32;

/// Parsed HDF5 superblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Superblock version (0 or 1).
    pub version: u8,
    /// Size of offsets in bytes (2, 4, or 8).
    pub offset_size: u8,
    /// Size of lengths in bytes (2, 4, or 8).
    pub length_size: u8,
    /// Group leaf node K.
    pub group_leaf_node_k: u16,
    /// Group internal node K.
    pub group_internal_node_k: u16,
    /// Indexed storage internal node K (v1 only).
    pub indexed_storage_internal_node_k: Option<u16>,
    /// File consistency flags.
    pub consistency_flags: u32,
    /// File base address.
    pub base_address: u64,
    /// Free space info address, if any.
    pub free_space_address: Option<u64>,
    /// End-of-file address.
    pub eof_address: u64,
    /// Driver info block address, if any.
    pub driver_info_address: Option<u64>,
    /// Symbol table entry of the root group.
    pub root_group_entry: SymbolTableEntry,
}

fn validate_sizes(offset_size: u8, length_size: u8) -> Result<(), FormatError> {
    if !matches!(offset_size, 2 | 4 | 8) {
        return Err(FormatError::InvalidOffsetSize(offset_size));
    }
    if !matches!(length_size, 2 | 4 | 8) {
        return Err(FormatError::InvalidLengthSize(length_size));
    }
    Ok(())
}

impl Superblock {
    /// Encoded size for `version` with `offset_size`-byte addresses.
    pub fn size(version: u8, offset_size: u8) -> usize {
        let fixed = if version == 0 { 24 } else { 28 };
        fixed + 4 * offset_size as usize + SymbolTableEntry::size(offset_size)
    }

    /// Parse a superblock from `data` starting at `signature_offset`.
    ///
    /// The signature must be present at the given offset.
    pub fn parse(data: &[u8], signature_offset: usize) -> Result<Superblock, FormatError> {
        ensure_len(data, signature_offset, 9)?;
        let d = &data[signature_offset..];

        if d[..8] != HDF5_SIGNATURE {
            return Err(FormatError::SignatureNotFound);
        }

        let version = d[8];
        if version > 1 {
            return Err(FormatError::UnsupportedVersion(version));
        }

        // sig(8) + version(1) + free_space_ver(1) + root_grp_ver(1) + reserved(1)
        // + shared_hdr_ver(1) + offset_size(1) + length_size(1) + reserved(1)
        // + group_leaf_k(2) + group_internal_k(2), then for v1
        // indexed_storage_k(2) + reserved(2), then consistency_flags(4)
        ensure_len(d, 0, 24)?;
        let offset_size = d[13];
        let length_size = d[14];
        validate_sizes(offset_size, length_size)?;
        ensure_len(d, 0, Self::size(version, offset_size))?;

        let group_leaf_node_k = LittleEndian::read_u16(&d[16..18]);
        let group_internal_node_k = LittleEndian::read_u16(&d[18..20]);
        let (indexed_storage_internal_node_k, mut pos) = if version == 1 {
            (Some(LittleEndian::read_u16(&d[20..22])), 24)
        } else {
            (None, 20)
        };
        let consistency_flags = LittleEndian::read_u32(&d[pos..pos + 4]);
        pos += 4;

        let os = offset_size as usize;
        let base_address = read_offset(d, pos, offset_size)?;
        pos += os;
        let free_space_address = read_address(d, pos, offset_size)?;
        pos += os;
        let eof_address = read_offset(d, pos, offset_size)?;
        pos += os;
        let driver_info_address = read_address(d, pos, offset_size)?;
        pos += os;

        let root_group_entry = SymbolTableEntry::parse(d, pos, offset_size)?;

        debug!(
            "superblock v{version} at {signature_offset:#x}: offsets {offset_size}, lengths {length_size}, \
             root header {:#x}, eof {eof_address:#x}",
            root_group_entry.object_header_address
        );

        Ok(Superblock {
            version,
            offset_size,
            length_size,
            group_leaf_node_k,
            group_internal_node_k,
            indexed_storage_internal_node_k,
            consistency_flags,
            base_address,
            free_space_address,
            eof_address,
            driver_info_address,
            root_group_entry,
        })
    }

    /// Serialize the superblock, root group entry included.
    pub fn serialize(&self) -> Vec<u8> {
        let os = self.offset_size;
        let mut buf = Vec::with_capacity(Self::size(self.version, os));
        buf.extend_from_slice(&HDF5_SIGNATURE);
        buf.push(self.version);
        // free space, root group and shared header versions, reserved
        buf.extend_from_slice(&[0, 0, 0, 0]);
        buf.push(os);
        buf.push(self.length_size);
        buf.push(0);
        buf.extend_from_slice(&self.group_leaf_node_k.to_le_bytes());
        buf.extend_from_slice(&self.group_internal_node_k.to_le_bytes());
        if self.version == 1 {
            let k = self
                .indexed_storage_internal_node_k
                .unwrap_or(DEFAULT_INDEXED_STORAGE_K);
            buf.extend_from_slice(&k.to_le_bytes());
            buf.extend_from_slice(&[0, 0]);
        }
        buf.extend_from_slice(&self.consistency_flags.to_le_bytes());
        write_offset(&mut buf, self.base_address, os);
        write_offset(&mut buf, self.free_space_address.unwrap_or(UNDEFINED_ADDRESS), os);
        write_offset(&mut buf, self.eof_address, os);
        write_offset(&mut buf, self.driver_info_address.unwrap_or(UNDEFINED_ADDRESS), os);
        self.root_group_entry.serialize(&mut buf, os);
        buf
    }
}
