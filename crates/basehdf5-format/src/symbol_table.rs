//! HDF5 Symbol Table Message, Symbol Table Entry and Symbol Table Node (SNOD).

use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use crate::error::FormatError;
use crate::fields::{ensure_len, read_offset, write_offset};

/// Entry cache type: nothing cached.
pub const CACHE_NONE: u32 = 0;
/// Entry cache type: the scratch pad holds the group's B-tree and heap.
pub const CACHE_GROUP: u32 = 1;

/// Symbol Table message (type 0x0011) found in v1 group object headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTableMessage {
    /// Address of B-tree v1 (type 0) for this group.
    pub btree_address: u64,
    /// Address of the local heap for this group.
    pub local_heap_address: u64,
}

impl SymbolTableMessage {
    /// Parse a Symbol Table message from raw message data bytes.
    pub fn parse(data: &[u8], offset_size: u8) -> Result<SymbolTableMessage, FormatError> {
        let os = offset_size as usize;
        ensure_len(data, 0, os * 2)?;
        Ok(SymbolTableMessage {
            btree_address: read_offset(data, 0, offset_size)?,
            local_heap_address: read_offset(data, os, offset_size)?,
        })
    }

    pub fn serialize(&self, offset_size: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 * offset_size as usize);
        write_offset(&mut buf, self.btree_address, offset_size);
        write_offset(&mut buf, self.local_heap_address, offset_size);
        buf
    }
}

/// A single entry in a Symbol Table Node (SNOD) or the superblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTableEntry {
    /// Byte offset of the link name in the local heap.
    pub link_name_offset: u64,
    /// Address of the child object's header.
    pub object_header_address: u64,
    /// Cache type: 0=none, 1=group, 2=symbolic link.
    pub cache_type: u32,
    /// 16-byte scratch pad (cached data).
    pub scratch_pad: [u8; 16],
}

impl SymbolTableEntry {
    /// Encoded size of one entry.
    pub fn size(offset_size: u8) -> usize {
        2 * offset_size as usize + 24
    }

    /// An entry for a dataset or other non-group object.
    pub fn object(link_name_offset: u64, object_header_address: u64) -> Self {
        Self {
            link_name_offset,
            object_header_address,
            cache_type: CACHE_NONE,
            scratch_pad: [0; 16],
        }
    }

    /// An entry for a group, caching its B-tree and local heap addresses.
    pub fn group(
        link_name_offset: u64,
        object_header_address: u64,
        table: SymbolTableMessage,
        offset_size: u8,
    ) -> Self {
        let mut scratch_pad = [0u8; 16];
        let os = offset_size as usize;
        LittleEndian::write_uint(&mut scratch_pad[..os], table.btree_address, os);
        LittleEndian::write_uint(&mut scratch_pad[os..2 * os], table.local_heap_address, os);
        Self {
            link_name_offset,
            object_header_address,
            cache_type: CACHE_GROUP,
            scratch_pad,
        }
    }

    /// Parse one entry at `pos`.
    pub fn parse(data: &[u8], pos: usize, offset_size: u8) -> Result<SymbolTableEntry, FormatError> {
        let os = offset_size as usize;
        ensure_len(data, pos, Self::size(offset_size))?;
        let link_name_offset = read_offset(data, pos, offset_size)?;
        let object_header_address = read_offset(data, pos + os, offset_size)?;
        let cache_type = LittleEndian::read_u32(&data[pos + 2 * os..]);
        let reserved = LittleEndian::read_u32(&data[pos + 2 * os + 4..]);
        if reserved != 0 {
            warn!("symbol table entry at {pos:#x}: reserved field is {reserved:#x}");
        }
        let mut scratch_pad = [0u8; 16];
        scratch_pad.copy_from_slice(&data[pos + 2 * os + 8..pos + 2 * os + 24]);
        Ok(SymbolTableEntry {
            link_name_offset,
            object_header_address,
            cache_type,
            scratch_pad,
        })
    }

    pub fn serialize(&self, buf: &mut Vec<u8>, offset_size: u8) {
        write_offset(buf, self.link_name_offset, offset_size);
        write_offset(buf, self.object_header_address, offset_size);
        buf.extend_from_slice(&self.cache_type.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&self.scratch_pad);
    }

    /// The cached B-tree and heap addresses when this entry is a group.
    pub fn cached_group(&self, offset_size: u8) -> Option<SymbolTableMessage> {
        if self.cache_type != CACHE_GROUP {
            return None;
        }
        let os = offset_size as usize;
        Some(SymbolTableMessage {
            btree_address: LittleEndian::read_uint(&self.scratch_pad[..os], os),
            local_heap_address: LittleEndian::read_uint(&self.scratch_pad[os..2 * os], os),
        })
    }
}

/// A parsed Symbol Table Node (SNOD).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTableNode {
    /// The symbol table entries.
    pub entries: Vec<SymbolTableEntry>,
}

impl SymbolTableNode {
    /// Size of a node block holding up to `2 * leaf_k` entries.
    pub fn block_size(leaf_k: u16, offset_size: u8) -> usize {
        8 + 2 * leaf_k as usize * SymbolTableEntry::size(offset_size)
    }

    /// Parse a Symbol Table Node at the given offset in the file data.
    pub fn parse(
        file_data: &[u8],
        offset: usize,
        offset_size: u8,
    ) -> Result<SymbolTableNode, FormatError> {
        // signature(4) + version(1) + reserved(1) + number_of_symbols(2) = 8
        ensure_len(file_data, offset, 8)?;

        if &file_data[offset..offset + 4] != b"SNOD" {
            return Err(FormatError::InvalidSymbolTableNodeSignature);
        }

        let version = file_data[offset + 4];
        if version != 1 {
            return Err(FormatError::InvalidSymbolTableNodeVersion(version));
        }

        let num_symbols = LittleEndian::read_u16(&file_data[offset + 6..]) as usize;
        let entry_size = SymbolTableEntry::size(offset_size);
        ensure_len(file_data, offset + 8, num_symbols * entry_size)?;

        let entries = (0..num_symbols)
            .map(|i| SymbolTableEntry::parse(file_data, offset + 8 + i * entry_size, offset_size))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SymbolTableNode { entries })
    }

    /// Serialize into a zero-filled block of [`Self::block_size`] bytes.
    pub fn serialize(&self, leaf_k: u16, offset_size: u8) -> Vec<u8> {
        let size = Self::block_size(leaf_k, offset_size);
        let mut buf = Vec::with_capacity(size);
        buf.extend_from_slice(b"SNOD");
        buf.push(1);
        buf.push(0);
        buf.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        for entry in &self.entries {
            entry.serialize(&mut buf, offset_size);
        }
        buf.resize(size.max(buf.len()), 0);
        buf
    }
}
