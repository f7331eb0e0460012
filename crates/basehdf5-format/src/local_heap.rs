//! HDF5 Local Heap: the per-group store of link names.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::allocation::{AllocationKind, FileAllocation};
use crate::error::FormatError;
use crate::fields::{check_range, ensure_len, pad8, read_length, read_offset, write_offset};

/// Initial data segment size of a new heap.
pub const INITIAL_DATA_SIZE: u64 = 88;

/// "No further free block" marker in a free block's link field.
const FREE_LIST_END: u64 = 1;

/// A local heap with its data segment loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalHeap {
    /// Address of the `HEAP` header.
    pub header_address: u64,
    /// Address of the data segment.
    pub data_segment_address: u64,
    /// Offset of the free block within the data segment.
    pub free_list_head_offset: u64,
    data: Vec<u8>,
    length_size: u8,
}

impl LocalHeap {
    /// Size of the heap header for the given field widths.
    pub fn header_size(offset_size: u8, length_size: u8) -> u64 {
        8 + 2 * u64::from(length_size) + u64::from(offset_size)
    }

    /// Parse the header at `offset` and load its data segment.
    pub fn parse(
        file_data: &[u8],
        offset: usize,
        offset_size: u8,
        length_size: u8,
    ) -> Result<LocalHeap, FormatError> {
        let ls = length_size as usize;
        ensure_len(file_data, offset, Self::header_size(offset_size, length_size) as usize)?;

        if &file_data[offset..offset + 4] != b"HEAP" {
            return Err(FormatError::InvalidLocalHeapSignature);
        }
        let version = file_data[offset + 4];
        if version != 0 {
            return Err(FormatError::InvalidLocalHeapVersion(version));
        }

        let mut pos = offset + 8;
        let data_segment_size = read_length(file_data, pos, length_size)?;
        pos += ls;
        let free_list_head_offset = read_length(file_data, pos, length_size)?;
        pos += ls;
        let data_segment_address = read_offset(file_data, pos, offset_size)?;

        check_range(data_segment_address, data_segment_size, file_data.len())?;
        let start = data_segment_address as usize;
        let data = file_data[start..start + data_segment_size as usize].to_vec();

        Ok(LocalHeap {
            header_address: offset as u64,
            data_segment_address,
            free_list_head_offset,
            data,
            length_size,
        })
    }

    /// Allocate a new heap holding only the empty name at offset 0.
    pub fn create(
        alloc: &mut FileAllocation,
        offset_size: u8,
        length_size: u8,
    ) -> Result<LocalHeap, FormatError> {
        let header_address = alloc.allocate(
            AllocationKind::LocalHeapHeader,
            Self::header_size(offset_size, length_size),
        )?;
        let data_segment_address = alloc.allocate(AllocationKind::LocalHeapData, INITIAL_DATA_SIZE)?;
        let mut heap = LocalHeap {
            header_address,
            data_segment_address,
            free_list_head_offset: 0,
            data: vec![0; INITIAL_DATA_SIZE as usize],
            length_size,
        };
        heap.write_free_block();
        heap.add_string("", alloc)?;
        Ok(heap)
    }

    /// Size of the data segment in bytes.
    pub fn data_segment_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The data segment contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Read the NUL-terminated string at `offset`.
    pub fn string_at(&self, offset: u64) -> Result<String, FormatError> {
        let size = self.data.len() as u64;
        if offset >= size {
            return Err(FormatError::LocalHeapOffsetOutOfRange { offset, size });
        }
        let tail = &self.data[offset as usize..];
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(FormatError::InconsistentSize {
                what: "unterminated local heap string at offset",
                value: offset,
            })?;
        String::from_utf8(tail[..end].to_vec()).map_err(|_| FormatError::InvalidStringEncoding("UTF-8"))
    }

    /// Append `s` and return its offset.
    ///
    /// When the free block is too small the data segment moves to a new,
    /// larger block; the old block stays allocated and unused.
    pub fn add_string(&mut self, s: &str, alloc: &mut FileAllocation) -> Result<u64, FormatError> {
        let ls = u64::from(self.length_size);
        let slot = pad8(s.len() + 1) as u64;
        let offset = self.free_list_head_offset;

        if offset + slot + 2 * ls > self.data_segment_size() {
            let mut new_size = self.data_segment_size() * 2;
            while offset + slot + 2 * ls > new_size {
                new_size *= 2;
            }
            let address = alloc.allocate(AllocationKind::LocalHeapData, new_size)?;
            debug!(
                "local heap {:#x}: data segment grows {} -> {} bytes, moved {:#x} -> {:#x}",
                self.header_address,
                self.data.len(),
                new_size,
                self.data_segment_address,
                address
            );
            self.data.resize(new_size as usize, 0);
            self.data_segment_address = address;
        }

        let start = offset as usize;
        let end = start + slot as usize;
        self.data[start..end].fill(0);
        self.data[start..start + s.len()].copy_from_slice(s.as_bytes());
        self.free_list_head_offset = offset + slot;
        self.write_free_block();
        Ok(offset)
    }

    fn write_free_block(&mut self) {
        let ls = self.length_size as usize;
        let at = self.free_list_head_offset as usize;
        let remaining = self.data_segment_size() - self.free_list_head_offset;
        LittleEndian::write_uint(&mut self.data[at..], FREE_LIST_END, ls);
        LittleEndian::write_uint(&mut self.data[at + ls..], remaining, ls);
    }

    /// Serialize the `HEAP` header.
    pub fn serialize_header(&self, offset_size: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::header_size(offset_size, self.length_size) as usize);
        buf.extend_from_slice(b"HEAP");
        buf.extend_from_slice(&[0, 0, 0, 0]);
        write_offset(&mut buf, self.data_segment_size(), self.length_size);
        write_offset(&mut buf, self.free_list_head_offset, self.length_size);
        write_offset(&mut buf, self.data_segment_address, offset_size);
        buf
    }
}
