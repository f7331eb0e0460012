//! File space allocation for the writer.
//!
//! Every block written to a new file gets its offset from [`FileAllocation`].
//! Allocation is a bump pointer, so live blocks never overlap; the block kind
//! only steers placement (raw data starts no earlier than
//! [`MIN_RAW_DATA_OFFSET`], matching the layout the reference library
//! produces for small files).

use log::trace;

use crate::error::FormatError;

/// Lowest offset for the first raw data block.
pub const MIN_RAW_DATA_OFFSET: u64 = 2048;

/// What a block holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationKind {
    Superblock,
    ObjectHeader,
    BTree,
    SymbolNode,
    LocalHeapHeader,
    LocalHeapData,
    GlobalHeap,
    Continuation,
    RawData,
}

/// One allocated block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub kind: AllocationKind,
    pub offset: u64,
    pub size: u64,
}

impl Allocation {
    /// One past the last byte of the block.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// True when the two blocks share at least one byte.
    pub fn overlaps(&self, other: &Allocation) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Monotonic allocator over the file address space.
#[derive(Debug, Clone, Default)]
pub struct FileAllocation {
    next: u64,
    blocks: Vec<Allocation>,
}

impl FileAllocation {
    /// An empty file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `size` bytes for a block of `kind` and return its offset.
    pub fn allocate(&mut self, kind: AllocationKind, size: u64) -> Result<u64, FormatError> {
        if kind == AllocationKind::RawData
            && !self.blocks.iter().any(|b| b.kind == AllocationKind::RawData)
        {
            self.next = self.next.max(MIN_RAW_DATA_OFFSET);
        }
        let offset = self.next;
        let end = offset.checked_add(size).ok_or(FormatError::InconsistentSize {
            what: "allocation size",
            value: size,
        })?;
        self.next = end;
        self.blocks.push(Allocation { kind, offset, size });
        trace!("allocated {kind:?} at {offset:#x} ({size} bytes)");
        Ok(offset)
    }

    /// End of the last allocated block; the file's end-of-file address.
    pub fn end_of_file(&self) -> u64 {
        self.next
    }

    /// All blocks in allocation order.
    pub fn allocations(&self) -> &[Allocation] {
        &self.blocks
    }

    /// The first block of `kind`, if any.
    pub fn first_of(&self, kind: AllocationKind) -> Option<&Allocation> {
        self.blocks.iter().find(|b| b.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_contiguous_until_raw_data() {
        let mut a = FileAllocation::new();
        assert_eq!(a.allocate(AllocationKind::Superblock, 96).unwrap(), 0);
        assert_eq!(a.allocate(AllocationKind::ObjectHeader, 40).unwrap(), 96);
        assert_eq!(a.allocate(AllocationKind::RawData, 4).unwrap(), MIN_RAW_DATA_OFFSET);
        // later raw blocks follow directly
        assert_eq!(a.allocate(AllocationKind::RawData, 8).unwrap(), 2052);
        assert_eq!(a.allocate(AllocationKind::GlobalHeap, 4096).unwrap(), 2060);
        assert_eq!(a.end_of_file(), 2060 + 4096);
    }

    #[test]
    fn raw_data_past_threshold_is_not_moved_back() {
        let mut a = FileAllocation::new();
        a.allocate(AllocationKind::GlobalHeap, 4096).unwrap();
        assert_eq!(a.allocate(AllocationKind::RawData, 1).unwrap(), 4096);
    }

    #[test]
    fn zero_sized_blocks() {
        let mut a = FileAllocation::new();
        let x = a.allocate(AllocationKind::RawData, 0).unwrap();
        let y = a.allocate(AllocationKind::RawData, 0).unwrap();
        assert_eq!(x, y);
        assert!(!a.allocations()[0].overlaps(&a.allocations()[1]));
    }

    #[test]
    fn overflow_is_an_error() {
        let mut a = FileAllocation::new();
        a.allocate(AllocationKind::RawData, u64::MAX - 4096).unwrap();
        assert!(a.allocate(AllocationKind::RawData, u64::MAX).is_err());
    }

    #[test]
    fn first_of_kind() {
        let mut a = FileAllocation::new();
        a.allocate(AllocationKind::Superblock, 96).unwrap();
        a.allocate(AllocationKind::BTree, 544).unwrap();
        assert_eq!(a.first_of(AllocationKind::BTree).map(|b| b.offset), Some(96));
        assert!(a.first_of(AllocationKind::GlobalHeap).is_none());
    }
}
