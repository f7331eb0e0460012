//! HDF5 Global Heap: collections of variable-length payloads.
//!
//! Reading is two-phase. A [`GlobalHeap`] starts empty, the caller resolves
//! every collection a value set refers to, and decoding then borrows the heap
//! immutably through [`HeapAccess`]. Writing appends to the current open
//! collection and opens a new page when an object does not fit.

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};

use crate::allocation::{AllocationKind, FileAllocation};
use crate::error::FormatError;
use crate::fields::{check_range, ensure_len, pad8, read_length, read_offset, write_offset};

/// Magic signature for global heap collections.
const GCOL_SIGNATURE: [u8; 4] = *b"GCOL";

/// Minimum size of a collection page.
pub const COLLECTION_PAGE_SIZE: u64 = 4096;

/// Address of one object: the collection it lives in and its index there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalHeapId {
    pub collection_address: u64,
    pub index: u32,
}

/// Read access to resolved global heap objects.
pub trait HeapAccess {
    fn get_object(&self, id: GlobalHeapId) -> Result<&[u8], FormatError>;
}

/// Append access used while encoding variable-length values.
pub trait HeapStore {
    fn put_object(&mut self, data: &[u8]) -> Result<GlobalHeapId, FormatError>;
}

/// A single object within a global heap collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalHeapObject {
    /// Object index (1-based; 0 is the free space marker).
    pub index: u16,
    /// Reference count.
    pub reference_count: u16,
    /// Object data.
    pub data: Vec<u8>,
}

/// A parsed or in-progress global heap collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalHeapCollection {
    /// File address of the `GCOL` signature.
    pub address: u64,
    /// Total size of this collection including header.
    pub collection_size: u64,
    /// Objects within this collection.
    pub objects: Vec<GlobalHeapObject>,
}

fn object_header_size(length_size: u8) -> u64 {
    8 + u64::from(length_size)
}

impl GlobalHeapCollection {
    /// Parse a global heap collection at the given offset in the file data.
    pub fn parse(
        file_data: &[u8],
        offset: usize,
        length_size: u8,
    ) -> Result<GlobalHeapCollection, FormatError> {
        // signature(4) + version(1) + reserved(3) + collection_size(length_size)
        let header_size = 8 + length_size as usize;
        ensure_len(file_data, offset, header_size)?;

        if file_data[offset..offset + 4] != GCOL_SIGNATURE {
            return Err(FormatError::InvalidGlobalHeapSignature);
        }

        let version = file_data[offset + 4];
        if version != 1 {
            return Err(FormatError::InvalidGlobalHeapVersion(version));
        }

        let collection_size = read_length(file_data, offset + 8, length_size)?;
        if collection_size < header_size as u64 {
            return Err(FormatError::InconsistentSize {
                what: "global heap collection size",
                value: collection_size,
            });
        }
        check_range(offset as u64, collection_size, file_data.len())?;
        let collection_end = offset + collection_size as usize;
        let obj_header_size = object_header_size(length_size) as usize;

        let mut pos = offset + header_size;
        let mut objects = Vec::new();

        while pos + obj_header_size <= collection_end {
            let object_index = LittleEndian::read_u16(&file_data[pos..]);
            if object_index == 0 {
                break;
            }

            let reference_count = LittleEndian::read_u16(&file_data[pos + 2..]);
            let object_size = read_length(file_data, pos + 8, length_size)?;
            pos += obj_header_size;
            check_range(pos as u64, object_size, collection_end)?;
            let data = file_data[pos..pos + object_size as usize].to_vec();

            objects.push(GlobalHeapObject {
                index: object_index,
                reference_count,
                data,
            });

            pos += pad8(object_size as usize);
        }

        trace!(
            "global heap collection {offset:#x}: {} objects in {collection_size} bytes",
            objects.len()
        );
        Ok(GlobalHeapCollection {
            address: offset as u64,
            collection_size,
            objects,
        })
    }

    /// Get an object by its index.
    pub fn get_object(&self, index: u16) -> Option<&GlobalHeapObject> {
        self.objects.iter().find(|o| o.index == index)
    }

    /// Bytes taken by the header and all objects, free-space object excluded.
    pub fn used_size(&self, length_size: u8) -> u64 {
        let header = 8 + u64::from(length_size);
        self.objects.iter().fold(header, |acc, o| {
            acc + object_header_size(length_size) + pad8(o.data.len()) as u64
        })
    }

    /// Serialize to exactly `collection_size` bytes.
    ///
    /// The remaining space is described by a free-space object (index 0)
    /// whose size field counts its own header.
    pub fn serialize(&self, length_size: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.collection_size as usize);
        buf.extend_from_slice(&GCOL_SIGNATURE);
        buf.push(1);
        buf.extend_from_slice(&[0u8; 3]);
        write_offset(&mut buf, self.collection_size, length_size);

        for obj in &self.objects {
            buf.extend_from_slice(&obj.index.to_le_bytes());
            buf.extend_from_slice(&obj.reference_count.to_le_bytes());
            buf.extend_from_slice(&[0u8; 4]);
            write_offset(&mut buf, obj.data.len() as u64, length_size);
            buf.extend_from_slice(&obj.data);
            buf.resize(pad8(buf.len()), 0);
        }

        let free = self.collection_size - buf.len() as u64;
        if free >= object_header_size(length_size) {
            buf.extend_from_slice(&[0u8; 8]);
            write_offset(&mut buf, free, length_size);
        }
        buf.resize(self.collection_size as usize, 0);
        buf
    }
}

/// The set of collections known to a session, keyed by address.
#[derive(Debug, Clone)]
pub struct GlobalHeap {
    length_size: u8,
    collections: BTreeMap<u64, GlobalHeapCollection>,
    current: Option<u64>,
}

impl GlobalHeap {
    /// An empty heap descriptor; nothing is loaded until resolved.
    pub fn new(length_size: u8) -> Self {
        Self {
            length_size,
            collections: BTreeMap::new(),
            current: None,
        }
    }

    /// Load the collection at `address` unless it is already known.
    pub fn resolve(&mut self, file_data: &[u8], address: u64) -> Result<(), FormatError> {
        if self.collections.contains_key(&address) {
            return Ok(());
        }
        check_range(address, 0, file_data.len())?;
        let coll = GlobalHeapCollection::parse(file_data, address as usize, self.length_size)?;
        debug!(
            "resolved global heap collection {address:#x} ({} objects)",
            coll.objects.len()
        );
        self.collections.insert(address, coll);
        Ok(())
    }

    /// True when `address` has been resolved or written.
    pub fn is_resolved(&self, address: u64) -> bool {
        self.collections.contains_key(&address)
    }

    /// All collections in address order.
    pub fn collections(&self) -> impl Iterator<Item = &GlobalHeapCollection> {
        self.collections.values()
    }

    /// Append an object, opening a new page when the current one is full.
    pub fn put(
        &mut self,
        alloc: &mut FileAllocation,
        data: &[u8],
    ) -> Result<GlobalHeapId, FormatError> {
        let ls = self.length_size;
        let needed = object_header_size(ls) + pad8(data.len()) as u64;

        let target = match self.current.and_then(|a| self.collections.get(&a)) {
            Some(c)
                if c.used_size(ls) + needed + object_header_size(ls) <= c.collection_size
                    && c.objects.len() < usize::from(u16::MAX) =>
            {
                c.address
            }
            _ => self.open_page(alloc, needed)?,
        };

        let coll = self
            .collections
            .get_mut(&target)
            .ok_or(FormatError::GlobalHeapCollectionNotLoaded(target))?;
        let index = coll.objects.len() as u16 + 1;
        coll.objects.push(GlobalHeapObject {
            index,
            reference_count: 1,
            data: data.to_vec(),
        });
        trace!(
            "global heap object {index} in {target:#x} ({} bytes)",
            data.len()
        );
        Ok(GlobalHeapId {
            collection_address: target,
            index: u32::from(index),
        })
    }

    fn open_page(&mut self, alloc: &mut FileAllocation, needed: u64) -> Result<u64, FormatError> {
        let ls = self.length_size;
        let minimum = 8 + u64::from(ls) + needed + object_header_size(ls);
        let size = COLLECTION_PAGE_SIZE.max(pad8(minimum as usize) as u64);
        let address = alloc.allocate(AllocationKind::GlobalHeap, size)?;
        debug!("opened global heap collection at {address:#x} ({size} bytes)");
        self.collections.insert(
            address,
            GlobalHeapCollection {
                address,
                collection_size: size,
                objects: Vec::new(),
            },
        );
        self.current = Some(address);
        Ok(address)
    }
}

impl HeapAccess for GlobalHeap {
    fn get_object(&self, id: GlobalHeapId) -> Result<&[u8], FormatError> {
        let coll = self
            .collections
            .get(&id.collection_address)
            .ok_or(FormatError::GlobalHeapCollectionNotLoaded(id.collection_address))?;
        u16::try_from(id.index)
            .ok()
            .and_then(|i| coll.get_object(i))
            .map(|o| o.data.as_slice())
            .ok_or(FormatError::GlobalHeapObjectNotFound {
                collection: id.collection_address,
                index: id.index,
            })
    }
}

/// A [`GlobalHeap`] paired with the allocator its new pages come from.
pub struct HeapWriter<'a> {
    pub heap: &'a mut GlobalHeap,
    pub alloc: &'a mut FileAllocation,
}

impl HeapStore for HeapWriter<'_> {
    fn put_object(&mut self, data: &[u8]) -> Result<GlobalHeapId, FormatError> {
        self.heap.put(self.alloc, data)
    }
}

/// Encode a variable-length element: `(length u32, collection, index u32)`.
pub fn encode_vl_reference(length: u32, id: GlobalHeapId, offset_size: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + offset_size as usize);
    buf.extend_from_slice(&length.to_le_bytes());
    write_offset(&mut buf, id.collection_address, offset_size);
    buf.extend_from_slice(&id.index.to_le_bytes());
    buf
}

/// Decode a variable-length element into its length and heap address.
pub fn decode_vl_reference(
    bytes: &[u8],
    offset_size: u8,
) -> Result<(u32, GlobalHeapId), FormatError> {
    let os = offset_size as usize;
    ensure_len(bytes, 0, 8 + os)?;
    let length = LittleEndian::read_u32(bytes);
    let collection_address = read_offset(bytes, 4, offset_size)?;
    let index = LittleEndian::read_u32(&bytes[4 + os..]);
    Ok((
        length,
        GlobalHeapId {
            collection_address,
            index,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a global heap collection with given objects.
    fn build_collection(objects: &[(u16, u16, &[u8])], length_size: u8) -> Vec<u8> {
        let mut coll = GlobalHeapCollection {
            address: 0,
            collection_size: 0,
            objects: objects
                .iter()
                .map(|(index, reference_count, data)| GlobalHeapObject {
                    index: *index,
                    reference_count: *reference_count,
                    data: data.to_vec(),
                })
                .collect(),
        };
        coll.collection_size = coll.used_size(length_size) + object_header_size(length_size);
        coll.serialize(length_size)
    }

    #[test]
    fn parse_collection_two_objects() {
        let data = build_collection(&[(1, 1, b"hello"), (2, 1, b"world!!!")], 8);
        let coll = GlobalHeapCollection::parse(&data, 0, 8).unwrap();
        assert_eq!(coll.objects.len(), 2);
        assert_eq!(coll.objects[0].index, 1);
        assert_eq!(coll.objects[0].data, b"hello");
        assert_eq!(coll.objects[1].index, 2);
        assert_eq!(coll.objects[1].data, b"world!!!");
    }

    #[test]
    fn get_object_by_index() {
        let data = build_collection(&[(1, 1, b"aaa"), (3, 2, b"bbb")], 8);
        let coll = GlobalHeapCollection::parse(&data, 0, 8).unwrap();
        let obj = coll.get_object(3).unwrap();
        assert_eq!(obj.data, b"bbb");
        assert_eq!(obj.reference_count, 2);
        assert!(coll.get_object(99).is_none());
    }

    #[test]
    fn free_space_terminates_parsing() {
        let data = build_collection(&[], 8);
        let coll = GlobalHeapCollection::parse(&data, 0, 8).unwrap();
        assert_eq!(coll.objects.len(), 0);
        // free-space object records its own header
        assert_eq!(LittleEndian::read_u64(&data[24..]), 16);
    }

    #[test]
    fn invalid_signature_and_version() {
        let mut data = build_collection(&[(1, 1, b"x")], 8);
        data[0] = b'X';
        assert_eq!(
            GlobalHeapCollection::parse(&data, 0, 8).unwrap_err(),
            FormatError::InvalidGlobalHeapSignature
        );
        let mut data = build_collection(&[(1, 1, b"x")], 8);
        data[4] = 2;
        assert_eq!(
            GlobalHeapCollection::parse(&data, 0, 8).unwrap_err(),
            FormatError::InvalidGlobalHeapVersion(2)
        );
    }

    #[test]
    fn object_size_past_collection() {
        let mut data = build_collection(&[(1, 1, b"x")], 8);
        data[24..32].copy_from_slice(&1000u64.to_le_bytes());
        assert!(matches!(
            GlobalHeapCollection::parse(&data, 0, 8),
            Err(FormatError::AddressOutOfBounds { .. })
        ));
    }

    #[test]
    fn parse_with_4byte_length() {
        let data = build_collection(&[(1, 1, b"test")], 4);
        let coll = GlobalHeapCollection::parse(&data, 0, 4).unwrap();
        assert_eq!(coll.objects.len(), 1);
        assert_eq!(coll.objects[0].data, b"test");
    }

    #[test]
    fn put_then_get() {
        let mut alloc = FileAllocation::new();
        let mut heap = GlobalHeap::new(8);
        let a = heap.put(&mut alloc, b"alpha").unwrap();
        let b = heap.put(&mut alloc, b"").unwrap();
        assert_eq!(a.collection_address, b.collection_address);
        assert_eq!((a.index, b.index), (1, 2));
        assert_eq!(heap.get_object(a).unwrap(), b"alpha");
        assert_eq!(heap.get_object(b).unwrap(), b"");
        assert_eq!(
            heap.get_object(GlobalHeapId { collection_address: a.collection_address, index: 9 }),
            Err(FormatError::GlobalHeapObjectNotFound { collection: a.collection_address, index: 9 })
        );
        assert_eq!(
            heap.get_object(GlobalHeapId { collection_address: 77, index: 1 }),
            Err(FormatError::GlobalHeapCollectionNotLoaded(77))
        );
    }

    #[test]
    fn full_page_opens_another() {
        let mut alloc = FileAllocation::new();
        let mut heap = GlobalHeap::new(8);
        let payload = vec![7u8; 1000];
        let ids: Vec<_> = (0..5).map(|_| heap.put(&mut alloc, &payload).unwrap()).collect();
        // 16 + 4 * (16 + 1000) + 16 fits in 4096, the fifth does not
        assert_eq!(ids[3].collection_address, ids[0].collection_address);
        assert_ne!(ids[4].collection_address, ids[0].collection_address);
        assert_eq!(ids[4].index, 1);
        assert_eq!(heap.collections().count(), 2);
        for id in ids {
            assert_eq!(heap.get_object(id).unwrap(), payload.as_slice());
        }
    }

    #[test]
    fn oversized_object_gets_its_own_page() {
        let mut alloc = FileAllocation::new();
        let mut heap = GlobalHeap::new(8);
        let big = vec![1u8; 5000];
        let id = heap.put(&mut alloc, &big).unwrap();
        let coll = heap.collections().next().unwrap();
        assert!(coll.collection_size >= 5000 + 48);
        assert_eq!(heap.get_object(id).unwrap().len(), 5000);
    }

    #[test]
    fn written_pages_resolve_on_read() {
        let mut alloc = FileAllocation::new();
        let mut heap = GlobalHeap::new(8);
        let id = heap.put(&mut alloc, b"persisted").unwrap();
        let mut file = vec![0u8; alloc.end_of_file() as usize];
        for c in heap.collections() {
            let bytes = c.serialize(8);
            let at = c.address as usize;
            file[at..at + bytes.len()].copy_from_slice(&bytes);
        }
        let mut reader = GlobalHeap::new(8);
        assert!(!reader.is_resolved(id.collection_address));
        reader.resolve(&file, id.collection_address).unwrap();
        assert_eq!(reader.get_object(id).unwrap(), b"persisted");
    }

    #[test]
    fn vl_reference_layout() {
        let id = GlobalHeapId { collection_address: 0x1000, index: 3 };
        let bytes = encode_vl_reference(5, id, 8);
        assert_eq!(bytes.len(), 16);
        assert_eq!(decode_vl_reference(&bytes, 8).unwrap(), (5, id));
        let short = encode_vl_reference(5, id, 4);
        assert_eq!(short.len(), 12);
        assert_eq!(decode_vl_reference(&short, 4).unwrap(), (5, id));
    }
}
