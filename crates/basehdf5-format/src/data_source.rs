//! Raw data access and typed element decoding for datasets.
//!
//! [`TypedDataSource`] owns nothing but the global heap collections its
//! values refer to. The raw bytes are borrowed from the file image (or the
//! compact layout) whenever possible.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use log::{debug, trace, warn};

use crate::data_layout::DataLayout;
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::FormatError;
use crate::fields::check_range;
use crate::global_heap::GlobalHeap;
use crate::value::{shape_values, FromValue, Value};

/// Read raw bytes for a dataset given its layout and the file data buffer.
///
/// For compact layouts, returns the inline data.
/// For contiguous layouts, borrows the bytes at the recorded address.
/// Contiguous storage that was never allocated yields `None`.
pub fn read_raw_data<'a>(
    file_data: &'a [u8],
    layout: &'a DataLayout,
    dataspace: &Dataspace,
    datatype: &Datatype,
) -> Result<Option<Cow<'a, [u8]>>, FormatError> {
    let num_elements = dataspace.num_elements();
    let expected = num_elements
        .checked_mul(u64::from(datatype.size()))
        .ok_or(FormatError::InconsistentSize {
            what: "dataset size",
            value: num_elements,
        })?;

    match layout {
        DataLayout::Compact { data } => {
            if (data.len() as u64) < expected {
                return Err(FormatError::InconsistentSize {
                    what: "compact data size",
                    value: data.len() as u64,
                });
            }
            Ok(Some(Cow::Borrowed(&data[..expected as usize])))
        }
        DataLayout::Contiguous { address: None, .. } => {
            trace!("contiguous storage not allocated ({expected} bytes)");
            Ok(None)
        }
        DataLayout::Contiguous {
            address: Some(address),
            size,
        } => {
            if *size < expected {
                return Err(FormatError::InconsistentSize {
                    what: "contiguous storage size",
                    value: *size,
                });
            }
            check_range(*address, expected, file_data.len())?;
            let start = *address as usize;
            Ok(Some(Cow::Borrowed(&file_data[start..start + expected as usize])))
        }
        DataLayout::Chunked { .. } => Err(FormatError::ChunkedLayoutUnsupported),
    }
}

#[derive(Debug, Clone)]
enum Storage<'a> {
    Bytes(Cow<'a, [u8]>),
    /// Never written: every element reads as this all-zero element.
    Unallocated(Vec<u8>),
}

/// A dataset's elements, decoded on demand in row-major order.
#[derive(Debug, Clone)]
pub struct TypedDataSource<'a> {
    datatype: &'a Datatype,
    dataspace: &'a Dataspace,
    storage: Storage<'a>,
    heap: GlobalHeap,
    unreadable: BTreeMap<u64, FormatError>,
}

impl<'a> TypedDataSource<'a> {
    /// Prepare the dataset described by `datatype`, `dataspace` and `layout`.
    ///
    /// Global heap collections referenced by the data are resolved here. A
    /// collection that cannot be read only fails the elements that point
    /// into it.
    pub fn new(
        file_data: &'a [u8],
        datatype: &'a Datatype,
        dataspace: &'a Dataspace,
        layout: &'a DataLayout,
        length_size: u8,
    ) -> Result<Self, FormatError> {
        let size = datatype.size() as usize;
        let storage = match read_raw_data(file_data, layout, dataspace, datatype)? {
            Some(raw) => Storage::Bytes(raw),
            None => Storage::Unallocated(vec![0; size]),
        };
        let mut heap = GlobalHeap::new(length_size);
        let mut unreadable = BTreeMap::new();
        if let Storage::Bytes(raw) = &storage {
            if size > 0 && datatype.uses_global_heap() {
                let mut collections = BTreeSet::new();
                for element in raw.chunks_exact(size) {
                    // a malformed reference is reported when its element is read
                    let _ = datatype.heap_references(element, &mut collections);
                }
                for address in collections {
                    if let Err(e) = heap.resolve(file_data, address) {
                        warn!("global heap collection {address:#x} unreadable: {e}");
                        unreadable.insert(address, e);
                    }
                }
            }
        }
        debug!(
            "data source: {} elements of {size} bytes",
            dataspace.num_elements()
        );
        Ok(TypedDataSource {
            datatype,
            dataspace,
            storage,
            heap,
            unreadable,
        })
    }

    /// Number of elements in the dataspace.
    pub fn len(&self) -> u64 {
        self.dataspace.num_elements()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn datatype(&self) -> &Datatype {
        self.datatype
    }

    pub fn dataspace(&self) -> &Dataspace {
        self.dataspace
    }

    /// Dimension sizes; empty for a scalar.
    pub fn shape(&self) -> &[u64] {
        &self.dataspace.dimensions
    }

    /// The undecoded element bytes, or `None` when storage was never
    /// allocated.
    pub fn raw(&self) -> Option<&[u8]> {
        match &self.storage {
            Storage::Bytes(raw) => Some(raw),
            Storage::Unallocated(_) => None,
        }
    }

    /// Decode element `index`.
    pub fn element(&self, index: u64) -> Result<Value, FormatError> {
        let len = self.len();
        if index >= len {
            return Err(FormatError::ElementOutOfBounds { index, len });
        }
        let bytes = match &self.storage {
            Storage::Bytes(raw) => {
                let size = self.datatype.size() as usize;
                let start = index as usize * size;
                &raw[start..start + size]
            }
            Storage::Unallocated(zero) => zero.as_slice(),
        };
        self.datatype
            .read_value(bytes, &self.heap)
            .map_err(|e| match e {
                FormatError::GlobalHeapCollectionNotLoaded(address) => {
                    match self.unreadable.get(&address) {
                        Some(cause) => FormatError::GlobalHeapCollectionUnreadable {
                            collection: address,
                            cause: Box::new(cause.clone()),
                        },
                        None => e,
                    }
                }
                other => other,
            })
    }

    /// Decode `count` elements starting at `start`.
    pub fn read(&self, start: u64, count: u64) -> Result<Vec<Value>, FormatError> {
        let len = self.len();
        let end = start
            .checked_add(count)
            .ok_or(FormatError::ElementOutOfBounds { index: start, len })?;
        if end > len {
            return Err(FormatError::ElementOutOfBounds {
                index: end - 1,
                len,
            });
        }
        (start..end).map(|i| self.element(i)).collect()
    }

    /// Every element in row-major order. Each call starts again at element 0.
    pub fn iter(&self) -> Elements<'_, 'a> {
        Elements {
            source: self,
            next: 0,
        }
    }

    /// All elements, flat.
    pub fn values(&self) -> Result<Vec<Value>, FormatError> {
        self.iter().collect()
    }

    /// All elements converted to `T`.
    pub fn typed<T: FromValue>(&self) -> Result<Vec<T>, FormatError> {
        self.iter().map(|v| v.and_then(T::from_value)).collect()
    }

    /// All elements nested into [`Value::Array`]s that follow the
    /// dataspace dimensions. A scalar comes back as its single value.
    pub fn to_nested(&self) -> Result<Value, FormatError> {
        Ok(shape_values(self.values()?, self.shape()))
    }
}

/// Iterator over the elements of a [`TypedDataSource`].
#[derive(Debug)]
pub struct Elements<'s, 'a> {
    source: &'s TypedDataSource<'a>,
    next: u64,
}

impl Iterator for Elements<'_, '_> {
    type Item = Result<Value, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.source.len() {
            return None;
        }
        let item = self.source.element(self.next);
        self.next += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.source.len().saturating_sub(self.next) as usize;
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::FileAllocation;
    use crate::error::ErrorKind;
    use crate::global_heap::HeapWriter;
    use crate::hdf_string::CharacterSet;
    use crate::type_builders::{make_array_type, make_f64_type, make_i32_type, make_vl_string_type};

    fn le_i32s(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn scalar_contiguous() {
        let mut file = vec![0u8; 2052];
        file[2048..].copy_from_slice(&42i32.to_le_bytes());
        let dt = make_i32_type();
        let ds = Dataspace::scalar();
        let layout = DataLayout::Contiguous {
            address: Some(2048),
            size: 4,
        };
        let src = TypedDataSource::new(&file, &dt, &ds, &layout, 8).unwrap();
        assert_eq!(src.len(), 1);
        assert_eq!(src.typed::<i32>().unwrap(), vec![42]);
        assert_eq!(src.to_nested().unwrap(), Value::Int(42));
        assert!(matches!(src.raw(), Some([42, 0, 0, 0])));
    }

    #[test]
    fn two_by_three_nested_and_ranges() {
        let dt = make_i32_type();
        let ds = Dataspace::simple(&[2, 3]);
        let layout = DataLayout::Compact {
            data: le_i32s(&[1, 2, 3, 4, 5, 6]),
        };
        let src = TypedDataSource::new(&[], &dt, &ds, &layout, 8).unwrap();
        let rows: Vec<Vec<i32>> = FromValue::from_value(src.to_nested().unwrap()).unwrap();
        assert_eq!(rows, vec![vec![1, 2, 3], vec![4, 5, 6]]);
        assert_eq!(src.read(2, 3).unwrap(), vec![Value::Int(3), Value::Int(4), Value::Int(5)]);
        assert_eq!(src.element(5).unwrap(), Value::Int(6));
        assert_eq!(
            src.element(6),
            Err(FormatError::ElementOutOfBounds { index: 6, len: 6 })
        );
        assert!(matches!(
            src.read(4, 3),
            Err(FormatError::ElementOutOfBounds { index: 6, len: 6 })
        ));
        assert!(src.read(6, 0).unwrap().is_empty());
    }

    #[test]
    fn iteration_restarts() {
        let dt = make_f64_type();
        let ds = Dataspace::simple(&[3]);
        let data: Vec<u8> = [0.5f64, 1.5, 2.5].iter().flat_map(|v| v.to_le_bytes()).collect();
        let layout = DataLayout::Compact { data };
        let src = TypedDataSource::new(&[], &dt, &ds, &layout, 8).unwrap();
        let first: Vec<f64> = src.iter().map(|v| f64::from_value(v.unwrap()).unwrap()).collect();
        let second: Vec<f64> = src.typed().unwrap();
        assert_eq!(first, vec![0.5, 1.5, 2.5]);
        assert_eq!(first, second);
        assert_eq!(src.iter().size_hint(), (3, Some(3)));
    }

    #[test]
    fn unallocated_storage_reads_zeros() {
        let dt = make_i32_type();
        let ds = Dataspace::simple(&[4]);
        let layout = DataLayout::Contiguous {
            address: None,
            size: 16,
        };
        let src = TypedDataSource::new(&[], &dt, &ds, &layout, 8).unwrap();
        assert_eq!(src.typed::<i32>().unwrap(), vec![0; 4]);
        assert_eq!(src.raw(), None);
    }

    #[test]
    fn huge_unallocated_dataspace_reads_lazily() {
        let dt = make_i32_type();
        let ds = Dataspace::simple(&[1 << 61]);
        let layout = DataLayout::Contiguous {
            address: None,
            size: 4 << 61,
        };
        let src = TypedDataSource::new(&[], &dt, &ds, &layout, 8).unwrap();
        assert_eq!(src.len(), 1 << 61);
        assert_eq!(src.element(0).unwrap(), Value::Int(0));
        assert_eq!(src.element((1 << 61) - 1).unwrap(), Value::Int(0));
        assert_eq!(src.read(1 << 40, 3).unwrap(), vec![Value::Int(0); 3]);
        assert!(matches!(
            src.element(1 << 61),
            Err(FormatError::ElementOutOfBounds { .. })
        ));
    }

    #[test]
    fn array_typed_scalar() {
        let dt = make_array_type(make_i32_type(), &[2, 3]);
        let ds = Dataspace::scalar();
        let layout = DataLayout::Compact {
            data: le_i32s(&[1, 2, 3, 4, 5, 6]),
        };
        let src = TypedDataSource::new(&[], &dt, &ds, &layout, 8).unwrap();
        let rows: Vec<Vec<i32>> = FromValue::from_value(src.to_nested().unwrap()).unwrap();
        assert_eq!(rows, vec![vec![1, 2, 3], vec![4, 5, 6]]);
    }

    #[test]
    fn vl_strings_resolve_their_collections() {
        let dt = make_vl_string_type(CharacterSet::Utf8, 8);
        let mut alloc = FileAllocation::new();
        let mut heap = GlobalHeap::new(8);
        let mut data = Vec::new();
        for s in ["alpha", "", "gamma"] {
            let mut w = HeapWriter {
                heap: &mut heap,
                alloc: &mut alloc,
            };
            data.extend_from_slice(&dt.write_value(&Value::String(s.into()), &mut w).unwrap());
        }
        let mut file = vec![0u8; alloc.end_of_file() as usize];
        for coll in heap.collections() {
            let bytes = coll.serialize(8);
            let a = coll.address as usize;
            file[a..a + bytes.len()].copy_from_slice(&bytes);
        }

        let ds = Dataspace::simple(&[3]);
        let layout = DataLayout::Compact { data };
        let src = TypedDataSource::new(&file, &dt, &ds, &layout, 8).unwrap();
        assert_eq!(
            src.typed::<String>().unwrap(),
            vec!["alpha".to_string(), String::new(), "gamma".to_string()]
        );
    }

    #[test]
    fn unreadable_collection_fails_only_its_elements() {
        let dt = make_vl_string_type(CharacterSet::Utf8, 8);
        let mut alloc = FileAllocation::new();
        let mut heap = GlobalHeap::new(8);
        let mut data = Vec::new();
        for s in ["first", "second"] {
            let mut w = HeapWriter {
                heap: &mut heap,
                alloc: &mut alloc,
            };
            data.extend_from_slice(&dt.write_value(&Value::String(s.into()), &mut w).unwrap());
        }
        let mut file = vec![0u8; alloc.end_of_file() as usize];
        for coll in heap.collections() {
            let bytes = coll.serialize(8);
            let a = coll.address as usize;
            file[a..a + bytes.len()].copy_from_slice(&bytes);
        }
        // element 1: 4-byte length, then the collection address
        data[16 + 4..16 + 12].copy_from_slice(&16u64.to_le_bytes());

        let ds = Dataspace::simple(&[2]);
        let layout = DataLayout::Compact { data };
        let src = TypedDataSource::new(&file, &dt, &ds, &layout, 8).unwrap();
        assert_eq!(src.element(0).unwrap(), Value::String("first".into()));
        let err = src.element(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HeapReference);
        assert!(matches!(
            err,
            FormatError::GlobalHeapCollectionUnreadable { collection: 16, .. }
        ));
        assert!(src.values().is_err());
    }

    #[test]
    fn layout_errors() {
        let dt = make_i32_type();
        let ds = Dataspace::simple(&[4]);
        let chunked = DataLayout::Chunked { version: 3 };
        assert_eq!(
            TypedDataSource::new(&[], &dt, &ds, &chunked, 8).unwrap_err(),
            FormatError::ChunkedLayoutUnsupported
        );
        let short = DataLayout::Contiguous {
            address: Some(0),
            size: 8,
        };
        assert!(matches!(
            TypedDataSource::new(&[0; 64], &dt, &ds, &short, 8),
            Err(FormatError::InconsistentSize { .. })
        ));
        let past_end = DataLayout::Contiguous {
            address: Some(60),
            size: 16,
        };
        assert!(matches!(
            TypedDataSource::new(&[0; 64], &dt, &ds, &past_end, 8),
            Err(FormatError::AddressOutOfBounds { .. }) | Err(FormatError::UnexpectedEof { .. })
        ));
    }
}
