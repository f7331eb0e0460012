//! Reading API: File, Group and Dataset for reading HDF5 files.
//!
//! Opening a file parses the superblock and then the whole group hierarchy.
//! Every group and dataset header is read up front, so a file either opens
//! with a complete tree or not at all. Element data stays in the file image
//! and is decoded on demand through [`File::read`].
//!
//! When the `mmap` feature is enabled (default), [`File::open`] memory-maps
//! the file. [`File::from_bytes`] works on an in-memory image.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, warn};

use basehdf5_format::attribute::{extract_attributes, find_attribute, AttributeMessage};
use basehdf5_format::data_layout::DataLayout;
use basehdf5_format::data_source::TypedDataSource;
use basehdf5_format::dataspace::Dataspace;
use basehdf5_format::datatype::Datatype;
use basehdf5_format::error::FormatError;
use basehdf5_format::global_heap::GlobalHeap;
use basehdf5_format::group_btree::TreeShape;
use basehdf5_format::group_v1::{find_symbol_table_message, resolve_group_entries};
use basehdf5_format::message_type::MessageType;
use basehdf5_format::object_header::ObjectHeader;
use basehdf5_format::signature;
use basehdf5_format::superblock::Superblock;
use basehdf5_format::symbol_table::SymbolTableMessage;
use basehdf5_format::value::{FromValue, Value};

use crate::error::Error;
use crate::types::{classify_datatype, to_attr_value, AttrValue, DType};

/// Internal storage: either an owned `Vec<u8>` or a memory-mapped region.
enum FileData {
    Owned(Vec<u8>),
    #[cfg(feature = "mmap")]
    Mmap {
        _file: fs::File,
        mmap: memmap2::Mmap,
    },
}

impl FileData {
    fn as_bytes(&self) -> &[u8] {
        match self {
            FileData::Owned(v) => v,
            #[cfg(feature = "mmap")]
            FileData::Mmap { mmap, .. } => mmap,
        }
    }
}

/// An open HDF5 file.
pub struct File {
    data: FileData,
    /// Offset of the superblock; every address in the file is relative to it.
    base: usize,
    superblock: Superblock,
    root: Group,
}

impl File {
    /// Open an HDF5 file from a filesystem path.
    ///
    /// When the `mmap` feature is enabled (default), this uses memory-mapped
    /// I/O. Otherwise it reads the entire file into a `Vec<u8>`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        #[cfg(feature = "mmap")]
        {
            let file = fs::File::open(path.as_ref())?;
            // SAFETY: read-only mapping. The file must not be truncated by
            // another process while this handle is open.
            let mmap = unsafe { memmap2::Mmap::map(&file)? };
            debug!("mapped {} ({} bytes)", path.as_ref().display(), mmap.len());
            Self::load(FileData::Mmap { _file: file, mmap })
        }
        #[cfg(not(feature = "mmap"))]
        {
            let bytes = fs::read(path.as_ref())?;
            Self::from_bytes(bytes)
        }
    }

    /// Open an HDF5 file from an in-memory byte vector.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, Error> {
        Self::load(FileData::Owned(data))
    }

    fn load(data: FileData) -> Result<Self, Error> {
        let bytes = data.as_bytes();
        let base = signature::find_signature(bytes)?;
        let superblock = Superblock::parse(bytes, base)?;
        let image = &bytes[base..];
        let eof = superblock.eof_address;
        if eof > image.len() as u64 {
            warn!(
                "end-of-file address {eof} is past the {} bytes present",
                image.len()
            );
        }
        let shape = TreeShape {
            leaf_k: superblock.group_leaf_node_k,
            internal_k: superblock.group_internal_node_k,
            offset_size: superblock.offset_size,
            length_size: superblock.length_size,
        };
        let loader = Loader { image, shape };
        let root = loader.group(
            String::new(),
            "/".to_string(),
            superblock.root_group_entry.object_header_address,
            &mut Vec::new(),
        )?;
        debug!(
            "opened HDF5 file: superblock v{}, {} root entries",
            superblock.version,
            root.groups.len() + root.datasets.len()
        );
        Ok(File {
            data,
            base,
            superblock,
            root,
        })
    }

    /// The root group.
    pub fn root(&self) -> &Group {
        &self.root
    }

    /// Returns a reference to the parsed superblock.
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Returns the raw file bytes, including any user block.
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// Returns `true` when the file is backed by memory-mapped I/O.
    pub fn is_mmap(&self) -> bool {
        match &self.data {
            FileData::Owned(_) => false,
            #[cfg(feature = "mmap")]
            FileData::Mmap { .. } => true,
        }
    }

    /// The bytes addresses are relative to.
    fn image(&self) -> &[u8] {
        &self.data.as_bytes()[self.base..]
    }

    /// Look up a dataset by `/`-separated path. `None` when nothing is
    /// linked there or the object is not a dataset.
    pub fn find_dataset(&self, path: &str) -> Option<&Dataset> {
        self.root.find_dataset(path)
    }

    /// Like [`find_dataset`](Self::find_dataset), with an error naming the
    /// path on failure.
    pub fn dataset(&self, path: &str) -> Result<&Dataset, Error> {
        match self.root.find_dataset(path) {
            Some(ds) => Ok(ds),
            None if self.root.find_group(path).is_some() => Err(Error::NotADataset(path.into())),
            None => Err(Error::PathNotFound(path.into())),
        }
    }

    /// Look up a group by `/`-separated path. `""` and `"/"` are the root.
    pub fn find_group(&self, path: &str) -> Option<&Group> {
        self.root.find_group(path)
    }

    pub fn group(&self, path: &str) -> Result<&Group, Error> {
        match self.root.find_group(path) {
            Some(g) => Ok(g),
            None if self.root.find_dataset(path).is_some() => Err(Error::NotAGroup(path.into())),
            None => Err(Error::PathNotFound(path.into())),
        }
    }

    /// Prepare a dataset's elements for decoding.
    pub fn read<'a>(&'a self, dataset: &'a Dataset) -> Result<TypedDataSource<'a>, Error> {
        Ok(TypedDataSource::new(
            self.image(),
            &dataset.datatype,
            &dataset.dataspace,
            &dataset.layout,
            self.superblock.length_size,
        )?)
    }

    /// Read every element of the dataset at `path` as `T`, in row-major
    /// order.
    pub fn read_values<T: FromValue>(&self, path: &str) -> Result<Vec<T>, Error> {
        let ds = self.dataset(path)?;
        Ok(self.read(ds)?.typed()?)
    }

    /// Decode the values of an attribute, resolving any global heap
    /// collections its variable-length values live in.
    pub fn attribute_values(&self, attr: &AttributeMessage) -> Result<Vec<Value>, Error> {
        let mut heap = GlobalHeap::new(self.superblock.length_size);
        for address in attr.heap_references()? {
            heap.resolve(self.image(), address)?;
        }
        Ok(attr.read_values(&heap)?)
    }

    /// Attributes converted to [`AttrValue`]s, keyed by name. Attributes
    /// whose type has no `AttrValue` form are left out.
    pub fn attrs(
        &self,
        attributes: &[AttributeMessage],
    ) -> Result<BTreeMap<String, AttrValue>, Error> {
        let mut map = BTreeMap::new();
        for attr in attributes {
            let values = self.attribute_values(attr)?;
            match to_attr_value(attr, values) {
                Some(v) => {
                    map.insert(attr.name.clone(), v);
                }
                None => debug!("attribute {:?} has no simple form, skipped", attr.name),
            }
        }
        Ok(map)
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("size", &self.data.as_bytes().len())
            .field("superblock_version", &self.superblock.version)
            .field("mmap", &self.is_mmap())
            .finish()
    }
}

/// Builds the in-memory group tree from the file image.
struct Loader<'a> {
    image: &'a [u8],
    shape: TreeShape,
}

impl Loader<'_> {
    fn header(&self, address: u64) -> Result<ObjectHeader, FormatError> {
        ObjectHeader::parse(
            self.image,
            address as usize,
            self.shape.offset_size,
            self.shape.length_size,
        )
    }

    /// Load the group at `address`. `ancestors` holds the headers of the
    /// groups above it; meeting one again is a cycle.
    fn group(
        &self,
        name: String,
        path: String,
        address: u64,
        ancestors: &mut Vec<u64>,
    ) -> Result<Group, Error> {
        let header = self.header(address)?;
        let table = find_symbol_table_message(&header, self.shape.offset_size)?
            .ok_or_else(|| Error::NotAGroup(path.clone()))?;
        self.group_from(name, path, address, &header, &table, ancestors)
    }

    fn group_from(
        &self,
        name: String,
        path: String,
        address: u64,
        header: &ObjectHeader,
        table: &SymbolTableMessage,
        ancestors: &mut Vec<u64>,
    ) -> Result<Group, Error> {
        ancestors.push(address);
        let mut group = Group {
            name,
            path,
            address,
            groups: BTreeMap::new(),
            datasets: BTreeMap::new(),
            attributes: extract_attributes(header, self.shape.length_size)?,
        };
        for entry in resolve_group_entries(self.image, table, self.shape)? {
            let full_path = child_path(&group.path, &entry.name);
            let child = entry.object_header_address;
            let child_header = self.header(child)?;
            if let Some(child_table) =
                find_symbol_table_message(&child_header, self.shape.offset_size)?
            {
                if ancestors.contains(&child) {
                    return Err(FormatError::CycleDetected(child).into());
                }
                let sub = self.group_from(
                    entry.name.clone(),
                    full_path,
                    child,
                    &child_header,
                    &child_table,
                    ancestors,
                )?;
                group.groups.insert(entry.name, sub);
            } else if is_dataset(&child_header) {
                let ds = self.dataset(entry.name.clone(), full_path, child, &child_header)?;
                group.datasets.insert(entry.name, ds);
            } else {
                debug!("{full_path}: neither group nor dataset, skipped");
            }
        }
        ancestors.pop();
        debug!(
            "group {}: {} groups, {} datasets",
            group.path,
            group.groups.len(),
            group.datasets.len()
        );
        Ok(group)
    }

    fn dataset(
        &self,
        name: String,
        path: String,
        address: u64,
        header: &ObjectHeader,
    ) -> Result<Dataset, Error> {
        let (os, ls) = (self.shape.offset_size, self.shape.length_size);
        let datatype = header
            .find_message(MessageType::Datatype)
            .ok_or(FormatError::DatasetMissingDatatype)?;
        let dataspace = header
            .find_message(MessageType::Dataspace)
            .ok_or(FormatError::DatasetMissingShape)?;
        let layout = header
            .find_message(MessageType::DataLayout)
            .ok_or(FormatError::DatasetMissingLayout)?;
        Ok(Dataset {
            name,
            path,
            address,
            datatype: Datatype::parse(&datatype.data)?.0,
            dataspace: Dataspace::parse(&dataspace.data, ls)?,
            layout: DataLayout::parse(&layout.data, os, ls)?,
            attributes: extract_attributes(header, ls)?,
        })
    }
}

fn is_dataset(header: &ObjectHeader) -> bool {
    header.find_message(MessageType::Dataspace).is_some()
        || header.find_message(MessageType::DataLayout).is_some()
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Split a path into its non-empty components.
fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// A group and everything below it.
#[derive(Debug, Clone)]
pub struct Group {
    name: String,
    path: String,
    address: u64,
    groups: BTreeMap<String, Group>,
    datasets: BTreeMap<String, Dataset>,
    attributes: Vec<AttributeMessage>,
}

impl Group {
    /// Link name; empty for the root.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path, `/` for the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Address of the group's object header.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Subgroups in name order.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Datasets in name order.
    pub fn datasets(&self) -> impl Iterator<Item = &Dataset> {
        self.datasets.values()
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    pub fn dataset(&self, name: &str) -> Option<&Dataset> {
        self.datasets.get(name)
    }

    pub fn attributes(&self) -> &[AttributeMessage] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeMessage> {
        find_attribute(&self.attributes, name)
    }

    /// Resolve a path relative to this group.
    pub fn find_group(&self, path: &str) -> Option<&Group> {
        components(path)
            .into_iter()
            .try_fold(self, |g, name| g.groups.get(name))
    }

    /// Resolve a dataset path relative to this group.
    pub fn find_dataset(&self, path: &str) -> Option<&Dataset> {
        let parts = components(path);
        let (last, parents) = parts.split_last()?;
        parents
            .iter()
            .try_fold(self, |g, name| g.groups.get(*name))?
            .datasets
            .get(*last)
    }

    /// Every dataset in this group and its subgroups, depth first.
    pub fn walk_datasets(&self) -> Vec<&Dataset> {
        let mut out: Vec<&Dataset> = self.datasets.values().collect();
        for g in self.groups.values() {
            out.extend(g.walk_datasets());
        }
        out
    }
}

/// A dataset's metadata. Its elements are read through [`File::read`].
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    name: String,
    path: String,
    address: u64,
    datatype: Datatype,
    dataspace: Dataspace,
    layout: DataLayout,
    attributes: Vec<AttributeMessage>,
}

impl Dataset {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path of the dataset.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Address of the dataset's object header.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Returns the shape (dimensions) of the dataset; empty for a scalar.
    pub fn shape(&self) -> &[u64] {
        &self.dataspace.dimensions
    }

    /// Number of elements.
    pub fn len(&self) -> u64 {
        self.dataspace.num_elements()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the simplified datatype of the dataset.
    pub fn dtype(&self) -> DType {
        classify_datatype(&self.datatype)
    }

    pub fn datatype(&self) -> &Datatype {
        &self.datatype
    }

    pub fn dataspace(&self) -> &Dataspace {
        &self.dataspace
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn attributes(&self) -> &[AttributeMessage] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeMessage> {
        find_attribute(&self.attributes, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        assert_eq!(child_path("/", "a"), "/a");
        assert_eq!(child_path("/a", "b"), "/a/b");
        assert_eq!(components("/a//b/"), vec!["a", "b"]);
        assert!(components("/").is_empty());
    }

    #[test]
    fn garbage_is_not_an_hdf_file() {
        let err = File::from_bytes(vec![0xAB; 4096]).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::SignatureNotFound)));
        let err = File::from_bytes(Vec::new()).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::SignatureNotFound)));
    }
}
