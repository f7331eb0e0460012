//! HDF5 file creation (write pipeline).
//!
//! Produces files with a v0 or v1 superblock, v1 object headers, symbol
//! table groups, contiguous datasets and inline attributes. Every block is
//! placed by a [`FileAllocation`] as soon as its size is known; the image
//! itself is only assembled in [`FileWriter::finish`], superblock last.

use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use crate::allocation::{Allocation, AllocationKind, FileAllocation};
use crate::attribute::AttributeMessage;
use crate::data_layout::DataLayout;
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::FormatError;
use crate::fields::pad8;
use crate::fill_value::FillValueMessage;
use crate::global_heap::{GlobalHeap, HeapWriter};
use crate::group_btree::{GroupBTree, NamedEntry, TreeShape};
use crate::group_v1::validate_link_name;
use crate::local_heap::LocalHeap;
use crate::message_type::MessageType;
use crate::modification_time::ModificationTime;
use crate::object_header::{FLAG_CONSTANT, MESSAGE_HEADER_SIZE, PREFIX_SIZE};
use crate::object_header_writer::ObjectHeaderWriter;
use crate::superblock::{
    Superblock, DEFAULT_GROUP_INTERNAL_K, DEFAULT_GROUP_LEAF_K, DEFAULT_INDEXED_STORAGE_K,
};
use crate::symbol_table::{SymbolTableEntry, SymbolTableMessage};
use crate::type_builders::{build_attr_message, AttrValue};
use crate::value::Value;

/// Minimum size of a dataset's primary header block.
pub const DATASET_HEADER_SIZE: u64 = 272;

/// Source of the modification time stamped on datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timestamp {
    /// The system clock when the file is finished.
    #[default]
    Now,
    /// A fixed number of seconds since the Unix epoch.
    Fixed(u32),
}

impl Timestamp {
    pub fn seconds(self) -> u32 {
        match self {
            Timestamp::Fixed(s) => s,
            Timestamp::Now => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
                .unwrap_or(0),
        }
    }
}

/// Layout parameters for a new file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    /// Superblock version, 0 or 1.
    pub superblock_version: u8,
    /// Size of file addresses, 4 or 8.
    pub offset_size: u8,
    /// Size of lengths, 4 or 8.
    pub length_size: u8,
    pub group_leaf_k: u16,
    pub group_internal_k: u16,
    pub timestamp: Timestamp,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            superblock_version: 0,
            offset_size: 8,
            length_size: 8,
            group_leaf_k: DEFAULT_GROUP_LEAF_K,
            group_internal_k: DEFAULT_GROUP_INTERNAL_K,
            timestamp: Timestamp::Now,
        }
    }
}

impl WriterConfig {
    fn validate(&self) -> Result<(), FormatError> {
        if self.superblock_version > 1 {
            return Err(FormatError::UnsupportedVersion(self.superblock_version));
        }
        if !matches!(self.offset_size, 4 | 8) {
            return Err(FormatError::InvalidOffsetSize(self.offset_size));
        }
        if !matches!(self.length_size, 4 | 8) {
            return Err(FormatError::InvalidLengthSize(self.length_size));
        }
        if self.group_leaf_k == 0 || self.group_internal_k == 0 {
            return Err(FormatError::InconsistentSize {
                what: "group B-tree K",
                value: 0,
            });
        }
        Ok(())
    }

    fn shape(&self) -> TreeShape {
        TreeShape {
            leaf_k: self.group_leaf_k,
            internal_k: self.group_internal_k,
            offset_size: self.offset_size,
            length_size: self.length_size,
        }
    }

    /// Size of a group's header block: prefix plus one symbol table message.
    fn group_header_size(&self) -> u64 {
        (PREFIX_SIZE + MESSAGE_HEADER_SIZE + pad8(2 * self.offset_size as usize)) as u64
    }
}

/// Handle to a group created by a [`FileWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(usize);

/// Handle to a dataset created by a [`FileWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatasetId(usize);

struct GroupState {
    header_address: u64,
    heap: LocalHeap,
    tree: GroupBTree,
}

impl GroupState {
    fn table(&self) -> SymbolTableMessage {
        SymbolTableMessage {
            btree_address: self.tree.address(),
            local_heap_address: self.heap.header_address,
        }
    }
}

struct DatasetState {
    name: String,
    header_address: u64,
    block_size: u64,
    datatype: Datatype,
    dataspace: Dataspace,
    data: Option<(Option<u64>, Vec<u8>)>,
    attributes: Vec<AttributeMessage>,
}

impl DatasetState {
    fn layout(&self) -> DataLayout {
        let size = self
            .dataspace
            .num_elements()
            .saturating_mul(u64::from(self.datatype.size()));
        DataLayout::Contiguous {
            address: self.data.as_ref().and_then(|(address, _)| *address),
            size,
        }
    }

    /// Header messages in write order.
    fn header(&self, config: &WriterConfig, seconds: u32) -> Result<ObjectHeaderWriter, FormatError> {
        let (os, ls) = (config.offset_size, config.length_size);
        let mut w = ObjectHeaderWriter::new();
        w.add_message(MessageType::Dataspace, self.dataspace.serialize(ls));
        w.add_message_with_flags(MessageType::Datatype, self.datatype.serialize(), FLAG_CONSTANT);
        w.add_message_with_flags(
            MessageType::FillValue,
            FillValueMessage::default_for(self.datatype.is_compound()).serialize(),
            FLAG_CONSTANT,
        );
        w.add_message(MessageType::DataLayout, self.layout().serialize(os, ls)?);
        w.add_message(
            MessageType::ModificationTime,
            ModificationTime { seconds }.serialize(),
        );
        for attr in &self.attributes {
            w.add_message(MessageType::Attribute, attr.serialize(ls)?);
        }
        Ok(w)
    }
}

/// Builds an HDF5 file image.
pub struct FileWriter {
    config: WriterConfig,
    alloc: FileAllocation,
    global_heap: GlobalHeap,
    groups: Vec<GroupState>,
    datasets: Vec<DatasetState>,
}

impl FileWriter {
    /// Start a file: reserves the superblock and creates the root group.
    pub fn new(config: WriterConfig) -> Result<Self, FormatError> {
        config.validate()?;
        let mut alloc = FileAllocation::new();
        alloc.allocate(
            AllocationKind::Superblock,
            Superblock::size(config.superblock_version, config.offset_size) as u64,
        )?;
        let mut writer = FileWriter {
            config,
            global_heap: GlobalHeap::new(config.length_size),
            alloc,
            groups: Vec::new(),
            datasets: Vec::new(),
        };
        let root = writer.new_group()?;
        writer.groups.push(root);
        Ok(writer)
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// The root group.
    pub fn root(&self) -> GroupId {
        GroupId(0)
    }

    /// Blocks placed so far, in allocation order.
    pub fn allocations(&self) -> &[Allocation] {
        self.alloc.allocations()
    }

    fn new_group(&mut self) -> Result<GroupState, FormatError> {
        let (os, ls) = (self.config.offset_size, self.config.length_size);
        let header_address = self
            .alloc
            .allocate(AllocationKind::ObjectHeader, self.config.group_header_size())?;
        let tree = GroupBTree::create(&mut self.alloc, self.config.shape())?;
        let heap = LocalHeap::create(&mut self.alloc, os, ls)?;
        Ok(GroupState {
            header_address,
            heap,
            tree,
        })
    }

    fn group(&self, id: GroupId) -> Result<&GroupState, FormatError> {
        self.groups.get(id.0).ok_or(FormatError::InvalidHandle(id.0))
    }

    fn dataset_mut(&mut self, id: DatasetId) -> Result<&mut DatasetState, FormatError> {
        self.datasets
            .get_mut(id.0)
            .ok_or(FormatError::InvalidHandle(id.0))
    }

    /// Reject names that cannot be linked into `parent`.
    fn check_new_link(&self, parent: GroupId, name: &str) -> Result<(), FormatError> {
        validate_link_name(name)?;
        if self.group(parent)?.tree.find(name).is_some() {
            return Err(FormatError::DuplicateLinkName(name.to_string()));
        }
        Ok(())
    }

    /// The dataspace a dataset was created with.
    pub fn dataspace(&self, id: DatasetId) -> Result<&Dataspace, FormatError> {
        self.datasets
            .get(id.0)
            .map(|ds| &ds.dataspace)
            .ok_or(FormatError::InvalidHandle(id.0))
    }

    /// Store `name` in the parent's heap and insert `entry` under it.
    fn link(
        &mut self,
        parent: GroupId,
        name: &str,
        entry: SymbolTableEntry,
    ) -> Result<(), FormatError> {
        let group = self
            .groups
            .get_mut(parent.0)
            .ok_or(FormatError::InvalidHandle(parent.0))?;
        let link_name_offset = group.heap.add_string(name, &mut self.alloc)?;
        group.tree.insert(
            NamedEntry {
                name: name.to_string(),
                entry: SymbolTableEntry {
                    link_name_offset,
                    ..entry
                },
            },
            &mut self.alloc,
        )
    }

    /// Create an empty group `name` inside `parent`.
    pub fn create_group(&mut self, parent: GroupId, name: &str) -> Result<GroupId, FormatError> {
        self.check_new_link(parent, name)?;
        let group = self.new_group()?;
        let entry = SymbolTableEntry::group(
            0,
            group.header_address,
            group.table(),
            self.config.offset_size,
        );
        debug!("group {name:?} header at {:#x}", group.header_address);
        self.link(parent, name, entry)?;
        self.groups.push(group);
        Ok(GroupId(self.groups.len() - 1))
    }

    /// Create dataset `name` inside `parent`. Its storage is allocated when
    /// values are written.
    pub fn create_dataset(
        &mut self,
        parent: GroupId,
        name: &str,
        datatype: Datatype,
        dataspace: Dataspace,
    ) -> Result<DatasetId, FormatError> {
        self.check_new_link(parent, name)?;
        let mut state = DatasetState {
            name: name.to_string(),
            header_address: 0,
            block_size: 0,
            datatype,
            dataspace,
            data: None,
            attributes: Vec::new(),
        };
        let needed = state.header(&self.config, 0)?.encoded_size();
        state.block_size = DATASET_HEADER_SIZE.max(needed);
        state.header_address = self
            .alloc
            .allocate(AllocationKind::ObjectHeader, state.block_size)?;
        debug!(
            "dataset {name:?} header at {:#x} ({} bytes)",
            state.header_address, state.block_size
        );
        let entry = SymbolTableEntry::object(0, state.header_address);
        self.link(parent, name, entry)?;
        self.datasets.push(state);
        Ok(DatasetId(self.datasets.len() - 1))
    }

    /// Encode `values` in row-major order as the dataset's contents.
    pub fn write_values(&mut self, id: DatasetId, values: &[Value]) -> Result<(), FormatError> {
        let FileWriter {
            alloc,
            global_heap,
            datasets,
            ..
        } = self;
        let ds = datasets.get_mut(id.0).ok_or(FormatError::InvalidHandle(id.0))?;
        if ds.data.is_some() {
            return Err(FormatError::DataAlreadyWritten(ds.name.clone()));
        }
        let expected = ds.dataspace.num_elements();
        if values.len() as u64 != expected {
            return Err(FormatError::ElementCountMismatch {
                expected,
                actual: values.len() as u64,
            });
        }

        let mut raw = Vec::with_capacity(values.len() * ds.datatype.size() as usize);
        let mut heap = HeapWriter {
            heap: &mut *global_heap,
            alloc: &mut *alloc,
        };
        for v in values {
            raw.extend_from_slice(&ds.datatype.write_value(v, &mut heap)?);
        }
        let address = if raw.is_empty() {
            None
        } else {
            Some(alloc.allocate(AllocationKind::RawData, raw.len() as u64)?)
        };
        debug!(
            "dataset {:?}: {} bytes of data at {address:?}",
            ds.name,
            raw.len()
        );
        ds.data = Some((address, raw));
        Ok(())
    }

    /// Attach an attribute to a dataset, replacing one of the same name.
    pub fn set_attribute(
        &mut self,
        id: DatasetId,
        name: &str,
        value: &AttrValue,
    ) -> Result<(), FormatError> {
        if name.is_empty() {
            return Err(FormatError::InvalidLinkName(String::new()));
        }
        if id.0 >= self.datasets.len() {
            return Err(FormatError::InvalidHandle(id.0));
        }
        let (os, ls) = (self.config.offset_size, self.config.length_size);
        let mut heap = HeapWriter {
            heap: &mut self.global_heap,
            alloc: &mut self.alloc,
        };
        let attr = build_attr_message(name, value, &mut heap, os)?;
        attr.serialize(ls)?;
        let ds = self.dataset_mut(id)?;
        match ds.attributes.iter_mut().find(|a| a.name == name) {
            Some(existing) => *existing = attr,
            None => ds.attributes.push(attr),
        }
        Ok(())
    }

    /// Lay out every structure and return the complete file image.
    pub fn finish(mut self) -> Result<Vec<u8>, FormatError> {
        let config = self.config;
        let (os, ls) = (config.offset_size, config.length_size);
        let seconds = config.timestamp.seconds();
        let mut blocks: Vec<(u64, Vec<u8>)> = Vec::new();

        for ds in &self.datasets {
            let header = ds
                .header(&config, seconds)?
                .finish(ds.header_address, ds.block_size, &mut self.alloc, os, ls)?;
            blocks.extend(header.blocks);
            if let Some((Some(address), raw)) = &ds.data {
                blocks.push((*address, raw.clone()));
            }
        }

        for group in &self.groups {
            let mut w = ObjectHeaderWriter::new();
            w.add_message(MessageType::SymbolTable, group.table().serialize(os));
            let header = w.finish(
                group.header_address,
                config.group_header_size(),
                &mut self.alloc,
                os,
                ls,
            )?;
            blocks.extend(header.blocks);
            blocks.extend(group.tree.serialize());
            blocks.push((group.heap.header_address, group.heap.serialize_header(os)));
            blocks.push((group.heap.data_segment_address, group.heap.data().to_vec()));
        }

        for coll in self.global_heap.collections() {
            blocks.push((coll.address, coll.serialize(ls)));
        }

        let root = self.group(GroupId(0))?;
        let superblock = Superblock {
            version: config.superblock_version,
            offset_size: os,
            length_size: ls,
            group_leaf_node_k: config.group_leaf_k,
            group_internal_node_k: config.group_internal_k,
            indexed_storage_internal_node_k: (config.superblock_version == 1)
                .then_some(DEFAULT_INDEXED_STORAGE_K),
            consistency_flags: 0,
            base_address: 0,
            free_space_address: None,
            eof_address: self.alloc.end_of_file(),
            driver_info_address: None,
            root_group_entry: SymbolTableEntry::group(0, root.header_address, root.table(), os),
        };
        blocks.push((0, superblock.serialize()));

        let eof = self.alloc.end_of_file();
        let mut image = vec![0u8; eof as usize];
        for (address, bytes) in blocks {
            let start = address as usize;
            let end = start + bytes.len();
            if end > image.len() {
                return Err(FormatError::AddressOutOfBounds {
                    address: end as u64,
                    file_len: eof,
                });
            }
            image[start..end].copy_from_slice(&bytes);
        }
        debug!(
            "file image complete: {} groups, {} datasets, {eof} bytes",
            self.groups.len(),
            self.datasets.len()
        );
        Ok(image)
    }
}
