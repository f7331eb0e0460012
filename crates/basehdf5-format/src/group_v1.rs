//! V1 group traversal: resolve group children and navigate paths.

use std::collections::HashSet;

use log::debug;

use crate::error::FormatError;
use crate::group_btree::{GroupBTree, TreeShape};
use crate::local_heap::LocalHeap;
use crate::message_type::MessageType;
use crate::object_header::ObjectHeader;
use crate::symbol_table::{SymbolTableEntry, SymbolTableMessage};

/// A resolved group entry (child name + object header address).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    /// Name of the child object.
    pub name: String,
    /// Address of the child's object header.
    pub object_header_address: u64,
    /// Cache type from the symbol table entry.
    pub cache_type: u32,
}

impl GroupEntry {
    fn from_entry(name: String, entry: &SymbolTableEntry) -> Self {
        GroupEntry {
            name,
            object_header_address: entry.object_header_address,
            cache_type: entry.cache_type,
        }
    }
}

/// Check that `name` can be stored as a single link name.
pub fn validate_link_name(name: &str) -> Result<(), FormatError> {
    if name.is_empty() || name.contains('/') || name.contains('\0') {
        return Err(FormatError::InvalidLinkName(name.to_string()));
    }
    Ok(())
}

/// Load a group's local heap and B-tree.
pub fn read_group_index(
    file_data: &[u8],
    table: &SymbolTableMessage,
    shape: TreeShape,
) -> Result<(LocalHeap, GroupBTree), FormatError> {
    let heap = LocalHeap::parse(
        file_data,
        table.local_heap_address as usize,
        shape.offset_size,
        shape.length_size,
    )?;
    let tree = GroupBTree::read(file_data, table.btree_address, &heap, shape)?;
    Ok((heap, tree))
}

/// Given a SymbolTableMessage, resolve all group children in name order.
pub fn resolve_group_entries(
    file_data: &[u8],
    table: &SymbolTableMessage,
    shape: TreeShape,
) -> Result<Vec<GroupEntry>, FormatError> {
    let (_, tree) = read_group_index(file_data, table, shape)?;
    let entries: Vec<GroupEntry> = tree
        .iter_in_order()
        .map(|e| GroupEntry::from_entry(e.name.clone(), &e.entry))
        .collect();
    debug!(
        "group b-tree {:#x}: {} entries",
        table.btree_address,
        entries.len()
    );
    Ok(entries)
}

/// The symbol table message of a group header, or `None` when the header
/// does not describe a group.
pub fn find_symbol_table_message(
    header: &ObjectHeader,
    offset_size: u8,
) -> Result<Option<SymbolTableMessage>, FormatError> {
    header
        .find_message(MessageType::SymbolTable)
        .map(|msg| SymbolTableMessage::parse(&msg.data, offset_size))
        .transpose()
}

/// Navigate a path like "group1/subgroup/dataset" from a root group.
///
/// Returns the object header address of the target, or `None` when a
/// component is missing or an intermediate component is not a group.
pub fn resolve_path(
    file_data: &[u8],
    root_table: &SymbolTableMessage,
    path: &str,
    shape: TreeShape,
) -> Result<Option<u64>, FormatError> {
    let components: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = components.split_last() else {
        return Ok(None);
    };

    let mut table = root_table.clone();
    let mut visited = HashSet::new();
    for component in parents {
        let (_, tree) = read_group_index(file_data, &table, shape)?;
        let Some(entry) = tree.find(component) else {
            return Ok(None);
        };
        let address = entry.object_header_address;
        if !visited.insert(address) {
            return Err(FormatError::CycleDetected(address));
        }
        let header = ObjectHeader::parse(
            file_data,
            address as usize,
            shape.offset_size,
            shape.length_size,
        )?;
        match find_symbol_table_message(&header, shape.offset_size)? {
            Some(next) => table = next,
            None => return Ok(None),
        }
    }

    let (_, tree) = read_group_index(file_data, &table, shape)?;
    Ok(tree.find(last).map(|e| e.object_header_address))
}
