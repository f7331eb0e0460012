//! In-memory group index: a v1 B-tree of symbol table nodes.
//!
//! The root is always a `TREE` node. Its children are symbol table nodes
//! (leaves) at level 0 and further `TREE` nodes above that. Key 0 of every
//! internal node is the empty name and key `i + 1` is the greatest name in
//! child `i`, so a name descends into the first child whose upper key is not
//! smaller than it.

use std::collections::HashSet;

use log::{debug, trace};

use crate::allocation::{AllocationKind, FileAllocation};
use crate::btree_v1::{BTreeV1Node, GROUP_NODE_TYPE};
use crate::error::FormatError;
use crate::local_heap::LocalHeap;
use crate::symbol_table::{SymbolTableEntry, SymbolTableNode};

/// A symbol table entry together with its decoded link name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedEntry {
    pub name: String,
    pub entry: SymbolTableEntry,
}

/// A separator key: a link name and where the name lives in the local heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupKey {
    pub name: String,
    pub heap_offset: u64,
}

impl GroupKey {
    fn empty() -> Self {
        GroupKey {
            name: String::new(),
            heap_offset: 0,
        }
    }

    fn of(entry: &NamedEntry) -> Self {
        GroupKey {
            name: entry.name.clone(),
            heap_offset: entry.entry.link_name_offset,
        }
    }
}

/// A symbol table node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    pub address: u64,
    pub entries: Vec<NamedEntry>,
}

/// A `TREE` node with `children.len() + 1` keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    pub address: u64,
    pub level: u8,
    pub keys: Vec<GroupKey>,
    pub children: Vec<BTreeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BTreeNode {
    Leaf(LeafNode),
    Internal(InternalNode),
}

/// Result of a child split: the key now bounding the left half, and the
/// new right half.
struct Split {
    key: GroupKey,
    right: BTreeNode,
}

/// Fanout parameters and field widths shared by every node of one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeShape {
    pub leaf_k: u16,
    pub internal_k: u16,
    pub offset_size: u8,
    pub length_size: u8,
}

impl TreeShape {
    pub fn node_size(&self) -> u64 {
        BTreeV1Node::node_size(self.internal_k, self.offset_size, self.length_size) as u64
    }

    pub fn leaf_size(&self) -> u64 {
        SymbolTableNode::block_size(self.leaf_k, self.offset_size) as u64
    }
}

/// A group's B-tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupBTree {
    root: InternalNode,
    shape: TreeShape,
}

impl InternalNode {
    /// Index of the child `name` belongs in.
    fn child_index(&self, name: &str) -> usize {
        let last = self.children.len().saturating_sub(1);
        (0..self.children.len())
            .find(|&i| name <= self.keys[i + 1].name.as_str())
            .unwrap_or(last)
    }
}

impl GroupBTree {
    /// An empty tree whose root node is allocated now.
    pub fn create(alloc: &mut FileAllocation, shape: TreeShape) -> Result<Self, FormatError> {
        let address = alloc.allocate(AllocationKind::BTree, shape.node_size())?;
        Ok(GroupBTree {
            root: InternalNode {
                address,
                level: 0,
                keys: vec![GroupKey::empty()],
                children: Vec::new(),
            },
            shape,
        })
    }

    /// Address of the root `TREE` node. Stable for the tree's lifetime.
    pub fn address(&self) -> u64 {
        self.root.address
    }

    pub fn shape(&self) -> TreeShape {
        self.shape
    }

    /// Height above the symbol table nodes.
    pub fn depth(&self) -> u8 {
        self.root.level + 1
    }

    pub fn root(&self) -> &InternalNode {
        &self.root
    }

    /// Insert an entry, splitting nodes as needed.
    pub fn insert(
        &mut self,
        entry: NamedEntry,
        alloc: &mut FileAllocation,
    ) -> Result<(), FormatError> {
        trace!("group b-tree {:#x}: insert {:?}", self.root.address, entry.name);
        let shape = self.shape;
        insert_internal(&mut self.root, entry, alloc, shape)?;

        if self.root.children.len() > 2 * shape.internal_k as usize {
            // The root keeps its address; its contents move into two new nodes.
            let new_root = InternalNode {
                address: self.root.address,
                level: self.root.level + 1,
                keys: Vec::new(),
                children: Vec::new(),
            };
            let mut left = std::mem::replace(&mut self.root, new_root);
            left.address = alloc.allocate(AllocationKind::BTree, shape.node_size())?;
            let last = left.keys.last().cloned().unwrap_or_else(GroupKey::empty);
            let split = split_internal(&mut left, alloc, shape)?;
            self.root.keys = vec![GroupKey::empty(), split.key, last];
            self.root.children = vec![BTreeNode::Internal(left), split.right];
            debug!(
                "group b-tree {:#x}: root split, depth now {}",
                self.root.address,
                self.depth()
            );
        }
        Ok(())
    }

    /// Look up an entry by link name.
    pub fn find(&self, name: &str) -> Option<&SymbolTableEntry> {
        let mut node = &self.root;
        loop {
            if node.children.is_empty() {
                return None;
            }
            match &node.children[node.child_index(name)] {
                BTreeNode::Internal(child) => node = child,
                BTreeNode::Leaf(leaf) => {
                    return leaf
                        .entries
                        .binary_search_by(|e| e.name.as_str().cmp(name))
                        .ok()
                        .map(|i| &leaf.entries[i].entry);
                }
            }
        }
    }

    /// Entries in name order. Each call walks again from the root.
    pub fn iter_in_order(&self) -> Box<dyn Iterator<Item = &NamedEntry> + '_> {
        walk_internal(&self.root)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.iter_in_order().count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Encode every node as `(address, bytes)`, linking siblings per level.
    pub fn serialize(&self) -> Vec<(u64, Vec<u8>)> {
        let shape = self.shape;
        let mut out = Vec::new();
        let mut level: Vec<&InternalNode> = vec![&self.root];
        while !level.is_empty() {
            let mut next = Vec::new();
            let mut leaves = Vec::new();
            for (i, node) in level.iter().enumerate() {
                let left_sibling = i.checked_sub(1).map(|j| level[j].address);
                let right_sibling = level.get(i + 1).map(|n| n.address);
                let disk = BTreeV1Node {
                    node_type: GROUP_NODE_TYPE,
                    node_level: node.level,
                    left_sibling,
                    right_sibling,
                    keys: node.keys.iter().map(|k| k.heap_offset).collect(),
                    children: node.children.iter().map(node_address).collect(),
                };
                out.push((
                    node.address,
                    disk.serialize(shape.internal_k, shape.offset_size, shape.length_size),
                ));
                for child in &node.children {
                    match child {
                        BTreeNode::Internal(n) => next.push(n),
                        BTreeNode::Leaf(l) => leaves.push(l),
                    }
                }
            }
            for leaf in leaves {
                let snod = SymbolTableNode {
                    entries: leaf.entries.iter().map(|e| e.entry.clone()).collect(),
                };
                out.push((leaf.address, snod.serialize(shape.leaf_k, shape.offset_size)));
            }
            level = next;
        }
        out
    }

    /// Load a tree from the file, resolving names through `heap`.
    pub fn read(
        file_data: &[u8],
        address: u64,
        heap: &LocalHeap,
        shape: TreeShape,
    ) -> Result<Self, FormatError> {
        let mut visited = HashSet::new();
        let root = read_internal(file_data, address, heap, shape, &mut visited)?;
        Ok(GroupBTree { root, shape })
    }
}

fn node_address(node: &BTreeNode) -> u64 {
    match node {
        BTreeNode::Leaf(l) => l.address,
        BTreeNode::Internal(n) => n.address,
    }
}

fn walk_internal<'a>(node: &'a InternalNode) -> Box<dyn Iterator<Item = &'a NamedEntry> + 'a> {
    Box::new(node.children.iter().flat_map(walk_child))
}

fn walk_child<'a>(child: &'a BTreeNode) -> Box<dyn Iterator<Item = &'a NamedEntry> + 'a> {
    match child {
        BTreeNode::Leaf(leaf) => Box::new(leaf.entries.iter()),
        BTreeNode::Internal(n) => walk_internal(n),
    }
}

fn insert_internal(
    node: &mut InternalNode,
    entry: NamedEntry,
    alloc: &mut FileAllocation,
    shape: TreeShape,
) -> Result<(), FormatError> {
    if node.children.is_empty() {
        let address = alloc.allocate(AllocationKind::SymbolNode, shape.leaf_size())?;
        node.keys.push(GroupKey::of(&entry));
        node.children.push(BTreeNode::Leaf(LeafNode {
            address,
            entries: vec![entry],
        }));
        return Ok(());
    }

    let idx = node.child_index(&entry.name);
    let upper = GroupKey::of(&entry);
    // Over-full children are split here; the root is split by the caller.
    let split = match &mut node.children[idx] {
        BTreeNode::Leaf(leaf) => insert_leaf(leaf, entry, alloc, shape)?,
        BTreeNode::Internal(child) => {
            insert_internal(child, entry, alloc, shape)?;
            if child.children.len() > 2 * shape.internal_k as usize {
                Some(split_internal(child, alloc, shape)?)
            } else {
                None
            }
        }
    };
    if upper.name > node.keys[idx + 1].name {
        node.keys[idx + 1] = upper;
    }

    if let Some(split) = split {
        node.keys.insert(idx + 1, split.key);
        node.children.insert(idx + 1, split.right);
    }
    Ok(())
}

fn insert_leaf(
    leaf: &mut LeafNode,
    entry: NamedEntry,
    alloc: &mut FileAllocation,
    shape: TreeShape,
) -> Result<Option<Split>, FormatError> {
    let pos = match leaf
        .entries
        .binary_search_by(|e| e.name.as_str().cmp(entry.name.as_str()))
    {
        Ok(_) => return Err(FormatError::DuplicateLinkName(entry.name)),
        Err(pos) => pos,
    };
    leaf.entries.insert(pos, entry);

    if leaf.entries.len() <= 2 * shape.leaf_k as usize {
        return Ok(None);
    }
    let mid = (leaf.entries.len() + 1) / 2;
    let right_entries = leaf.entries.split_off(mid);
    let address = alloc.allocate(AllocationKind::SymbolNode, shape.leaf_size())?;
    let key = leaf
        .entries
        .last()
        .map(GroupKey::of)
        .unwrap_or_else(GroupKey::empty);
    trace!("symbol node {:#x} split, new node {address:#x}", leaf.address);
    Ok(Some(Split {
        key,
        right: BTreeNode::Leaf(LeafNode {
            address,
            entries: right_entries,
        }),
    }))
}

/// Split an over-full internal node in two, keeping the left half in place.
fn split_internal(
    node: &mut InternalNode,
    alloc: &mut FileAllocation,
    shape: TreeShape,
) -> Result<Split, FormatError> {
    let mid = node.children.len() / 2;
    let right_children = node.children.split_off(mid);
    // keys[mid] bounds both halves
    let right_keys = node.keys.split_off(mid);
    let key = right_keys[0].clone();
    node.keys.push(key.clone());
    let address = alloc.allocate(AllocationKind::BTree, shape.node_size())?;
    trace!("b-tree node {:#x} split, new node {address:#x}", node.address);
    Ok(Split {
        key,
        right: BTreeNode::Internal(InternalNode {
            address,
            level: node.level,
            keys: right_keys,
            children: right_children,
        }),
    })
}

fn read_internal(
    file_data: &[u8],
    address: u64,
    heap: &LocalHeap,
    shape: TreeShape,
    visited: &mut HashSet<u64>,
) -> Result<InternalNode, FormatError> {
    if !visited.insert(address) {
        return Err(FormatError::CycleDetected(address));
    }
    let disk = BTreeV1Node::parse(
        file_data,
        address as usize,
        shape.offset_size,
        shape.length_size,
    )?;
    let keys = disk
        .keys
        .iter()
        .map(|&heap_offset| {
            Ok(GroupKey {
                name: heap.string_at(heap_offset)?,
                heap_offset,
            })
        })
        .collect::<Result<Vec<_>, FormatError>>()?;

    let mut children = Vec::with_capacity(disk.children.len());
    for &child in &disk.children {
        if disk.node_level == 0 {
            if !visited.insert(child) {
                return Err(FormatError::CycleDetected(child));
            }
            let snod = SymbolTableNode::parse(file_data, child as usize, shape.offset_size)?;
            let entries = snod
                .entries
                .into_iter()
                .map(|entry| {
                    Ok(NamedEntry {
                        name: heap.string_at(entry.link_name_offset)?,
                        entry,
                    })
                })
                .collect::<Result<Vec<_>, FormatError>>()?;
            children.push(BTreeNode::Leaf(LeafNode {
                address: child,
                entries,
            }));
        } else {
            let node = read_internal(file_data, child, heap, shape, visited)?;
            children.push(BTreeNode::Internal(node));
        }
    }

    Ok(InternalNode {
        address,
        level: disk.node_level,
        keys,
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: TreeShape = TreeShape {
        leaf_k: 1,
        internal_k: 1,
        offset_size: 8,
        length_size: 8,
    };

    const REFERENCE: TreeShape = TreeShape {
        leaf_k: 4,
        internal_k: 16,
        offset_size: 8,
        length_size: 8,
    };

    fn populate(names: &[&str], shape: TreeShape) -> (GroupBTree, LocalHeap, FileAllocation) {
        let mut alloc = FileAllocation::new();
        let mut tree = GroupBTree::create(&mut alloc, shape).unwrap();
        let mut heap = LocalHeap::create(&mut alloc, 8, 8).unwrap();
        for (i, name) in names.iter().enumerate() {
            let offset = heap.add_string(name, &mut alloc).unwrap();
            let entry = NamedEntry {
                name: name.to_string(),
                entry: SymbolTableEntry::object(offset, 0x1000 + i as u64),
            };
            tree.insert(entry, &mut alloc).unwrap();
        }
        (tree, heap, alloc)
    }

    fn names(tree: &GroupBTree) -> Vec<String> {
        tree.iter_in_order().map(|e| e.name.clone()).collect()
    }

    #[test]
    fn empty_tree() {
        let (tree, _, alloc) = populate(&[], REFERENCE);
        assert!(tree.is_empty());
        assert_eq!(tree.find("x"), None);
        assert_eq!(tree.iter_in_order().count(), 0);
        assert_eq!(alloc.first_of(AllocationKind::SymbolNode), None);
    }

    #[test]
    fn first_insert_allocates_symbol_node() {
        let (tree, _, alloc) = populate(&["FixedPointValue"], REFERENCE);
        let snod = alloc.first_of(AllocationKind::SymbolNode).unwrap();
        assert_eq!(snod.size, 328);
        assert_eq!(tree.root().keys.len(), 2);
        assert_eq!(tree.root().keys[1].name, "FixedPointValue");
        assert_eq!(tree.find("FixedPointValue").unwrap().object_header_address, 0x1000);
    }

    #[test]
    fn ordered_iteration_and_lookup_across_splits() {
        let input = ["m", "c", "x", "a", "q", "e", "z", "b", "k", "y", "d", "n", "f"];
        let (tree, _, _) = populate(&input, SMALL);
        let mut sorted: Vec<String> = input.iter().map(|s| s.to_string()).collect();
        sorted.sort();
        assert_eq!(names(&tree), sorted);
        assert!(tree.depth() > 2);
        for (i, name) in input.iter().enumerate() {
            assert_eq!(tree.find(name).unwrap().object_header_address, 0x1000 + i as u64);
        }
        assert_eq!(tree.find("missing"), None);
        // restartable
        assert_eq!(names(&tree), sorted);
    }

    #[test]
    fn root_keeps_its_address() {
        let mut alloc = FileAllocation::new();
        let mut tree = GroupBTree::create(&mut alloc, SMALL).unwrap();
        let root = tree.address();
        for (i, name) in ["a", "b", "c", "d", "e", "f", "g"].iter().enumerate() {
            let entry = NamedEntry {
                name: name.to_string(),
                entry: SymbolTableEntry::object(8 * i as u64, 0),
            };
            tree.insert(entry, &mut alloc).unwrap();
        }
        assert_eq!(tree.address(), root);
        assert!(tree.root().level > 0);
    }

    #[test]
    fn keys_bound_their_children() {
        let (tree, _, _) = populate(&["d", "a", "c", "b", "f", "e", "g", "h"], SMALL);
        fn check(node: &InternalNode) {
            assert_eq!(node.keys.len(), node.children.len() + 1);
            for w in node.keys.windows(2).skip(1) {
                assert!(w[0].name < w[1].name);
            }
            for (i, child) in node.children.iter().enumerate() {
                let (lo, hi) = (&node.keys[i].name, &node.keys[i + 1].name);
                match child {
                    BTreeNode::Leaf(l) => {
                        for e in &l.entries {
                            assert!(&e.name > lo || i == 0);
                            assert!(&e.name <= hi);
                        }
                        assert_eq!(&l.entries.last().unwrap().name, hi);
                    }
                    BTreeNode::Internal(n) => check(n),
                }
            }
        }
        check(tree.root());
    }

    #[test]
    fn duplicate_name_rejected() {
        let (mut tree, _, mut alloc) = populate(&["a", "b"], REFERENCE);
        let err = tree
            .insert(
                NamedEntry {
                    name: "a".into(),
                    entry: SymbolTableEntry::object(0, 0),
                },
                &mut alloc,
            )
            .unwrap_err();
        assert_eq!(err, FormatError::DuplicateLinkName("a".into()));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn serialized_tree_reads_back() {
        let input = ["delta", "alpha", "echo", "charlie", "bravo", "golf", "foxtrot"];
        let (tree, heap, alloc) = populate(&input, SMALL);
        let mut file = vec![0u8; alloc.end_of_file() as usize];
        let hdr = heap.serialize_header(8);
        let h = heap.header_address as usize;
        file[h..h + hdr.len()].copy_from_slice(&hdr);
        let d = heap.data_segment_address as usize;
        file[d..d + heap.data().len()].copy_from_slice(heap.data());
        for (address, bytes) in tree.serialize() {
            let a = address as usize;
            file[a..a + bytes.len()].copy_from_slice(&bytes);
        }
        let back = GroupBTree::read(&file, tree.address(), &heap, SMALL).unwrap();
        assert_eq!(names(&back), names(&tree));
        assert_eq!(back, tree);
    }

    #[test]
    fn siblings_are_linked() {
        let (tree, _, _) = populate(&["a", "b", "c", "d", "e", "f", "g"], SMALL);
        let nodes: Vec<_> = tree
            .serialize()
            .into_iter()
            .filter(|(_, b)| &b[..4] == b"TREE")
            .map(|(_, b)| BTreeV1Node::parse(&b, 0, 8, 8).unwrap())
            .collect();
        let level0: Vec<_> = nodes.iter().filter(|n| n.node_level == 0).collect();
        assert!(level0.len() > 1);
        assert_eq!(level0[0].left_sibling, None);
        assert!(level0[0].right_sibling.is_some());
        assert_eq!(level0.last().unwrap().right_sibling, None);
    }

    #[test]
    fn cycle_is_detected() {
        let (tree, heap, alloc) = populate(&["a"], REFERENCE);
        let mut file = vec![0u8; alloc.end_of_file() as usize];
        let root = BTreeV1Node {
            node_type: 0,
            node_level: 1,
            left_sibling: None,
            right_sibling: None,
            keys: vec![0, 0],
            children: vec![tree.address()],
        };
        let bytes = root.serialize(16, 8, 8);
        let a = tree.address() as usize;
        file[a..a + bytes.len()].copy_from_slice(&bytes);
        assert_eq!(
            GroupBTree::read(&file, tree.address(), &heap, REFERENCE),
            Err(FormatError::CycleDetected(tree.address()))
        );
    }
}
