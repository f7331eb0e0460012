//! HDF5 B-tree v1 node codec (type 0, group nodes).

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;
use crate::fields::{ensure_len, read_address, read_length, read_offset, write_offset, UNDEFINED_ADDRESS};

/// Node type of group B-trees.
pub const GROUP_NODE_TYPE: u8 = 0;

/// A parsed B-tree v1 node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV1Node {
    /// Node type: 0=group, 1=raw data chunks.
    pub node_type: u8,
    /// Node level: 0 points at symbol table nodes, >0 at other B-tree nodes.
    pub node_level: u8,
    /// Left sibling address, or None if undefined.
    pub left_sibling: Option<u64>,
    /// Right sibling address, or None if undefined.
    pub right_sibling: Option<u64>,
    /// Keys (children + 1 values). For groups, local heap offsets of names.
    pub keys: Vec<u64>,
    /// Child addresses.
    pub children: Vec<u64>,
}

impl BTreeV1Node {
    /// Size of a node block with room for `2 * k` children.
    pub fn node_size(k: u16, offset_size: u8, length_size: u8) -> usize {
        let os = offset_size as usize;
        let ls = length_size as usize;
        let k2 = 2 * k as usize;
        8 + 2 * os + (k2 + 1) * ls + k2 * os
    }

    /// Parse a B-tree v1 node at the given offset in the file data.
    ///
    /// Group node keys are `length_size` bytes (heap name offsets).
    pub fn parse(
        file_data: &[u8],
        offset: usize,
        offset_size: u8,
        length_size: u8,
    ) -> Result<BTreeV1Node, FormatError> {
        let os = offset_size as usize;
        let ls = length_size as usize;
        ensure_len(file_data, offset, 8 + os * 2)?;

        if &file_data[offset..offset + 4] != b"TREE" {
            return Err(FormatError::InvalidBTreeSignature);
        }

        let node_type = file_data[offset + 4];
        if node_type != GROUP_NODE_TYPE {
            return Err(FormatError::InvalidBTreeNodeType(node_type));
        }
        let node_level = file_data[offset + 5];
        let entries_used = LittleEndian::read_u16(&file_data[offset + 6..]) as usize;

        let mut pos = offset + 8;
        let left_sibling = read_address(file_data, pos, offset_size)?;
        pos += os;
        let right_sibling = read_address(file_data, pos, offset_size)?;
        pos += os;

        // key[0], child[0], key[1], child[1], ..., child[N-1], key[N]
        ensure_len(file_data, pos, entries_used * (ls + os) + ls)?;
        let mut keys = Vec::with_capacity(entries_used + 1);
        let mut children = Vec::with_capacity(entries_used);
        for _ in 0..entries_used {
            keys.push(read_length(file_data, pos, length_size)?);
            pos += ls;
            children.push(read_offset(file_data, pos, offset_size)?);
            pos += os;
        }
        keys.push(read_length(file_data, pos, length_size)?);

        Ok(BTreeV1Node {
            node_type,
            node_level,
            left_sibling,
            right_sibling,
            keys,
            children,
        })
    }

    /// Serialize into a zero-filled block sized for `2 * k` children.
    pub fn serialize(&self, k: u16, offset_size: u8, length_size: u8) -> Vec<u8> {
        let size = Self::node_size(k, offset_size, length_size);
        let mut buf = Vec::with_capacity(size);
        buf.extend_from_slice(b"TREE");
        buf.push(self.node_type);
        buf.push(self.node_level);
        buf.extend_from_slice(&(self.children.len() as u16).to_le_bytes());
        write_offset(&mut buf, self.left_sibling.unwrap_or(UNDEFINED_ADDRESS), offset_size);
        write_offset(&mut buf, self.right_sibling.unwrap_or(UNDEFINED_ADDRESS), offset_size);
        for (key, child) in self.keys.iter().zip(&self.children) {
            write_offset(&mut buf, *key, length_size);
            write_offset(&mut buf, *child, offset_size);
        }
        if let Some(last) = self.keys.last() {
            write_offset(&mut buf, *last, length_size);
        }
        buf.resize(size.max(buf.len()), 0);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(level: u8, keys: &[u64], children: &[u64]) -> BTreeV1Node {
        BTreeV1Node {
            node_type: 0,
            node_level: level,
            left_sibling: None,
            right_sibling: None,
            keys: keys.to_vec(),
            children: children.to_vec(),
        }
    }

    #[test]
    fn reference_node_size() {
        assert_eq!(BTreeV1Node::node_size(16, 8, 8), 544);
        assert_eq!(BTreeV1Node::node_size(16, 4, 4), 8 + 8 + 33 * 4 + 32 * 4);
    }

    #[test]
    fn parse_leaf_node() {
        let data = node(0, &[0, 5, 10], &[0x100, 0x200]).serialize(16, 8, 8);
        let parsed = BTreeV1Node::parse(&data, 0, 8, 8).unwrap();
        assert_eq!(parsed.node_level, 0);
        assert_eq!(parsed.keys, vec![0, 5, 10]);
        assert_eq!(parsed.children, vec![0x100, 0x200]);
        assert_eq!(parsed.left_sibling, None);
        assert_eq!(parsed.right_sibling, None);
    }

    #[test]
    fn siblings_survive() {
        let mut n = node(1, &[0, 8], &[0x300]);
        n.left_sibling = Some(0x40);
        n.right_sibling = Some(0x80);
        let data = n.serialize(16, 8, 8);
        assert_eq!(BTreeV1Node::parse(&data, 0, 8, 8).unwrap(), n);
    }

    #[test]
    fn empty_root_layout() {
        let data = node(0, &[0], &[]).serialize(16, 8, 8);
        assert_eq!(data.len(), 544);
        assert_eq!(&data[6..8], &[0, 0]);
        assert!(data[8..24].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn invalid_signature() {
        let mut data = node(0, &[0, 1], &[0x100]).serialize(16, 8, 8);
        data[0] = b'X';
        let err = BTreeV1Node::parse(&data, 0, 8, 8).unwrap_err();
        assert_eq!(err, FormatError::InvalidBTreeSignature);
    }

    #[test]
    fn chunk_node_rejected() {
        let mut data = node(0, &[0, 1], &[0x100]).serialize(16, 8, 8);
        data[4] = 1;
        let err = BTreeV1Node::parse(&data, 0, 8, 8).unwrap_err();
        assert_eq!(err, FormatError::InvalidBTreeNodeType(1));
    }

    #[test]
    fn entry_count_past_eof() {
        let mut data = node(0, &[0, 1], &[0x100]).serialize(16, 8, 8);
        data[6] = 0xFF;
        assert!(matches!(
            BTreeV1Node::parse(&data, 0, 8, 8),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn parse_4byte_offsets() {
        let data = node(0, &[0, 4], &[0x50]).serialize(16, 4, 4);
        let parsed = BTreeV1Node::parse(&data, 0, 4, 4).unwrap();
        assert_eq!(parsed.children, vec![0x50]);
        assert_eq!(parsed.keys, vec![0, 4]);
    }
}
