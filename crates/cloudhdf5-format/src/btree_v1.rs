//! Version 1 B-tree nodes ("TREE"), used by legacy groups (type 0) and by
//! chunked datasets with a version 3 layout (type 1).

use crate::error::FormatError;
use crate::read::ByteReader;

pub const TREE_SIGNATURE: [u8; 4] = *b"TREE";

pub const NODE_TYPE_GROUP: u8 = 0;
pub const NODE_TYPE_CHUNK: u8 = 1;

/// Key of a chunk B-tree entry, describing the chunk that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkKey {
    /// Stored (possibly filtered) size of the chunk in bytes.
    pub chunk_size: u32,
    /// Bit `i` set means filter `i` was skipped for this chunk.
    pub filter_mask: u32,
    /// Element offsets of the chunk in each dimension, without the trailing
    /// element-size dimension.
    pub offsets: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keys {
    /// Local heap offsets of the largest name in each child.
    Group(Vec<u64>),
    Chunk(Vec<ChunkKey>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV1Node {
    pub node_type: u8,
    /// Zero for leaves.
    pub level: u8,
    pub left_sibling: Option<u64>,
    pub right_sibling: Option<u64>,
    /// `children.len() + 1` keys.
    pub keys: Keys,
    pub children: Vec<u64>,
}

impl BTreeV1Node {
    pub fn header_len(offset_size: u8) -> usize {
        8 + 2 * offset_size as usize
    }

    fn key_len(node_type: u8, length_size: u8, rank: usize) -> usize {
        match node_type {
            NODE_TYPE_GROUP => length_size as usize,
            _ => 8 + 8 * (rank + 1),
        }
    }

    /// Parse a node.
    ///
    /// `rank` is the dataspace rank of the dataset and only matters for
    /// chunk nodes, whose keys carry one extra offset for the element size.
    pub fn parse(
        data: &[u8],
        offset_size: u8,
        length_size: u8,
        rank: usize,
    ) -> Result<BTreeV1Node, FormatError> {
        let mut r = ByteReader::new(data);
        r.signature(&TREE_SIGNATURE, "v1 B-tree node")?;
        let node_type = r.u8()?;
        if node_type > NODE_TYPE_CHUNK {
            return Err(FormatError::Malformed(format!("v1 B-tree node type {node_type}")));
        }
        let level = r.u8()?;
        let entries = r.u16()? as usize;
        let left_sibling = r.optional_offset(offset_size)?;
        let right_sibling = r.optional_offset(offset_size)?;

        let key_len = Self::key_len(node_type, length_size, rank);
        let needed = Self::header_len(offset_size) + entries * (key_len + offset_size as usize) + key_len;
        crate::read::ensure_len(data, 0, needed)?;

        let mut children = Vec::with_capacity(entries);
        let keys = if node_type == NODE_TYPE_GROUP {
            let mut keys = Vec::with_capacity(entries + 1);
            for i in 0..=entries {
                keys.push(r.length(length_size)?);
                if i < entries {
                    children.push(r.offset(offset_size)?);
                }
            }
            Keys::Group(keys)
        } else {
            let mut keys = Vec::with_capacity(entries + 1);
            for i in 0..=entries {
                let chunk_size = r.u32()?;
                let filter_mask = r.u32()?;
                let mut offsets = (0..=rank).map(|_| r.u64()).collect::<Result<Vec<_>, _>>()?;
                offsets.truncate(rank);
                keys.push(ChunkKey {
                    chunk_size,
                    filter_mask,
                    offsets,
                });
                if i < entries {
                    children.push(r.offset(offset_size)?);
                }
            }
            Keys::Chunk(keys)
        };

        Ok(BTreeV1Node {
            node_type,
            level,
            left_sibling,
            right_sibling,
            keys,
            children,
        })
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    /// Pair each child with the key on its left, which for chunk nodes
    /// describes that child.
    pub fn chunk_entries(&self) -> impl Iterator<Item = (&ChunkKey, u64)> + '_ {
        let keys: &[ChunkKey] = match &self.keys {
            Keys::Chunk(k) => k,
            Keys::Group(_) => &[],
        };
        keys.iter().zip(self.children.iter().copied())
    }
}
