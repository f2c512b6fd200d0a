//! Version 2 B-trees: header (BTHD), internal (BTIN) and leaf (BTLF) nodes,
//! plus the record types a reader needs.
//!
//! Nodes are decoded one at a time so that a caller can fetch each child
//! on demand. The per-level record limits that fix the width of the child
//! pointer fields are derived from the header in [`BTreeV2Header::levels`].

use crate::checksum::verify_trailing;
use crate::error::FormatError;
use crate::read::{ensure_len, read_uint, ByteReader};

pub const BTHD_SIGNATURE: [u8; 4] = *b"BTHD";
pub const BTIN_SIGNATURE: [u8; 4] = *b"BTIN";
pub const BTLF_SIGNATURE: [u8; 4] = *b"BTLF";

pub const RECORD_LINK_NAME: u8 = 5;
pub const RECORD_ATTRIBUTE_NAME: u8 = 8;
pub const RECORD_CHUNK: u8 = 10;
pub const RECORD_FILTERED_CHUNK: u8 = 11;

/// Signature, version, type and checksum around every node.
const NODE_PREFIX: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV2Header {
    pub tree_type: u8,
    pub node_size: u32,
    pub record_size: u16,
    pub depth: u16,
    pub root_address: u64,
    pub root_records: u16,
    pub total_records: u64,
}

/// Limits of one tree level, leaves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelInfo {
    pub max_records: u64,
    /// Records held by a full subtree rooted at this level.
    pub cumulative_max_records: u64,
    /// Width of a subtree record count referring to this level.
    pub cumulative_width: usize,
}

/// Bytes needed to encode values up to `limit`.
fn limit_width(limit: u64) -> usize {
    let log2 = 63 - limit.max(1).leading_zeros() as usize;
    log2 / 8 + 1
}

impl BTreeV2Header {
    pub fn encoded_len(offset_size: u8, length_size: u8) -> usize {
        16 + offset_size as usize + 2 + length_size as usize + 4
    }

    pub fn parse(
        data: &[u8],
        offset_size: u8,
        length_size: u8,
        verify: bool,
    ) -> Result<BTreeV2Header, FormatError> {
        let len = Self::encoded_len(offset_size, length_size);
        let mut r = ByteReader::new(data);
        r.signature(&BTHD_SIGNATURE, "v2 B-tree header")?;
        let version = r.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "v2 B-tree header",
                version,
            });
        }
        let tree_type = r.u8()?;
        let node_size = r.u32()?;
        let record_size = r.u16()?;
        let depth = r.u16()?;
        r.skip(2)?; // split and merge percentages
        let root_address = r.offset(offset_size)?;
        let root_records = r.u16()?;
        let total_records = r.length(length_size)?;
        ensure_len(data, 0, len)?;
        if verify {
            verify_trailing(&data[..len], "v2 B-tree header")?;
        }
        if record_size == 0 || node_size as usize <= NODE_PREFIX {
            return Err(FormatError::Malformed(format!(
                "v2 B-tree node size {node_size} with record size {record_size}"
            )));
        }
        Ok(BTreeV2Header {
            tree_type,
            node_size,
            record_size,
            depth,
            root_address,
            root_records,
            total_records,
        })
    }

    /// Record limits for levels `0..=depth` (index 0 is the leaf level).
    pub fn levels(&self, offset_size: u8) -> Vec<LevelInfo> {
        let node = self.node_size as u64;
        let rs = self.record_size as u64;
        let leaf_max = (node - NODE_PREFIX as u64) / rs;
        let records_width = limit_width(leaf_max) as u64;
        let mut levels = vec![LevelInfo {
            max_records: leaf_max,
            cumulative_max_records: leaf_max,
            cumulative_width: 0,
        }];
        for u in 1..=self.depth as usize {
            let below = levels[u - 1];
            let pointer = offset_size as u64 + records_width + below.cumulative_width as u64;
            let max_records = node.saturating_sub(NODE_PREFIX as u64 + pointer) / (rs + pointer);
            let cumulative = (max_records + 1)
                .saturating_mul(below.cumulative_max_records)
                .saturating_add(max_records);
            levels.push(LevelInfo {
                max_records,
                cumulative_max_records: cumulative,
                cumulative_width: limit_width(cumulative),
            });
        }
        levels
    }

    pub fn is_empty(&self) -> bool {
        self.total_records == 0 || self.root_records == 0
    }
}

/// Pointer from an internal node to one child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildPointer {
    pub address: u64,
    pub records: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV2Node {
    /// Raw records, each `record_size` bytes.
    pub records: Vec<Vec<u8>>,
    /// Empty for leaves, otherwise `records.len() + 1` children.
    pub children: Vec<ChildPointer>,
}

impl BTreeV2Node {
    /// Parse a node at `depth` (0 for leaves) holding `records` records.
    pub fn parse(
        data: &[u8],
        header: &BTreeV2Header,
        depth: u16,
        records: u16,
        offset_size: u8,
        verify: bool,
    ) -> Result<BTreeV2Node, FormatError> {
        let (signature, structure) = if depth == 0 {
            (&BTLF_SIGNATURE, "v2 B-tree leaf")
        } else {
            (&BTIN_SIGNATURE, "v2 B-tree internal node")
        };
        let mut r = ByteReader::new(data);
        r.signature(signature, structure)?;
        let version = r.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion { structure, version });
        }
        let tree_type = r.u8()?;
        if tree_type != header.tree_type {
            return Err(FormatError::Malformed(format!(
                "{structure} type {tree_type} under a type {} header",
                header.tree_type
            )));
        }
        let rs = header.record_size as usize;
        let nrec = records as usize;
        let recs = (0..nrec)
            .map(|_| r.bytes(rs).map(<[u8]>::to_vec))
            .collect::<Result<Vec<_>, _>>()?;

        let mut children = Vec::new();
        if depth > 0 {
            let levels = header.levels(offset_size);
            let records_width = limit_width(levels[0].max_records);
            let total_width = if depth > 1 {
                levels[depth as usize - 1].cumulative_width
            } else {
                0
            };
            for _ in 0..=nrec {
                let address = r.offset(offset_size)?;
                let count = r.uint(records_width)?;
                if total_width > 0 {
                    r.skip(total_width)?;
                }
                children.push(ChildPointer {
                    address,
                    records: count as u16,
                });
            }
        }
        let end = r.position() + 4;
        ensure_len(data, 0, end)?;
        if verify {
            verify_trailing(&data[..end], structure)?;
        }
        Ok(BTreeV2Node {
            records: recs,
            children,
        })
    }
}

/// Type 5 record: a link in a dense group, keyed by name hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkNameRecord {
    pub name_hash: u32,
    /// Fractal heap id of the link message.
    pub heap_id: Vec<u8>,
}

impl LinkNameRecord {
    pub fn parse(record: &[u8]) -> Result<LinkNameRecord, FormatError> {
        ensure_len(record, 0, 4 + 7)?;
        Ok(LinkNameRecord {
            name_hash: read_uint(record, 0, 4)? as u32,
            heap_id: record[4..11].to_vec(),
        })
    }
}

/// Type 8 record: an attribute in dense attribute storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeNameRecord {
    pub heap_id: Vec<u8>,
    pub message_flags: u8,
    pub creation_order: u32,
    pub name_hash: u32,
}

impl AttributeNameRecord {
    pub fn parse(record: &[u8]) -> Result<AttributeNameRecord, FormatError> {
        ensure_len(record, 0, 17)?;
        Ok(AttributeNameRecord {
            heap_id: record[..8].to_vec(),
            message_flags: record[8],
            creation_order: read_uint(record, 9, 4)? as u32,
            name_hash: read_uint(record, 13, 4)? as u32,
        })
    }
}

/// Type 10 or 11 record: one chunk of a dataset indexed by a v2 B-tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub address: u64,
    /// Stored size; `None` for unfiltered datasets, where it is implied.
    pub size: Option<u64>,
    pub filter_mask: u32,
    /// Chunk coordinates in units of chunks.
    pub scaled: Vec<u64>,
}

impl ChunkRecord {
    /// Decode a record for a dataset of `rank` chunked dimensions.
    pub fn parse(
        record: &[u8],
        tree_type: u8,
        rank: usize,
        offset_size: u8,
    ) -> Result<ChunkRecord, FormatError> {
        let mut r = ByteReader::new(record);
        let address = r.offset(offset_size)?;
        let (size, filter_mask) = match tree_type {
            RECORD_CHUNK => (None, 0),
            RECORD_FILTERED_CHUNK => {
                let width = record
                    .len()
                    .checked_sub(offset_size as usize + 4 + 8 * rank)
                    .filter(|w| (1..=8).contains(w))
                    .ok_or_else(|| {
                        FormatError::Malformed(format!("filtered chunk record of {} bytes", record.len()))
                    })?;
                let size = r.uint(width)?;
                (Some(size), r.u32()?)
            }
            other => {
                return Err(FormatError::Malformed(format!(
                    "v2 B-tree record type {other} is not a chunk record"
                )))
            }
        };
        let scaled = (0..rank).map(|_| r.u64()).collect::<Result<Vec<_>, _>>()?;
        Ok(ChunkRecord {
            address,
            size,
            filter_mask,
            scaled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::jenkins_lookup3;

    fn seal(mut b: Vec<u8>) -> Vec<u8> {
        let sum = jenkins_lookup3(&b);
        b.extend_from_slice(&sum.to_le_bytes());
        b
    }

    fn header_bytes(tree_type: u8, node_size: u32, record_size: u16, depth: u16, root_records: u16, total: u64) -> Vec<u8> {
        let mut b = b"BTHD".to_vec();
        b.push(0);
        b.push(tree_type);
        b.extend_from_slice(&node_size.to_le_bytes());
        b.extend_from_slice(&record_size.to_le_bytes());
        b.extend_from_slice(&depth.to_le_bytes());
        b.extend_from_slice(&[100, 40]);
        b.extend_from_slice(&0x1000u64.to_le_bytes());
        b.extend_from_slice(&root_records.to_le_bytes());
        b.extend_from_slice(&total.to_le_bytes());
        seal(b)
    }

    #[test]
    fn header_with_checksum() {
        let data = header_bytes(RECORD_LINK_NAME, 512, 11, 0, 2, 2);
        let h = BTreeV2Header::parse(&data, 8, 8, true).unwrap();
        assert_eq!(h.tree_type, RECORD_LINK_NAME);
        assert_eq!(h.root_address, 0x1000);
        assert_eq!(h.root_records, 2);
        assert!(!h.is_empty());

        let mut bad = data.clone();
        bad[8] ^= 1;
        assert!(matches!(
            BTreeV2Header::parse(&bad, 8, 8, true),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn level_limits() {
        let h = BTreeV2Header::parse(&header_bytes(RECORD_LINK_NAME, 512, 11, 2, 1, 1), 8, 8, false).unwrap();
        let levels = h.levels(8);
        assert_eq!(levels[0].max_records, (512 - 10) / 11);
        // leaf max 45 fits one byte, so an internal pointer is 8 + 1 bytes.
        assert_eq!(levels[1].max_records, (512 - 10 - 9) / (11 + 9));
        assert_eq!(levels[1].cumulative_max_records, (24 + 1) * 45 + 24);
        assert_eq!(levels[1].cumulative_width, 2);
    }

    #[test]
    fn leaf_records() {
        let header = BTreeV2Header::parse(&header_bytes(RECORD_LINK_NAME, 512, 11, 0, 2, 2), 8, 8, false).unwrap();
        let mut leaf = b"BTLF".to_vec();
        leaf.extend_from_slice(&[0, RECORD_LINK_NAME]);
        for hash in [7u32, 9] {
            leaf.extend_from_slice(&hash.to_le_bytes());
            leaf.extend_from_slice(&[0, 1, 2, 3, 4, 5, 6]);
        }
        let leaf = seal(leaf);
        let node = BTreeV2Node::parse(&leaf, &header, 0, 2, 8, true).unwrap();
        assert!(node.children.is_empty());
        let rec = LinkNameRecord::parse(&node.records[1]).unwrap();
        assert_eq!(rec.name_hash, 9);
        assert_eq!(rec.heap_id, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn internal_node_children() {
        let header = BTreeV2Header::parse(&header_bytes(RECORD_CHUNK, 512, 24, 1, 1, 3), 8, 8, false).unwrap();
        let mut node = b"BTIN".to_vec();
        node.extend_from_slice(&[0, RECORD_CHUNK]);
        node.extend_from_slice(&[0xAA; 24]);
        for (addr, n) in [(0x2000u64, 1u8), (0x3000, 1)] {
            node.extend_from_slice(&addr.to_le_bytes());
            node.push(n);
        }
        let node = seal(node);
        let parsed = BTreeV2Node::parse(&node, &header, 1, 1, 8, true).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(
            parsed.children,
            vec![
                ChildPointer { address: 0x2000, records: 1 },
                ChildPointer { address: 0x3000, records: 1 }
            ]
        );
    }

    #[test]
    fn filtered_chunk_record() {
        let mut rec = 0x4000u64.to_le_bytes().to_vec();
        rec.extend_from_slice(&[0x10, 0x02]);
        rec.extend_from_slice(&1u32.to_le_bytes());
        rec.extend_from_slice(&3u64.to_le_bytes());
        rec.extend_from_slice(&1u64.to_le_bytes());
        let c = ChunkRecord::parse(&rec, RECORD_FILTERED_CHUNK, 2, 8).unwrap();
        assert_eq!(c.address, 0x4000);
        assert_eq!(c.size, Some(0x210));
        assert_eq!(c.filter_mask, 1);
        assert_eq!(c.scaled, vec![3, 1]);
    }

    #[test]
    fn attribute_record() {
        let mut rec = vec![1, 2, 3, 4, 5, 6, 7, 8, 0];
        rec.extend_from_slice(&5u32.to_le_bytes());
        rec.extend_from_slice(&0xABCDu32.to_le_bytes());
        let a = AttributeNameRecord::parse(&rec).unwrap();
        assert_eq!(a.creation_order, 5);
        assert_eq!(a.name_hash, 0xABCD);
    }
}
