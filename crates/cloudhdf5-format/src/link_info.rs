//! Link info message (type 0x0002): where a new-style group keeps dense links.

use crate::error::FormatError;
use crate::read::ByteReader;

const FLAG_CREATION_ORDER_TRACKED: u8 = 0x01;
const FLAG_CREATION_ORDER_INDEXED: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfoMessage {
    pub max_creation_order: Option<u64>,
    /// Fractal heap holding the link records; `None` for compact groups.
    pub fractal_heap_address: Option<u64>,
    /// Version 2 B-tree (record type 5) indexing links by name hash.
    pub btree_name_index_address: Option<u64>,
    pub btree_creation_order_address: Option<u64>,
}

impl LinkInfoMessage {
    pub fn parse(data: &[u8], offset_size: u8) -> Result<LinkInfoMessage, FormatError> {
        let mut r = ByteReader::new(data);
        let version = r.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "link info",
                version,
            });
        }
        let flags = r.u8()?;
        let max_creation_order = if flags & FLAG_CREATION_ORDER_TRACKED != 0 {
            Some(r.u64()?)
        } else {
            None
        };
        let fractal_heap_address = r.optional_offset(offset_size)?;
        let btree_name_index_address = r.optional_offset(offset_size)?;
        let btree_creation_order_address = if flags & FLAG_CREATION_ORDER_INDEXED != 0 {
            r.optional_offset(offset_size)?
        } else {
            None
        };
        Ok(LinkInfoMessage {
            max_creation_order,
            fractal_heap_address,
            btree_name_index_address,
            btree_creation_order_address,
        })
    }

    /// Whether links live in a fractal heap rather than in Link messages.
    pub fn is_dense(&self) -> bool {
        self.fractal_heap_address.is_some()
    }
}
