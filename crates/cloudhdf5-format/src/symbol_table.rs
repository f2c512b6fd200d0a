//! Symbol table message (type 0x0011) and symbol table nodes (SNOD).

use crate::error::FormatError;
use crate::read::ByteReader;

pub const SNOD_SIGNATURE: [u8; 4] = *b"SNOD";

/// Cache type of an entry whose scratch pad holds a soft link value offset.
pub const CACHE_TYPE_SOFT_LINK: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTableMessage {
    /// Version 1 B-tree (type 0) indexing the group's symbol nodes.
    pub btree_address: u64,
    pub local_heap_address: u64,
}

impl SymbolTableMessage {
    pub fn parse(data: &[u8], offset_size: u8) -> Result<SymbolTableMessage, FormatError> {
        let mut r = ByteReader::new(data);
        Ok(SymbolTableMessage {
            btree_address: r.offset(offset_size)?,
            local_heap_address: r.offset(offset_size)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTableEntry {
    /// Offset of the entry's name in the group's local heap.
    pub link_name_offset: u64,
    pub object_header_address: u64,
    pub cache_type: u32,
    pub scratch_pad: [u8; 16],
}

impl SymbolTableEntry {
    pub fn encoded_len(offset_size: u8) -> usize {
        2 * offset_size as usize + 24
    }

    pub fn parse(r: &mut ByteReader<'_>, offset_size: u8) -> Result<SymbolTableEntry, FormatError> {
        let link_name_offset = r.offset(offset_size)?;
        let object_header_address = r.offset(offset_size)?;
        let cache_type = r.u32()?;
        r.skip(4)?;
        let mut scratch_pad = [0u8; 16];
        scratch_pad.copy_from_slice(r.bytes(16)?);
        Ok(SymbolTableEntry {
            link_name_offset,
            object_header_address,
            cache_type,
            scratch_pad,
        })
    }

    /// Local heap offset of the soft link value, for soft-link entries.
    pub fn soft_link_offset(&self) -> Option<u64> {
        (self.cache_type == CACHE_TYPE_SOFT_LINK).then(|| {
            u32::from_le_bytes([
                self.scratch_pad[0],
                self.scratch_pad[1],
                self.scratch_pad[2],
                self.scratch_pad[3],
            ]) as u64
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTableNode {
    pub entries: Vec<SymbolTableEntry>,
}

impl SymbolTableNode {
    /// Bytes before the first entry.
    pub const HEADER_LEN: usize = 8;

    pub fn parse(data: &[u8], offset_size: u8) -> Result<SymbolTableNode, FormatError> {
        let mut r = ByteReader::new(data);
        r.signature(&SNOD_SIGNATURE, "symbol table node")?;
        let version = r.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                structure: "symbol table node",
                version,
            });
        }
        r.skip(1)?;
        let count = r.u16()? as usize;
        // Fail early with the full size so a lazy caller can fetch it in one go.
        let needed = Self::HEADER_LEN + count * SymbolTableEntry::encoded_len(offset_size);
        crate::read::ensure_len(data, 0, needed)?;
        let entries = (0..count)
            .map(|_| SymbolTableEntry::parse(&mut r, offset_size))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SymbolTableNode { entries })
    }
}
