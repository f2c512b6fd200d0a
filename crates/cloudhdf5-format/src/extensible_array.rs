//! Extensible array chunk index (EAHD, EAIB, EASB, EADB), used for datasets
//! with a single unlimited dimension.
//!
//! Elements are spread over the index block, data blocks addressed from the
//! index block, and data blocks addressed from super blocks. The geometry
//! is fixed by the creation parameters in the header; [`Geometry`] derives
//! which element indices each block holds.

use crate::checksum::verify_trailing;
use crate::error::FormatError;
use crate::fixed_array::{decode_element, ArrayElement};
use crate::read::{ensure_len, ByteReader};

pub const EAHD_SIGNATURE: [u8; 4] = *b"EAHD";
pub const EAIB_SIGNATURE: [u8; 4] = *b"EAIB";
pub const EASB_SIGNATURE: [u8; 4] = *b"EASB";
pub const EADB_SIGNATURE: [u8; 4] = *b"EADB";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensibleArrayHeader {
    pub client_id: u8,
    pub element_size: u8,
    pub max_elements_bits: u8,
    pub index_block_elements: u8,
    pub data_block_min_elements: u8,
    pub super_block_min_pointers: u8,
    pub page_bits: u8,
    /// One past the largest element index ever set.
    pub max_index_set: u64,
    pub index_block_address: Option<u64>,
}

/// Element range of one super block level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlockInfo {
    pub data_blocks: u64,
    pub block_elements: u64,
    pub start_index: u64,
}

/// A data block slot: the first element index it holds and how many.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBlockSlot {
    pub start_index: u64,
    pub elements: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    /// Every super block level, including those addressed from the index block.
    pub levels: Vec<SuperBlockInfo>,
    /// Data blocks whose addresses live directly in the index block.
    pub index_data_blocks: Vec<DataBlockSlot>,
    /// Levels whose super block addresses live in the index block.
    pub index_super_blocks: Vec<SuperBlockInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBlock {
    pub elements: Vec<Option<ArrayElement>>,
    pub data_block_addresses: Vec<Option<u64>>,
    pub super_block_addresses: Vec<Option<u64>>,
}

fn log2(v: u64) -> u32 {
    63 - v.max(1).leading_zeros()
}

impl ExtensibleArrayHeader {
    pub fn encoded_len(offset_size: u8, length_size: u8) -> usize {
        12 + 6 * length_size as usize + offset_size as usize + 4
    }

    pub fn parse(
        data: &[u8],
        offset_size: u8,
        length_size: u8,
        verify: bool,
    ) -> Result<ExtensibleArrayHeader, FormatError> {
        let len = Self::encoded_len(offset_size, length_size);
        ensure_len(data, 0, len)?;
        let mut r = ByteReader::new(data);
        r.signature(&EAHD_SIGNATURE, "extensible array header")?;
        let version = r.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "extensible array header",
                version,
            });
        }
        let client_id = r.u8()?;
        let element_size = r.u8()?;
        let max_elements_bits = r.u8()?;
        let index_block_elements = r.u8()?;
        let data_block_min_elements = r.u8()?;
        let super_block_min_pointers = r.u8()?;
        let page_bits = r.u8()?;
        r.skip(4 * length_size as usize)?; // super/data block counts and sizes
        let max_index_set = r.length(length_size)?;
        let _realized = r.length(length_size)?;
        let index_block_address = r.optional_offset(offset_size)?;
        if verify {
            verify_trailing(&data[..len], "extensible array header")?;
        }
        if data_block_min_elements == 0
            || super_block_min_pointers == 0
            || element_size == 0
            || max_elements_bits > 64
            || page_bits >= 64
        {
            return Err(FormatError::Malformed("extensible array creation parameters".into()));
        }
        Ok(ExtensibleArrayHeader {
            client_id,
            element_size,
            max_elements_bits,
            index_block_elements,
            data_block_min_elements,
            super_block_min_pointers,
            page_bits,
            max_index_set,
            index_block_address,
        })
    }

    pub fn geometry(&self) -> Geometry {
        let min = self.data_block_min_elements as u64;
        let count = 1 + self.max_elements_bits.saturating_sub(log2(min) as u8) as usize;
        let mut levels = Vec::with_capacity(count);
        let mut start = self.index_block_elements as u64;
        for u in 0..count {
            let data_blocks = 1u64 << (u / 2).min(63);
            let block_elements = (1u64 << u.div_ceil(2).min(63)).saturating_mul(min);
            levels.push(SuperBlockInfo {
                data_blocks,
                block_elements,
                start_index: start,
            });
            start = start.saturating_add(data_blocks.saturating_mul(block_elements));
        }
        let in_index = (2 * log2(self.super_block_min_pointers as u64) as usize).min(levels.len());
        let mut index_data_blocks = Vec::new();
        for level in &levels[..in_index] {
            for k in 0..level.data_blocks {
                index_data_blocks.push(DataBlockSlot {
                    start_index: level.start_index + k * level.block_elements,
                    elements: level.block_elements,
                });
            }
        }
        let index_super_blocks = levels[in_index..].to_vec();
        Geometry {
            levels,
            index_data_blocks,
            index_super_blocks,
        }
    }

    fn block_offset_bytes(&self) -> usize {
        (self.max_elements_bits as usize).div_ceil(8)
    }

    fn is_paged(&self, block_elements: u64) -> bool {
        block_elements > 1u64 << self.page_bits.min(63)
    }

    pub fn index_block_len(&self, offset_size: u8) -> usize {
        let g = self.geometry();
        let os = offset_size as usize;
        6 + os
            + self.index_block_elements as usize * self.element_size as usize
            + g.index_data_blocks.len() * os
            + g.index_super_blocks.len() * os
            + 4
    }

    pub fn parse_index_block(
        &self,
        data: &[u8],
        offset_size: u8,
        verify: bool,
    ) -> Result<IndexBlock, FormatError> {
        let len = self.index_block_len(offset_size);
        ensure_len(data, 0, len)?;
        let mut r = self.block_prefix(data, &EAIB_SIGNATURE, "extensible array index block", offset_size)?;
        let es = self.element_size as usize;
        let elements = (0..self.index_block_elements)
            .map(|_| decode_element(r.bytes(es)?, self.client_id, offset_size))
            .collect::<Result<Vec<_>, _>>()?;
        let g = self.geometry();
        let data_block_addresses = (0..g.index_data_blocks.len())
            .map(|_| r.optional_offset(offset_size))
            .collect::<Result<Vec<_>, _>>()?;
        let super_block_addresses = (0..g.index_super_blocks.len())
            .map(|_| r.optional_offset(offset_size))
            .collect::<Result<Vec<_>, _>>()?;
        if verify {
            verify_trailing(&data[..len], "extensible array index block")?;
        }
        Ok(IndexBlock {
            elements,
            data_block_addresses,
            super_block_addresses,
        })
    }

    fn super_block_bitmap_len(&self, level: &SuperBlockInfo) -> usize {
        if self.is_paged(level.block_elements) {
            let pages = level.block_elements.checked_shr(self.page_bits.into()).unwrap_or(0);
            level.data_blocks.saturating_mul(pages).div_ceil(8) as usize
        } else {
            0
        }
    }

    /// Saturates for geometries no file could hold; reading that many
    /// bytes then fails its bounds check.
    pub fn super_block_len(&self, level: &SuperBlockInfo, offset_size: u8) -> usize {
        (10 + offset_size as usize + self.block_offset_bytes())
            .saturating_add(self.super_block_bitmap_len(level))
            .saturating_add((level.data_blocks as usize).saturating_mul(offset_size as usize))
    }

    /// Decode the data block addresses of a super block.
    pub fn parse_super_block(
        &self,
        data: &[u8],
        level: &SuperBlockInfo,
        offset_size: u8,
        verify: bool,
    ) -> Result<Vec<Option<u64>>, FormatError> {
        let len = self.super_block_len(level, offset_size);
        ensure_len(data, 0, len)?;
        let mut r = self.block_prefix(data, &EASB_SIGNATURE, "extensible array super block", offset_size)?;
        r.skip(self.block_offset_bytes() + self.super_block_bitmap_len(level))?;
        let addrs = (0..level.data_blocks)
            .map(|_| r.optional_offset(offset_size))
            .collect::<Result<Vec<_>, _>>()?;
        if verify {
            verify_trailing(&data[..len], "extensible array super block")?;
        }
        Ok(addrs)
    }

    pub fn data_block_len(&self, block_elements: u64, offset_size: u8) -> usize {
        (10 + offset_size as usize + self.block_offset_bytes())
            .saturating_add((block_elements as usize).saturating_mul(self.element_size as usize))
    }

    pub fn parse_data_block(
        &self,
        data: &[u8],
        block_elements: u64,
        offset_size: u8,
        verify: bool,
    ) -> Result<Vec<Option<ArrayElement>>, FormatError> {
        if self.is_paged(block_elements) {
            return Err(FormatError::UnsupportedRead(format!(
                "paged extensible array data block of {block_elements} elements"
            )));
        }
        let len = self.data_block_len(block_elements, offset_size);
        ensure_len(data, 0, len)?;
        let mut r = self.block_prefix(data, &EADB_SIGNATURE, "extensible array data block", offset_size)?;
        r.skip(self.block_offset_bytes())?;
        let es = self.element_size as usize;
        let out = (0..block_elements)
            .map(|_| decode_element(r.bytes(es)?, self.client_id, offset_size))
            .collect::<Result<Vec<_>, _>>()?;
        if verify {
            verify_trailing(&data[..len], "extensible array data block")?;
        }
        Ok(out)
    }

    fn block_prefix<'a>(
        &self,
        data: &'a [u8],
        signature: &[u8; 4],
        structure: &'static str,
        offset_size: u8,
    ) -> Result<ByteReader<'a>, FormatError> {
        let mut r = ByteReader::new(data);
        r.signature(signature, structure)?;
        let version = r.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion { structure, version });
        }
        if r.u8()? != self.client_id {
            return Err(FormatError::Malformed(format!("{structure} client mismatch")));
        }
        let _header = r.offset(offset_size)?;
        Ok(r)
    }
}
