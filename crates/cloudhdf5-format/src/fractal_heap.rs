//! Fractal heaps (FRHP), which store dense links and dense attributes.
//!
//! Objects are addressed by heap id. A managed id carries an offset into
//! the heap's doubling-table address space; resolving it means walking
//! from the root block down through indirect blocks (FHIB) until the
//! direct block (FHDB) holding that offset is reached. The walk is exposed
//! one [`BlockStep`] at a time so callers can fetch each block lazily.

use crate::checksum::verify_trailing;
use crate::error::FormatError;
use crate::read::{ensure_len, read_uint, ByteReader};

pub const FRHP_SIGNATURE: [u8; 4] = *b"FRHP";
pub const FHIB_SIGNATURE: [u8; 4] = *b"FHIB";

const ID_TYPE_MANAGED: u8 = 0;
const ID_TYPE_HUGE: u8 = 1;
const ID_TYPE_TINY: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FractalHeapHeader {
    pub heap_id_length: u16,
    pub io_filter_length: u16,
    pub flags: u8,
    pub max_managed_object_size: u32,
    pub managed_objects: u64,
    pub table_width: u16,
    pub starting_block_size: u64,
    pub max_direct_block_size: u64,
    /// Width in bits of heap offsets.
    pub max_heap_size: u16,
    pub starting_root_rows: u16,
    pub root_address: Option<u64>,
    /// Zero when the root is a direct block.
    pub root_rows: u16,
}

/// A decoded heap id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapId {
    Managed { offset: u64, length: u64 },
    /// Object bytes stored inline in the id.
    Tiny(Vec<u8>),
}

/// Next block to visit while resolving a managed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStep {
    Direct { address: u64, block_offset: u64 },
    Indirect { address: u64, block_offset: u64, rows: u16 },
}

/// Decoded child entries of an indirect block, in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndirectBlock {
    pub block_offset: u64,
    pub children: Vec<Option<u64>>,
}

fn log2(v: u64) -> u32 {
    63 - v.max(1).leading_zeros()
}

impl FractalHeapHeader {
    pub fn parse(
        data: &[u8],
        offset_size: u8,
        length_size: u8,
        verify: bool,
    ) -> Result<FractalHeapHeader, FormatError> {
        let mut r = ByteReader::new(data);
        r.signature(&FRHP_SIGNATURE, "fractal heap header")?;
        let version = r.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "fractal heap header",
                version,
            });
        }
        let heap_id_length = r.u16()?;
        let io_filter_length = r.u16()?;
        let flags = r.u8()?;
        let max_managed_object_size = r.u32()?;
        let ls = length_size as usize;
        let os = offset_size as usize;
        // next huge id, huge tree, free space, free space manager,
        // managed space, allocated space, iterator offset
        r.skip(ls + os + ls + os + 3 * ls)?;
        let managed_objects = r.length(length_size)?;
        r.skip(4 * ls)?; // huge and tiny object totals
        let table_width = r.u16()?;
        let starting_block_size = r.length(length_size)?;
        let max_direct_block_size = r.length(length_size)?;
        let max_heap_size = r.u16()?;
        let starting_root_rows = r.u16()?;
        let root_address = r.optional_offset(offset_size)?;
        let root_rows = r.u16()?;
        if io_filter_length > 0 {
            r.skip(ls + 4 + io_filter_length as usize)?;
        }
        let end = r.position() + 4;
        ensure_len(data, 0, end)?;
        if verify {
            verify_trailing(&data[..end], "fractal heap header")?;
        }
        if table_width == 0 || starting_block_size == 0 || max_direct_block_size < starting_block_size {
            return Err(FormatError::Malformed(format!(
                "fractal heap doubling table width {table_width} start {starting_block_size} max {max_direct_block_size}"
            )));
        }
        Ok(FractalHeapHeader {
            heap_id_length,
            io_filter_length,
            flags,
            max_managed_object_size,
            managed_objects,
            table_width,
            starting_block_size,
            max_direct_block_size,
            max_heap_size,
            starting_root_rows,
            root_address,
            root_rows,
        })
    }

    /// Upper bound on the header size, for a first fetch.
    pub fn max_len(offset_size: u8, length_size: u8) -> usize {
        22 + 12 * length_size as usize + 3 * offset_size as usize + 4
    }

    fn offset_bytes(&self) -> usize {
        (self.max_heap_size as usize).div_ceil(8)
    }

    fn length_bytes(&self) -> usize {
        let by_block = (log2(self.max_direct_block_size) as usize).div_ceil(8).max(1);
        let max_obj = self.max_managed_object_size as u64;
        let by_object = log2(max_obj) as usize / 8 + 1;
        by_block.min(by_object)
    }

    pub fn decode_id(&self, id: &[u8]) -> Result<HeapId, FormatError> {
        ensure_len(id, 0, 1)?;
        let version = id[0] >> 6;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "fractal heap id",
                version,
            });
        }
        match (id[0] >> 4) & 0x03 {
            ID_TYPE_MANAGED => {
                let ob = self.offset_bytes();
                let offset = read_uint(id, 1, ob)?;
                let length = read_uint(id, 1 + ob, self.length_bytes())?;
                Ok(HeapId::Managed { offset, length })
            }
            ID_TYPE_TINY => {
                let (len, start) = if self.heap_id_length > 18 {
                    ensure_len(id, 0, 2)?;
                    ((((id[0] & 0x0F) as usize) << 8 | id[1] as usize) + 1, 2)
                } else {
                    ((id[0] & 0x0F) as usize + 1, 1)
                };
                ensure_len(id, start, len)?;
                Ok(HeapId::Tiny(id[start..start + len].to_vec()))
            }
            ID_TYPE_HUGE => Err(FormatError::UnsupportedHeapId(ID_TYPE_HUGE)),
            other => Err(FormatError::Malformed(format!("fractal heap id type {other}"))),
        }
    }

    /// Size of each block in `row` of the doubling table. Entries of
    /// indirect rows span the same amount of heap space.
    pub fn row_block_size(&self, row: usize) -> u64 {
        if row == 0 {
            self.starting_block_size
        } else {
            self.starting_block_size.saturating_mul(1u64 << (row - 1).min(62))
        }
    }

    /// Rows of an indirect block that point at direct blocks.
    pub fn max_direct_rows(&self) -> usize {
        (log2(self.max_direct_block_size) - log2(self.starting_block_size)) as usize + 2
    }

    /// Encoded size of an indirect block with `rows` rows.
    pub fn indirect_block_len(&self, rows: u16, offset_size: u8, length_size: u8) -> usize {
        let width = self.table_width as usize;
        let rows = rows as usize;
        let direct = rows.min(self.max_direct_rows()) * width;
        let indirect = rows.saturating_sub(self.max_direct_rows()) * width;
        let direct_entry = offset_size as usize
            + if self.io_filter_length > 0 {
                length_size as usize + 4
            } else {
                0
            };
        5 + offset_size as usize + self.offset_bytes() + direct * direct_entry + indirect * offset_size as usize + 4
    }

    pub fn root_step(&self) -> Result<BlockStep, FormatError> {
        let address = self
            .root_address
            .ok_or_else(|| FormatError::Malformed("fractal heap has no root block".into()))?;
        if self.io_filter_length > 0 {
            return Err(FormatError::UnsupportedRead("filtered fractal heap blocks".into()));
        }
        Ok(if self.root_rows == 0 {
            BlockStep::Direct {
                address,
                block_offset: 0,
            }
        } else {
            BlockStep::Indirect {
                address,
                block_offset: 0,
                rows: self.root_rows,
            }
        })
    }

    pub fn parse_indirect(
        &self,
        data: &[u8],
        rows: u16,
        offset_size: u8,
        length_size: u8,
        verify: bool,
    ) -> Result<IndirectBlock, FormatError> {
        let len = self.indirect_block_len(rows, offset_size, length_size);
        ensure_len(data, 0, len)?;
        let mut r = ByteReader::new(data);
        r.signature(&FHIB_SIGNATURE, "fractal heap indirect block")?;
        let version = r.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "fractal heap indirect block",
                version,
            });
        }
        let _heap_address = r.offset(offset_size)?;
        let block_offset = r.uint(self.offset_bytes())?;
        let width = self.table_width as usize;
        let total = rows as usize * width;
        let mut children = Vec::with_capacity(total);
        for i in 0..total {
            children.push(r.optional_offset(offset_size)?);
            if i / width < self.max_direct_rows() && self.io_filter_length > 0 {
                r.skip(length_size as usize + 4)?;
            }
        }
        if verify {
            verify_trailing(&data[..len], "fractal heap indirect block")?;
        }
        Ok(IndirectBlock {
            block_offset,
            children,
        })
    }

    /// Pick the child of `block` whose span covers heap `offset`.
    pub fn child_step(&self, block: &IndirectBlock, offset: u64) -> Result<BlockStep, FormatError> {
        let width = self.table_width as usize;
        let first_row_bits = log2(self.starting_block_size) + log2(self.table_width as u64);
        let mut base = block.block_offset;
        for (i, child) in block.children.iter().enumerate() {
            let row = i / width;
            let span = self.row_block_size(row);
            if offset >= base && offset < base + span {
                let address = child.ok_or_else(|| {
                    FormatError::Malformed(format!("heap offset {offset} falls in an unallocated block"))
                })?;
                return Ok(if row < self.max_direct_rows() {
                    BlockStep::Direct {
                        address,
                        block_offset: base,
                    }
                } else {
                    let rows = (log2(span) - first_row_bits + 1) as u16;
                    BlockStep::Indirect {
                        address,
                        block_offset: base,
                        rows,
                    }
                });
            }
            base += span;
        }
        Err(FormatError::Malformed(format!(
            "heap offset {offset} beyond indirect block at heap offset {}",
            block.block_offset
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(root_rows: u16, heap_id_length: u16) -> Vec<u8> {
        let mut b = b"FRHP".to_vec();
        b.push(0);
        b.extend_from_slice(&heap_id_length.to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes());
        b.push(0);
        b.extend_from_slice(&4096u32.to_le_bytes());
        b.extend_from_slice(&[0u8; 56]);
        b.extend_from_slice(&3u64.to_le_bytes()); // managed objects
        b.extend_from_slice(&[0u8; 32]);
        b.extend_from_slice(&4u16.to_le_bytes()); // width
        b.extend_from_slice(&512u64.to_le_bytes());
        b.extend_from_slice(&65536u64.to_le_bytes());
        b.extend_from_slice(&32u16.to_le_bytes());
        b.extend_from_slice(&1u16.to_le_bytes());
        b.extend_from_slice(&0x900u64.to_le_bytes());
        b.extend_from_slice(&root_rows.to_le_bytes());
        b.extend_from_slice(&[0u8; 4]);
        b
    }

    #[test]
    fn header_fields() {
        let h = FractalHeapHeader::parse(&header_bytes(0, 8), 8, 8, false).unwrap();
        assert_eq!(h.table_width, 4);
        assert_eq!(h.starting_block_size, 512);
        assert_eq!(h.managed_objects, 3);
        assert_eq!(h.root_address, Some(0x900));
        assert_eq!(h.max_direct_rows(), 9);
        assert!(FractalHeapHeader::max_len(8, 8) >= header_bytes(0, 8).len());
        assert_eq!(
            h.root_step().unwrap(),
            BlockStep::Direct {
                address: 0x900,
                block_offset: 0
            }
        );
    }

    #[test]
    fn managed_and_tiny_ids() {
        let h = FractalHeapHeader::parse(&header_bytes(0, 8), 8, 8, false).unwrap();
        // 4 offset bytes (32 bits), 2 length bytes (max object 4096).
        let id = [0x00, 0x34, 0x00, 0x00, 0x00, 0x19, 0x00, 0x00];
        assert_eq!(
            h.decode_id(&id).unwrap(),
            HeapId::Managed {
                offset: 0x34,
                length: 0x19
            }
        );
        let tiny = [0x22, b'a', b'b', b'c', 0, 0, 0, 0];
        assert_eq!(h.decode_id(&tiny).unwrap(), HeapId::Tiny(b"abc".to_vec()));
        assert!(matches!(h.decode_id(&[0x10, 0, 0]), Err(FormatError::UnsupportedHeapId(1))));
    }

    #[test]
    fn indirect_walk() {
        let h = FractalHeapHeader::parse(&header_bytes(2, 8), 8, 8, false).unwrap();
        assert_eq!(
            h.root_step().unwrap(),
            BlockStep::Indirect {
                address: 0x900,
                block_offset: 0,
                rows: 2
            }
        );
        let len = h.indirect_block_len(2, 8, 8);
        let mut b = b"FHIB".to_vec();
        b.push(0);
        b.extend_from_slice(&0u64.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes());
        for i in 0..8u64 {
            if i == 5 {
                b.extend_from_slice(&[0xFF; 8]);
            } else {
                b.extend_from_slice(&(0x1000 + i * 0x200).to_le_bytes());
            }
        }
        b.extend_from_slice(&[0u8; 4]);
        assert_eq!(b.len(), len);
        let ib = h.parse_indirect(&b, 2, 8, 8, false).unwrap();
        assert_eq!(ib.children.len(), 8);
        // Row 0 and row 1 blocks are both 512 bytes.
        assert_eq!(
            h.child_step(&ib, 512 * 6 + 10).unwrap(),
            BlockStep::Direct {
                address: 0x1000 + 6 * 0x200,
                block_offset: 512 * 6
            }
        );
        assert!(h.child_step(&ib, 512 * 5 + 1).is_err());
        assert!(h.child_step(&ib, 512 * 8).is_err());
    }
}
