//! Data layout message (type 0x0008), versions 3 and 4.

use crate::error::FormatError;
use crate::read::ByteReader;

/// How a chunked dataset's chunk addresses are indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkIndexKind {
    /// Layout v3: B-tree v1 of type 1.
    BTreeV1 { address: Option<u64> },
    /// Exactly one chunk covering the whole dataset.
    Single {
        address: Option<u64>,
        /// Stored size and filter mask when the chunk is filtered.
        filtered: Option<(u64, u32)>,
    },
    /// Unfiltered chunks laid out back to back in row-major chunk order.
    Implicit { address: Option<u64> },
    FixedArray {
        address: Option<u64>,
        page_bits: u8,
    },
    ExtensibleArray { address: Option<u64> },
    BTreeV2 {
        address: Option<u64>,
        node_size: u32,
    },
}

impl ChunkIndexKind {
    pub fn address(&self) -> Option<u64> {
        match self {
            ChunkIndexKind::BTreeV1 { address }
            | ChunkIndexKind::Single { address, .. }
            | ChunkIndexKind::Implicit { address }
            | ChunkIndexKind::FixedArray { address, .. }
            | ChunkIndexKind::ExtensibleArray { address }
            | ChunkIndexKind::BTreeV2 { address, .. } => *address,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedLayout {
    pub version: u8,
    /// Chunk extent per dataset dimension.
    pub chunk_dims: Vec<u64>,
    /// Element size recorded as the trailing chunk dimension.
    pub element_size: u32,
    /// Partial edge chunks are stored without filters.
    pub unfiltered_edge_chunks: bool,
    pub index: ChunkIndexKind,
}

impl ChunkedLayout {
    /// Bytes in one fully decoded chunk.
    pub fn chunk_bytes(&self) -> u64 {
        self.chunk_dims
            .iter()
            .fold(self.element_size as u64, |n, &d| n.saturating_mul(d))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLayout {
    Compact { data: Vec<u8> },
    Contiguous { address: Option<u64>, size: u64 },
    Chunked(ChunkedLayout),
    Virtual,
}

impl DataLayout {
    pub fn parse(data: &[u8], offset_size: u8, length_size: u8) -> Result<DataLayout, FormatError> {
        let mut r = ByteReader::new(data);
        let version = r.u8()?;
        if !(3..=4).contains(&version) {
            return Err(FormatError::UnsupportedVersion {
                structure: "data layout",
                version,
            });
        }
        match r.u8()? {
            0 => {
                let size = r.u16()? as usize;
                Ok(DataLayout::Compact {
                    data: r.bytes(size)?.to_vec(),
                })
            }
            1 => {
                let address = r.optional_offset(offset_size)?;
                let size = r.length(length_size)?;
                Ok(DataLayout::Contiguous { address, size })
            }
            2 if version == 3 => {
                let rank = r.u8()? as usize;
                let address = r.optional_offset(offset_size)?;
                let mut dims = Vec::with_capacity(rank);
                for _ in 0..rank {
                    dims.push(r.u32()? as u64);
                }
                let (chunk_dims, element_size) = split_element_dim(dims)?;
                Ok(DataLayout::Chunked(ChunkedLayout {
                    version,
                    chunk_dims,
                    element_size,
                    unfiltered_edge_chunks: false,
                    index: ChunkIndexKind::BTreeV1 { address },
                }))
            }
            2 => Self::parse_chunked_v4(&mut r, offset_size, length_size),
            3 if version == 4 => Ok(DataLayout::Virtual),
            class => Err(FormatError::UnsupportedLayoutClass(class)),
        }
    }

    fn parse_chunked_v4(
        r: &mut ByteReader<'_>,
        offset_size: u8,
        length_size: u8,
    ) -> Result<DataLayout, FormatError> {
        let flags = r.u8()?;
        let rank = r.u8()? as usize;
        let width = r.u8()? as usize;
        let mut dims = Vec::with_capacity(rank);
        for _ in 0..rank {
            dims.push(r.uint(width)?);
        }
        let (chunk_dims, element_size) = split_element_dim(dims)?;

        let index = match r.u8()? {
            1 => {
                let filtered = if flags & 0x02 != 0 {
                    let size = r.length(length_size)?;
                    let mask = r.u32()?;
                    Some((size, mask))
                } else {
                    None
                };
                ChunkIndexKind::Single {
                    address: r.optional_offset(offset_size)?,
                    filtered,
                }
            }
            2 => ChunkIndexKind::Implicit {
                address: r.optional_offset(offset_size)?,
            },
            3 => {
                let page_bits = r.u8()?;
                ChunkIndexKind::FixedArray {
                    address: r.optional_offset(offset_size)?,
                    page_bits,
                }
            }
            4 => {
                // max bits, index elements, data block min, super block min, page bits
                r.skip(5)?;
                ChunkIndexKind::ExtensibleArray {
                    address: r.optional_offset(offset_size)?,
                }
            }
            5 => {
                let node_size = r.u32()?;
                // split and merge percentages
                r.skip(2)?;
                ChunkIndexKind::BTreeV2 {
                    address: r.optional_offset(offset_size)?,
                    node_size,
                }
            }
            t => return Err(FormatError::UnsupportedChunkIndex(t)),
        };

        Ok(DataLayout::Chunked(ChunkedLayout {
            version: 4,
            chunk_dims,
            element_size,
            unfiltered_edge_chunks: flags & 0x01 != 0,
            index,
        }))
    }
}

/// Split the stored chunk dimensions into the spatial part and the trailing element size.
fn split_element_dim(mut dims: Vec<u64>) -> Result<(Vec<u64>, u32), FormatError> {
    let element_size = dims
        .pop()
        .ok_or_else(|| FormatError::Malformed("chunked layout without dimensions".into()))?;
    if dims.iter().any(|&d| d == 0) {
        return Err(FormatError::Malformed(format!("zero chunk dimension in {dims:?}")));
    }
    let element_size = u32::try_from(element_size)
        .map_err(|_| FormatError::Malformed(format!("chunk element size {element_size}")))?;
    // A decoded chunk must be addressable in memory.
    dims.iter()
        .try_fold(element_size as u64, |n, &d| n.checked_mul(d))
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| FormatError::Malformed(format!("chunk of {dims:?} x {element_size} bytes")))?;
    Ok((dims, element_size))
}
