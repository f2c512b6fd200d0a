//! Chunk lookup tables for chunked variables.
//!
//! Whatever index structure the file uses, it is resolved once per variable
//! into a map from scaled chunk coordinate to stored location.

use std::collections::HashMap;

use cloudhdf5_format::btree_v1::NODE_TYPE_CHUNK;
use cloudhdf5_format::btree_v2::{ChunkRecord, RECORD_CHUNK, RECORD_FILTERED_CHUNK};
use cloudhdf5_format::data_layout::{ChunkIndexKind, ChunkedLayout};
use cloudhdf5_format::dataspace::Dataspace;
use cloudhdf5_format::extensible_array::ExtensibleArrayHeader;
use cloudhdf5_format::fixed_array::{ArrayElement, FixedArrayHeader};
use cloudhdf5_format::selection::chunk_grid;
use cloudhdf5_format::FormatError;
use log::debug;

use crate::error::{Context, Result};
use crate::session::Inner;
use crate::walker;

/// Where one stored chunk lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChunkEntry {
    /// Scaled coordinate: element offset divided by the chunk shape.
    pub(crate) coord: Vec<u64>,
    pub(crate) address: u64,
    /// Stored bytes, after filtering.
    pub(crate) size: u64,
    pub(crate) filter_mask: u32,
}

#[derive(Debug, Default)]
pub(crate) struct ChunkIndex {
    /// Chunks along each dimension of the current extent.
    pub(crate) grid: Vec<u64>,
    pub(crate) entries: HashMap<Vec<u64>, ChunkEntry>,
}

impl ChunkIndex {
    pub(crate) fn get(&self, coord: &[u64]) -> Option<&ChunkEntry> {
        self.entries.get(coord)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn insert(&mut self, entry: ChunkEntry) -> std::result::Result<(), FormatError> {
        if entry.coord.len() != self.grid.len() || entry.coord.iter().zip(&self.grid).any(|(c, g)| c >= g) {
            return Err(FormatError::ChunkOutOfBounds {
                coord: entry.coord,
                grid: self.grid.clone(),
            });
        }
        self.entries.insert(entry.coord.clone(), entry);
        Ok(())
    }
}

/// Chunk index of the variable at `address`, resolved once per session.
pub(crate) fn chunk_index(
    inner: &Inner,
    address: u64,
    dataspace: &Dataspace,
    layout: &ChunkedLayout,
) -> Result<std::sync::Arc<ChunkIndex>> {
    inner.ensure_open()?;
    inner.chunk_indexes.get_or_try_init(&address, || {
        let index = build(inner, dataspace, layout).context(|| format!("chunk index of object {address:#x}"))?;
        debug!(
            "chunk index of {address:#x}: {} chunks stored, grid {:?}",
            index.len(),
            index.grid
        );
        Ok(index)
    })
}

/// Extent used to lay out linear chunk indexes: the maximum extent where
/// it is bounded, else the current one.
fn max_grid(dataspace: &Dataspace, chunk_dims: &[u64]) -> Vec<u64> {
    let dims: Vec<u64> = match &dataspace.max_dimensions {
        Some(max) => max
            .iter()
            .zip(&dataspace.dimensions)
            .map(|(&m, &d)| if m == u64::MAX { d } else { m })
            .collect(),
        None => dataspace.dimensions.clone(),
    };
    chunk_grid(&dims, chunk_dims)
}

/// Row-major coordinate of linear chunk index `i` in a grid with `strides`.
fn unravel(mut i: u64, strides: &[u64]) -> Vec<u64> {
    strides
        .iter()
        .map(|&s| {
            let c = i / s;
            i %= s;
            c
        })
        .collect()
}

fn row_major_strides(grid: &[u64]) -> Vec<u64> {
    let mut s = vec![1u64; grid.len()];
    for d in (0..grid.len().saturating_sub(1)).rev() {
        s[d] = s[d + 1].saturating_mul(grid[d + 1].max(1));
    }
    s
}

/// Number of chunks in `grid`.
fn grid_len(grid: &[u64]) -> std::result::Result<u64, FormatError> {
    grid.iter()
        .try_fold(1u64, |n, &g| n.checked_mul(g))
        .ok_or_else(|| FormatError::Malformed(format!("chunk grid {grid:?} too large")))
}

fn build(inner: &Inner, dataspace: &Dataspace, layout: &ChunkedLayout) -> Result<ChunkIndex> {
    let mut index = ChunkIndex {
        grid: chunk_grid(&dataspace.dimensions, &layout.chunk_dims),
        entries: HashMap::new(),
    };
    let Some(address) = layout.index.address() else {
        // Nothing written yet.
        return Ok(index);
    };
    let rank = layout.chunk_dims.len();
    let full = layout.chunk_bytes();
    match &layout.index {
        ChunkIndexKind::Single { filtered, .. } => {
            let (size, filter_mask) = filtered.unwrap_or((full, 0));
            index.insert(ChunkEntry {
                coord: vec![0; rank],
                address,
                size,
                filter_mask,
            })?;
        }
        ChunkIndexKind::Implicit { .. } => {
            let grid = max_grid(dataspace, &layout.chunk_dims);
            let strides = row_major_strides(&grid);
            let count = grid_len(&grid)?;
            // Every chunk is allocated, so the whole run must lie in the file.
            let total = count
                .checked_mul(full)
                .ok_or_else(|| FormatError::Malformed(format!("implicit index of {count} chunks")))?;
            inner.check_range(inner.absolute(address)?, total)?;
            for i in 0..count {
                let coord = unravel(i, &strides);
                if coord.iter().zip(&index.grid).all(|(c, g)| c < g) {
                    index.insert(ChunkEntry {
                        coord,
                        address: address + i * full,
                        size: full,
                        filter_mask: 0,
                    })?;
                }
            }
        }
        ChunkIndexKind::BTreeV1 { .. } => {
            for leaf in walker::btree_v1_leaves(inner, address, NODE_TYPE_CHUNK, rank)? {
                for (key, child) in leaf.chunk_entries() {
                    let coord = key
                        .offsets
                        .iter()
                        .zip(&layout.chunk_dims)
                        .map(|(&o, &c)| {
                            if o % c == 0 {
                                Ok(o / c)
                            } else {
                                Err(FormatError::Malformed(format!("chunk offset {o} not a multiple of {c}")))
                            }
                        })
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    index.insert(ChunkEntry {
                        coord,
                        address: child,
                        size: key.chunk_size as u64,
                        filter_mask: key.filter_mask,
                    })?;
                }
            }
        }
        ChunkIndexKind::BTreeV2 { .. } => {
            let (header, records) = walker::btree_v2_records(inner, address)?;
            if header.tree_type != RECORD_CHUNK && header.tree_type != RECORD_FILTERED_CHUNK {
                return Err(FormatError::Malformed(format!("chunk index of record type {}", header.tree_type)).into());
            }
            for raw in &records {
                let record = ChunkRecord::parse(raw, header.tree_type, rank, inner.offset_size())?;
                index.insert(ChunkEntry {
                    coord: record.scaled,
                    address: record.address,
                    size: record.size.unwrap_or(full),
                    filter_mask: record.filter_mask,
                })?;
            }
        }
        ChunkIndexKind::FixedArray { .. } => {
            let grid = max_grid(dataspace, &layout.chunk_dims);
            let elements = fixed_array_elements(inner, address, grid_len(&grid)?)?;
            let strides = row_major_strides(&grid);
            insert_linear(&mut index, elements.into_iter(), |i| unravel(i, &strides), full)?;
        }
        ChunkIndexKind::ExtensibleArray { .. } => {
            let elements = extensible_array_elements(inner, address)?;
            let unravel = swizzled_unravel(dataspace, &layout.chunk_dims);
            insert_linear(&mut index, elements.into_iter(), unravel, full)?;
        }
    }
    Ok(index)
}

fn insert_linear(
    index: &mut ChunkIndex,
    elements: impl Iterator<Item = (u64, ArrayElement)>,
    unravel: impl Fn(u64) -> Vec<u64>,
    full: u64,
) -> std::result::Result<(), FormatError> {
    for (i, element) in elements {
        index.insert(ChunkEntry {
            coord: unravel(i),
            address: element.address,
            size: element.size.unwrap_or(full),
            filter_mask: element.filter_mask,
        })?;
    }
    Ok(())
}

/// Linear index to coordinate for extensible arrays, whose index runs with
/// the unlimited dimension outermost.
fn swizzled_unravel(dataspace: &Dataspace, chunk_dims: &[u64]) -> impl Fn(u64) -> Vec<u64> {
    let rank = chunk_dims.len();
    let unlimited = dataspace
        .max_dimensions
        .as_ref()
        .and_then(|max| max.iter().position(|&m| m == u64::MAX))
        .unwrap_or(0);
    let grid = max_grid(dataspace, chunk_dims);
    let order: Vec<usize> = std::iter::once(unlimited).chain((0..rank).filter(|&d| d != unlimited)).collect();
    let swizzled_grid: Vec<u64> = order.iter().map(|&d| grid[d]).collect();
    let strides = row_major_strides(&swizzled_grid);
    move |i| {
        let swizzled = unravel(i, &strides);
        let mut coord = vec![0; rank];
        for (k, &d) in order.iter().enumerate() {
            coord[d] = swizzled[k];
        }
        coord
    }
}

fn fixed_array_elements(inner: &Inner, address: u64, chunks: u64) -> Result<Vec<(u64, ArrayElement)>> {
    let (os, ls) = (inner.offset_size(), inner.length_size());
    let verify = inner.verify();
    let header = inner.read_structure(
        inner.absolute(address)?,
        FixedArrayHeader::encoded_len(os, ls),
        || format!("fixed array header at {address:#x}"),
        |b| FixedArrayHeader::parse(b, os, ls, verify),
    )?;
    if header.num_elements > chunks {
        return Err(FormatError::Malformed(format!(
            "fixed array of {} elements for {chunks} chunks",
            header.num_elements
        ))
        .into());
    }
    let block_at = header.data_block_address;
    let bytes = inner.read(inner.absolute(block_at)?, header.data_block_len(os) as u64)?;
    let elements = header
        .elements(&bytes, os, verify)
        .context(|| format!("fixed array data block at {block_at:#x}"))?;
    Ok(elements
        .into_iter()
        .enumerate()
        .filter_map(|(i, e)| e.map(|e| (i as u64, e)))
        .collect())
}

fn extensible_array_elements(inner: &Inner, address: u64) -> Result<Vec<(u64, ArrayElement)>> {
    let (os, ls) = (inner.offset_size(), inner.length_size());
    let verify = inner.verify();
    let header = inner.read_structure(
        inner.absolute(address)?,
        ExtensibleArrayHeader::encoded_len(os, ls),
        || format!("extensible array header at {address:#x}"),
        |b| ExtensibleArrayHeader::parse(b, os, ls, verify),
    )?;
    let Some(index_at) = header.index_block_address else {
        return Ok(Vec::new());
    };
    let geometry = header.geometry();
    let bytes = inner.read(inner.absolute(index_at)?, header.index_block_len(os) as u64)?;
    let index = header
        .parse_index_block(&bytes, os, verify)
        .context(|| format!("extensible array index block at {index_at:#x}"))?;

    let mut out: Vec<(u64, ArrayElement)> = index
        .elements
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.map(|e| (i as u64, e)))
        .collect();

    // (data block address, first element index, elements)
    let mut blocks: Vec<(u64, u64, u64)> = geometry
        .index_data_blocks
        .iter()
        .zip(&index.data_block_addresses)
        .filter_map(|(slot, a)| a.map(|a| (a, slot.start_index, slot.elements)))
        .collect();

    let supers: Vec<_> = geometry
        .index_super_blocks
        .iter()
        .zip(&index.super_block_addresses)
        .filter_map(|(level, a)| a.map(|a| (a, level)))
        .collect();
    let super_blocks = inner.fan_out(&supers, |&(a, level)| {
        let bytes = inner.read(inner.absolute(a)?, header.super_block_len(level, os) as u64)?;
        header
            .parse_super_block(&bytes, level, os, verify)
            .context(|| format!("extensible array super block at {a:#x}"))
            .map(|addrs| (level, addrs))
    })?;
    for (level, addrs) in super_blocks {
        for (k, a) in addrs.into_iter().enumerate() {
            if let Some(a) = a {
                blocks.push((a, level.start_index + k as u64 * level.block_elements, level.block_elements));
            }
        }
    }

    let data_blocks = inner.fan_out(&blocks, |&(a, start, n)| {
        let bytes = inner.read(inner.absolute(a)?, header.data_block_len(n, os) as u64)?;
        header
            .parse_data_block(&bytes, n, os, verify)
            .context(|| format!("extensible array data block at {a:#x}"))
            .map(|elements| (start, elements))
    })?;
    for (start, elements) in data_blocks {
        out.extend(
            elements
                .into_iter()
                .enumerate()
                .filter_map(|(k, e)| e.map(|e| (start + k as u64, e))),
        );
    }
    out.retain(|&(i, _)| i < header.max_index_set);
    Ok(out)
}
