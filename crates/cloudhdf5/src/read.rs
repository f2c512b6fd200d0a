//! Reading a hyperslab of a variable's values.
//!
//! The output buffer starts filled with the variable's fill value. Stored
//! data is then fetched, decoded and copied over it, so chunks that were
//! never written read as fill.

use std::sync::Mutex;

use cloudhdf5_format::data_layout::{ChunkedLayout, DataLayout};
use cloudhdf5_format::data_read;
use cloudhdf5_format::filters::decode_chunk;
use cloudhdf5_format::selection::{copy_runs, Hyperslab, Run};
use cloudhdf5_format::FormatError;
use cloudhdf5_io::{ByteRange, CancelToken};
use log::debug;
use rayon::prelude::*;

use crate::chunk_index::{chunk_index, ChunkEntry};
use crate::error::{Context, Error, Result};
use crate::session::Inner;
use crate::types::Array;
use crate::walker::VariableNode;

/// Keeps the first hard failure of a group of concurrent tasks and stops
/// the rest.
struct FirstFailure {
    cancel: CancelToken,
    slot: Mutex<Option<Error>>,
}

impl FirstFailure {
    fn new() -> Self {
        FirstFailure {
            cancel: CancelToken::new(),
            slot: Mutex::new(None),
        }
    }

    fn record(&self, e: Error) {
        let Ok(mut slot) = self.slot.lock() else {
            return;
        };
        // A cancellation is only a consequence of an earlier failure.
        let replace = match &*slot {
            None => true,
            Some(prev) => prev.is_cancelled() && !e.is_cancelled(),
        };
        if replace {
            *slot = Some(e);
        }
        self.cancel.cancel();
    }

    fn finish(self) -> Result<()> {
        match self.slot.into_inner().map_err(|_| Error::Poisoned)? {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Read `sel` of the variable at `address`.
pub(crate) fn read(inner: &Inner, address: u64, var: &VariableNode, sel: &Hyperslab) -> Result<Array> {
    let what = || format!("variable at {address:#x}");
    sel.validate(&var.dataspace.dimensions)?;
    if !var.dtype.is_readable() {
        return Err(FormatError::UnsupportedRead(format!("values of type {}", var.dtype))).context(what);
    }
    if var.dataspace.is_null() {
        return Ok(Array::new(Vec::new(), data_read::decode(&[], &var.datatype).context(what)?));
    }
    let es = var.datatype.size() as usize;
    let n = sel.num_elements();
    n.checked_mul(es as u64)
        .and_then(|bytes| usize::try_from(bytes).ok())
        .ok_or_else(|| FormatError::InvalidSelection(format!("{n} elements of {es} bytes do not fit in memory")))?;
    let n = n as usize;
    let pattern = var.fill.pattern(es);
    let mut out = pattern.repeat(n);

    if n > 0 {
        match &var.layout {
            DataLayout::Compact { data } => {
                let runs = sel.runs(&vec![0; sel.rank()], &var.dataspace.dimensions);
                copy_runs(data, &mut out, &runs, es).context(what)?;
            }
            DataLayout::Contiguous { address: None, .. } => {}
            DataLayout::Contiguous {
                address: Some(at),
                size,
            } => read_contiguous(inner, *at, *size, var, sel, &mut out).context(what)?,
            DataLayout::Chunked(layout) => read_chunked(inner, address, layout, var, sel, &mut out).context(what)?,
            DataLayout::Virtual => {
                return Err(FormatError::UnsupportedRead("virtual dataset layout".into())).context(what);
            }
        }
    }
    let data = data_read::decode(&out, &var.datatype).context(what)?;
    Ok(Array::new(sel.count.clone(), data))
}

fn read_contiguous(
    inner: &Inner,
    address: u64,
    size: u64,
    var: &VariableNode,
    sel: &Hyperslab,
    out: &mut [u8],
) -> Result<()> {
    let es = var.datatype.size() as u64;
    let base = inner.absolute(address)?;
    let runs = sel.runs(&vec![0; sel.rank()], &var.dataspace.dimensions);
    let mut ranges = Vec::with_capacity(runs.len());
    for run in &runs {
        let end = run
            .src
            .checked_add(run.len)
            .and_then(|e| e.checked_mul(es))
            .ok_or_else(|| FormatError::Malformed(format!("run of {} elements at {} overflows", run.len, run.src)))?;
        if end > size {
            return Err(FormatError::SizeMismatch { expected: end, actual: size }.into());
        }
        let start = base
            .checked_add(run.src * es)
            .ok_or(FormatError::AddressOutOfBounds { address, extent: u64::MAX })?;
        let range = ByteRange::new(start, run.len * es);
        inner.check_range(range.offset, range.len)?;
        ranges.push(range);
    }

    let fetcher = inner.storage.fetcher();
    let plan = fetcher.plan(&ranges);
    debug!(
        "contiguous read at {address:#x}: {} runs in {} requests",
        runs.len(),
        plan.len()
    );
    let failure = FirstFailure::new();
    let output = Mutex::new(out);
    inner.pool.install(|| {
        plan.par_iter().for_each(|merged| {
            if failure.cancel.is_cancelled() {
                return;
            }
            let result = inner.ensure_open().and_then(|()| {
                let parts = fetcher.read_merged(merged, &ranges, &failure.cancel)?;
                let mut out = output.lock().map_err(|_| Error::Poisoned)?;
                for (i, bytes) in parts {
                    let d = runs[i].dst as usize * es as usize;
                    out[d..d + bytes.len()].copy_from_slice(&bytes);
                }
                Ok(())
            });
            if let Err(e) = result {
                failure.record(e);
            }
        })
    });
    failure.finish()
}

/// Whether the chunk at `coord` extends past the current extent.
fn is_edge_chunk(coord: &[u64], chunk_dims: &[u64], dims: &[u64]) -> bool {
    coord
        .iter()
        .zip(chunk_dims)
        .zip(dims)
        .any(|((&c, &n), &d)| (c + 1).saturating_mul(n) > d)
}

fn read_chunked(
    inner: &Inner,
    address: u64,
    layout: &ChunkedLayout,
    var: &VariableNode,
    sel: &Hyperslab,
    out: &mut [u8],
) -> Result<()> {
    let es = var.datatype.size() as usize;
    let index = chunk_index(inner, address, &var.dataspace, layout)?;
    let wanted = sel.chunks(&layout.chunk_dims);
    let present: Vec<&ChunkEntry> = wanted.iter().filter_map(|c| index.get(c)).collect();
    let mut ranges = Vec::with_capacity(present.len());
    for entry in &present {
        let range = ByteRange::new(inner.absolute(entry.address)?, entry.size);
        inner.check_range(range.offset, range.len)?;
        ranges.push(range);
    }

    let fetcher = inner.storage.fetcher();
    let plan = fetcher.plan(&ranges);
    debug!(
        "chunked read of {address:#x}: {} chunks selected, {} stored, {} requests",
        wanted.len(),
        present.len(),
        plan.len()
    );
    let chunk_bytes = layout.chunk_bytes();
    let failure = FirstFailure::new();
    let output = Mutex::new(out);

    let place = |entry: &ChunkEntry, stored: Vec<u8>| -> Result<()> {
        let what = || format!("chunk {:?} at {:#x}", entry.coord, entry.address);
        let skip_filters = layout.unfiltered_edge_chunks
            && is_edge_chunk(&entry.coord, &layout.chunk_dims, &var.dataspace.dimensions);
        let decoded = if var.filters.is_empty() || skip_filters {
            stored
        } else {
            decode_chunk(stored, &var.filters, entry.filter_mask, es).context(what)?
        };
        if decoded.len() as u64 != chunk_bytes {
            return Err(FormatError::SizeMismatch {
                expected: chunk_bytes,
                actual: decoded.len() as u64,
            })
            .context(what);
        }
        let origin: Vec<u64> = entry.coord.iter().zip(&layout.chunk_dims).map(|(c, n)| c * n).collect();
        let runs: Vec<Run> = sel.runs(&origin, &layout.chunk_dims);
        let mut out = output.lock().map_err(|_| Error::Poisoned)?;
        copy_runs(&decoded, &mut out, &runs, es).context(what)
    };

    inner.pool.install(|| {
        plan.par_iter().for_each(|merged| {
            if failure.cancel.is_cancelled() {
                return;
            }
            let result = inner.ensure_open().and_then(|()| {
                let parts = fetcher.read_merged(merged, &ranges, &failure.cancel)?;
                // Decode the parts of one request concurrently too.
                parts
                    .into_par_iter()
                    .try_for_each(|(i, bytes)| place(present[i], bytes))
            });
            if let Err(e) = result {
                failure.record(e);
            }
        })
    });
    failure.finish()
}

#[cfg(test)]
mod tests {
    use cloudhdf5_io::FetchError;

    use super::*;

    #[test]
    fn edge_chunks() {
        assert!(!is_edge_chunk(&[0, 0], &[2, 2], &[4, 3]));
        assert!(is_edge_chunk(&[0, 1], &[2, 2], &[4, 3]));
        assert!(!is_edge_chunk(&[1, 0], &[2, 2], &[4, 3]));
    }

    #[test]
    fn first_hard_failure_wins_over_cancellation() {
        let f = FirstFailure::new();
        f.record(Error::Fetch(FetchError::Cancelled));
        f.record(Error::PathNotFound("x".into()));
        f.record(Error::Selection("later".into()));
        assert!(f.cancel.is_cancelled());
        let err = f.finish().unwrap_err();
        assert!(matches!(err, Error::PathNotFound(_)));
    }
}
