//! Hyper-rectangular selections and the copy arithmetic between chunk
//! buffers and a selection-shaped output buffer.

use std::ops::Range;

use crate::error::FormatError;

/// A hyper-rectangle: `count[d]` elements from `start[d]` in each dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hyperslab {
    pub start: Vec<u64>,
    pub count: Vec<u64>,
}

/// One contiguous run of elements copied from a source into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    /// Element offset in the source buffer.
    pub src: u64,
    /// Element offset in the output buffer.
    pub dst: u64,
    pub len: u64,
}

fn strides(shape: &[u64]) -> Vec<u64> {
    let mut s = vec![1u64; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        s[d] = s[d + 1] * shape[d + 1];
    }
    s
}

impl Hyperslab {
    /// The whole extent of `dims`.
    pub fn full(dims: &[u64]) -> Hyperslab {
        Hyperslab {
            start: vec![0; dims.len()],
            count: dims.to_vec(),
        }
    }

    pub fn from_ranges(ranges: &[Range<u64>]) -> Hyperslab {
        Hyperslab {
            start: ranges.iter().map(|r| r.start).collect(),
            count: ranges.iter().map(|r| r.end.saturating_sub(r.start)).collect(),
        }
    }

    pub fn rank(&self) -> usize {
        self.start.len()
    }

    /// Saturates at `u64::MAX`; a selection that passed [`validate`](Self::validate)
    /// against a parsed dataspace never does.
    pub fn num_elements(&self) -> u64 {
        self.count.iter().fold(1u64, |n, &c| n.saturating_mul(c))
    }

    /// Check the selection lies inside `dims`.
    pub fn validate(&self, dims: &[u64]) -> Result<(), FormatError> {
        if self.start.len() != dims.len() || self.count.len() != dims.len() {
            return Err(FormatError::InvalidSelection(format!(
                "selection of rank {} on a variable of rank {}",
                self.start.len(),
                dims.len()
            )));
        }
        for (d, ((&s, &c), &n)) in self.start.iter().zip(&self.count).zip(dims).enumerate() {
            if s.checked_add(c).map_or(true, |end| end > n) {
                return Err(FormatError::InvalidSelection(format!(
                    "dimension {d}: {s}..{} exceeds extent {n}",
                    s.saturating_add(c)
                )));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.count.iter().any(|&c| c == 0)
    }

    /// Scaled coordinates of every chunk of shape `chunk_dims` the selection
    /// touches, in row-major order.
    pub fn chunks(&self, chunk_dims: &[u64]) -> Vec<Vec<u64>> {
        if self.is_empty() {
            return Vec::new();
        }
        let lo: Vec<u64> = self.start.iter().zip(chunk_dims).map(|(&s, &c)| s / c).collect();
        let hi: Vec<u64> = self
            .start
            .iter()
            .zip(&self.count)
            .zip(chunk_dims)
            .map(|((&s, &n), &c)| (s + n - 1) / c + 1)
            .collect();
        let mut out = Vec::new();
        for_each_index(&lo, &hi, |idx| out.push(idx.to_vec()));
        out
    }

    /// Runs copying the part of a box (`origin`, `shape`) that lies inside
    /// the selection. Source offsets are relative to the box, destination
    /// offsets to a buffer shaped like the selection.
    pub fn runs(&self, origin: &[u64], shape: &[u64]) -> Vec<Run> {
        let rank = self.rank();
        if rank == 0 {
            return vec![Run { src: 0, dst: 0, len: 1 }];
        }
        let mut lo = Vec::with_capacity(rank);
        let mut hi = Vec::with_capacity(rank);
        for d in 0..rank {
            let l = self.start[d].max(origin[d]);
            let h = (self.start[d] + self.count[d]).min(origin[d] + shape[d]);
            if l >= h {
                return Vec::new();
            }
            lo.push(l);
            hi.push(h);
        }
        let src_strides = strides(shape);
        let dst_strides = strides(&self.count);
        let last = rank - 1;
        let len = hi[last] - lo[last];
        let mut outer_hi = hi.clone();
        outer_hi[last] = lo[last] + 1;
        let mut out = Vec::new();
        for_each_index(&lo, &outer_hi, |idx| {
            let mut src = 0;
            let mut dst = 0;
            for d in 0..rank {
                src += (idx[d] - origin[d]) * src_strides[d];
                dst += (idx[d] - self.start[d]) * dst_strides[d];
            }
            out.push(Run { src, dst, len });
        });
        out
    }
}

/// Visit every index tuple in `lo..hi` in row-major order.
fn for_each_index(lo: &[u64], hi: &[u64], mut f: impl FnMut(&[u64])) {
    if lo.iter().zip(hi).any(|(l, h)| l >= h) {
        return;
    }
    let mut idx = lo.to_vec();
    loop {
        f(&idx);
        let mut d = idx.len();
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            idx[d] += 1;
            if idx[d] < hi[d] {
                break;
            }
            idx[d] = lo[d];
        }
    }
}

/// Number of chunks along each dimension.
pub fn chunk_grid(dims: &[u64], chunk_dims: &[u64]) -> Vec<u64> {
    dims.iter().zip(chunk_dims).map(|(&n, &c)| n.div_ceil(c.max(1))).collect()
}

/// Copy `runs` of `element_size`-byte elements from `src` into `dst`.
pub fn copy_runs(src: &[u8], dst: &mut [u8], runs: &[Run], element_size: usize) -> Result<(), FormatError> {
    for run in runs {
        let s = run.src as usize * element_size;
        let d = run.dst as usize * element_size;
        let n = run.len as usize * element_size;
        let from = src.get(s..s + n).ok_or(FormatError::SizeMismatch {
            expected: (s + n) as u64,
            actual: src.len() as u64,
        })?;
        let dst_len = dst.len() as u64;
        let to = dst.get_mut(d..d + n).ok_or(FormatError::SizeMismatch {
            expected: (d + n) as u64,
            actual: dst_len,
        })?;
        to.copy_from_slice(from);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_bounds() {
        let dims = [4, 6];
        assert!(Hyperslab::full(&dims).validate(&dims).is_ok());
        assert!(Hyperslab::from_ranges(&[1..3, 2..7]).validate(&dims).is_err());
        assert!(Hyperslab::from_ranges(&[0..1]).validate(&dims).is_err());
    }

    #[test]
    fn chunks_touched() {
        let sel = Hyperslab::from_ranges(&[1..3, 0..3]);
        assert_eq!(
            sel.chunks(&[2, 2]),
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
        assert!(Hyperslab::from_ranges(&[1..1, 0..3]).chunks(&[2, 2]).is_empty());
    }

    #[test]
    fn runs_for_chunk_inside_selection() {
        // 4x4 selection, chunk (2,2) at origin (2,0)
        let sel = Hyperslab::full(&[4, 4]);
        let runs = sel.runs(&[2, 0], &[2, 2]);
        assert_eq!(
            runs,
            vec![Run { src: 0, dst: 8, len: 2 }, Run { src: 2, dst: 12, len: 2 }]
        );
    }

    #[test]
    fn runs_clip_edge_chunk() {
        // 3x3 dataset with 2x2 chunks; selection rows 1..3, cols 1..3
        let sel = Hyperslab::from_ranges(&[1..3, 1..3]);
        let runs = sel.runs(&[2, 2], &[2, 2]);
        assert_eq!(runs, vec![Run { src: 0, dst: 3, len: 1 }]);
    }

    #[test]
    fn copy_selected_elements() {
        let chunk: Vec<u8> = (0..4).collect();
        let sel = Hyperslab::from_ranges(&[1..2, 0..2]);
        let runs = sel.runs(&[0, 0], &[2, 2]);
        let mut out = vec![0u8; 2];
        copy_runs(&chunk, &mut out, &runs, 1).unwrap();
        assert_eq!(out, vec![2, 3]);
    }

    #[test]
    fn scalar_selection() {
        let sel = Hyperslab::full(&[]);
        assert_eq!(sel.num_elements(), 1);
        assert_eq!(sel.runs(&[], &[]), vec![Run { src: 0, dst: 0, len: 1 }]);
        assert_eq!(chunk_grid(&[5, 4], &[2, 4]), vec![3, 1]);
    }
}
