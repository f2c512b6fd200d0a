//! Cached metadata reads on top of the range fetcher.
//!
//! Small reads are served from aligned lines of `metadata_line_size` bytes.
//! Each line is fetched at most once per session, even when several
//! threads ask for it at the same time. Reads larger than a line go
//! straight to the fetcher and are not cached.

use std::sync::Arc;

use cloudhdf5_io::{CancelToken, RangeBackend, RangeFetcher};
use log::trace;

use crate::config::Config;
use crate::error::Result;
use crate::single_flight::SingleFlight;

pub(crate) struct Storage {
    fetcher: RangeFetcher,
    extent: u64,
    line_size: u64,
    lines: SingleFlight<u64, Vec<u8>>,
    /// Cancelled when the session closes.
    cancel: CancelToken,
}

impl Storage {
    pub(crate) fn new(backend: Arc<dyn RangeBackend>, config: &Config) -> Result<Storage> {
        let fetcher = RangeFetcher::new(backend, config.fetch_options());
        let extent = fetcher.size()?;
        Ok(Storage {
            fetcher,
            extent,
            line_size: config.metadata_line_size,
            lines: SingleFlight::new(),
            cancel: CancelToken::new(),
        })
    }

    pub(crate) fn extent(&self) -> u64 {
        self.extent
    }

    pub(crate) fn fetcher(&self) -> &RangeFetcher {
        &self.fetcher
    }

    fn line(&self, index: u64) -> Result<Arc<Vec<u8>>> {
        if let Some(line) = self.lines.get(&index) {
            trace!("metadata line {index} hit");
            return Ok(line);
        }
        self.lines.get_or_try_init(&index, || {
            let start = index * self.line_size;
            let len = self.line_size.min(self.extent - start);
            Ok(self.fetcher.read_one(start, len, &self.cancel)?)
        })
    }

    /// Read `len` bytes at `offset`, which the caller has bounds-checked.
    pub(crate) fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        if len > self.line_size {
            return Ok(self.fetcher.read_one(offset, len, &self.cancel)?);
        }
        let first = offset / self.line_size;
        let last = (offset + len - 1) / self.line_size;
        let mut out = Vec::with_capacity(len as usize);
        for index in first..=last {
            let line = self.line(index)?;
            let line_start = index * self.line_size;
            let from = offset.max(line_start) - line_start;
            let to = (offset + len).min(line_start + line.len() as u64) - line_start;
            out.extend_from_slice(&line[from as usize..to as usize]);
        }
        Ok(out)
    }

    pub(crate) fn cancel_all(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn clear(&self) {
        self.lines.clear();
    }

    pub(crate) fn cached_lines(&self) -> usize {
        self.lines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudhdf5_io::MemoryBackend;

    fn storage(line: u64) -> Storage {
        let cfg = Config {
            metadata_line_size: line,
            ..Config::default()
        };
        Storage::new(Arc::new(MemoryBackend::new((0..=255u8).collect())), &cfg).unwrap()
    }

    #[test]
    fn reads_span_lines() {
        let s = storage(16);
        assert_eq!(s.read(14, 4).unwrap(), vec![14, 15, 16, 17]);
        assert_eq!(s.cached_lines(), 2);
        let before = s.fetcher().requests();
        assert_eq!(s.read(0, 3).unwrap(), vec![0, 1, 2]);
        assert_eq!(s.fetcher().requests(), before);
    }

    #[test]
    fn last_line_is_short() {
        let s = storage(100);
        assert_eq!(s.read(250, 6).unwrap(), vec![250, 251, 252, 253, 254, 255]);
    }

    #[test]
    fn large_reads_bypass_cache() {
        let s = storage(8);
        assert_eq!(s.read(0, 20).unwrap().len(), 20);
        assert_eq!(s.cached_lines(), 0);
    }
}
