//! Retrying, cancellable, coalescing front end to a [`RangeBackend`].

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{trace, warn};

use crate::coalesce::{self, ByteRange, MergedRange};
use crate::error::{FetchError, LengthMismatch};
use crate::RangeBackend;

/// Shared flag telling in-flight fetches to give up.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Retries after the first failed attempt.
    pub retry_count: u32,
    /// Delay before the first retry; doubles for each following retry.
    pub retry_backoff: Duration,
    pub gap_threshold: u64,
    pub max_merged: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_backoff: Duration::from_millis(50),
            gap_threshold: 64 * 1024,
            max_merged: 8 * 1024 * 1024,
        }
    }
}

/// Errors that will not go away by asking again. A truncated answer is
/// not one of them, even though it shares the end-of-file kind.
fn is_permanent(err: &io::Error) -> bool {
    let kind = err.kind();
    let past_end = kind == io::ErrorKind::UnexpectedEof && !LengthMismatch::is_cause_of(err);
    past_end
        || matches!(
            kind,
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied | io::ErrorKind::InvalidInput
        )
}

pub struct RangeFetcher {
    backend: Arc<dyn RangeBackend>,
    options: FetchOptions,
    requests: AtomicU64,
    bytes: AtomicU64,
}

impl std::fmt::Debug for RangeFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeFetcher")
            .field("backend", &self.backend.describe())
            .field("options", &self.options)
            .finish()
    }
}

impl RangeFetcher {
    pub fn new(backend: Arc<dyn RangeBackend>, options: FetchOptions) -> Self {
        Self {
            backend,
            options,
            requests: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Backend requests issued so far, counting retries.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn bytes_fetched(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    fn with_retry<T>(
        &self,
        offset: u64,
        len: u64,
        cancel: &CancelToken,
        mut op: impl FnMut() -> io::Result<T>,
    ) -> Result<T, FetchError> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            attempt += 1;
            self.requests.fetch_add(1, Ordering::Relaxed);
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if is_permanent(&e) || attempt > self.options.retry_count => {
                    return Err(FetchError::Exhausted {
                        offset,
                        len,
                        attempts: attempt,
                        source: e,
                    })
                }
                Err(e) => {
                    let delay = self.options.retry_backoff.saturating_mul(1 << (attempt - 1).min(16));
                    warn!(
                        "{}: range {offset}+{len} attempt {attempt} failed ({e}); retrying in {delay:?}",
                        self.backend.describe()
                    );
                    thread::sleep(delay);
                }
            }
        }
    }

    pub fn size(&self) -> Result<u64, FetchError> {
        self.with_retry(0, 0, &CancelToken::new(), || self.backend.size())
    }

    /// Read one range.
    pub fn read_one(&self, offset: u64, len: u64, cancel: &CancelToken) -> Result<Vec<u8>, FetchError> {
        trace!("{}: fetch {offset}+{len}", self.backend.describe());
        let bytes = self.with_retry(offset, len, cancel, || {
            let bytes = self.backend.read_range(offset, len)?;
            if bytes.len() as u64 != len {
                return Err(LengthMismatch {
                    wanted: len,
                    got: bytes.len() as u64,
                }
                .into_io());
            }
            Ok(bytes)
        })?;
        self.bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(bytes)
    }

    /// Plan how `ranges` would be grouped into requests.
    pub fn plan(&self, ranges: &[ByteRange]) -> Vec<MergedRange> {
        coalesce::plan(ranges, self.options.gap_threshold, self.options.max_merged)
    }

    /// Fetch one merged request and split it back into its parts.
    pub fn read_merged(
        &self,
        merged: &MergedRange,
        ranges: &[ByteRange],
        cancel: &CancelToken,
    ) -> Result<Vec<(usize, Vec<u8>)>, FetchError> {
        let bytes = self.read_one(merged.offset, merged.len, cancel)?;
        merged.split(&bytes, ranges).ok_or_else(|| FetchError::Exhausted {
            offset: merged.offset,
            len: merged.len,
            attempts: 1,
            source: LengthMismatch {
                wanted: merged.len,
                got: bytes.len() as u64,
            }
            .into_io(),
        })
    }

    /// Read every range, one buffer per range in input order.
    ///
    /// Nearby ranges are fetched together; requests run one after another
    /// on the calling thread.
    pub fn read(&self, ranges: &[ByteRange], cancel: &CancelToken) -> Result<Vec<Vec<u8>>, FetchError> {
        let mut out = vec![Vec::new(); ranges.len()];
        for merged in self.plan(ranges) {
            for (i, bytes) in self.read_merged(&merged, ranges, cancel)? {
                out[i] = bytes;
            }
        }
        Ok(out)
    }
}
