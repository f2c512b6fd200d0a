//! Byte-range access to HDF5 objects.
//!
//! A [`RangeBackend`] answers `read_range(offset, len)` against one object:
//! an in-memory buffer, a local file, or an HTTP(S)/S3 object. The
//! [`RangeFetcher`] sits in front of a backend and adds retries with
//! exponential backoff, cancellation, and coalescing of nearby ranges
//! into fewer requests.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod coalesce;
pub mod error;
pub mod fetch;
#[cfg(feature = "http")]
pub mod http;
pub mod locator;

pub use coalesce::{ByteRange, MergedRange};
pub use error::{FetchError, LengthMismatch};
pub use fetch::{CancelToken, FetchOptions, RangeFetcher};
#[cfg(feature = "http")]
pub use http::HttpBackend;
pub use locator::{Credentials, Locator};

/// Positional read access to one stored object.
///
/// Implementations must return exactly `len` bytes, or an error. Reads
/// that extend past the end of the object fail with
/// [`io::ErrorKind::UnexpectedEof`]. The fetcher rejects answers of any
/// other length as a [`LengthMismatch`] and retries them.
pub trait RangeBackend: Send + Sync {
    fn read_range(&self, offset: u64, len: u64) -> io::Result<Vec<u8>>;

    /// Total size of the object in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Short human-readable name used in log lines.
    fn describe(&self) -> String {
        String::from("backend")
    }
}

impl<B: RangeBackend + ?Sized> RangeBackend for Arc<B> {
    fn read_range(&self, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        (**self).read_range(offset, len)
    }

    fn size(&self) -> io::Result<u64> {
        (**self).size()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

fn past_end(offset: u64, len: u64, size: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("range {offset}+{len} extends past object end {size}"),
    )
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

/// Backend over an owned byte buffer.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    data: Arc<Vec<u8>>,
}

impl MemoryBackend {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: Arc::new(data) }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl RangeBackend for MemoryBackend {
    fn read_range(&self, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        let size = self.data.len() as u64;
        let end = offset.checked_add(len).filter(|&e| e <= size);
        match end {
            Some(end) => Ok(self.data[offset as usize..end as usize].to_vec()),
            None => Err(past_end(offset, len, size)),
        }
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn describe(&self) -> String {
        format!("memory({} bytes)", self.data.len())
    }
}

// ---------------------------------------------------------------------------
// FileBackend
// ---------------------------------------------------------------------------

/// Backend over a local file, using positional reads so concurrent
/// requests share one handle.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    #[cfg(unix)]
    file: std::fs::File,
    #[cfg(not(unix))]
    file: std::sync::Mutex<std::fs::File>,
    size: u64,
}

impl FileBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::File::open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            #[cfg(unix)]
            file,
            #[cfg(not(unix))]
            file: std::sync::Mutex::new(file),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RangeBackend for FileBackend {
    fn read_range(&self, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        if offset.checked_add(len).map_or(true, |end| end > self.size) {
            return Err(past_end(offset, len, self.size));
        }
        let mut buf = vec![0u8; len as usize];
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_exact_at(&mut buf, offset)?;
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = self
                .file
                .lock()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "file handle lock poisoned"))?;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.size)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
