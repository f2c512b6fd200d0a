//! One open file: its storage, superblock, caches and worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cloudhdf5_format::checksum::verify_trailing;
use cloudhdf5_format::object_header::ObjectHeader;
use cloudhdf5_format::signature::{candidate_offsets, is_signature};
use cloudhdf5_format::superblock::{Superblock, MAX_SUPERBLOCK_SIZE};
use cloudhdf5_format::{FormatError, UNDEFINED_ADDRESS};
use cloudhdf5_io::{Credentials, Locator, MemoryBackend, RangeBackend, RangeFetcher};
use log::debug;

use crate::chunk_index::ChunkIndex;
use crate::config::Config;
use crate::error::{Context, Error, Result};
use crate::single_flight::SingleFlight;
use crate::storage::Storage;
use crate::tree::{Group, Variable};
use crate::walker::{self, Node, WalkEntry};

/// Retries of a lazily sized structure read before giving up.
const MAX_STRUCTURE_FETCHES: usize = 4;

pub(crate) struct Inner {
    pub(crate) storage: Storage,
    pub(crate) config: Config,
    pub(crate) superblock: Superblock,
    /// Absolute end of the object declared by the superblock, if set.
    declared_end: Option<u64>,
    pub(crate) pool: rayon::ThreadPool,
    pub(crate) headers: SingleFlight<u64, ObjectHeader>,
    pub(crate) nodes: SingleFlight<u64, Node>,
    pub(crate) chunk_indexes: SingleFlight<u64, ChunkIndex>,
    closed: AtomicBool,
}

impl Inner {
    pub(crate) fn offset_size(&self) -> u8 {
        self.superblock.offset_size
    }

    pub(crate) fn length_size(&self) -> u8 {
        self.superblock.length_size
    }

    pub(crate) fn verify(&self) -> bool {
        self.config.verify_checksums
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Absolute position of a file Address.
    pub(crate) fn absolute(&self, address: u64) -> Result<u64> {
        if address == UNDEFINED_ADDRESS {
            return Err(FormatError::Malformed("use of the undefined address".into()).into());
        }
        self.superblock
            .base_address
            .checked_add(address)
            .ok_or_else(|| self.out_of_bounds(address, 0))
    }

    fn out_of_bounds(&self, offset: u64, len: u64) -> Error {
        let extent = self.storage.extent();
        let truncated = self.declared_end.is_some_and(|end| end > extent);
        if truncated || offset < extent {
            FormatError::UnexpectedEof {
                expected: len as usize,
                available: extent.saturating_sub(offset) as usize,
            }
            .into()
        } else {
            FormatError::AddressOutOfBounds { address: offset, extent }.into()
        }
    }

    pub(crate) fn check_range(&self, offset: u64, len: u64) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.storage.extent() => Ok(()),
            _ => Err(self.out_of_bounds(offset, len)),
        }
    }

    /// Read a metadata range at an absolute position.
    pub(crate) fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.check_range(offset, len)?;
        self.storage.read(offset, len)
    }

    /// Read up to `len` bytes, stopping at the end of the object.
    pub(crate) fn read_clamped(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let extent = self.storage.extent();
        if offset >= extent {
            return Err(self.out_of_bounds(offset, len));
        }
        self.read(offset, len.min(extent - offset))
    }

    /// Read and parse a structure whose size is only known once its prefix
    /// is decoded. `parse` reports the size it needs through
    /// `UnexpectedEof`, and the read is repeated with that many bytes.
    pub(crate) fn read_structure<T>(
        &self,
        offset: u64,
        initial: usize,
        what: impl Fn() -> String,
        parse: impl Fn(&[u8]) -> std::result::Result<T, FormatError>,
    ) -> Result<T> {
        let mut bytes = self.read_clamped(offset, initial as u64).context(&what)?;
        for _ in 0..MAX_STRUCTURE_FETCHES {
            match parse(&bytes) {
                Err(FormatError::UnexpectedEof { expected, .. }) if expected > bytes.len() => {
                    self.check_range(offset, expected as u64).context(&what)?;
                    bytes = self.read(offset, expected as u64).context(&what)?;
                }
                other => return other.context(&what),
            }
        }
        Err(FormatError::Malformed("structure size kept growing".into())).context(what)
    }

    /// Apply `f` to every item on up to `max_concurrency` scoped threads,
    /// keeping input order.
    ///
    /// Cache initialisers fan out through this rather than the rayon pool:
    /// a pool worker that steals work while it holds a pending cache slot
    /// can end up waiting on itself.
    pub(crate) fn fan_out<T, R>(&self, items: &[T], f: impl Fn(&T) -> Result<R> + Sync) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
    {
        let workers = self.config.max_concurrency.min(items.len());
        if workers <= 1 {
            return items.iter().map(f).collect();
        }
        let per_worker = items.len().div_ceil(workers);
        let f = &f;
        std::thread::scope(|s| {
            let handles: Vec<_> = items
                .chunks(per_worker)
                .map(|part| s.spawn(move || part.iter().map(f).collect::<Result<Vec<R>>>()))
                .collect();
            let mut out = Vec::with_capacity(items.len());
            for handle in handles {
                match handle.join() {
                    Ok(part) => out.extend(part?),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            Ok(out)
        })
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.storage.cancel_all();
        self.storage.clear();
        self.headers.clear();
        self.nodes.clear();
        self.chunk_indexes.clear();
    }
}

/// Locate and decode the superblock.
fn find_superblock(storage: &Storage, verify: bool) -> Result<(u64, Superblock)> {
    let extent = storage.extent();
    for offset in candidate_offsets(extent) {
        if !is_signature(&storage.read(offset, 8)?) {
            continue;
        }
        let len = (MAX_SUPERBLOCK_SIZE as u64).min(extent - offset);
        let bytes = storage.read(offset, len)?;
        let sb = Superblock::parse(&bytes, offset).context(|| format!("superblock at {offset:#x}"))?;
        if verify && sb.has_checksum() {
            verify_trailing(&bytes[..sb.size], "superblock").context(|| format!("superblock at {offset:#x}"))?;
        }
        return Ok((offset, sb));
    }
    Err(FormatError::SignatureNotFound.into())
}

/// An open file.
///
/// Cloning is cheap and every clone shares the same caches. Groups and
/// variables handed out by a session stay valid until [`Session::close`].
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("source", &self.inner.storage.fetcher().describe())
            .field("superblock_version", &self.inner.superblock.version)
            .field("extent", &self.inner.storage.extent())
            .field("cached_headers", &self.inner.headers.len())
            .finish()
    }
}

impl Session {
    /// Open a local path, `file://`, `http(s)://` or `s3://bucket/key` locator.
    pub fn open(locator: &str, credentials: &Credentials, config: Config) -> Result<Session> {
        let locator = Locator::parse(locator)?;
        let backend = locator.open(credentials, config.request_timeout())?;
        Self::open_backend(backend, config)
    }

    pub fn from_bytes(data: Vec<u8>, config: Config) -> Result<Session> {
        Self::open_backend(Arc::new(MemoryBackend::new(data)), config)
    }

    /// Open over any backend.
    pub fn open_backend(backend: Arc<dyn RangeBackend>, config: Config) -> Result<Session> {
        config.validate()?;
        let storage = Storage::new(backend, &config)?;
        let (offset, superblock) = find_superblock(&storage, config.verify_checksums)?;
        debug!(
            "{}: superblock v{} at {offset:#x}, offsets {} bytes, lengths {} bytes, root header {:#x}",
            storage.fetcher().describe(),
            superblock.version,
            superblock.offset_size,
            superblock.length_size,
            superblock.root_group_address
        );
        let declared_end = (superblock.eof_address != UNDEFINED_ADDRESS)
            .then(|| superblock.base_address.saturating_add(superblock.eof_address));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_concurrency)
            .thread_name(|i| format!("cloudhdf5-{i}"))
            .build()
            .map_err(|e| Error::Config(format!("worker pool: {e}")))?;
        Ok(Session {
            inner: Arc::new(Inner {
                storage,
                config,
                superblock,
                declared_end,
                pool,
                headers: SingleFlight::new(),
                nodes: SingleFlight::new(),
                chunk_indexes: SingleFlight::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.inner.superblock
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Size of the opened object in bytes.
    pub fn extent(&self) -> u64 {
        self.inner.storage.extent()
    }

    pub fn fetcher(&self) -> &RangeFetcher {
        self.inner.storage.fetcher()
    }

    pub fn cached_headers(&self) -> usize {
        self.inner.headers.len()
    }

    pub fn root(&self) -> Result<Group> {
        self.group("/")
    }

    /// Resolve a slash-separated group path from the root.
    pub fn group(&self, path: &str) -> Result<Group> {
        let (path, node) = walker::resolve_path(&self.inner, path)?;
        Group::new(Arc::clone(&self.inner), path, node)
    }

    pub fn variable(&self, path: &str) -> Result<Variable> {
        let (path, node) = walker::resolve_path(&self.inner, path)?;
        Variable::new(Arc::clone(&self.inner), path, node)
    }

    /// Every path below the root, breadth first.
    pub fn walk(&self) -> Result<Vec<WalkEntry>> {
        self.root()?.walk()
    }

    /// Drop all caches and refuse further reads.
    pub fn close(&self) {
        debug!("closing {}", self.inner.storage.fetcher().describe());
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.ensure_open().is_err()
    }
}
