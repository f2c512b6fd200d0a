use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("reading {len} bytes at offset {offset} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        offset: u64,
        len: u64,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("fetch cancelled")]
    Cancelled,

    #[error("invalid locator {locator:?}: {reason}")]
    InvalidLocator { locator: String, reason: String },

    #[error("opening backend: {0}")]
    Open(#[source] io::Error),

    #[cfg(feature = "http")]
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
}

impl FetchError {
    /// Whether the error came from a range that extends past the object end.
    pub fn is_past_end(&self) -> bool {
        matches!(
            self,
            FetchError::Exhausted { source, .. }
                if source.kind() == io::ErrorKind::UnexpectedEof && !LengthMismatch::is_cause_of(source)
        )
    }
}

/// A backend answered a range request with the wrong number of bytes,
/// e.g. a body cut off mid-transfer. Unlike a range past the object end,
/// asking again may succeed.
#[derive(Debug, Error)]
#[error("wanted {wanted} bytes, got {got}")]
pub struct LengthMismatch {
    pub wanted: u64,
    pub got: u64,
}

impl LengthMismatch {
    pub fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::UnexpectedEof, self)
    }

    pub fn is_cause_of(err: &io::Error) -> bool {
        err.get_ref().is_some_and(|e| e.is::<LengthMismatch>())
    }
}
