//! Error types for the high-level API.

use cloudhdf5_format::FormatError;
use cloudhdf5_io::FetchError;
use thiserror::Error;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Signature, version or structure content this reader rejects.
    Format,
    /// A structure extends past the bytes the object holds.
    Truncated,
    /// A chunk uses a filter with no decoder.
    UnsupportedFilter,
    /// Navigation to a name that does not resolve.
    PathNotFound,
    /// The storage backend failed after retries.
    Io,
    /// Self-contradicting content: cycles, checksum or bounds failures.
    Corruption,
    /// A registered converter changed the array shape.
    Conversion,
    /// A selection that does not fit the variable.
    Selection,
    Config,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{}", with_context(.context, .source))]
    Format {
        /// Path or Address of the structure being decoded; may be empty.
        context: String,
        #[source]
        source: FormatError,
    },

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("{path} is not a {expected}")]
    WrongKind { path: String, expected: &'static str },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("converter for {variable:?} changed shape {expected:?} to {actual:?}")]
    Conversion {
        variable: String,
        expected: Vec<u64>,
        actual: Vec<u64>,
    },

    #[error("invalid selection: {0}")]
    Selection(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("session is closed")]
    Closed,

    #[error("an internal lock was poisoned")]
    Poisoned,
}

fn with_context(context: &str, source: &FormatError) -> String {
    if context.is_empty() {
        source.to_string()
    } else {
        format!("{context}: {source}")
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<FormatError> for Error {
    fn from(source: FormatError) -> Self {
        Error::Format {
            context: String::new(),
            source,
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Format { source, .. } => match source {
                FormatError::UnexpectedEof { .. } => ErrorKind::Truncated,
                FormatError::UnsupportedFilter(_) => ErrorKind::UnsupportedFilter,
                FormatError::InvalidSelection(_) => ErrorKind::Selection,
                e if e.is_corruption() => ErrorKind::Corruption,
                _ => ErrorKind::Format,
            },
            Error::PathNotFound(_) | Error::WrongKind { .. } => ErrorKind::PathNotFound,
            Error::Fetch(_) | Error::Closed | Error::Poisoned => ErrorKind::Io,
            Error::Conversion { .. } => ErrorKind::Conversion,
            Error::Selection(_) => ErrorKind::Selection,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// The underlying format error, if any.
    pub fn format_error(&self) -> Option<&FormatError> {
        match self {
            Error::Format { source, .. } => Some(source),
            _ => None,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(self, Error::Fetch(FetchError::Cancelled))
    }
}

/// Attach the failing structure's location to format errors.
pub(crate) trait Context<T> {
    fn context(self, f: impl FnOnce() -> String) -> Result<T>;
}

impl<T> Context<T> for std::result::Result<T, FormatError> {
    fn context(self, f: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|source| Error::Format { context: f(), source })
    }
}

impl<T> Context<T> for Result<T> {
    fn context(self, f: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|e| match e {
            Error::Format { context, source } if context.is_empty() => Error::Format { context: f(), source },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn kinds() {
        let eof = Error::from(FormatError::UnexpectedEof {
            expected: 10,
            available: 4,
        });
        assert_eq!(eof.kind(), ErrorKind::Truncated);
        assert_eq!(Error::from(FormatError::UnsupportedFilter(4)).kind(), ErrorKind::UnsupportedFilter);
        assert_eq!(Error::from(FormatError::ContinuationCycle(96)).kind(), ErrorKind::Corruption);
        assert_eq!(
            Error::from(FormatError::UnsupportedVersion {
                structure: "superblock",
                version: 9
            })
            .kind(),
            ErrorKind::Format
        );
        let fetch = FetchError::Exhausted {
            offset: 0,
            len: 1,
            attempts: 4,
            source: io::Error::new(io::ErrorKind::TimedOut, "slow"),
        };
        assert_eq!(Error::from(fetch).kind(), ErrorKind::Io);
        assert_eq!(Error::Poisoned.kind(), ErrorKind::Io);
    }

    #[test]
    fn context_is_shown() {
        let r: std::result::Result<(), FormatError> = Err(FormatError::ContinuationCycle(64));
        let e = r.context(|| "object header at 0x40".into()).unwrap_err();
        assert!(e.to_string().starts_with("object header at 0x40: "));
        // An existing context is kept.
        let e = Err::<(), _>(e).context(|| "outer".into()).unwrap_err();
        assert!(e.to_string().starts_with("object header at 0x40"));
    }
}
