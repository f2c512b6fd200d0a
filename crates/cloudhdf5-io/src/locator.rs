//! Turning a user-supplied locator string into a backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::error::FetchError;
use crate::{FileBackend, RangeBackend};

/// Credentials handed to remote backends as-is.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    #[default]
    Anonymous,
    /// Sent as `Authorization: Bearer <token>`.
    Bearer(String),
    /// Raw request headers, e.g. pre-signed auth headers.
    Headers(Vec<(String, String)>),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Anonymous => f.write_str("Anonymous"),
            Credentials::Bearer(_) => f.write_str("Bearer(..)"),
            Credentials::Headers(h) => write!(f, "Headers({} entries)", h.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    File(PathBuf),
    Http(String),
}

fn invalid(locator: &str, reason: &str) -> FetchError {
    FetchError::InvalidLocator {
        locator: locator.to_string(),
        reason: reason.to_string(),
    }
}

impl Locator {
    /// Parse a local path, `file://path`, `http(s)://...` or `s3://bucket/key`.
    pub fn parse(s: &str) -> Result<Self, FetchError> {
        Self::parse_with_region(s, None)
    }

    /// As [`Locator::parse`], addressing `s3://` objects in `region`.
    pub fn parse_with_region(s: &str, region: Option<&str>) -> Result<Self, FetchError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid(s, "empty locator"));
        }
        if let Some(rest) = s.strip_prefix("s3://") {
            let (bucket, key) = rest
                .split_once('/')
                .filter(|(b, k)| !b.is_empty() && !k.is_empty())
                .ok_or_else(|| invalid(s, "expected s3://bucket/key"))?;
            let host = match region {
                Some(r) => format!("{bucket}.s3.{r}.amazonaws.com"),
                None => format!("{bucket}.s3.amazonaws.com"),
            };
            return Ok(Locator::Http(format!("https://{host}/{key}")));
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            let host = s.split_once("://").map(|(_, r)| r).unwrap_or_default();
            if host.is_empty() || host.starts_with('/') {
                return Err(invalid(s, "missing host"));
            }
            return Ok(Locator::Http(s.to_string()));
        }
        if let Some(path) = s.strip_prefix("file://") {
            if path.is_empty() {
                return Err(invalid(s, "missing path"));
            }
            return Ok(Locator::File(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = s.split_once("://") {
            return Err(invalid(s, &format!("unsupported scheme {scheme:?}")));
        }
        Ok(Locator::File(PathBuf::from(s)))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Locator::Http(_))
    }

    /// Last path segment, used to guess the file format.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Locator::File(p) => p.file_name().and_then(|n| n.to_str()),
            Locator::Http(url) => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                path.rsplit('/').next().filter(|n| !n.is_empty())
            }
        }
    }

    /// Open a backend for this locator.
    pub fn open(&self, credentials: &Credentials, timeout: Duration) -> Result<Arc<dyn RangeBackend>, FetchError> {
        debug!("opening {self:?}");
        match self {
            Locator::File(path) => {
                let _ = (credentials, timeout);
                Ok(Arc::new(FileBackend::open(path).map_err(FetchError::Open)?))
            }
            #[cfg(feature = "http")]
            Locator::Http(url) => Ok(Arc::new(crate::http::HttpBackend::new(
                url.clone(),
                credentials.clone(),
                timeout,
            )?)),
            #[cfg(not(feature = "http"))]
            Locator::Http(url) => Err(invalid(url, "built without the `http` feature")),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::File(p) => write!(f, "{}", p.display()),
            Locator::Http(u) => f.write_str(u),
        }
    }
}

impl std::str::FromStr for Locator {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Locator::parse(s)
    }
}
