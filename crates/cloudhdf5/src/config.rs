//! Session configuration.

use std::time::Duration;

use cloudhdf5_io::FetchOptions;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tuning knobs for one open session.
///
/// Every field has a default, so a JSON document only needs the fields it
/// changes:
///
/// ```
/// let cfg = cloudhdf5::Config::from_json_str(r#"{ "max_concurrency": 32 }"#).unwrap();
/// assert_eq!(cfg.max_concurrency, 32);
/// assert_eq!(cfg.retry_count, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Worker threads used for concurrent fetch and decode.
    pub max_concurrency: usize,
    /// Largest gap, in bytes, between two ranges merged into one request.
    pub range_gap_merge_threshold: u64,
    /// Merged requests never span more than this many bytes.
    pub max_merged_request: u64,
    /// Retries after the first failed attempt of a request.
    pub retry_count: u32,
    pub retry_backoff_ms: u64,
    pub request_timeout_ms: u64,
    /// Size of the cached lines that serve small metadata reads.
    pub metadata_line_size: u64,
    pub verify_checksums: bool,
    pub enable_attributes: bool,
    /// Soft-link hops allowed while resolving one path.
    pub max_link_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            range_gap_merge_threshold: 64 * 1024,
            max_merged_request: 8 * 1024 * 1024,
            retry_count: 3,
            retry_backoff_ms: 50,
            request_timeout_ms: 30_000,
            metadata_line_size: 64 * 1024,
            verify_checksums: false,
            enable_attributes: true,
            max_link_depth: 16,
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Config> {
        let cfg: Config = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::Config("max_concurrency must be at least 1".into()));
        }
        if self.metadata_line_size == 0 {
            return Err(Error::Config("metadata_line_size must be at least 1".into()));
        }
        if self.max_merged_request == 0 {
            return Err(Error::Config("max_merged_request must be at least 1".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            retry_count: self.retry_count,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            gap_threshold: self.range_gap_merge_threshold,
            max_merged: self.max_merged_request,
        }
    }
}
