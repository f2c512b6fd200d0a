//! Reading several variables at once.

use log::warn;
use rayon::prelude::*;

use crate::error::Result;
use crate::session::Session;
use crate::types::Array;

/// Results of [`Session::read_many`], in request order.
#[derive(Debug)]
pub struct BatchRead {
    entries: Vec<(String, Result<Array>)>,
}

impl BatchRead {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Result for `path`, as it was requested.
    pub fn get(&self, path: &str) -> Option<&Result<Array>> {
        self.entries.iter().find(|(p, _)| p == path).map(|(_, r)| r)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Result<Array>)> {
        self.entries.iter().map(|(p, r)| (p.as_str(), r))
    }

    pub fn failures(&self) -> usize {
        self.entries.iter().filter(|(_, r)| r.is_err()).count()
    }

    pub fn into_entries(self) -> Vec<(String, Result<Array>)> {
        self.entries
    }
}

impl Session {
    /// Read every variable in `paths` concurrently.
    ///
    /// A failing variable does not stop the others; its error is kept in
    /// its own entry.
    pub fn read_many(&self, paths: &[&str]) -> BatchRead {
        let entries = self.inner.pool.install(|| {
            paths
                .par_iter()
                .map(|&path| {
                    let result = self.variable(path).and_then(|v| v.read(None));
                    if let Err(e) = &result {
                        warn!("reading {path} failed: {e}");
                    }
                    (path.to_string(), result)
                })
                .collect()
        });
        BatchRead { entries }
    }
}
