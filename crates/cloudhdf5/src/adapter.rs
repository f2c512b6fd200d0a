//! Backend adapter for array-analysis hosts.
//!
//! A host opens one group of a file as a dataset: every variable directly
//! in the group, read in full, plus the group's attributes. Converters
//! registered by variable name run on each decoded array before it is
//! handed over.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use cloudhdf5_io::Credentials;
use log::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::types::{Array, DType};

/// A value converter: decoded array in, converted array out.
pub type Converter = Arc<dyn Fn(Array) -> Array + Send + Sync>;

/// Converters keyed by variable name.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: HashMap<String, Converter>,
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.converters.keys().collect();
        names.sort();
        f.debug_struct("ConverterRegistry").field("variables", &names).finish()
    }
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `convert` for variables named `variable`, replacing any
    /// earlier converter for that name.
    pub fn register<F>(&mut self, variable: impl Into<String>, convert: F)
    where
        F: Fn(Array) -> Array + Send + Sync + 'static,
    {
        self.converters.insert(variable.into(), Arc::new(convert));
    }

    pub fn contains(&self, variable: &str) -> bool {
        self.converters.contains_key(variable)
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Run the converter registered for `variable`, if any. A converter
    /// that changes the array's shape is rejected.
    pub fn apply(&self, variable: &str, array: Array) -> Result<Array> {
        let Some(convert) = self.converters.get(variable) else {
            return Ok(array);
        };
        let expected = array.shape().to_vec();
        let converted = convert(array);
        if converted.shape() != expected.as_slice() {
            return Err(Error::Conversion {
                variable: variable.to_string(),
                expected,
                actual: converted.shape().to_vec(),
            });
        }
        debug!("converted {variable}");
        Ok(converted)
    }
}

/// How to open a dataset.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Group whose variables make up the dataset.
    pub group: String,
    pub credentials: Credentials,
    /// Variable names to leave out.
    pub drop_variables: Vec<String>,
    pub config: Config,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            group: "/".to_string(),
            credentials: Credentials::default(),
            drop_variables: Vec::new(),
            config: Config::default(),
        }
    }
}

impl OpenOptions {
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn drop_variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drop_variables = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }
}

/// One variable as delivered to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostVariable {
    pub path: String,
    pub dtype: DType,
    pub data: Array,
    pub attributes: BTreeMap<String, Array>,
}

/// A group opened as a host dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct HostDataset {
    pub group: String,
    /// Variables by name.
    pub variables: BTreeMap<String, HostVariable>,
    pub attributes: BTreeMap<String, Array>,
}

impl HostDataset {
    pub fn variable(&self, name: &str) -> Option<&HostVariable> {
        self.variables.get(name)
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.variables.keys().map(String::as_str).collect()
    }
}

/// The entry point a host discovers.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    converters: ConverterRegistry,
}

impl Engine {
    pub const NAME: &'static str = "cloudhdf5";
    pub const DESCRIPTION: &'static str = "Read HDF5 files from object storage or local disk with cloudhdf5";
    const EXTENSIONS: &'static [&'static str] = &["h5", "hdf5", "he5", "h5co", "nc"];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_converters(converters: ConverterRegistry) -> Self {
        Engine { converters }
    }

    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    pub fn register_converter<F>(&mut self, variable: impl Into<String>, convert: F)
    where
        F: Fn(Array) -> Array + Send + Sync + 'static,
    {
        self.converters.register(variable, convert);
    }

    /// Whether `locator` looks like a file this engine reads, judged by its
    /// extension. Query strings of URLs are ignored.
    pub fn guess_can_open(locator: &str) -> bool {
        let path = locator.split(['?', '#']).next().unwrap_or(locator);
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| Self::EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
    }

    /// Open `locator` and load the group named in `options`.
    pub fn open_dataset(&self, locator: &str, options: &OpenOptions) -> Result<HostDataset> {
        let session = Session::open(locator, &options.credentials, options.config.clone())?;
        let dataset = self.load(&session, options);
        session.close();
        dataset
    }

    /// Load the group named in `options` from an already open session.
    ///
    /// Either every selected variable is read and converted, or the first
    /// failure is returned.
    pub fn load(&self, session: &Session, options: &OpenOptions) -> Result<HostDataset> {
        let group = session.group(&options.group)?;
        let variables: Vec<_> = group
            .variables()?
            .into_iter()
            .filter(|v| !options.drop_variables.iter().any(|d| d == v.name()))
            .collect();
        let paths: Vec<&str> = variables.iter().map(|v| v.path()).collect();
        let batch = session.read_many(&paths);

        let mut out = BTreeMap::new();
        for (variable, (_, result)) in variables.iter().zip(batch.into_entries()) {
            let data = self.converters.apply(variable.name(), result?)?;
            out.insert(
                variable.name().to_string(),
                HostVariable {
                    path: variable.path().to_string(),
                    dtype: variable.dtype().clone(),
                    data,
                    attributes: variable.attributes().clone(),
                },
            );
        }
        debug!("loaded {} variables from {}", out.len(), group.path());
        Ok(HostDataset {
            group: group.path().to_string(),
            variables: out,
            attributes: group.attributes().clone(),
        })
    }
}
