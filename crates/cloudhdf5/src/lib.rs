//! Concurrent HDF5 reader for object storage and local files.
//!
//! A [`Session`] fetches only the byte ranges it needs: metadata through a
//! small line cache, bulk data through merged range requests spread over a
//! bounded worker pool. Groups and variables are resolved lazily and cached
//! for the life of the session.
//!
//! # Reading
//!
//! ```no_run
//! use cloudhdf5::{Config, Credentials, Hyperslab, Session};
//!
//! let session = Session::open("s3://bucket/ATL03.h5", &Credentials::default(), Config::default()).unwrap();
//! let heights = session.variable("/gt1l/heights/h_ph").unwrap();
//! println!("{} {:?}", heights.dtype(), heights.shape());
//!
//! let first_rows = heights.read_rows(0, Some(1000)).unwrap();
//! let window = heights.read(Some(&Hyperslab::from_ranges(&[10..20]))).unwrap();
//! println!("{:?} {:?}", first_rows.to_f64(), window.shape());
//! ```
//!
//! # Host datasets
//!
//! ```no_run
//! use cloudhdf5::{Engine, OpenOptions};
//!
//! let mut engine = Engine::new();
//! engine.register_converter("delta_time", |a| a);
//! let ds = engine
//!     .open_dataset("granule.h5", &OpenOptions::default().group("/gt1l/heights"))
//!     .unwrap();
//! println!("{:?}", ds.variable_names());
//! ```

pub mod adapter;
pub mod batch;
mod chunk_index;
pub mod config;
pub mod error;
mod read;
pub mod session;
mod single_flight;
mod storage;
pub mod tree;
pub mod types;
mod walker;

pub use adapter::{ConverterRegistry, Engine, HostDataset, HostVariable, OpenOptions};
pub use batch::BatchRead;
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use session::Session;
pub use tree::{Group, Object, Variable, VariableMeta};
pub use types::{Array, DType};
pub use walker::{ObjectKind, WalkEntry};

pub use cloudhdf5_format::data_read::ArrayData;
pub use cloudhdf5_format::selection::Hyperslab;
pub use cloudhdf5_io::{Credentials, FileBackend, Locator, MemoryBackend, RangeBackend};
