//! Pure parsers for the HDF5 structures a range-request reader has to walk.
//!
//! Nothing in this crate performs I/O. Every parser takes a byte slice that
//! begins at the structure being decoded, together with the superblock's
//! offset and length widths, and either returns the decoded value or a
//! [`FormatError`](error::FormatError). Callers that fetch bytes lazily use
//! the `UnexpectedEof` variant to learn how many more bytes a structure needs.

pub mod attribute;
pub mod btree_v1;
pub mod btree_v2;
pub mod checksum;
pub mod data_layout;
pub mod data_read;
pub mod dataspace;
pub mod datatype;
pub mod error;
pub mod extensible_array;
pub mod fill_value;
pub mod filter_pipeline;
pub mod filters;
pub mod fixed_array;
pub mod fractal_heap;
pub mod link_info;
pub mod link_message;
pub mod local_heap;
pub mod message_type;
pub mod object_header;
pub mod read;
pub mod selection;
pub mod signature;
pub mod superblock;
pub mod symbol_table;

pub use error::FormatError;

/// Sentinel used by the format for an unset Address.
pub const UNDEFINED_ADDRESS: u64 = u64::MAX;
