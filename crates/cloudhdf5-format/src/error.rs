//! Error type shared by every parser in this crate.

use std::fmt;

/// Errors raised while decoding HDF5 binary structures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The 8-byte file signature was not found at any candidate offset.
    SignatureNotFound,
    /// The buffer is shorter than the structure claims.
    UnexpectedEof {
        /// Number of bytes the structure needs, counted from the start of the buffer.
        expected: usize,
        /// Number of bytes actually supplied.
        available: usize,
    },
    /// Offset width declared by the superblock is not 2, 4 or 8.
    InvalidOffsetSize(u8),
    /// Length width declared by the superblock is not 2, 4 or 8.
    InvalidLengthSize(u8),
    /// A 4-byte structure signature did not match.
    InvalidSignature {
        /// Structure being decoded.
        structure: &'static str,
        /// The bytes found instead.
        found: [u8; 4],
    },
    /// A structure version this reader does not decode.
    UnsupportedVersion {
        /// Structure being decoded.
        structure: &'static str,
        /// Version byte found.
        version: u8,
    },
    /// Datatype class this reader does not decode.
    UnsupportedDatatypeClass(u8),
    /// Layout class this reader does not decode.
    UnsupportedLayoutClass(u8),
    /// Chunk index type this reader does not decode.
    UnsupportedChunkIndex(u8),
    /// Filter id without a decoder.
    UnsupportedFilter(u16),
    /// A header message is marked must-understand but has an unknown type.
    UnsupportedMessage(u16),
    /// Fractal heap ID of a non-managed type.
    UnsupportedHeapId(u8),
    /// Reading values of this datatype is not supported.
    UnsupportedRead(String),
    /// Metadata checksum did not verify.
    ChecksumMismatch {
        /// Structure whose checksum failed.
        structure: &'static str,
        /// Value stored in the file.
        expected: u32,
        /// Value computed over the bytes.
        computed: u32,
    },
    /// A continuation block points back to an already visited block.
    ContinuationCycle(u64),
    /// A chunk coordinate lies outside the dataset's chunk grid.
    ChunkOutOfBounds {
        /// Chunk coordinate in chunk units.
        coord: Vec<u64>,
        /// Number of chunks along each dimension.
        grid: Vec<u64>,
    },
    /// An Address lies beyond the end of the object.
    AddressOutOfBounds {
        /// Offending address.
        address: u64,
        /// Size of the object.
        extent: u64,
    },
    /// Decoded bytes do not match the size implied by shape and datatype.
    SizeMismatch {
        /// Bytes the dataspace and datatype require.
        expected: u64,
        /// Bytes actually produced.
        actual: u64,
    },
    /// Decompression failed.
    Decompression(String),
    /// Malformed structure content not covered by another variant.
    Malformed(String),
    /// Selection does not fit the dataspace.
    InvalidSelection(String),
}

impl FormatError {
    /// Whether this error means the input ran short of what a structure needs.
    pub fn is_truncation(&self) -> bool {
        matches!(self, FormatError::UnexpectedEof { .. })
    }

    /// Whether this error marks inconsistent or self-contradicting file content.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            FormatError::ChecksumMismatch { .. }
                | FormatError::ContinuationCycle(_)
                | FormatError::ChunkOutOfBounds { .. }
                | FormatError::AddressOutOfBounds { .. }
                | FormatError::SizeMismatch { .. }
        )
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::SignatureNotFound => {
                write!(f, "HDF5 signature not found at any valid offset")
            }
            FormatError::UnexpectedEof {
                expected,
                available,
            } => write!(f, "unexpected EOF: need {expected} bytes, have {available}"),
            FormatError::InvalidOffsetSize(s) => {
                write!(f, "invalid offset size: {s} (must be 2, 4, or 8)")
            }
            FormatError::InvalidLengthSize(s) => {
                write!(f, "invalid length size: {s} (must be 2, 4, or 8)")
            }
            FormatError::InvalidSignature { structure, found } => {
                write!(f, "invalid {structure} signature: {found:02x?}")
            }
            FormatError::UnsupportedVersion { structure, version } => {
                write!(f, "unsupported {structure} version: {version}")
            }
            FormatError::UnsupportedDatatypeClass(c) => {
                write!(f, "unsupported datatype class: {c}")
            }
            FormatError::UnsupportedLayoutClass(c) => write!(f, "unsupported layout class: {c}"),
            FormatError::UnsupportedChunkIndex(t) => {
                write!(f, "unsupported chunk index type: {t}")
            }
            FormatError::UnsupportedFilter(id) => write!(f, "unsupported filter id: {id}"),
            FormatError::UnsupportedMessage(id) => {
                write!(f, "unsupported message type {id:#06x} marked as must-understand")
            }
            FormatError::UnsupportedHeapId(t) => write!(f, "unsupported heap id type: {t}"),
            FormatError::UnsupportedRead(what) => write!(f, "cannot read values: {what}"),
            FormatError::ChecksumMismatch {
                structure,
                expected,
                computed,
            } => write!(
                f,
                "{structure} checksum mismatch: expected {expected:#010x}, computed {computed:#010x}"
            ),
            FormatError::ContinuationCycle(addr) => {
                write!(f, "object header continuation cycles back to {addr:#x}")
            }
            FormatError::ChunkOutOfBounds { coord, grid } => {
                write!(f, "chunk {coord:?} outside chunk grid {grid:?}")
            }
            FormatError::AddressOutOfBounds { address, extent } => {
                write!(f, "address {address:#x} beyond object extent {extent:#x}")
            }
            FormatError::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch: expected {expected} bytes, got {actual}")
            }
            FormatError::Decompression(msg) => write!(f, "decompression failed: {msg}"),
            FormatError::Malformed(msg) => write!(f, "malformed structure: {msg}"),
            FormatError::InvalidSelection(msg) => write!(f, "invalid selection: {msg}"),
        }
    }
}

impl std::error::Error for FormatError {}
