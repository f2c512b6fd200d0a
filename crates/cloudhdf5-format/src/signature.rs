//! File signature detection.

use crate::error::FormatError;

/// The 8-byte HDF5 magic signature.
pub const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1A, b'\n'];

/// Offsets at which a superblock may start in an object of `extent` bytes:
/// 0, then 512 doubling upward.
pub fn candidate_offsets(extent: u64) -> impl Iterator<Item = u64> {
    std::iter::once(0u64)
        .chain(std::iter::successors(Some(512u64), |o| o.checked_mul(2)))
        .take_while(move |&o| o.saturating_add(8) <= extent)
}

/// Whether `bytes` begins with the HDF5 signature.
pub fn is_signature(bytes: &[u8]) -> bool {
    bytes.len() >= 8 && bytes[..8] == HDF5_SIGNATURE
}

/// Search an in-memory prefix of the object for the signature.
pub fn find_signature(data: &[u8]) -> Result<u64, FormatError> {
    candidate_offsets(data.len() as u64)
        .find(|&o| is_signature(&data[o as usize..]))
        .ok_or(FormatError::SignatureNotFound)
}
