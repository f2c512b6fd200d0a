//! Local heap (HEAP) holding the names of a legacy group's members.

use crate::error::FormatError;
use crate::read::{c_string, ByteReader};

pub const HEAP_SIGNATURE: [u8; 4] = *b"HEAP";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalHeap {
    pub data_segment_size: u64,
    pub data_segment_address: u64,
}

impl LocalHeap {
    /// Size of the header for the given widths.
    pub fn header_len(offset_size: u8, length_size: u8) -> usize {
        8 + 2 * length_size as usize + offset_size as usize
    }

    pub fn parse(data: &[u8], offset_size: u8, length_size: u8) -> Result<LocalHeap, FormatError> {
        let mut r = ByteReader::new(data);
        r.signature(&HEAP_SIGNATURE, "local heap")?;
        let version = r.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "local heap",
                version,
            });
        }
        r.skip(3)?;
        let data_segment_size = r.length(length_size)?;
        let _free_list_offset = r.length(length_size)?;
        let data_segment_address = r.offset(offset_size)?;
        Ok(LocalHeap {
            data_segment_size,
            data_segment_address,
        })
    }
}

/// Read the NUL-terminated string at `offset` within a heap's data segment.
pub fn read_string(segment: &[u8], offset: u64) -> Result<String, FormatError> {
    let start = usize::try_from(offset)
        .ok()
        .filter(|&s| s < segment.len())
        .ok_or_else(|| FormatError::Malformed(format!("local heap offset {offset} out of segment")))?;
    Ok(c_string(&segment[start..]))
}
