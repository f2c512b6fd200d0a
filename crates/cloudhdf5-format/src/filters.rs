//! Reverse application of a chunk's filter pipeline.

use crate::error::FormatError;
use crate::filter_pipeline::{FilterKind, FilterPipeline};

/// Undo the filters applied to one stored chunk.
///
/// Filters run in reverse pipeline order. Bit `i` of `filter_mask` set
/// means filter `i` was skipped when the chunk was written.
pub fn decode_chunk(
    mut data: Vec<u8>,
    pipeline: &FilterPipeline,
    filter_mask: u32,
    element_size: usize,
) -> Result<Vec<u8>, FormatError> {
    for (i, filter) in pipeline.filters.iter().enumerate().rev() {
        if i < 32 && filter_mask & (1 << i) != 0 {
            continue;
        }
        data = match filter.kind {
            FilterKind::Deflate => inflate(&data)?,
            FilterKind::Shuffle => {
                let size = filter
                    .client_data
                    .first()
                    .map(|&s| s as usize)
                    .unwrap_or(element_size);
                unshuffle(&data, size)
            }
            FilterKind::Fletcher32 => fletcher32_strip(data)?,
            other => return Err(FormatError::UnsupportedFilter(other.id())),
        };
    }
    Ok(data)
}

#[cfg(feature = "deflate")]
fn inflate(data: &[u8]) -> Result<Vec<u8>, FormatError> {
    use std::io::Read;

    let mut out = Vec::with_capacity(data.len() * 4);
    flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| FormatError::Decompression(e.to_string()))?;
    Ok(out)
}

#[cfg(not(feature = "deflate"))]
fn inflate(_data: &[u8]) -> Result<Vec<u8>, FormatError> {
    Err(FormatError::UnsupportedFilter(crate::filter_pipeline::FILTER_DEFLATE))
}

/// Reverse the byte shuffle: byte `b` of element `e` was stored at
/// `b * count + e`. Trailing bytes that do not fill an element stay put.
pub fn unshuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() < element_size {
        return data.to_vec();
    }
    let count = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for b in 0..element_size {
        let lane = &data[b * count..(b + 1) * count];
        for (e, &byte) in lane.iter().enumerate() {
            out[e * element_size + b] = byte;
        }
    }
    let tail = count * element_size;
    out[tail..].copy_from_slice(&data[tail..]);
    out
}

/// Fletcher-32 over big-endian 16-bit words, folded every 360 words.
pub fn fletcher32(data: &[u8]) -> u32 {
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;
    for block in data.chunks(720) {
        for word in block.chunks(2) {
            let hi = (word[0] as u32) << 8;
            let lo = word.get(1).map_or(0, |&b| b as u32);
            sum1 += hi | lo;
            sum2 += sum1;
        }
        sum1 = (sum1 & 0xFFFF) + (sum1 >> 16);
        sum2 = (sum2 & 0xFFFF) + (sum2 >> 16);
    }
    sum1 = (sum1 & 0xFFFF) + (sum1 >> 16);
    sum2 = (sum2 & 0xFFFF) + (sum2 >> 16);
    (sum2 << 16) | sum1
}

fn fletcher32_strip(mut data: Vec<u8>) -> Result<Vec<u8>, FormatError> {
    if data.len() < 4 {
        return Err(FormatError::Malformed("fletcher32 chunk shorter than its checksum".into()));
    }
    let body = data.len() - 4;
    let stored = u32::from_le_bytes([data[body], data[body + 1], data[body + 2], data[body + 3]]);
    let computed = fletcher32(&data[..body]);
    // Some older writers stored the checksum byte-swapped.
    if stored != computed && stored != computed.swap_bytes() {
        return Err(FormatError::ChecksumMismatch {
            structure: "fletcher32 chunk",
            expected: stored,
            computed,
        });
    }
    data.truncate(body);
    Ok(data)
}
