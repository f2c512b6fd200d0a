//! Fixed array chunk index (FAHD header, FADB data block).

use crate::checksum::verify_trailing;
use crate::error::FormatError;
use crate::read::{ensure_len, is_undefined, read_uint, ByteReader};

pub const FAHD_SIGNATURE: [u8; 4] = *b"FAHD";
pub const FADB_SIGNATURE: [u8; 4] = *b"FADB";

/// Client id of an array whose elements carry a size and filter mask.
pub const CLIENT_FILTERED_CHUNKS: u8 = 1;

/// One chunk entry of a fixed or extensible array index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayElement {
    pub address: u64,
    pub size: Option<u64>,
    pub filter_mask: u32,
}

/// Decode one array element; `None` when the chunk was never written.
pub(crate) fn decode_element(
    raw: &[u8],
    client_id: u8,
    offset_size: u8,
) -> Result<Option<ArrayElement>, FormatError> {
    let os = offset_size as usize;
    ensure_len(raw, 0, os)?;
    if is_undefined(raw, 0, os) {
        return Ok(None);
    }
    let address = read_uint(raw, 0, os)?;
    if client_id != CLIENT_FILTERED_CHUNKS {
        return Ok(Some(ArrayElement {
            address,
            size: None,
            filter_mask: 0,
        }));
    }
    let width = raw
        .len()
        .checked_sub(os + 4)
        .filter(|w| (1..=8).contains(w))
        .ok_or_else(|| FormatError::Malformed(format!("filtered array element of {} bytes", raw.len())))?;
    Ok(Some(ArrayElement {
        address,
        size: Some(read_uint(raw, os, width)?),
        filter_mask: read_uint(raw, os + width, 4)? as u32,
    }))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedArrayHeader {
    pub client_id: u8,
    pub element_size: u8,
    pub page_bits: u8,
    pub num_elements: u64,
    pub data_block_address: u64,
}

impl FixedArrayHeader {
    pub fn encoded_len(offset_size: u8, length_size: u8) -> usize {
        8 + length_size as usize + offset_size as usize + 4
    }

    pub fn parse(
        data: &[u8],
        offset_size: u8,
        length_size: u8,
        verify: bool,
    ) -> Result<FixedArrayHeader, FormatError> {
        let len = Self::encoded_len(offset_size, length_size);
        ensure_len(data, 0, len)?;
        let mut r = ByteReader::new(data);
        r.signature(&FAHD_SIGNATURE, "fixed array header")?;
        let version = r.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "fixed array header",
                version,
            });
        }
        let client_id = r.u8()?;
        let element_size = r.u8()?;
        let page_bits = r.u8()?;
        let num_elements = r.length(length_size)?;
        let data_block_address = r.offset(offset_size)?;
        if verify {
            verify_trailing(&data[..len], "fixed array header")?;
        }
        let header = FixedArrayHeader {
            client_id,
            element_size,
            page_bits,
            num_elements,
            data_block_address,
        };
        if element_size == 0 || header.checked_data_block_len(offset_size).is_none() {
            return Err(FormatError::Malformed(format!(
                "fixed array of {num_elements} elements of {element_size} bytes"
            )));
        }
        Ok(header)
    }

    fn page_elements(&self) -> u64 {
        1u64 << self.page_bits.min(63)
    }

    pub fn is_paged(&self) -> bool {
        self.num_elements > self.page_elements()
    }

    fn pages(&self) -> u64 {
        self.num_elements.div_ceil(self.page_elements())
    }

    fn checked_data_block_len(&self, offset_size: u8) -> Option<usize> {
        let n = usize::try_from(self.num_elements).ok()?;
        let pages = usize::try_from(self.pages()).ok()?;
        let elements = n.checked_mul(self.element_size as usize)?;
        let checksums = if self.is_paged() { pages.checked_mul(4)? } else { 0 };
        let prefix = 6 + offset_size as usize + pages.div_ceil(8) * usize::from(self.is_paged()) + 4;
        prefix.checked_add(elements)?.checked_add(checksums)
    }

    /// Total bytes of the data block, including every page.
    pub fn data_block_len(&self, offset_size: u8) -> usize {
        self.checked_data_block_len(offset_size).unwrap_or(usize::MAX)
    }

    /// Decode every element from the complete data block bytes.
    pub fn elements(
        &self,
        data: &[u8],
        offset_size: u8,
        verify: bool,
    ) -> Result<Vec<Option<ArrayElement>>, FormatError> {
        ensure_len(data, 0, self.data_block_len(offset_size))?;
        let mut r = ByteReader::new(data);
        r.signature(&FADB_SIGNATURE, "fixed array data block")?;
        let version = r.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "fixed array data block",
                version,
            });
        }
        let client_id = r.u8()?;
        if client_id != self.client_id {
            return Err(FormatError::Malformed("fixed array data block client mismatch".into()));
        }
        let _header = r.offset(offset_size)?;
        let es = self.element_size as usize;
        let mut out = Vec::with_capacity((data.len() / es.max(1)).min(self.num_elements as usize));

        if !self.is_paged() {
            for _ in 0..self.num_elements {
                out.push(decode_element(r.bytes(es)?, self.client_id, offset_size)?);
            }
            if verify {
                verify_trailing(&data[..r.position() + 4], "fixed array data block")?;
            }
            return Ok(out);
        }

        let bitmap = r.bytes(self.pages().div_ceil(8) as usize)?;
        if verify {
            verify_trailing(&data[..r.position() + 4], "fixed array data block")?;
        }
        r.skip(4)?;
        let per_page = self.page_elements();
        for page in 0..self.pages() {
            let count = per_page.min(self.num_elements - page * per_page) as usize;
            let start = r.position();
            let page_bytes = r.bytes(count * es)?;
            r.skip(4)?;
            let initialized = bitmap[(page / 8) as usize] & (0x80 >> (page % 8)) != 0;
            if !initialized {
                out.extend(std::iter::repeat(None).take(count));
                continue;
            }
            if verify {
                verify_trailing(&data[start..start + count * es + 4], "fixed array data block page")?;
            }
            for raw in page_bytes.chunks_exact(es) {
                out.push(decode_element(raw, self.client_id, offset_size)?);
            }
        }
        Ok(out)
    }
}
