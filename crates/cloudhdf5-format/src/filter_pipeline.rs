//! Filter pipeline message (type 0x000B).

use crate::error::FormatError;
use crate::read::{c_string, ByteReader};

pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;
pub const FILTER_SZIP: u16 = 4;
pub const FILTER_NBIT: u16 = 5;
pub const FILTER_SCALEOFFSET: u16 = 6;

/// The closed set of filter identities the reader knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Deflate,
    Shuffle,
    Fletcher32,
    Szip,
    Nbit,
    ScaleOffset,
    Other(u16),
}

impl FilterKind {
    pub fn from_id(id: u16) -> FilterKind {
        match id {
            FILTER_DEFLATE => FilterKind::Deflate,
            FILTER_SHUFFLE => FilterKind::Shuffle,
            FILTER_FLETCHER32 => FilterKind::Fletcher32,
            FILTER_SZIP => FilterKind::Szip,
            FILTER_NBIT => FilterKind::Nbit,
            FILTER_SCALEOFFSET => FilterKind::ScaleOffset,
            other => FilterKind::Other(other),
        }
    }

    pub fn id(self) -> u16 {
        match self {
            FilterKind::Deflate => FILTER_DEFLATE,
            FilterKind::Shuffle => FILTER_SHUFFLE,
            FilterKind::Fletcher32 => FILTER_FLETCHER32,
            FilterKind::Szip => FILTER_SZIP,
            FilterKind::Nbit => FILTER_NBIT,
            FilterKind::ScaleOffset => FILTER_SCALEOFFSET,
            FilterKind::Other(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescription {
    pub kind: FilterKind,
    pub name: Option<String>,
    /// Bit 0 set means the filter is optional.
    pub flags: u16,
    pub client_data: Vec<u32>,
}

impl FilterDescription {
    pub fn is_optional(&self) -> bool {
        self.flags & 0x0001 != 0
    }
}

/// Filters in the order they were applied when writing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterPipeline {
    pub filters: Vec<FilterDescription>,
}

impl FilterPipeline {
    pub fn parse(data: &[u8]) -> Result<FilterPipeline, FormatError> {
        let mut r = ByteReader::new(data);
        let version = r.u8()?;
        let count = r.u8()? as usize;
        if version == 1 {
            r.skip(6)?;
        } else if version != 2 {
            return Err(FormatError::UnsupportedVersion {
                structure: "filter pipeline",
                version,
            });
        }

        let mut filters = Vec::with_capacity(count);
        for _ in 0..count {
            let id = r.u16()?;
            // Version 2 omits the name length for the predefined filters.
            let name_len = if version == 1 || id >= 256 {
                r.u16()? as usize
            } else {
                0
            };
            let flags = r.u16()?;
            let nvalues = r.u16()? as usize;
            let name = if name_len > 0 {
                let n = c_string(r.bytes(name_len)?);
                if version == 1 {
                    r.skip(((name_len + 7) & !7) - name_len)?;
                }
                Some(n)
            } else {
                None
            };
            let mut client_data = Vec::with_capacity(nvalues);
            for _ in 0..nvalues {
                client_data.push(r.u32()?);
            }
            if version == 1 && nvalues % 2 == 1 {
                r.skip(4)?;
            }
            filters.push(FilterDescription {
                kind: FilterKind::from_id(id),
                name,
                flags,
                client_data,
            });
        }
        Ok(FilterPipeline { filters })
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
