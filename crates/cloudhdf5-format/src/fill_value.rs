//! Fill value messages (old type 0x0004 and new type 0x0005).

use crate::error::FormatError;
use crate::read::ByteReader;

/// Bytes of one fill element, if the producer defined one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FillValue {
    pub value: Option<Vec<u8>>,
}

impl FillValue {
    /// Parse the old-style fill value message: size(4) + value.
    pub fn parse_old(data: &[u8]) -> Result<FillValue, FormatError> {
        let mut r = ByteReader::new(data);
        let size = r.u32()? as usize;
        let value = (size > 0).then(|| r.bytes(size).map(<[u8]>::to_vec)).transpose()?;
        Ok(FillValue { value })
    }

    pub fn parse(data: &[u8]) -> Result<FillValue, FormatError> {
        let mut r = ByteReader::new(data);
        let version = r.u8()?;
        let defined = match version {
            1 | 2 => {
                // allocation time(1) + write time(1)
                r.skip(2)?;
                let defined = r.u8()? != 0;
                // Version 1 always stores the size field.
                version == 1 || defined
            }
            3 => r.u8()? & 0x20 != 0,
            v => {
                return Err(FormatError::UnsupportedVersion {
                    structure: "fill value",
                    version: v,
                })
            }
        };
        if !defined {
            return Ok(FillValue { value: None });
        }
        let size = r.u32()? as usize;
        let value = (size > 0).then(|| r.bytes(size).map(<[u8]>::to_vec)).transpose()?;
        Ok(FillValue { value })
    }

    /// Fill pattern for elements of `element_size` bytes; zero when undefined.
    pub fn pattern(&self, element_size: usize) -> Vec<u8> {
        match &self.value {
            Some(v) if v.len() == element_size => v.clone(),
            _ => vec![0u8; element_size],
        }
    }

    /// Whether the fill pattern is all zero bytes.
    pub fn is_zero(&self) -> bool {
        self.value.as_ref().map_or(true, |v| v.iter().all(|&b| b == 0))
    }
}
