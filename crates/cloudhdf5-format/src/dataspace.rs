//! Dataspace message (type 0x0001).

use crate::error::FormatError;
use crate::read::ByteReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataspaceType {
    Scalar,
    Simple,
    Null,
}

/// Shape of a dataset or attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    pub space_type: DataspaceType,
    /// Current extent of each dimension; empty for scalar and null spaces.
    pub dimensions: Vec<u64>,
    /// Maximum extents, `u64::MAX` for unlimited.
    pub max_dimensions: Option<Vec<u64>>,
}

impl Dataspace {
    pub fn parse(data: &[u8], length_size: u8) -> Result<Dataspace, FormatError> {
        let mut r = ByteReader::new(data);
        let version = r.u8()?;
        let rank = r.u8()? as usize;
        let flags = r.u8()?;

        let space_type = match version {
            1 => {
                // reserved(1) + reserved(4)
                r.skip(5)?;
                if rank == 0 {
                    DataspaceType::Scalar
                } else {
                    DataspaceType::Simple
                }
            }
            2 => match r.u8()? {
                0 => DataspaceType::Scalar,
                1 => DataspaceType::Simple,
                2 => DataspaceType::Null,
                t => return Err(FormatError::Malformed(format!("dataspace type {t}"))),
            },
            v => {
                return Err(FormatError::UnsupportedVersion {
                    structure: "dataspace",
                    version: v,
                })
            }
        };

        let mut dimensions = Vec::with_capacity(rank);
        for _ in 0..rank {
            dimensions.push(r.length(length_size)?);
        }
        let max_dimensions = if flags & 0x01 != 0 {
            let mut max = Vec::with_capacity(rank);
            for _ in 0..rank {
                max.push(r.length(length_size)?);
            }
            Some(max)
        } else {
            None
        };
        if dimensions.iter().try_fold(1u64, |n, &d| n.checked_mul(d)).is_none() {
            return Err(FormatError::Malformed(format!(
                "dataspace {dimensions:?} holds more than {} elements",
                u64::MAX
            )));
        }

        Ok(Dataspace {
            space_type,
            dimensions,
            max_dimensions,
        })
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Number of elements: 1 for scalar, 0 for null. Parsed dataspaces
    /// never saturate.
    pub fn num_elements(&self) -> u64 {
        match self.space_type {
            DataspaceType::Null => 0,
            DataspaceType::Scalar => 1,
            DataspaceType::Simple => self.dimensions.iter().fold(1u64, |n, &d| n.saturating_mul(d)),
        }
    }

    pub fn is_null(&self) -> bool {
        self.space_type == DataspaceType::Null
    }
}
