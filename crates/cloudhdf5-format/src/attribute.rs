//! Attribute message (type 0x000C) and attribute info message (type 0x0015).

use crate::datatype::{CharacterSet, Datatype};
use crate::dataspace::Dataspace;
use crate::error::FormatError;
use crate::read::{c_string, ByteReader};

const FLAG_SHARED_DATATYPE: u8 = 0x01;
const FLAG_SHARED_DATASPACE: u8 = 0x02;

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeMessage {
    pub name: String,
    pub charset: CharacterSet,
    pub datatype: Datatype,
    pub dataspace: Dataspace,
    /// `dataspace.num_elements() * datatype.size()` bytes of value.
    pub raw_data: Vec<u8>,
}

fn pad8(x: usize) -> usize {
    (x + 7) & !7
}

impl AttributeMessage {
    pub fn parse(data: &[u8], length_size: u8) -> Result<AttributeMessage, FormatError> {
        let mut r = ByteReader::new(data);
        let version = r.u8()?;
        if !(1..=3).contains(&version) {
            return Err(FormatError::UnsupportedVersion {
                structure: "attribute",
                version,
            });
        }
        let flags = r.u8()?;
        if version >= 2 && flags & (FLAG_SHARED_DATATYPE | FLAG_SHARED_DATASPACE) != 0 {
            return Err(FormatError::UnsupportedRead(
                "attribute with a shared datatype or dataspace".into(),
            ));
        }
        let name_size = r.u16()? as usize;
        let datatype_size = r.u16()? as usize;
        let dataspace_size = r.u16()? as usize;
        let charset = if version == 3 {
            match r.u8()? {
                1 => CharacterSet::Utf8,
                _ => CharacterSet::Ascii,
            }
        } else {
            CharacterSet::Ascii
        };
        let padded = |n: usize| if version == 1 { pad8(n) } else { n };

        let name = c_string(r.bytes(name_size)?);
        r.skip(padded(name_size) - name_size)?;
        let (datatype, _) = Datatype::parse(r.bytes(datatype_size)?)?;
        r.skip(padded(datatype_size) - datatype_size)?;
        let dataspace = Dataspace::parse(r.bytes(dataspace_size)?, length_size)?;
        r.skip(padded(dataspace_size) - dataspace_size)?;

        let data_len = dataspace
            .num_elements()
            .checked_mul(datatype.size() as u64)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| FormatError::Malformed(format!("attribute {name} too large")))?;
        let raw_data = r.bytes(data_len)?.to_vec();
        Ok(AttributeMessage {
            name,
            charset,
            datatype,
            dataspace,
            raw_data,
        })
    }
}

const INFO_FLAG_CREATION_ORDER_TRACKED: u8 = 0x01;
const INFO_FLAG_CREATION_ORDER_INDEXED: u8 = 0x02;

/// Where an object keeps attributes that moved to dense storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfoMessage {
    pub max_creation_index: Option<u16>,
    pub fractal_heap_address: Option<u64>,
    /// Version 2 B-tree (record type 8) indexing attributes by name.
    pub btree_name_index_address: Option<u64>,
    pub btree_creation_order_address: Option<u64>,
}

impl AttributeInfoMessage {
    pub fn parse(data: &[u8], offset_size: u8) -> Result<AttributeInfoMessage, FormatError> {
        let mut r = ByteReader::new(data);
        let version = r.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "attribute info",
                version,
            });
        }
        let flags = r.u8()?;
        let max_creation_index = if flags & INFO_FLAG_CREATION_ORDER_TRACKED != 0 {
            Some(r.u16()?)
        } else {
            None
        };
        let fractal_heap_address = r.optional_offset(offset_size)?;
        let btree_name_index_address = r.optional_offset(offset_size)?;
        let btree_creation_order_address = if flags & INFO_FLAG_CREATION_ORDER_INDEXED != 0 {
            r.optional_offset(offset_size)?
        } else {
            None
        };
        Ok(AttributeInfoMessage {
            max_creation_index,
            fractal_heap_address,
            btree_name_index_address,
            btree_creation_order_address,
        })
    }

    pub fn is_dense(&self) -> bool {
        self.fractal_heap_address.is_some() && self.btree_name_index_address.is_some()
    }
}
