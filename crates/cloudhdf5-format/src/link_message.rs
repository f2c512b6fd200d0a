//! Link message (type 0x0006), also the record format of dense link storage.

use crate::datatype::CharacterSet;
use crate::error::FormatError;
use crate::read::ByteReader;

const FLAG_NAME_WIDTH: u8 = 0x03;
const FLAG_HAS_CREATION_ORDER: u8 = 0x04;
const FLAG_HAS_LINK_TYPE: u8 = 0x08;
const FLAG_HAS_CHARSET: u8 = 0x10;

const LINK_TYPE_HARD: u8 = 0;
const LINK_TYPE_SOFT: u8 = 1;
const LINK_TYPE_EXTERNAL: u8 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Hard { object_header_address: u64 },
    Soft { target_path: String },
    External { filename: String, object_path: String },
    /// User-defined link types; only their type id is kept.
    UserDefined { link_type: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMessage {
    pub name: String,
    pub target: LinkTarget,
    pub creation_order: Option<u64>,
    pub charset: CharacterSet,
}

impl LinkMessage {
    pub fn parse(data: &[u8], offset_size: u8) -> Result<LinkMessage, FormatError> {
        let mut r = ByteReader::new(data);
        let version = r.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                structure: "link message",
                version,
            });
        }
        let flags = r.u8()?;
        let link_type = if flags & FLAG_HAS_LINK_TYPE != 0 {
            r.u8()?
        } else {
            LINK_TYPE_HARD
        };
        let creation_order = if flags & FLAG_HAS_CREATION_ORDER != 0 {
            Some(r.u64()?)
        } else {
            None
        };
        let charset = if flags & FLAG_HAS_CHARSET != 0 {
            match r.u8()? {
                1 => CharacterSet::Utf8,
                _ => CharacterSet::Ascii,
            }
        } else {
            CharacterSet::Ascii
        };
        let name_len = r.uint(1 << (flags & FLAG_NAME_WIDTH))? as usize;
        let name = String::from_utf8_lossy(r.bytes(name_len)?).into_owned();

        let target = match link_type {
            LINK_TYPE_HARD => LinkTarget::Hard {
                object_header_address: r.offset(offset_size)?,
            },
            LINK_TYPE_SOFT => {
                let len = r.u16()? as usize;
                LinkTarget::Soft {
                    target_path: String::from_utf8_lossy(r.bytes(len)?).into_owned(),
                }
            }
            LINK_TYPE_EXTERNAL => {
                let len = r.u16()? as usize;
                let info = r.bytes(len)?;
                // First byte is the external-link version/flags byte.
                let body = info.get(1..).unwrap_or(&[]);
                let mut parts = body.split(|&b| b == 0);
                let filename = parts
                    .next()
                    .map(|s| String::from_utf8_lossy(s).into_owned())
                    .unwrap_or_default();
                let object_path = parts
                    .next()
                    .map(|s| String::from_utf8_lossy(s).into_owned())
                    .unwrap_or_default();
                LinkTarget::External {
                    filename,
                    object_path,
                }
            }
            other => LinkTarget::UserDefined { link_type: other },
        };

        Ok(LinkMessage {
            name,
            target,
            creation_order,
            charset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_link() {
        let mut data = vec![1u8, 0x00, 4];
        data.extend_from_slice(b"temp");
        data.extend_from_slice(&0x1234u64.to_le_bytes());
        let link = LinkMessage::parse(&data, 8).unwrap();
        assert_eq!(link.name, "temp");
        assert_eq!(
            link.target,
            LinkTarget::Hard {
                object_header_address: 0x1234
            }
        );
        assert_eq!(link.creation_order, None);
    }

    #[test]
    fn soft_link_with_creation_order() {
        let mut data = vec![1u8, FLAG_HAS_LINK_TYPE | FLAG_HAS_CREATION_ORDER, LINK_TYPE_SOFT];
        data.extend_from_slice(&3u64.to_le_bytes());
        data.push(5);
        data.extend_from_slice(b"alias");
        data.extend_from_slice(&6u16.to_le_bytes());
        data.extend_from_slice(b"/a/tmp");
        let link = LinkMessage::parse(&data, 8).unwrap();
        assert_eq!(link.name, "alias");
        assert_eq!(link.creation_order, Some(3));
        assert_eq!(
            link.target,
            LinkTarget::Soft {
                target_path: "/a/tmp".into()
            }
        );
    }

    #[test]
    fn external_link() {
        let mut data = vec![1u8, FLAG_HAS_LINK_TYPE, LINK_TYPE_EXTERNAL, 3];
        data.extend_from_slice(b"ext");
        let info = b"\0other.h5\0/grp\0";
        data.extend_from_slice(&(info.len() as u16).to_le_bytes());
        data.extend_from_slice(info);
        let link = LinkMessage::parse(&data, 8).unwrap();
        assert_eq!(
            link.target,
            LinkTarget::External {
                filename: "other.h5".into(),
                object_path: "/grp".into()
            }
        );
    }

    #[test]
    fn truncated_name() {
        let data = [1u8, 0x00, 10, b'a'];
        let err = LinkMessage::parse(&data, 8).unwrap_err();
        assert!(err.is_truncation());
    }
}
