//! Superblock parsing (versions 0 through 3).

use crate::error::FormatError;
use crate::read::ByteReader;
use crate::signature::HDF5_SIGNATURE;

/// Enough bytes to hold any superblock version with 8-byte offsets.
pub const MAX_SUPERBLOCK_SIZE: usize = 128;

/// The decoded superblock. Addresses are relative to `base_address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub version: u8,
    /// Width in bytes of every Address field in the file.
    pub offset_size: u8,
    /// Width in bytes of every length field in the file.
    pub length_size: u8,
    /// Absolute byte position that all Addresses are relative to.
    pub base_address: u64,
    /// End-of-file address as written by the producer.
    pub eof_address: u64,
    /// Object header address of the root group.
    pub root_group_address: u64,
    /// Superblock extension object header (v2/v3), if any.
    pub extension_address: Option<u64>,
    /// Number of bytes the superblock occupies.
    pub size: usize,
}

impl Superblock {
    /// Parse a superblock from bytes that begin at the file signature.
    ///
    /// The signature offset becomes the base address when the stored base is
    /// zero but the superblock was found further into the object, matching
    /// the behaviour of files with a user block.
    pub fn parse(data: &[u8], signature_offset: u64) -> Result<Superblock, FormatError> {
        let mut r = ByteReader::new(data);
        let sig = r.bytes(8)?;
        if sig != HDF5_SIGNATURE {
            return Err(FormatError::SignatureNotFound);
        }
        let version = r.u8()?;
        let mut sb = match version {
            0 | 1 => Self::parse_v0_v1(&mut r, version)?,
            2 | 3 => Self::parse_v2_v3(&mut r, version)?,
            v => {
                return Err(FormatError::UnsupportedVersion {
                    structure: "superblock",
                    version: v,
                })
            }
        };
        if sb.base_address == 0 {
            sb.base_address = signature_offset;
        }
        Ok(sb)
    }

    fn parse_v0_v1(r: &mut ByteReader<'_>, version: u8) -> Result<Superblock, FormatError> {
        let free_space_version = r.u8()?;
        let root_table_version = r.u8()?;
        r.skip(1)?;
        let shared_header_version = r.u8()?;
        for (structure, v) in [
            ("free-space storage", free_space_version),
            ("root group symbol table entry", root_table_version),
            ("shared header message format", shared_header_version),
        ] {
            if v != 0 {
                return Err(FormatError::UnsupportedVersion { structure, version: v });
            }
        }
        let offset_size = r.u8()?;
        let length_size = r.u8()?;
        validate_sizes(offset_size, length_size)?;
        // reserved(1) + group leaf K(2) + group internal K(2) + flags(4)
        r.skip(1 + 2 + 2 + 4)?;
        if version == 1 {
            // indexed storage internal K(2) + reserved(2)
            r.skip(4)?;
        }

        let base_address = r.offset(offset_size)?;
        let _free_space_address = r.offset(offset_size)?;
        let eof_address = r.offset(offset_size)?;
        let _driver_info_address = r.offset(offset_size)?;

        // Root group symbol table entry: link name offset, then header address,
        // cache type(4), reserved(4), scratch(16).
        let _link_name_offset = r.offset(offset_size)?;
        let root_group_address = r.offset(offset_size)?;
        r.skip(4 + 4 + 16)?;

        Ok(Superblock {
            version,
            offset_size,
            length_size,
            base_address,
            eof_address,
            root_group_address,
            extension_address: None,
            size: r.position(),
        })
    }

    fn parse_v2_v3(r: &mut ByteReader<'_>, version: u8) -> Result<Superblock, FormatError> {
        let offset_size = r.u8()?;
        let length_size = r.u8()?;
        validate_sizes(offset_size, length_size)?;
        let _flags = r.u8()?;

        let base_address = r.offset(offset_size)?;
        let extension_address = r.optional_offset(offset_size)?;
        let eof_address = r.offset(offset_size)?;
        let root_group_address = r.offset(offset_size)?;
        let _checksum = r.u32()?;

        Ok(Superblock {
            version,
            offset_size,
            length_size,
            base_address,
            eof_address,
            root_group_address,
            extension_address,
            size: r.position(),
        })
    }

    /// Whether this superblock version carries a trailing checksum.
    pub fn has_checksum(&self) -> bool {
        self.version >= 2
    }
}

fn validate_sizes(offset_size: u8, length_size: u8) -> Result<(), FormatError> {
    if !matches!(offset_size, 2 | 4 | 8) {
        return Err(FormatError::InvalidOffsetSize(offset_size));
    }
    if !matches!(length_size, 2 | 4 | 8) {
        return Err(FormatError::InvalidLengthSize(length_size));
    }
    Ok(())
}
