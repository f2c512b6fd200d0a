//! Datatype message (type 0x0003).
//!
//! Every class is parsed far enough to report its size and structure, so
//! that a variable's dtype is always known. Only the classes handled in
//! [`crate::data_read`] can have their values decoded.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::FormatError;
use crate::read::{c_string, ByteReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
    Vax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterSet {
    Ascii,
    Utf8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompoundMember {
    pub name: String,
    /// Byte offset of the member inside one compound element.
    pub byte_offset: u64,
    pub datatype: Datatype,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    pub name: String,
    /// Member value widened from the base integer type.
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Datatype {
    FixedPoint {
        size: u32,
        byte_order: Endian,
        signed: bool,
    },
    FloatingPoint {
        size: u32,
        byte_order: Endian,
    },
    Time {
        size: u32,
    },
    String {
        size: u32,
        padding: StringPadding,
        charset: CharacterSet,
    },
    BitField {
        size: u32,
        byte_order: Endian,
    },
    Opaque {
        size: u32,
        tag: String,
    },
    Compound {
        size: u32,
        members: Vec<CompoundMember>,
    },
    Reference {
        size: u32,
    },
    Enumeration {
        size: u32,
        base: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    VariableLength {
        size: u32,
        is_string: bool,
        base: Box<Datatype>,
    },
    Array {
        base: Box<Datatype>,
        dimensions: Vec<u32>,
    },
}

fn pad8(x: usize) -> usize {
    (x + 7) & !7
}

/// Width of a compound v3 member offset, chosen from the compound size.
fn member_offset_width(compound_size: u32) -> usize {
    match compound_size {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

/// Read a NUL-terminated name, optionally padded to a multiple of eight.
fn read_name(r: &mut ByteReader<'_>, data: &[u8], padded: bool) -> Result<String, FormatError> {
    let start = r.position();
    let nul = data[start.min(data.len())..]
        .iter()
        .position(|&b| b == 0)
        .ok_or(FormatError::UnexpectedEof {
            expected: data.len() + 1,
            available: data.len(),
        })?;
    let name = c_string(&data[start..start + nul + 1]);
    let consumed = if padded { pad8(nul + 1) } else { nul + 1 };
    r.skip(consumed)?;
    Ok(name)
}

fn byte_order(bf0: u8) -> Endian {
    if bf0 & 0x01 == 0 {
        Endian::Little
    } else {
        Endian::Big
    }
}

impl Datatype {
    /// Parse a datatype description. Returns the datatype and the number of bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Datatype, usize), FormatError> {
        let mut r = ByteReader::new(data);
        let class_and_version = r.u8()?;
        let class = class_and_version & 0x0F;
        let version = class_and_version >> 4;
        let bf0 = r.u8()?;
        let bf1 = r.u8()?;
        let _bf2 = r.u8()?;
        let size = r.u32()?;

        let dt = match class {
            0 => {
                // bit offset(2) + precision(2)
                r.skip(4)?;
                Datatype::FixedPoint {
                    size,
                    byte_order: byte_order(bf0),
                    signed: bf0 & 0x08 != 0,
                }
            }
            1 => {
                // bit offset, precision, exponent/mantissa layout, bias
                r.skip(12)?;
                let order = match (bf0 & 0x40 != 0, bf0 & 0x01 != 0) {
                    (false, false) => Endian::Little,
                    (false, true) => Endian::Big,
                    (true, _) => Endian::Vax,
                };
                Datatype::FloatingPoint {
                    size,
                    byte_order: order,
                }
            }
            2 => {
                r.skip(2)?;
                Datatype::Time { size }
            }
            3 => Datatype::String {
                size,
                padding: string_padding(bf0 & 0x0F)?,
                charset: charset(bf0 >> 4)?,
            },
            4 => {
                r.skip(4)?;
                Datatype::BitField {
                    size,
                    byte_order: byte_order(bf0),
                }
            }
            5 => {
                let tag_len = bf0 as usize;
                let tag = c_string(r.bytes(tag_len)?);
                r.skip(pad8(tag_len) - tag_len)?;
                Datatype::Opaque { size, tag }
            }
            6 => {
                let count = u16::from_le_bytes([bf0, bf1]) as usize;
                let mut members = Vec::with_capacity(count);
                for _ in 0..count {
                    let name = read_name(&mut r, data, version < 3)?;
                    let byte_offset = match version {
                        1 => {
                            let off = r.u32()? as u64;
                            // dimensionality(1) reserved(3) permutation(4) reserved(4) dims(16)
                            r.skip(28)?;
                            off
                        }
                        2 => r.u32()? as u64,
                        3 => r.uint(member_offset_width(size))?,
                        v => {
                            return Err(FormatError::UnsupportedVersion {
                                structure: "compound datatype",
                                version: v,
                            })
                        }
                    };
                    let (datatype, used) = Datatype::parse(&data[r.position()..])?;
                    r.skip(used)?;
                    if byte_offset + datatype.size() as u64 > size as u64 {
                        return Err(FormatError::Malformed(format!(
                            "compound member {name} overruns element of {size} bytes"
                        )));
                    }
                    members.push(CompoundMember {
                        name,
                        byte_offset,
                        datatype,
                    });
                }
                Datatype::Compound { size, members }
            }
            7 => Datatype::Reference { size },
            8 => {
                let count = u16::from_le_bytes([bf0, bf1]) as usize;
                let (base, used) = Datatype::parse(&data[r.position()..])?;
                r.skip(used)?;
                let mut names = Vec::with_capacity(count);
                for _ in 0..count {
                    names.push(read_name(&mut r, data, version < 3)?);
                }
                let width = base.size() as usize;
                let signed = matches!(base, Datatype::FixedPoint { signed: true, .. });
                let big = matches!(base, Datatype::FixedPoint { byte_order: Endian::Big, .. });
                let mut members = Vec::with_capacity(count);
                for name in names {
                    let raw = r.bytes(width)?;
                    members.push(EnumMember {
                        name,
                        value: widen_integer(raw, signed, big)?,
                    });
                }
                Datatype::Enumeration {
                    size,
                    base: Box::new(base),
                    members,
                }
            }
            9 => {
                let (base, used) = Datatype::parse(&data[r.position()..])?;
                r.skip(used)?;
                Datatype::VariableLength {
                    size,
                    is_string: bf0 & 0x0F == 1,
                    base: Box::new(base),
                }
            }
            10 => {
                let rank = r.u8()? as usize;
                if version < 3 {
                    r.skip(3)?;
                }
                let mut dimensions = Vec::with_capacity(rank);
                for _ in 0..rank {
                    dimensions.push(r.u32()?);
                }
                if version < 3 {
                    // permutation indices
                    r.skip(4 * rank)?;
                }
                let (base, used) = Datatype::parse(&data[r.position()..])?;
                r.skip(used)?;
                if dimensions.iter().try_fold(base.size(), |n, &d| n.checked_mul(d)).is_none() {
                    return Err(FormatError::Malformed(format!("array datatype {dimensions:?} too large")));
                }
                Datatype::Array {
                    base: Box::new(base),
                    dimensions,
                }
            }
            c => return Err(FormatError::UnsupportedDatatypeClass(c)),
        };
        Ok((dt, r.position()))
    }

    /// Size in bytes of one element.
    pub fn size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::Time { size }
            | Datatype::String { size, .. }
            | Datatype::BitField { size, .. }
            | Datatype::Opaque { size, .. }
            | Datatype::Compound { size, .. }
            | Datatype::Reference { size }
            | Datatype::Enumeration { size, .. }
            | Datatype::VariableLength { size, .. } => *size,
            Datatype::Array { base, dimensions } => {
                dimensions.iter().fold(base.size(), |n, &d| n.saturating_mul(d))
            }
        }
    }
}

fn string_padding(v: u8) -> Result<StringPadding, FormatError> {
    match v {
        0 => Ok(StringPadding::NullTerminate),
        1 => Ok(StringPadding::NullPad),
        2 => Ok(StringPadding::SpacePad),
        _ => Err(FormatError::Malformed(format!("string padding {v}"))),
    }
}

fn charset(v: u8) -> Result<CharacterSet, FormatError> {
    match v & 0x0F {
        0 => Ok(CharacterSet::Ascii),
        1 => Ok(CharacterSet::Utf8),
        other => Err(FormatError::Malformed(format!("character set {other}"))),
    }
}

/// Sign- or zero-extend an integer of 1..=8 bytes to `i64`.
pub(crate) fn widen_integer(raw: &[u8], signed: bool, big_endian: bool) -> Result<i64, FormatError> {
    let n = raw.len();
    if n == 0 || n > 8 {
        return Err(FormatError::Malformed(format!("integer width {n}")));
    }
    Ok(if signed {
        if big_endian {
            BigEndian::read_int(raw, n)
        } else {
            LittleEndian::read_int(raw, n)
        }
    } else if big_endian {
        BigEndian::read_uint(raw, n) as i64
    } else {
        LittleEndian::read_uint(raw, n) as i64
    })
}
