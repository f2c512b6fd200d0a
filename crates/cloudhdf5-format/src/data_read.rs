//! Reinterpreting decoded element bytes as typed values.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::datatype::{Datatype, Endian, StringPadding};
use crate::error::FormatError;

/// A flat, row-major buffer of typed elements.
///
/// Compound values are columnar: one buffer per member, in member order.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Str(Vec<String>),
    Compound(Vec<(String, ArrayData)>),
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::I8(v) => v.len(),
            ArrayData::I16(v) => v.len(),
            ArrayData::I32(v) => v.len(),
            ArrayData::I64(v) => v.len(),
            ArrayData::U8(v) => v.len(),
            ArrayData::U16(v) => v.len(),
            ArrayData::U32(v) => v.len(),
            ArrayData::U64(v) => v.len(),
            ArrayData::F32(v) => v.len(),
            ArrayData::F64(v) => v.len(),
            ArrayData::Str(v) => v.len(),
            ArrayData::Compound(fields) => fields.first().map_or(0, |(_, d)| d.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lossy view as `f64`, for numeric buffers.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        Some(match self {
            ArrayData::I8(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::I16(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::I32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::I64(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::U8(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::U16(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::U32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::U64(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::F32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::F64(v) => v.clone(),
            ArrayData::Str(_) | ArrayData::Compound(_) => return None,
        })
    }
}

fn elements(raw: &[u8], size: usize) -> Result<std::slice::ChunksExact<'_, u8>, FormatError> {
    if size == 0 || raw.len() % size != 0 {
        return Err(FormatError::SizeMismatch {
            expected: raw.len().next_multiple_of(size.max(1)) as u64,
            actual: raw.len() as u64,
        });
    }
    Ok(raw.chunks_exact(size))
}

macro_rules! ints {
    ($raw:expr, $big:expr, $variant:ident, $ty:ty, $read:ident) => {{
        let it = elements($raw, std::mem::size_of::<$ty>())?;
        ArrayData::$variant(if $big {
            it.map(|c| BigEndian::$read(c) as $ty).collect()
        } else {
            it.map(|c| LittleEndian::$read(c) as $ty).collect()
        })
    }};
}

fn integers(raw: &[u8], size: u32, signed: bool, order: Endian) -> Result<ArrayData, FormatError> {
    let big = match order {
        Endian::Little => false,
        Endian::Big => true,
        Endian::Vax => return Err(FormatError::UnsupportedRead("VAX-ordered integers".into())),
    };
    Ok(match (size, signed) {
        (1, true) => ArrayData::I8(raw.iter().map(|&b| b as i8).collect()),
        (1, false) => ArrayData::U8(raw.to_vec()),
        (2, true) => ints!(raw, big, I16, i16, read_i16),
        (2, false) => ints!(raw, big, U16, u16, read_u16),
        (4, true) => ints!(raw, big, I32, i32, read_i32),
        (4, false) => ints!(raw, big, U32, u32, read_u32),
        (8, true) => ints!(raw, big, I64, i64, read_i64),
        (8, false) => ints!(raw, big, U64, u64, read_u64),
        (n, _) => return Err(FormatError::UnsupportedRead(format!("{n}-byte integers"))),
    })
}

fn strings(raw: &[u8], size: u32, padding: StringPadding) -> Result<ArrayData, FormatError> {
    let out = elements(raw, size as usize)?
        .map(|c| {
            let s = match padding {
                StringPadding::SpacePad => {
                    let end = c.iter().rposition(|&b| b != b' ' && b != 0).map_or(0, |p| p + 1);
                    &c[..end]
                }
                _ => &c[..c.iter().position(|&b| b == 0).unwrap_or(c.len())],
            };
            String::from_utf8_lossy(s).into_owned()
        })
        .collect();
    Ok(ArrayData::Str(out))
}

/// Decode `raw` (a whole number of elements) as values of `datatype`.
pub fn decode(raw: &[u8], datatype: &Datatype) -> Result<ArrayData, FormatError> {
    match datatype {
        Datatype::FixedPoint {
            size,
            byte_order,
            signed,
        } => integers(raw, *size, *signed, *byte_order),
        Datatype::BitField { size, byte_order } => integers(raw, *size, false, *byte_order),
        Datatype::Enumeration { base, .. } => decode(raw, base),
        Datatype::FloatingPoint { size, byte_order } => {
            let big = match byte_order {
                Endian::Little => false,
                Endian::Big => true,
                Endian::Vax => return Err(FormatError::UnsupportedRead("VAX-ordered floats".into())),
            };
            Ok(match size {
                4 => ints!(raw, big, F32, f32, read_f32),
                8 => ints!(raw, big, F64, f64, read_f64),
                n => return Err(FormatError::UnsupportedRead(format!("{n}-byte floats"))),
            })
        }
        Datatype::String { size, padding, .. } => strings(raw, *size, *padding),
        Datatype::Compound { size, members } => {
            let size = *size as usize;
            let count = elements(raw, size)?.len();
            let mut columns = Vec::with_capacity(members.len());
            for m in members {
                let width = m.datatype.size() as usize;
                let start = m.byte_offset as usize;
                let mut column = Vec::with_capacity(count * width);
                for element in raw.chunks_exact(size) {
                    let bytes = element.get(start..start + width).ok_or_else(|| {
                        FormatError::Malformed(format!("compound member {} outside element", m.name))
                    })?;
                    column.extend_from_slice(bytes);
                }
                columns.push((m.name.clone(), decode(&column, &m.datatype)?));
            }
            Ok(ArrayData::Compound(columns))
        }
        other => Err(FormatError::UnsupportedRead(format!(
            "values of datatype {}",
            class_name(other)
        ))),
    }
}

pub fn class_name(datatype: &Datatype) -> &'static str {
    match datatype {
        Datatype::FixedPoint { .. } => "integer",
        Datatype::FloatingPoint { .. } => "float",
        Datatype::Time { .. } => "time",
        Datatype::String { .. } => "string",
        Datatype::BitField { .. } => "bitfield",
        Datatype::Opaque { .. } => "opaque",
        Datatype::Compound { .. } => "compound",
        Datatype::Reference { .. } => "reference",
        Datatype::Enumeration { .. } => "enum",
        Datatype::VariableLength { .. } => "variable-length",
        Datatype::Array { .. } => "array",
    }
}
