//! Simplified type representations for the high-level API.

use std::fmt;

use cloudhdf5_format::data_read::ArrayData;
use cloudhdf5_format::datatype::{Datatype, Endian};
use serde::Serialize;

/// User-facing element type of a variable or attribute.
///
/// Maps the detailed [`Datatype`] onto the classes this reader decodes;
/// everything else is reported as [`DType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DType {
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    /// Fixed-length string of this many bytes.
    String(u32),
    Compound(Vec<(String, DType)>),
    /// Enumeration decoded as its base integer type.
    Enum { base: Box<DType>, members: Vec<(String, i64)> },
    Other(String),
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
            DType::I8 => write!(f, "i8"),
            DType::I16 => write!(f, "i16"),
            DType::I32 => write!(f, "i32"),
            DType::I64 => write!(f, "i64"),
            DType::U8 => write!(f, "u8"),
            DType::U16 => write!(f, "u16"),
            DType::U32 => write!(f, "u32"),
            DType::U64 => write!(f, "u64"),
            DType::String(n) => write!(f, "string[{n}]"),
            DType::Compound(fields) => {
                write!(f, "compound{{")?;
                for (i, (name, dt)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {dt}")?;
                }
                write!(f, "}}")
            }
            DType::Enum { base, members } => {
                let names: Vec<&str> = members.iter().map(|(n, _)| n.as_str()).collect();
                write!(f, "enum<{base}>[{}]", names.join(", "))
            }
            DType::Other(desc) => write!(f, "other({desc})"),
        }
    }
}

impl DType {
    pub fn from_datatype(dt: &Datatype) -> DType {
        match dt {
            Datatype::FloatingPoint { size: 4, byte_order } if *byte_order != Endian::Vax => DType::F32,
            Datatype::FloatingPoint { size: 8, byte_order } if *byte_order != Endian::Vax => DType::F64,
            Datatype::FloatingPoint { size, .. } => DType::Other(format!("float{}", size * 8)),
            Datatype::FixedPoint { size, signed, .. } => integer(*size, *signed),
            Datatype::BitField { size, .. } => integer(*size, false),
            Datatype::String { size, .. } => DType::String(*size),
            Datatype::Compound { members, .. } => DType::Compound(
                members
                    .iter()
                    .map(|m| (m.name.clone(), DType::from_datatype(&m.datatype)))
                    .collect(),
            ),
            Datatype::Enumeration { base, members, .. } => DType::Enum {
                base: Box::new(DType::from_datatype(base)),
                members: members.iter().map(|m| (m.name.clone(), m.value)).collect(),
            },
            other => DType::Other(cloudhdf5_format::data_read::class_name(other).to_string()),
        }
    }

    /// Whether values of this type can be read.
    pub fn is_readable(&self) -> bool {
        match self {
            DType::Other(_) => false,
            DType::Compound(fields) => fields.iter().all(|(_, d)| d.is_readable()),
            DType::Enum { base, .. } => base.is_readable(),
            _ => true,
        }
    }
}

fn integer(size: u32, signed: bool) -> DType {
    match (size, signed) {
        (1, true) => DType::I8,
        (2, true) => DType::I16,
        (4, true) => DType::I32,
        (8, true) => DType::I64,
        (1, false) => DType::U8,
        (2, false) => DType::U16,
        (4, false) => DType::U32,
        (8, false) => DType::U64,
        (n, s) => DType::Other(format!("{}{}", if s { "i" } else { "u" }, n * 8)),
    }
}

/// A decoded, row-major array together with its shape.
///
/// Scalars have an empty shape and one element. Null values have an empty
/// shape and none.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    shape: Vec<u64>,
    data: ArrayData,
}

impl Array {
    pub fn new(shape: Vec<u64>, data: ArrayData) -> Array {
        Array { shape, data }
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// An empty shape with one element.
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty() && !self.data.is_empty()
    }

    /// Numeric values widened to `f64`.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        self.data.to_f64()
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            ArrayData::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.data {
            ArrayData::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.data {
            ArrayData::I32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            ArrayData::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_strings(&self) -> Option<&[String]> {
        match &self.data {
            ArrayData::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Column of a compound array.
    pub fn field(&self, name: &str) -> Option<Array> {
        match &self.data {
            ArrayData::Compound(fields) => fields
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, d)| Array::new(self.shape.clone(), d.clone())),
            _ => None,
        }
    }
}
