//! Element types, typed buffers and conversions
//!
//! Numeric elements are stored little-endian at their natural width.
//! Strings are stored as a `u32` length prefix followed by the encoded units
//! (UTF-8 bytes or UTF-16 code units).

use crate::error::{GdsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Storage element type, also used as a conversion target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElemType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Utf8,
    Utf16,
}

impl ElemType {
    /// Fixed element width in bytes; `None` for variable-length strings
    pub fn size(&self) -> Option<usize> {
        match self {
            ElemType::Int8 | ElemType::UInt8 => Some(1),
            ElemType::Int16 | ElemType::UInt16 => Some(2),
            ElemType::Int32 | ElemType::UInt32 | ElemType::Float32 => Some(4),
            ElemType::Int64 | ElemType::UInt64 | ElemType::Float64 => Some(8),
            ElemType::Utf8 | ElemType::Utf16 => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ElemType::Int8
                | ElemType::UInt8
                | ElemType::Int16
                | ElemType::UInt16
                | ElemType::Int32
                | ElemType::UInt32
                | ElemType::Int64
                | ElemType::UInt64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ElemType::Float32 | ElemType::Float64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_string(&self) -> bool {
        matches!(self, ElemType::Utf8 | ElemType::Utf16)
    }

    /// Human-readable encoding descriptor ("Int8", "Float64", "UTF8")
    pub fn trait_name(&self) -> &'static str {
        match self {
            ElemType::Int8 => "Int8",
            ElemType::UInt8 => "UInt8",
            ElemType::Int16 => "Int16",
            ElemType::UInt16 => "UInt16",
            ElemType::Int32 => "Int32",
            ElemType::UInt32 => "UInt32",
            ElemType::Int64 => "Int64",
            ElemType::UInt64 => "UInt64",
            ElemType::Float32 => "Float32",
            ElemType::Float64 => "Float64",
            ElemType::Utf8 => "UTF8",
            ElemType::Utf16 => "UTF16",
        }
    }

    /// Internal storage class name ("dInt32", "dVStr8")
    pub fn storage_name(&self) -> &'static str {
        match self {
            ElemType::Int8 => "dInt8",
            ElemType::UInt8 => "dUInt8",
            ElemType::Int16 => "dInt16",
            ElemType::UInt16 => "dUInt16",
            ElemType::Int32 => "dInt32",
            ElemType::UInt32 => "dUInt32",
            ElemType::Int64 => "dInt64",
            ElemType::UInt64 => "dUInt64",
            ElemType::Float32 => "dFloat32",
            ElemType::Float64 => "dFloat64",
            ElemType::Utf8 => "dVStr8",
            ElemType::Utf16 => "dVStr16",
        }
    }

    /// Lower-case conversion name ("int8", "float64", "utf8")
    pub fn as_str(&self) -> &'static str {
        match self {
            ElemType::Int8 => "int8",
            ElemType::UInt8 => "uint8",
            ElemType::Int16 => "int16",
            ElemType::UInt16 => "uint16",
            ElemType::Int32 => "int32",
            ElemType::UInt32 => "uint32",
            ElemType::Int64 => "int64",
            ElemType::UInt64 => "uint64",
            ElemType::Float32 => "float32",
            ElemType::Float64 => "float64",
            ElemType::Utf8 => "utf8",
            ElemType::Utf16 => "utf16",
        }
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElemType {
    type Err = GdsError;

    fn from_str(s: &str) -> Result<Self> {
        let elem = match s {
            "int8" => ElemType::Int8,
            "uint8" => ElemType::UInt8,
            "int16" => ElemType::Int16,
            "uint16" => ElemType::UInt16,
            "int32" => ElemType::Int32,
            "uint32" => ElemType::UInt32,
            "int64" => ElemType::Int64,
            "uint64" => ElemType::UInt64,
            "float32" => ElemType::Float32,
            "float64" => ElemType::Float64,
            "utf8" => ElemType::Utf8,
            "utf16" => ElemType::Utf16,
            other => {
                return Err(GdsError::UnsupportedConversion {
                    path: String::new(),
                    from: String::from("?"),
                    to: other.to_string(),
                })
            }
        };
        Ok(elem)
    }
}

/// Semantic class of an array node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrayClass {
    Integer,
    /// Int32 codes indexing the `R.levels` attribute (1-based)
    Factor,
    /// Integers decoded as booleans (non-zero = true)
    Logical,
    Real,
    String,
}

impl ArrayClass {
    /// Whether `elem` can back an array of this class
    pub fn accepts(&self, elem: ElemType) -> bool {
        match self {
            ArrayClass::Integer | ArrayClass::Logical => elem.is_integer(),
            ArrayClass::Factor => elem == ElemType::Int32,
            ArrayClass::Real => elem.is_float(),
            ArrayClass::String => elem.is_string(),
        }
    }
}

/// Decoded values of one read
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Utf8(Vec<String>),
    Utf16(Vec<Vec<u16>>),
    /// Logical arrays read without a conversion target
    Bool(Vec<bool>),
    /// Factor arrays read without a conversion target
    Factor(Vec<Option<String>>),
}

macro_rules! numeric_dispatch {
    ($data:expr, $v:ident => $body:expr, $other:pat => $fallback:expr) => {
        match $data {
            ArrayData::Int8($v) => $body,
            ArrayData::UInt8($v) => $body,
            ArrayData::Int16($v) => $body,
            ArrayData::UInt16($v) => $body,
            ArrayData::Int32($v) => $body,
            ArrayData::UInt32($v) => $body,
            ArrayData::Int64($v) => $body,
            ArrayData::UInt64($v) => $body,
            ArrayData::Float32($v) => $body,
            ArrayData::Float64($v) => $body,
            $other => $fallback,
        }
    };
}

macro_rules! cast_to {
    ($values:expr, $target:expr) => {{
        let values = $values;
        match $target {
            ElemType::Int8 => Some(ArrayData::Int8(values.iter().map(|&x| x as i8).collect())),
            ElemType::UInt8 => Some(ArrayData::UInt8(values.iter().map(|&x| x as u8).collect())),
            ElemType::Int16 => Some(ArrayData::Int16(values.iter().map(|&x| x as i16).collect())),
            ElemType::UInt16 => Some(ArrayData::UInt16(values.iter().map(|&x| x as u16).collect())),
            ElemType::Int32 => Some(ArrayData::Int32(values.iter().map(|&x| x as i32).collect())),
            ElemType::UInt32 => Some(ArrayData::UInt32(values.iter().map(|&x| x as u32).collect())),
            ElemType::Int64 => Some(ArrayData::Int64(values.iter().map(|&x| x as i64).collect())),
            ElemType::UInt64 => Some(ArrayData::UInt64(values.iter().map(|&x| x as u64).collect())),
            ElemType::Float32 => Some(ArrayData::Float32(values.iter().map(|&x| x as f32).collect())),
            ElemType::Float64 => Some(ArrayData::Float64(values.iter().map(|&x| x as f64).collect())),
            ElemType::Utf8 | ElemType::Utf16 => None,
        }
    }};
}

macro_rules! decode_le {
    ($bytes:expr, $t:ty, $variant:ident) => {{
        const N: usize = std::mem::size_of::<$t>();
        ArrayData::$variant(
            $bytes
                .chunks_exact(N)
                .map(|c| {
                    let mut buf = [0u8; N];
                    buf.copy_from_slice(c);
                    <$t>::from_le_bytes(buf)
                })
                .collect(),
        )
    }};
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Utf8(v) => v.len(),
            ArrayData::Utf16(v) => v.len(),
            ArrayData::Bool(v) => v.len(),
            ArrayData::Factor(v) => v.len(),
            other => numeric_dispatch!(other, v => v.len(), _ => 0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the value type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            ArrayData::Bool(_) => "logical",
            ArrayData::Factor(_) => "factor",
            other => other.elem_type().map(|e| e.as_str()).unwrap_or("unknown"),
        }
    }

    /// Element type of the buffer; `None` for logical and factor buffers
    pub fn elem_type(&self) -> Option<ElemType> {
        match self {
            ArrayData::Int8(_) => Some(ElemType::Int8),
            ArrayData::UInt8(_) => Some(ElemType::UInt8),
            ArrayData::Int16(_) => Some(ElemType::Int16),
            ArrayData::UInt16(_) => Some(ElemType::UInt16),
            ArrayData::Int32(_) => Some(ElemType::Int32),
            ArrayData::UInt32(_) => Some(ElemType::UInt32),
            ArrayData::Int64(_) => Some(ElemType::Int64),
            ArrayData::UInt64(_) => Some(ElemType::UInt64),
            ArrayData::Float32(_) => Some(ElemType::Float32),
            ArrayData::Float64(_) => Some(ElemType::Float64),
            ArrayData::Utf8(_) => Some(ElemType::Utf8),
            ArrayData::Utf16(_) => Some(ElemType::Utf16),
            ArrayData::Bool(_) | ArrayData::Factor(_) => None,
        }
    }

    /// Empty buffer of the given element type
    pub fn empty(elem: ElemType) -> Self {
        match elem {
            ElemType::Int8 => ArrayData::Int8(Vec::new()),
            ElemType::UInt8 => ArrayData::UInt8(Vec::new()),
            ElemType::Int16 => ArrayData::Int16(Vec::new()),
            ElemType::UInt16 => ArrayData::UInt16(Vec::new()),
            ElemType::Int32 => ArrayData::Int32(Vec::new()),
            ElemType::UInt32 => ArrayData::UInt32(Vec::new()),
            ElemType::Int64 => ArrayData::Int64(Vec::new()),
            ElemType::UInt64 => ArrayData::UInt64(Vec::new()),
            ElemType::Float32 => ArrayData::Float32(Vec::new()),
            ElemType::Float64 => ArrayData::Float64(Vec::new()),
            ElemType::Utf8 => ArrayData::Utf8(Vec::new()),
            ElemType::Utf16 => ArrayData::Utf16(Vec::new()),
        }
    }

    /// Convert to `target`
    ///
    /// Numeric types cast to any numeric type with `as` semantics (wrapping
    /// or truncating when narrowing). Strings convert between UTF-8 and
    /// UTF-16. Logical buffers cast to numeric types as 0/1. Everything else
    /// is an [`GdsError::UnsupportedConversion`].
    pub fn cast(self, target: ElemType, path: &str) -> Result<ArrayData> {
        if self.elem_type() == Some(target) {
            return Ok(self);
        }

        let unsupported = |from: &str| GdsError::UnsupportedConversion {
            path: path.to_string(),
            from: from.to_string(),
            to: target.as_str().to_string(),
        };
        let from = self.type_name();

        let converted = match self {
            ArrayData::Utf8(values) => match target {
                ElemType::Utf16 => Some(ArrayData::Utf16(
                    values.iter().map(|s| s.encode_utf16().collect()).collect(),
                )),
                _ => None,
            },
            ArrayData::Utf16(values) => match target {
                ElemType::Utf8 => {
                    let strings = values
                        .iter()
                        .map(|units| {
                            String::from_utf16(units).map_err(|e| {
                                GdsError::CorruptData(format!("{}: invalid UTF-16: {}", path, e))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    Some(ArrayData::Utf8(strings))
                }
                _ => None,
            },
            ArrayData::Bool(values) => {
                let ints: Vec<i32> = values.iter().map(|&b| b as i32).collect();
                cast_to!(ints, target)
            }
            ArrayData::Factor(_) => None,
            other => numeric_dispatch!(other, v => cast_to!(v, target), _ => None),
        };

        converted.ok_or_else(|| unsupported(from))
    }

    /// Decode stored bytes of `elem`
    pub fn decode(elem: ElemType, bytes: &[u8]) -> Result<ArrayData> {
        if let Some(size) = elem.size() {
            if bytes.len() % size != 0 {
                return Err(GdsError::CorruptData(format!(
                    "{} payload of {} bytes is not a multiple of {}",
                    elem,
                    bytes.len(),
                    size
                )));
            }
        }

        let data = match elem {
            ElemType::Int8 => ArrayData::Int8(bytes.iter().map(|&b| b as i8).collect()),
            ElemType::UInt8 => ArrayData::UInt8(bytes.to_vec()),
            ElemType::Int16 => decode_le!(bytes, i16, Int16),
            ElemType::UInt16 => decode_le!(bytes, u16, UInt16),
            ElemType::Int32 => decode_le!(bytes, i32, Int32),
            ElemType::UInt32 => decode_le!(bytes, u32, UInt32),
            ElemType::Int64 => decode_le!(bytes, i64, Int64),
            ElemType::UInt64 => decode_le!(bytes, u64, UInt64),
            ElemType::Float32 => decode_le!(bytes, f32, Float32),
            ElemType::Float64 => decode_le!(bytes, f64, Float64),
            ElemType::Utf8 => ArrayData::Utf8(decode_strings(bytes, 1, |units| {
                String::from_utf8(units.to_vec())
                    .map_err(|e| GdsError::CorruptData(format!("invalid UTF-8 element: {}", e)))
            })?),
            ElemType::Utf16 => ArrayData::Utf16(decode_strings(bytes, 2, |units| {
                Ok(units
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect())
            })?),
        };
        Ok(data)
    }

    /// Encode for storage
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ArrayData::Int8(v) => v.iter().map(|&x| x as u8).collect(),
            ArrayData::UInt8(v) => v.clone(),
            ArrayData::Int16(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ArrayData::UInt16(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ArrayData::Int32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ArrayData::UInt32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ArrayData::Int64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ArrayData::UInt64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ArrayData::Float32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ArrayData::Float64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ArrayData::Utf8(v) => {
                let mut out = Vec::new();
                for s in v {
                    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
                out
            }
            ArrayData::Utf16(v) => {
                let mut out = Vec::new();
                for units in v {
                    out.extend_from_slice(&(units.len() as u32).to_le_bytes());
                    for u in units {
                        out.extend_from_slice(&u.to_le_bytes());
                    }
                }
                out
            }
            ArrayData::Bool(v) => v.iter().flat_map(|&b| (b as i32).to_le_bytes()).collect(),
            ArrayData::Factor(_) => Vec::new(),
        }
    }

    /// Pick elements by linear index
    pub fn gather(&self, indices: &[usize]) -> ArrayData {
        fn pick<T: Clone>(v: &[T], indices: &[usize]) -> Vec<T> {
            indices.iter().map(|&i| v[i].clone()).collect()
        }
        match self {
            ArrayData::Int8(v) => ArrayData::Int8(pick(v, indices)),
            ArrayData::UInt8(v) => ArrayData::UInt8(pick(v, indices)),
            ArrayData::Int16(v) => ArrayData::Int16(pick(v, indices)),
            ArrayData::UInt16(v) => ArrayData::UInt16(pick(v, indices)),
            ArrayData::Int32(v) => ArrayData::Int32(pick(v, indices)),
            ArrayData::UInt32(v) => ArrayData::UInt32(pick(v, indices)),
            ArrayData::Int64(v) => ArrayData::Int64(pick(v, indices)),
            ArrayData::UInt64(v) => ArrayData::UInt64(pick(v, indices)),
            ArrayData::Float32(v) => ArrayData::Float32(pick(v, indices)),
            ArrayData::Float64(v) => ArrayData::Float64(pick(v, indices)),
            ArrayData::Utf8(v) => ArrayData::Utf8(pick(v, indices)),
            ArrayData::Utf16(v) => ArrayData::Utf16(pick(v, indices)),
            ArrayData::Bool(v) => ArrayData::Bool(pick(v, indices)),
            ArrayData::Factor(v) => ArrayData::Factor(pick(v, indices)),
        }
    }

    /// Pad string buffers with empty elements up to `len`
    pub(crate) fn pad_strings(&mut self, len: usize) {
        match self {
            ArrayData::Utf8(v) => v.resize(len, String::new()),
            ArrayData::Utf16(v) => v.resize(len, Vec::new()),
            _ => {}
        }
    }

    /// Append the elements of another string buffer of the same type
    pub(crate) fn extend_strings(&mut self, other: ArrayData) {
        match (self, other) {
            (ArrayData::Utf8(v), ArrayData::Utf8(more)) => v.extend(more),
            (ArrayData::Utf16(v), ArrayData::Utf16(more)) => v.extend(more),
            _ => {}
        }
    }

    /// Logical view of an integer buffer
    pub(crate) fn into_logical(self, path: &str) -> Result<ArrayData> {
        match self.cast(ElemType::Int32, path)? {
            ArrayData::Int32(v) => Ok(ArrayData::Bool(v.into_iter().map(|x| x != 0).collect())),
            other => Ok(other),
        }
    }

    /// Factor view of an integer buffer
    pub(crate) fn into_factor(self, levels: &[String], path: &str) -> Result<ArrayData> {
        match self.cast(ElemType::Int32, path)? {
            ArrayData::Int32(codes) => Ok(ArrayData::Factor(
                codes
                    .into_iter()
                    .map(|code| {
                        if code > 0 && (code as usize) <= levels.len() {
                            Some(levels[code as usize - 1].clone())
                        } else {
                            None
                        }
                    })
                    .collect(),
            )),
            other => Ok(other),
        }
    }
}

fn decode_strings<T>(
    bytes: &[u8],
    unit: usize,
    convert: impl Fn(&[u8]) -> Result<T>,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        let header = bytes
            .get(pos..pos + 4)
            .ok_or_else(|| GdsError::CorruptData(format!("truncated string length at byte {}", pos)))?;
        let count = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        pos += 4;
        let body = bytes.get(pos..pos + count * unit).ok_or_else(|| {
            GdsError::CorruptData(format!("truncated string body at byte {}", pos))
        })?;
        out.push(convert(body)?);
        pos += count * unit;
    }
    Ok(out)
}

/// Count entry that reads from its start to the end of the dimension
pub const COUNT_TO_END: u64 = u64::MAX;

/// Shaped result of a read
#[derive(Debug, Clone, PartialEq)]
pub struct TypedArray {
    /// Extent of each result dimension
    pub dim: Vec<usize>,
    pub data: ArrayData,
}

impl TypedArray {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
