//! Typed values read from and written to the target.

use std::fmt;

use encoding_rs::{UTF_8, UTF_16LE};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::memory::ByteBuffer;

/// Size of the in-struct part of an MSVC `std::string` (buffer/pointer, size, capacity).
pub const MSVC_STRING_SIZE: usize = 32;

/// Default small-string buffer size of an MSVC `std::string`.
pub const MSVC_SSO_SIZE: usize = 16;

fn default_sso() -> usize {
    MSVC_SSO_SIZE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
}

impl TextEncoding {
    /// Bytes per code unit.
    pub fn unit(self) -> usize {
        match self {
            TextEncoding::Utf8 => 1,
            TextEncoding::Utf16Le => 2,
        }
    }

    /// Strict decode: malformed input is an error, never replaced.
    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        let codec = match self {
            TextEncoding::Utf8 => UTF_8,
            TextEncoding::Utf16Le => {
                if bytes.len() % 2 != 0 {
                    return Err(Error::EncodingError(format!(
                        "odd byte length {} for UTF-16 text",
                        bytes.len()
                    )));
                }
                UTF_16LE
            }
        };
        codec
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|text| text.into_owned())
            .ok_or_else(|| Error::EncodingError(format!("malformed {} text", codec.name())))
    }

    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        }
    }

    /// Byte length of the text up to the first terminator unit, if any.
    pub fn terminated_len(self, bytes: &[u8]) -> Option<usize> {
        let unit = self.unit();
        bytes
            .chunks_exact(unit)
            .position(|chunk| chunk.iter().all(|&b| b == 0))
            .map(|units| units * unit)
    }
}

/// How a string is laid out in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum StringRule {
    /// Terminated by a zero unit within `max_len` bytes.
    NullTerminated { max_len: usize },
    /// Exactly `len` bytes; trailing zero units are trimmed on read.
    Fixed { len: usize },
    /// MSVC `std::string` / `std::wstring`: inline buffer below the SSO size,
    /// heap pointer at +0 otherwise, character count at +16.
    MsvcString {
        #[serde(default = "default_sso")]
        sso: usize,
    },
}

impl StringRule {
    pub fn msvc() -> Self {
        StringRule::MsvcString { sso: MSVC_SSO_SIZE }
    }
}

/// The type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Pointer,
    Text {
        encoding: TextEncoding,
        rule: StringRule,
    },
}

impl ValueKind {
    pub fn msvc_string() -> Self {
        ValueKind::Text {
            encoding: TextEncoding::Utf8,
            rule: StringRule::msvc(),
        }
    }

    pub fn msvc_wstring() -> Self {
        ValueKind::Text {
            encoding: TextEncoding::Utf16Le,
            rule: StringRule::msvc(),
        }
    }

    /// Byte size of a primitive, `None` for text.
    pub fn size(&self) -> Option<usize> {
        match self {
            ValueKind::Bool | ValueKind::I8 | ValueKind::U8 => Some(1),
            ValueKind::I16 | ValueKind::U16 => Some(2),
            ValueKind::I32 | ValueKind::U32 | ValueKind::F32 => Some(4),
            ValueKind::I64 | ValueKind::U64 | ValueKind::F64 | ValueKind::Pointer => Some(8),
            ValueKind::Text { .. } => None,
        }
    }

    /// Bytes the field occupies inside its containing structure.
    pub fn footprint(&self) -> usize {
        match self {
            ValueKind::Text { rule, .. } => match rule {
                StringRule::NullTerminated { max_len } => *max_len,
                StringRule::Fixed { len } => *len,
                StringRule::MsvcString { .. } => MSVC_STRING_SIZE,
            },
            primitive => primitive.size().unwrap_or(0),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Bool => "bool",
            ValueKind::I8 => "i8",
            ValueKind::U8 => "u8",
            ValueKind::I16 => "i16",
            ValueKind::U16 => "u16",
            ValueKind::I32 => "i32",
            ValueKind::U32 => "u32",
            ValueKind::I64 => "i64",
            ValueKind::U64 => "u64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::Pointer => "pointer",
            ValueKind::Text { .. } => "text",
        }
    }

    /// Decode a primitive from the start of `buf`.
    pub fn decode(&self, buf: &mut ByteBuffer<'_>) -> Result<Value> {
        Ok(match self {
            ValueKind::Bool => Value::Bool(buf.read_bool()?),
            ValueKind::I8 => Value::I8(buf.read_i8()?),
            ValueKind::U8 => Value::U8(buf.read_u8()?),
            ValueKind::I16 => Value::I16(buf.read_i16()?),
            ValueKind::U16 => Value::U16(buf.read_u16()?),
            ValueKind::I32 => Value::I32(buf.read_i32()?),
            ValueKind::U32 => Value::U32(buf.read_u32()?),
            ValueKind::I64 => Value::I64(buf.read_i64()?),
            ValueKind::U64 => Value::U64(buf.read_u64()?),
            ValueKind::F32 => Value::F32(buf.read_f32()?),
            ValueKind::F64 => Value::F64(buf.read_f64()?),
            ValueKind::Pointer => Value::Pointer(buf.read_u64()?),
            ValueKind::Text { .. } => {
                return Err(Error::InvalidLayout(
                    "text fields are decoded by the accessor".to_string(),
                ));
            }
        })
    }

    /// Encode a primitive. Integer values are accepted for any integer kind they fit in.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let mismatch = || Error::InvalidLayout(format!("cannot store {} as {}", value, self.name()));
        let int = || value.as_i128().ok_or_else(mismatch);

        fn fit<T: TryFrom<i128>>(v: i128, err: impl Fn() -> Error) -> Result<T> {
            T::try_from(v).map_err(|_| err())
        }

        Ok(match self {
            ValueKind::Bool => vec![value.as_bool().ok_or_else(mismatch)? as u8],
            ValueKind::I8 => fit::<i8>(int()?, mismatch)?.to_le_bytes().to_vec(),
            ValueKind::U8 => fit::<u8>(int()?, mismatch)?.to_le_bytes().to_vec(),
            ValueKind::I16 => fit::<i16>(int()?, mismatch)?.to_le_bytes().to_vec(),
            ValueKind::U16 => fit::<u16>(int()?, mismatch)?.to_le_bytes().to_vec(),
            ValueKind::I32 => fit::<i32>(int()?, mismatch)?.to_le_bytes().to_vec(),
            ValueKind::U32 => fit::<u32>(int()?, mismatch)?.to_le_bytes().to_vec(),
            ValueKind::I64 => fit::<i64>(int()?, mismatch)?.to_le_bytes().to_vec(),
            ValueKind::U64 | ValueKind::Pointer => fit::<u64>(int()?, mismatch)?.to_le_bytes().to_vec(),
            ValueKind::F32 => (value.as_f64().ok_or_else(mismatch)? as f32).to_le_bytes().to_vec(),
            ValueKind::F64 => value.as_f64().ok_or_else(mismatch)?.to_le_bytes().to_vec(),
            ValueKind::Text { .. } => return Err(mismatch()),
        })
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Pointer(u64),
    Text(String),
}

impl Value {
    fn as_i128(&self) -> Option<i128> {
        Some(match *self {
            Value::I8(v) => v as i128,
            Value::U8(v) => v as i128,
            Value::I16(v) => v as i128,
            Value::U16(v) => v as i128,
            Value::I32(v) => v as i128,
            Value::U32(v) => v as i128,
            Value::I64(v) => v as i128,
            Value::U64(v) | Value::Pointer(v) => v as i128,
            _ => return None,
        })
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_i128().and_then(|v| u64::try_from(v).ok())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v as f64),
            Value::F64(v) => Some(v),
            _ => self.as_i128().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            _ => self.as_i128().map(|v| v != 0),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Pointer value; null is `None`.
    pub fn as_pointer(&self) -> Option<u64> {
        self.as_u64().filter(|&p| p != 0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::I8(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Pointer(v) => write!(f, "{:#x}", v),
            Value::Text(v) => write!(f, "{:?}", v),
        }
    }
}
