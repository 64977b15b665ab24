//! Property values and their stored encodings
//!
//! Primitive values are stored inline in a property record's `prop_block`.
//! Strings are UTF-8 in the string store; arrays are encoded as
//!
//! ```text
//! element tag u8 | element count u32 LE | packed little-endian elements
//! ```
//!
//! in the array store. String arrays pack each element as `len u32 LE`
//! followed by its UTF-8 bytes; chars are packed as `u32`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Value type tag, shared by all store format versions
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    /// Boolean value
    Bool = 1,
    /// 8-bit integer
    Byte = 2,
    /// 16-bit integer
    Short = 3,
    /// Unicode scalar value
    Char = 4,
    /// 32-bit integer
    Int = 5,
    /// 64-bit integer
    Long = 6,
    /// 32-bit float
    Float = 7,
    /// 64-bit float
    Double = 8,
    /// String in the string store
    String = 9,
    /// Array in the array store
    Array = 10,
}

impl PropertyType {
    /// Decode a stored tag
    pub fn from_tag(tag: u64) -> Option<PropertyType> {
        Some(match tag {
            1 => PropertyType::Bool,
            2 => PropertyType::Byte,
            3 => PropertyType::Short,
            4 => PropertyType::Char,
            5 => PropertyType::Int,
            6 => PropertyType::Long,
            7 => PropertyType::Float,
            8 => PropertyType::Double,
            9 => PropertyType::String,
            10 => PropertyType::Array,
            _ => return None,
        })
    }

    /// Stored tag
    pub fn tag(self) -> u16 {
        self as u16
    }

    /// Whether the value lives in a dynamic store rather than inline
    pub fn is_dynamic(self) -> bool {
        matches!(self, PropertyType::String | PropertyType::Array)
    }
}

/// Homogeneous array value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayValue {
    /// Boolean elements
    Bool(Vec<bool>),
    /// 8-bit integer elements
    Byte(Vec<i8>),
    /// 16-bit integer elements
    Short(Vec<i16>),
    /// Char elements
    Char(Vec<char>),
    /// 32-bit integer elements
    Int(Vec<i32>),
    /// 64-bit integer elements
    Long(Vec<i64>),
    /// 32-bit float elements
    Float(Vec<f32>),
    /// 64-bit float elements
    Double(Vec<f64>),
    /// String elements
    String(Vec<String>),
}

/// Property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Boolean value
    Bool(bool),
    /// 8-bit integer
    Byte(i8),
    /// 16-bit integer
    Short(i16),
    /// Unicode scalar value
    Char(char),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Homogeneous array
    Array(ArrayValue),
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Long(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Double(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<ArrayValue> for PropertyValue {
    fn from(v: ArrayValue) -> Self {
        PropertyValue::Array(v)
    }
}

impl PropertyValue {
    /// Type tag of this value
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::Bool(_) => PropertyType::Bool,
            PropertyValue::Byte(_) => PropertyType::Byte,
            PropertyValue::Short(_) => PropertyType::Short,
            PropertyValue::Char(_) => PropertyType::Char,
            PropertyValue::Int(_) => PropertyType::Int,
            PropertyValue::Long(_) => PropertyType::Long,
            PropertyValue::Float(_) => PropertyType::Float,
            PropertyValue::Double(_) => PropertyType::Double,
            PropertyValue::String(_) => PropertyType::String,
            PropertyValue::Array(_) => PropertyType::Array,
        }
    }

    /// Inline `prop_block` bits, `None` for dynamic values
    pub fn inline_bits(&self) -> Option<u64> {
        Some(match self {
            PropertyValue::Bool(v) => u64::from(*v),
            PropertyValue::Byte(v) => *v as u8 as u64,
            PropertyValue::Short(v) => *v as u16 as u64,
            PropertyValue::Char(v) => u64::from(u32::from(*v)),
            PropertyValue::Int(v) => *v as u32 as u64,
            PropertyValue::Long(v) => *v as u64,
            PropertyValue::Float(v) => u64::from(v.to_bits()),
            PropertyValue::Double(v) => v.to_bits(),
            PropertyValue::String(_) | PropertyValue::Array(_) => return None,
        })
    }

    /// Rebuild an inline value from its tag and `prop_block` bits
    pub fn from_inline(kind: PropertyType, bits: u64) -> Result<PropertyValue> {
        Ok(match kind {
            PropertyType::Bool => PropertyValue::Bool(bits != 0),
            PropertyType::Byte => PropertyValue::Byte(bits as u8 as i8),
            PropertyType::Short => PropertyValue::Short(bits as u16 as i16),
            PropertyType::Char => PropertyValue::Char(decode_char(bits as u32)?),
            PropertyType::Int => PropertyValue::Int(bits as u32 as i32),
            PropertyType::Long => PropertyValue::Long(bits as i64),
            PropertyType::Float => PropertyValue::Float(f32::from_bits(bits as u32)),
            PropertyType::Double => PropertyValue::Double(f64::from_bits(bits)),
            PropertyType::String | PropertyType::Array => {
                return Err(Error::storage(format!("{kind:?} values are not inline")));
            }
        })
    }

    /// Bytes stored in a dynamic chain, `None` for inline values
    pub fn dynamic_bytes(&self) -> Option<Vec<u8>> {
        match self {
            PropertyValue::String(s) => Some(s.as_bytes().to_vec()),
            PropertyValue::Array(a) => Some(a.encode()),
            _ => None,
        }
    }

    /// Rebuild a dynamic value from its tag and chain payload
    pub fn from_dynamic(kind: PropertyType, bytes: Vec<u8>) -> Result<PropertyValue> {
        match kind {
            PropertyType::String => String::from_utf8(bytes)
                .map(PropertyValue::String)
                .map_err(|e| Error::storage(format!("string value is not UTF-8: {e}"))),
            PropertyType::Array => Ok(PropertyValue::Array(ArrayValue::decode(&bytes)?)),
            other => Err(Error::storage(format!("{other:?} values are inline"))),
        }
    }
}

fn decode_char(code: u32) -> Result<char> {
    char::from_u32(code).ok_or_else(|| Error::storage(format!("invalid char code {code:#x}")))
}

impl ArrayValue {
    /// Element type tag
    pub fn element_type(&self) -> PropertyType {
        match self {
            ArrayValue::Bool(_) => PropertyType::Bool,
            ArrayValue::Byte(_) => PropertyType::Byte,
            ArrayValue::Short(_) => PropertyType::Short,
            ArrayValue::Char(_) => PropertyType::Char,
            ArrayValue::Int(_) => PropertyType::Int,
            ArrayValue::Long(_) => PropertyType::Long,
            ArrayValue::Float(_) => PropertyType::Float,
            ArrayValue::Double(_) => PropertyType::Double,
            ArrayValue::String(_) => PropertyType::String,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            ArrayValue::Bool(v) => v.len(),
            ArrayValue::Byte(v) => v.len(),
            ArrayValue::Short(v) => v.len(),
            ArrayValue::Char(v) => v.len(),
            ArrayValue::Int(v) => v.len(),
            ArrayValue::Long(v) => v.len(),
            ArrayValue::Float(v) => v.len(),
            ArrayValue::Double(v) => v.len(),
            ArrayValue::String(v) => v.len(),
        }
    }

    /// Returns true if the array has no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode to the stored form
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.len() * 8);
        out.push(self.element_type() as u8);
        out.extend_from_slice(&(self.len() as u32).to_le_bytes());
        match self {
            ArrayValue::Bool(v) => out.extend(v.iter().map(|&b| u8::from(b))),
            ArrayValue::Byte(v) => out.extend(v.iter().map(|&b| b as u8)),
            ArrayValue::Short(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            ArrayValue::Char(v) => v
                .iter()
                .for_each(|&c| out.extend_from_slice(&u32::from(c).to_le_bytes())),
            ArrayValue::Int(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            ArrayValue::Long(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            ArrayValue::Float(v) => v
                .iter()
                .for_each(|x| out.extend_from_slice(&x.to_bits().to_le_bytes())),
            ArrayValue::Double(v) => v
                .iter()
                .for_each(|x| out.extend_from_slice(&x.to_bits().to_le_bytes())),
            ArrayValue::String(v) => {
                for s in v {
                    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
            }
        }
        out
    }

    /// Decode the stored form
    pub fn decode(bytes: &[u8]) -> Result<ArrayValue> {
        let mut reader = Reader { bytes, pos: 0 };
        let tag = reader.take(1)?[0];
        let count = reader.u32()? as usize;
        let kind = PropertyType::from_tag(u64::from(tag))
            .ok_or_else(|| Error::storage(format!("unknown array element tag {tag}")))?;

        let array = match kind {
            PropertyType::Bool => {
                ArrayValue::Bool(reader.take(count)?.iter().map(|&b| b != 0).collect())
            }
            PropertyType::Byte => {
                ArrayValue::Byte(reader.take(count)?.iter().map(|&b| b as i8).collect())
            }
            PropertyType::Short => ArrayValue::Short(
                reader
                    .fixed::<2>(count)?
                    .map(i16::from_le_bytes)
                    .collect(),
            ),
            PropertyType::Char => ArrayValue::Char(
                reader
                    .fixed::<4>(count)?
                    .map(|b| decode_char(u32::from_le_bytes(b)))
                    .collect::<Result<_>>()?,
            ),
            PropertyType::Int => {
                ArrayValue::Int(reader.fixed::<4>(count)?.map(i32::from_le_bytes).collect())
            }
            PropertyType::Long => {
                ArrayValue::Long(reader.fixed::<8>(count)?.map(i64::from_le_bytes).collect())
            }
            PropertyType::Float => ArrayValue::Float(
                reader
                    .fixed::<4>(count)?
                    .map(|b| f32::from_bits(u32::from_le_bytes(b)))
                    .collect(),
            ),
            PropertyType::Double => ArrayValue::Double(
                reader
                    .fixed::<8>(count)?
                    .map(|b| f64::from_bits(u64::from_le_bytes(b)))
                    .collect(),
            ),
            PropertyType::String => {
                let mut strings = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let len = reader.u32()? as usize;
                    let raw = reader.take(len)?;
                    let s = std::str::from_utf8(raw)
                        .map_err(|e| Error::storage(format!("array string is not UTF-8: {e}")))?;
                    strings.push(s.to_string());
                }
                ArrayValue::String(strings)
            }
            PropertyType::Array => {
                return Err(Error::storage("nested arrays are not supported"));
            }
        };
        if reader.pos != bytes.len() {
            return Err(Error::storage(format!(
                "{} trailing bytes after array",
                bytes.len() - reader.pos
            )));
        }
        Ok(array)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| Error::storage("array payload truncated"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn fixed<const N: usize>(&mut self, count: usize) -> Result<impl Iterator<Item = [u8; N]> + 'a> {
        let len = count
            .checked_mul(N)
            .ok_or_else(|| Error::storage("array payload truncated"))?;
        let raw = self.take(len)?;
        Ok(raw.chunks_exact(N).map(|c| {
            let mut word = [0u8; N];
            word.copy_from_slice(c);
            word
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_round_trip() {
        let values = [
            PropertyValue::Bool(true),
            PropertyValue::Byte(-3),
            PropertyValue::Short(-300),
            PropertyValue::Char('é'),
            PropertyValue::Int(-70_000),
            PropertyValue::Long(i64::MIN),
            PropertyValue::Float(1.5),
            PropertyValue::Double(-2.25),
        ];
        for value in values {
            let bits = value.inline_bits().unwrap();
            let back = PropertyValue::from_inline(value.property_type(), bits).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn test_int_array_layout() {
        let bytes = ArrayValue::Int(vec![1, -1]).encode();
        assert_eq!(bytes[0], PropertyType::Int as u8);
        assert_eq!(&bytes[1..5], &2u32.to_le_bytes());
        assert_eq!(&bytes[5..9], &1i32.to_le_bytes());
        assert_eq!(bytes.len(), 13);
    }

    #[test]
    fn test_array_round_trip() {
        let arrays = [
            ArrayValue::Int((0..100).collect()),
            ArrayValue::Bool(vec![true, false]),
            ArrayValue::Char(vec!['a', '√']),
            ArrayValue::String(vec!["one".into(), String::new(), "ünï".into()]),
            ArrayValue::Double(vec![]),
        ];
        for array in arrays {
            assert_eq!(ArrayValue::decode(&array.encode()).unwrap(), array);
        }
    }

    #[test]
    fn test_truncated_array_rejected() {
        let mut bytes = ArrayValue::Long(vec![1, 2, 3]).encode();
        bytes.pop();
        assert!(ArrayValue::decode(&bytes).is_err());
        assert!(ArrayValue::decode(&[]).is_err());
    }

    #[test]
    fn test_dynamic_values() {
        let value = PropertyValue::from("characters");
        assert!(value.inline_bits().is_none());
        let bytes = value.dynamic_bytes().unwrap();
        assert_eq!(
            PropertyValue::from_dynamic(PropertyType::String, bytes).unwrap(),
            value
        );
        assert!(PropertyValue::from_dynamic(PropertyType::Int, vec![]).is_err());
    }
}
