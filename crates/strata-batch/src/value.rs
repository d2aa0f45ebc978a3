//! Runtime values.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::{Buf, BufMut};
use strata_common::{StrataError, StrataResult};

use crate::types::LogicalType;

/// A single cell value.
#[derive(Debug, Clone)]
pub enum Value {
    /// NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 8-bit signed integer.
    Int8(i8),
    /// 16-bit signed integer.
    Int16(i16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 32-bit unsigned integer.
    UInt32(u32),
    /// 64-bit unsigned integer.
    UInt64(u64),
    /// 64-bit floating point.
    Float64(f64),
    /// UTF-8 string.
    Varchar(String),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl Value {
    /// Returns true if this value is NULL.
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the logical type of this value, or `None` for NULL.
    #[must_use]
    pub fn ty(&self) -> Option<LogicalType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(LogicalType::Bool),
            Value::Int8(_) => Some(LogicalType::Int8),
            Value::Int16(_) => Some(LogicalType::Int16),
            Value::Int32(_) => Some(LogicalType::Int32),
            Value::Int64(_) => Some(LogicalType::Int64),
            Value::UInt32(_) => Some(LogicalType::UInt32),
            Value::UInt64(_) => Some(LogicalType::UInt64),
            Value::Float64(_) => Some(LogicalType::Float64),
            Value::Varchar(_) => Some(LogicalType::Varchar),
            Value::Binary(_) => Some(LogicalType::Binary),
        }
    }

    /// Order-preserving byte encoding, used for zonemap bounds and bloom
    /// filter hashing. Integers are sign-flipped big-endian so byte order
    /// matches value order; varlen values are their raw bytes.
    #[must_use]
    pub fn sort_key_bytes(&self) -> Vec<u8> {
        match self {
            Value::Null => Vec::new(),
            Value::Bool(v) => vec![u8::from(*v)],
            Value::Int8(v) => vec![(*v as u8) ^ 0x80],
            Value::Int16(v) => ((*v as u16) ^ 0x8000).to_be_bytes().to_vec(),
            Value::Int32(v) => ((*v as u32) ^ 0x8000_0000).to_be_bytes().to_vec(),
            Value::Int64(v) => ((*v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes().to_vec(),
            Value::UInt32(v) => v.to_be_bytes().to_vec(),
            Value::UInt64(v) => v.to_be_bytes().to_vec(),
            Value::Float64(v) => {
                // IEEE-754 total order: flip all bits for negatives, the
                // sign bit for non-negatives.
                let bits = v.to_bits();
                let ordered = if bits >> 63 == 1 { !bits } else { bits ^ (1 << 63) };
                ordered.to_be_bytes().to_vec()
            }
            Value::Varchar(s) => s.as_bytes().to_vec(),
            Value::Binary(b) => b.clone(),
        }
    }

    /// Encodes the value into `buf` with a type tag.
    pub fn encode(&self, buf: &mut impl BufMut) {
        match self {
            Value::Null => buf.put_u8(0),
            Value::Bool(v) => {
                buf.put_u8(LogicalType::Bool.as_u8());
                buf.put_u8(u8::from(*v));
            }
            Value::Int8(v) => {
                buf.put_u8(LogicalType::Int8.as_u8());
                buf.put_i8(*v);
            }
            Value::Int16(v) => {
                buf.put_u8(LogicalType::Int16.as_u8());
                buf.put_i16(*v);
            }
            Value::Int32(v) => {
                buf.put_u8(LogicalType::Int32.as_u8());
                buf.put_i32(*v);
            }
            Value::Int64(v) => {
                buf.put_u8(LogicalType::Int64.as_u8());
                buf.put_i64(*v);
            }
            Value::UInt32(v) => {
                buf.put_u8(LogicalType::UInt32.as_u8());
                buf.put_u32(*v);
            }
            Value::UInt64(v) => {
                buf.put_u8(LogicalType::UInt64.as_u8());
                buf.put_u64(*v);
            }
            Value::Float64(v) => {
                buf.put_u8(LogicalType::Float64.as_u8());
                buf.put_f64(*v);
            }
            Value::Varchar(s) => {
                buf.put_u8(LogicalType::Varchar.as_u8());
                buf.put_u32(s.len() as u32);
                buf.put_slice(s.as_bytes());
            }
            Value::Binary(b) => {
                buf.put_u8(LogicalType::Binary.as_u8());
                buf.put_u32(b.len() as u32);
                buf.put_slice(b);
            }
        }
    }

    /// Decodes a value from `buf`.
    pub fn decode(buf: &mut impl Buf) -> StrataResult<Self> {
        if buf.remaining() < 1 {
            return Err(StrataError::corruption("truncated value"));
        }
        let tag = buf.get_u8();
        if tag == 0 {
            return Ok(Value::Null);
        }
        let ty = LogicalType::from_u8(tag)
            .ok_or_else(|| StrataError::corruption(format!("bad value tag {tag}")))?;
        let need = match ty {
            LogicalType::Bool | LogicalType::Int8 => 1,
            LogicalType::Int16 => 2,
            LogicalType::Int32 | LogicalType::UInt32 => 4,
            LogicalType::Int64 | LogicalType::UInt64 | LogicalType::Float64 => 8,
            LogicalType::Varchar | LogicalType::Binary => 4,
        };
        if buf.remaining() < need {
            return Err(StrataError::corruption("truncated value payload"));
        }
        let v = match ty {
            LogicalType::Bool => Value::Bool(buf.get_u8() != 0),
            LogicalType::Int8 => Value::Int8(buf.get_i8()),
            LogicalType::Int16 => Value::Int16(buf.get_i16()),
            LogicalType::Int32 => Value::Int32(buf.get_i32()),
            LogicalType::Int64 => Value::Int64(buf.get_i64()),
            LogicalType::UInt32 => Value::UInt32(buf.get_u32()),
            LogicalType::UInt64 => Value::UInt64(buf.get_u64()),
            LogicalType::Float64 => Value::Float64(buf.get_f64()),
            LogicalType::Varchar | LogicalType::Binary => {
                let len = buf.get_u32() as usize;
                if buf.remaining() < len {
                    return Err(StrataError::corruption("truncated varlen value"));
                }
                let mut bytes = vec![0u8; len];
                buf.copy_to_slice(&mut bytes);
                if ty == LogicalType::Varchar {
                    Value::Varchar(String::from_utf8(bytes).map_err(|_| {
                        StrataError::corruption("varchar value is not valid UTF-8")
                    })?)
                } else {
                    Value::Binary(bytes)
                }
            }
        };
        Ok(v)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int8(a), Value::Int8(b)) => a == b,
            (Value::Int16(a), Value::Int16(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::UInt32(a), Value::UInt32(b)) => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            // Floats compare by bits so Eq/Hash stay consistent.
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::Varchar(a), Value::Varchar(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int8(v) => v.hash(state),
            Value::Int16(v) => v.hash(state),
            Value::Int32(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::UInt32(v) => v.hash(state),
            Value::UInt64(v) => v.hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::Varchar(v) => v.hash(state),
            Value::Binary(v) => v.hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    /// Total order within a type; NULL sorts first. Cross-type comparison
    /// falls back to the sort-key encoding and only occurs in corrupt input.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int8(a), Value::Int8(b)) => a.cmp(b),
            (Value::Int16(a), Value::Int16(b)) => a.cmp(b),
            (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::UInt32(a), Value::UInt32(b)) => a.cmp(b),
            (Value::UInt64(a), Value::UInt64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::Varchar(a), Value::Varchar(b)) => a.cmp(b),
            (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
            (a, b) => a.sort_key_bytes().cmp(&b.sort_key_bytes()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int8(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Varchar(v) => write!(f, "'{}'", v),
            Value::Binary(v) => write!(f, "x'{:02x?}'", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_encode_decode_roundtrip() {
        let values = [
            Value::Null,
            Value::Bool(true),
            Value::Int8(-5),
            Value::Int32(123),
            Value::Int64(-9_000_000_000),
            Value::UInt64(u64::MAX),
            Value::Float64(3.5),
            Value::Varchar("hello".into()),
            Value::Binary(vec![0, 1, 2, 0xff]),
        ];
        for v in values {
            let mut buf = BytesMut::new();
            v.encode(&mut buf);
            let mut frozen = buf.freeze();
            assert_eq!(Value::decode(&mut frozen).unwrap(), v);
        }
    }

    #[test]
    fn test_sort_key_preserves_order_ints() {
        let vals = [-100i64, -1, 0, 1, 100, i64::MAX];
        for w in vals.windows(2) {
            let a = Value::Int64(w[0]).sort_key_bytes();
            let b = Value::Int64(w[1]).sort_key_bytes();
            assert!(a < b, "{} vs {}", w[0], w[1]);
        }
    }

    #[test]
    fn test_sort_key_preserves_order_floats() {
        let vals = [-2.5f64, -0.0, 0.0, 1.0, 1e30];
        for w in vals.windows(2) {
            let a = Value::Float64(w[0]).sort_key_bytes();
            let b = Value::Float64(w[1]).sort_key_bytes();
            assert!(a <= b);
        }
    }

    #[test]
    fn test_decode_truncated() {
        let mut buf: &[u8] = &[LogicalType::Int64.as_u8(), 0, 0];
        assert!(Value::decode(&mut buf).is_err());
    }

    #[test]
    fn test_hash_eq_consistent_for_floats() {
        use std::collections::HashMap;
        let mut m = HashMap::new();
        m.insert(Value::Float64(1.5), 1);
        assert_eq!(m.get(&Value::Float64(1.5)), Some(&1));
    }
}
