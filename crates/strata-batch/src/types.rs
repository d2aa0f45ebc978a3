//! Logical column types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The logical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogicalType {
    /// Boolean.
    Bool = 1,
    /// 8-bit signed integer.
    Int8 = 2,
    /// 16-bit signed integer.
    Int16 = 3,
    /// 32-bit signed integer.
    Int32 = 4,
    /// 64-bit signed integer.
    Int64 = 5,
    /// 32-bit unsigned integer.
    UInt32 = 6,
    /// 64-bit unsigned integer.
    UInt64 = 7,
    /// 64-bit floating point.
    Float64 = 8,
    /// UTF-8 string.
    Varchar = 9,
    /// Raw bytes.
    Binary = 10,
}

impl LogicalType {
    /// Decodes a type from its wire tag.
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Bool),
            2 => Some(Self::Int8),
            3 => Some(Self::Int16),
            4 => Some(Self::Int32),
            5 => Some(Self::Int64),
            6 => Some(Self::UInt32),
            7 => Some(Self::UInt64),
            8 => Some(Self::Float64),
            9 => Some(Self::Varchar),
            10 => Some(Self::Binary),
            _ => None,
        }
    }

    /// Returns the wire tag.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true if values of this type have a variable-length encoding.
    #[inline]
    #[must_use]
    pub const fn is_varlen(self) -> bool {
        matches!(self, Self::Varchar | Self::Binary)
    }

    /// Returns true if this type may be used as a primary key.
    ///
    /// Floats are excluded because their equality is not total; booleans
    /// because their domain is too small to be a key.
    #[inline]
    #[must_use]
    pub const fn is_pk_supported(self) -> bool {
        !matches!(self, Self::Bool | Self::Float64)
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float64 => "float64",
            Self::Varchar => "varchar",
            Self::Binary => "binary",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_roundtrip() {
        for ty in [
            LogicalType::Bool,
            LogicalType::Int8,
            LogicalType::Int16,
            LogicalType::Int32,
            LogicalType::Int64,
            LogicalType::UInt32,
            LogicalType::UInt64,
            LogicalType::Float64,
            LogicalType::Varchar,
            LogicalType::Binary,
        ] {
            assert_eq!(LogicalType::from_u8(ty.as_u8()), Some(ty));
        }
        assert_eq!(LogicalType::from_u8(0), None);
        assert_eq!(LogicalType::from_u8(200), None);
    }

    #[test]
    fn test_pk_support() {
        assert!(LogicalType::Int64.is_pk_supported());
        assert!(LogicalType::Varchar.is_pk_supported());
        assert!(!LogicalType::Float64.is_pk_supported());
        assert!(!LogicalType::Bool.is_pk_supported());
    }
}
