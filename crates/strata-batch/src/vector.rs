//! Typed column vectors.

use bytes::{Buf, BufMut};
use strata_common::{StrataError, StrataResult};

use crate::bitmap::Bitmap;
use crate::types::LogicalType;
use crate::value::Value;

/// A column of values, all of one logical type (or NULL).
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnVector {
    ty: LogicalType,
    values: Vec<Value>,
}

impl ColumnVector {
    /// Creates an empty vector of the given type.
    #[must_use]
    pub fn new(ty: LogicalType) -> Self {
        Self {
            ty,
            values: Vec::new(),
        }
    }

    /// Creates a vector from parts, checking that every value matches the
    /// declared type.
    pub fn from_values(ty: LogicalType, values: Vec<Value>) -> StrataResult<Self> {
        for v in &values {
            if let Some(vt) = v.ty() {
                if vt != ty {
                    return Err(StrataError::invalid_argument(format!(
                        "value type {vt} does not match column type {ty}"
                    )));
                }
            }
        }
        Ok(Self { ty, values })
    }

    /// Creates an all-NULL vector of the given type and length, used when a
    /// requested column did not exist at the block's write time.
    #[must_use]
    pub fn all_null(ty: LogicalType, len: usize) -> Self {
        Self {
            ty,
            values: vec![Value::Null; len],
        }
    }

    /// Returns the logical type.
    #[inline]
    #[must_use]
    pub fn ty(&self) -> LogicalType {
        self.ty
    }

    /// Returns the number of values.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the vector is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the value at `row`.
    #[must_use]
    pub fn get(&self, row: usize) -> Option<&Value> {
        self.values.get(row)
    }

    /// Returns the underlying values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Appends a value, checking its type.
    pub fn push(&mut self, v: Value) -> StrataResult<()> {
        if let Some(vt) = v.ty() {
            if vt != self.ty {
                return Err(StrataError::invalid_argument(format!(
                    "value type {vt} does not match column type {}",
                    self.ty
                )));
            }
        }
        self.values.push(v);
        Ok(())
    }

    /// Overwrites the value at `row`.
    pub fn set(&mut self, row: usize, v: Value) -> StrataResult<()> {
        if let Some(vt) = v.ty() {
            if vt != self.ty {
                return Err(StrataError::invalid_argument(format!(
                    "value type {vt} does not match column type {}",
                    self.ty
                )));
            }
        }
        match self.values.get_mut(row) {
            Some(slot) => {
                *slot = v;
                Ok(())
            }
            None => Err(StrataError::not_found(format!("row {row}"))),
        }
    }

    /// Appends all values from `other`.
    pub fn extend_from(&mut self, other: &ColumnVector) -> StrataResult<()> {
        if other.ty != self.ty {
            return Err(StrataError::invalid_argument(format!(
                "cannot extend column of type {} from {}",
                self.ty, other.ty
            )));
        }
        self.values.extend_from_slice(&other.values);
        Ok(())
    }

    /// Returns a copy of the window `[offset, offset + len)`.
    #[must_use]
    pub fn window(&self, offset: usize, len: usize) -> Self {
        let end = (offset + len).min(self.values.len());
        Self {
            ty: self.ty,
            values: self.values[offset.min(end)..end].to_vec(),
        }
    }

    /// Returns a copy with the rows in `mask` removed.
    #[must_use]
    pub fn compact(&self, mask: &Bitmap) -> Self {
        let values = self
            .values
            .iter()
            .enumerate()
            .filter(|(row, _)| !mask.contains(*row as u32))
            .map(|(_, v)| v.clone())
            .collect();
        Self {
            ty: self.ty,
            values,
        }
    }

    /// Encodes the vector into `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.ty.as_u8());
        buf.put_u32(self.values.len() as u32);
        for v in &self.values {
            v.encode(buf);
        }
    }

    /// Decodes a vector from `buf`.
    pub fn decode(buf: &mut impl Buf) -> StrataResult<Self> {
        if buf.remaining() < 5 {
            return Err(StrataError::corruption("truncated column vector"));
        }
        let ty = LogicalType::from_u8(buf.get_u8())
            .ok_or_else(|| StrataError::corruption("bad column type tag"))?;
        let len = buf.get_u32() as usize;
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            values.push(Value::decode(buf)?);
        }
        Self::from_values(ty, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_type_check() {
        let mut col = ColumnVector::new(LogicalType::Int32);
        col.push(Value::Int32(1)).unwrap();
        col.push(Value::Null).unwrap();
        assert!(col.push(Value::Int64(1)).is_err());
        assert_eq!(col.len(), 2);
    }

    #[test]
    fn test_all_null() {
        let col = ColumnVector::all_null(LogicalType::Varchar, 4);
        assert_eq!(col.len(), 4);
        assert!(col.get(3).unwrap().is_null());
    }

    #[test]
    fn test_window_and_compact() {
        let col = ColumnVector::from_values(
            LogicalType::Int64,
            (0..10).map(Value::Int64).collect(),
        )
        .unwrap();

        let win = col.window(2, 3);
        assert_eq!(win.values(), &[Value::Int64(2), Value::Int64(3), Value::Int64(4)]);

        let mask: Bitmap = [0u32, 5, 9].into_iter().collect();
        let compacted = col.compact(&mask);
        assert_eq!(compacted.len(), 7);
        assert_eq!(compacted.get(0), Some(&Value::Int64(1)));
    }

    #[test]
    fn test_encode_decode() {
        let col = ColumnVector::from_values(
            LogicalType::Varchar,
            vec![
                Value::Varchar("a".into()),
                Value::Null,
                Value::Varchar("bc".into()),
            ],
        )
        .unwrap();
        let mut buf = bytes::BytesMut::new();
        col.encode(&mut buf);
        let decoded = ColumnVector::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, col);
    }
}
