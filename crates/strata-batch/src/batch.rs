//! Multi-column batches.

use bytes::{Buf, BufMut};
use strata_common::{StrataError, StrataResult};

use crate::bitmap::Bitmap;
use crate::schema::Schema;
use crate::value::Value;
use crate::vector::ColumnVector;

/// An ordered set of equal-length column vectors: the unit of ingestion,
/// scan, and persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    vecs: Vec<ColumnVector>,
}

impl Batch {
    /// Creates a batch from column vectors, checking that all lengths match.
    pub fn new(vecs: Vec<ColumnVector>) -> StrataResult<Self> {
        if let Some(first) = vecs.first() {
            let len = first.len();
            for (i, v) in vecs.iter().enumerate() {
                if v.len() != len {
                    return Err(StrataError::invalid_argument(format!(
                        "column {i} has {} rows, expected {len}",
                        v.len()
                    )));
                }
            }
        }
        Ok(Self { vecs })
    }

    /// Creates an empty batch shaped like `schema`'s active columns.
    #[must_use]
    pub fn empty_like(schema: &Schema) -> Self {
        Self {
            vecs: schema.cols.iter().map(|c| ColumnVector::new(c.ty)).collect(),
        }
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.vecs.first().map_or(0, ColumnVector::len)
    }

    /// Returns true if the batch has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn col_count(&self) -> usize {
        self.vecs.len()
    }

    /// Returns the column at `pos`.
    #[must_use]
    pub fn vec(&self, pos: usize) -> Option<&ColumnVector> {
        self.vecs.get(pos)
    }

    /// Returns all columns.
    #[must_use]
    pub fn vecs(&self) -> &[ColumnVector] {
        &self.vecs
    }

    /// Returns the value at `(row, col)`.
    #[must_use]
    pub fn value(&self, row: usize, col: usize) -> Option<&Value> {
        self.vecs.get(col).and_then(|v| v.get(row))
    }

    /// Appends one row of values.
    pub fn push_row(&mut self, row: &[Value]) -> StrataResult<()> {
        if row.len() != self.vecs.len() {
            return Err(StrataError::invalid_argument(format!(
                "row has {} values, batch has {} columns",
                row.len(),
                self.vecs.len()
            )));
        }
        for (vec, v) in self.vecs.iter_mut().zip(row.iter()) {
            vec.push(v.clone())?;
        }
        Ok(())
    }

    /// Returns one row of cloned values.
    #[must_use]
    pub fn row(&self, row: usize) -> Option<Vec<Value>> {
        if row >= self.row_count() {
            return None;
        }
        Some(
            self.vecs
                .iter()
                .map(|v| v.get(row).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }

    /// Appends all rows of `other`, column by column.
    pub fn extend_from(&mut self, other: &Batch) -> StrataResult<()> {
        if other.vecs.len() != self.vecs.len() {
            return Err(StrataError::invalid_argument(format!(
                "cannot extend {}-column batch from {}-column batch",
                self.vecs.len(),
                other.vecs.len()
            )));
        }
        for (dst, src) in self.vecs.iter_mut().zip(other.vecs.iter()) {
            dst.extend_from(src)?;
        }
        Ok(())
    }

    /// Returns a copy of the row window `[offset, offset + len)`.
    #[must_use]
    pub fn window(&self, offset: usize, len: usize) -> Self {
        Self {
            vecs: self.vecs.iter().map(|v| v.window(offset, len)).collect(),
        }
    }

    /// Returns a copy with the rows in `mask` removed.
    #[must_use]
    pub fn compact(&self, mask: &Bitmap) -> Self {
        Self {
            vecs: self.vecs.iter().map(|v| v.compact(mask)).collect(),
        }
    }

    /// Splits the batch into chunks of at most `max_rows` rows.
    #[must_use]
    pub fn split_rows(&self, max_rows: usize) -> Vec<Self> {
        let total = self.row_count();
        if total == 0 || max_rows == 0 {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < total {
            let len = max_rows.min(total - offset);
            out.push(self.window(offset, len));
            offset += len;
        }
        out
    }

    /// Encodes the batch into `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.vecs.len() as u16);
        for v in &self.vecs {
            v.encode(buf);
        }
    }

    /// Decodes a batch from `buf`.
    pub fn decode(buf: &mut impl Buf) -> StrataResult<Self> {
        if buf.remaining() < 2 {
            return Err(StrataError::corruption("truncated batch"));
        }
        let n = buf.get_u16() as usize;
        let mut vecs = Vec::with_capacity(n);
        for _ in 0..n {
            vecs.push(ColumnVector::decode(buf)?);
        }
        Self::new(vecs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogicalType;

    fn schema() -> Schema {
        Schema::new(
            "t",
            &[
                ("id", LogicalType::Int64, true),
                ("name", LogicalType::Varchar, false),
            ],
        )
        .unwrap()
    }

    fn sample(n: i64) -> Batch {
        let mut b = Batch::empty_like(&schema());
        for i in 0..n {
            b.push_row(&[Value::Int64(i), Value::Varchar(format!("row-{i}"))])
                .unwrap();
        }
        b
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let a = ColumnVector::from_values(LogicalType::Int64, vec![Value::Int64(1)]).unwrap();
        let b = ColumnVector::new(LogicalType::Varchar);
        assert!(Batch::new(vec![a, b]).is_err());
    }

    #[test]
    fn test_push_and_window() {
        let b = sample(10);
        assert_eq!(b.row_count(), 10);
        let w = b.window(4, 3);
        assert_eq!(w.row_count(), 3);
        assert_eq!(w.value(0, 0), Some(&Value::Int64(4)));
    }

    #[test]
    fn test_split_rows() {
        let b = sample(25);
        let parts = b.split_rows(10);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].row_count(), 10);
        assert_eq!(parts[2].row_count(), 5);
        assert_eq!(parts[2].value(0, 0), Some(&Value::Int64(20)));
    }

    #[test]
    fn test_compact() {
        let b = sample(6);
        let mask: Bitmap = [1u32, 3].into_iter().collect();
        let c = b.compact(&mask);
        assert_eq!(c.row_count(), 4);
        assert_eq!(c.value(1, 0), Some(&Value::Int64(2)));
    }

    #[test]
    fn test_encode_decode() {
        let b = sample(5);
        let mut buf = bytes::BytesMut::new();
        b.encode(&mut buf);
        let decoded = Batch::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, b);
    }
}
