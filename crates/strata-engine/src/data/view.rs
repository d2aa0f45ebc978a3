//! Read-path views.
//!
//! A view pairs column data with the delete mask at the reader's snapshot.
//! Deleted phantoms stay in the data; callers either iterate around the
//! mask or call `apply_deletes` for a compacted copy.

use strata_batch::{Batch, Bitmap, ColumnVector};
use strata_common::types::BlockId;

/// One column of one block at a snapshot.
#[derive(Debug, Clone)]
pub struct ColumnView {
    /// Column data, including rows under the mask.
    pub data: ColumnVector,
    /// Rows hidden at the snapshot.
    pub delete_mask: Bitmap,
}

impl ColumnView {
    /// Total rows including masked ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the view holds no rows at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Rows alive at the snapshot.
    #[must_use]
    pub fn live_rows(&self) -> usize {
        self.len() - self.delete_mask.cardinality()
    }

    /// Returns a compacted copy without masked rows.
    #[must_use]
    pub fn apply_deletes(&self) -> ColumnVector {
        self.data.compact(&self.delete_mask)
    }
}

/// All requested columns of one block at a snapshot.
#[derive(Debug, Clone)]
pub struct BlockView {
    /// The block.
    pub block: BlockId,
    /// Requested columns, equal length.
    pub batch: Batch,
    /// Rows hidden at the snapshot.
    pub delete_mask: Bitmap,
}

impl BlockView {
    /// Total rows including masked ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.batch.row_count()
    }

    /// Rows alive at the snapshot.
    #[must_use]
    pub fn live_rows(&self) -> usize {
        self.len() - self.delete_mask.cardinality()
    }

    /// One column of this view.
    #[must_use]
    pub fn column(&self, pos: usize) -> Option<ColumnView> {
        self.batch.vec(pos).map(|col| ColumnView {
            data: col.clone(),
            delete_mask: self.delete_mask.clone(),
        })
    }

    /// Returns a compacted copy without masked rows.
    #[must_use]
    pub fn apply_deletes(&self) -> Batch {
        self.batch.compact(&self.delete_mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_batch::{LogicalType, Value};
    use strata_common::types::SegmentId;

    #[test]
    fn test_live_rows_and_apply() {
        let col = ColumnVector::from_values(
            LogicalType::Int64,
            (0..5).map(Value::Int64).collect(),
        )
        .unwrap();
        let mask: Bitmap = [1u32, 3].into_iter().collect();
        let view = ColumnView {
            data: col,
            delete_mask: mask,
        };
        assert_eq!(view.len(), 5);
        assert_eq!(view.live_rows(), 3);
        let compacted = view.apply_deletes();
        assert_eq!(
            compacted.values(),
            &[Value::Int64(0), Value::Int64(2), Value::Int64(4)]
        );
    }

    #[test]
    fn test_block_view_column() {
        let col = ColumnVector::from_values(
            LogicalType::Int32,
            (0..3).map(Value::Int32).collect(),
        )
        .unwrap();
        let batch = Batch::new(vec![col]).unwrap();
        let view = BlockView {
            block: BlockId::new(SegmentId::new(1), 0),
            batch,
            delete_mask: [0u32].into_iter().collect(),
        };
        assert_eq!(view.live_rows(), 2);
        assert_eq!(view.column(0).unwrap().live_rows(), 2);
        assert!(view.column(7).is_none());
    }
}
