//! Appendable block data.
//!
//! An appendable block holds column vectors in memory. Rows arrive in
//! append nodes tagged with the writing transaction; a node becomes
//! visible when its transaction commits. Rolled-back rows stay physically
//! present but are masked out of every view, which is also how the
//! append-delete-append cycle leaves deleted phantoms behind.

use std::sync::Arc;

use strata_batch::{Batch, Bitmap, Schema, Value};
use strata_common::types::{Timestamp, TxnId};
use strata_common::{StrataError, StrataResult};
use strata_index::PrimaryKeyIndex;

use crate::data::deletes::DeleteChain;

/// One contiguous run of rows appended by a single transaction.
#[derive(Debug, Clone)]
pub struct AppendNode {
    /// First row of the run.
    pub start: u32,
    /// One past the last row.
    pub end: u32,
    /// The appending transaction.
    pub txn_id: TxnId,
    /// Commit timestamp; `None` while pending.
    pub commit_ts: Option<Timestamp>,
    /// Set when the transaction rolled back; rows stay masked forever.
    pub aborted: bool,
}

impl AppendNode {
    fn visible(&self, snapshot: Timestamp, txn_id: TxnId) -> bool {
        if self.aborted {
            return false;
        }
        match self.commit_ts {
            Some(ts) => ts <= snapshot,
            None => self.txn_id == txn_id,
        }
    }
}

/// The in-memory state of an appendable block.
#[derive(Debug)]
pub struct AppendableData {
    schema: Arc<Schema>,
    batch: Batch,
    appends: Vec<AppendNode>,
    /// Deletes against this block.
    pub deletes: DeleteChain,
    pk: Option<PrimaryKeyIndex>,
    frozen: bool,
}

impl AppendableData {
    /// Creates empty appendable data shaped by `schema`.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        let pk = schema
            .pk_pos()
            .map(|_| PrimaryKeyIndex::new(schema.is_sorted()));
        Self {
            batch: Batch::empty_like(&schema),
            schema,
            appends: Vec::new(),
            deletes: DeleteChain::new(),
            pk,
            frozen: false,
        }
    }

    /// Returns the schema the block was created under.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Total physical rows, including pending and aborted ones.
    #[must_use]
    pub fn rows_total(&self) -> u32 {
        self.batch.row_count() as u32
    }

    /// Remaining capacity before `block_max_rows`.
    #[must_use]
    pub fn capacity_left(&self) -> u32 {
        self.schema.block_max_rows.saturating_sub(self.rows_total())
    }

    /// Returns true when the block reached `block_max_rows`.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.capacity_left() == 0
    }

    /// Returns true when a flush task has claimed the block; new appends
    /// must go to a fresh block.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Claims the block for flushing.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Releases a flush claim after the task failed.
    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    /// Pads the batch with masked filler rows up to `start`, recreating
    /// the space of aborted runs that were never logged. Used by replay.
    pub fn fill_aborted_gap(&mut self, start: u32) -> StrataResult<()> {
        let have = self.rows_total();
        if have >= start {
            return Ok(());
        }
        let mut pad = Batch::empty_like(&self.schema);
        let row: Vec<Value> = (0..self.schema.col_count()).map(|_| Value::Null).collect();
        for _ in have..start {
            pad.push_row(&row)?;
        }
        self.batch.extend_from(&pad)?;
        self.appends.push(AppendNode {
            start: have,
            end: start,
            txn_id: TxnId::INVALID,
            commit_ts: None,
            aborted: true,
        });
        Ok(())
    }

    /// Returns the append nodes.
    #[must_use]
    pub fn appends(&self) -> &[AppendNode] {
        &self.appends
    }

    /// Returns the append node containing `row`.
    #[must_use]
    pub fn node_of(&self, row: u32) -> Option<&AppendNode> {
        self.appends
            .iter()
            .find(|n| n.start <= row && row < n.end)
    }

    /// Returns the raw batch, phantom rows included.
    #[must_use]
    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    /// Appends `rows` as a pending node of `txn_id`. The caller checks
    /// capacity; returns the start offset of the new run.
    pub fn append(&mut self, txn_id: TxnId, rows: &Batch) -> StrataResult<u32> {
        if rows.col_count() != self.batch.col_count() {
            return Err(StrataError::invalid_argument(format!(
                "append batch has {} columns, block has {}",
                rows.col_count(),
                self.batch.col_count()
            )));
        }
        let start = self.rows_total();
        self.batch.extend_from(rows)?;
        let end = self.rows_total();
        if let (Some(pk), Some(pk_pos)) = (&mut self.pk, self.schema.pk_pos()) {
            let col = rows
                .vec(pk_pos)
                .ok_or_else(|| StrataError::internal("pk column missing in append batch"))?;
            for (i, key) in col.values().iter().enumerate() {
                pk.insert(key.clone(), start + i as u32);
            }
        }
        self.appends.push(AppendNode {
            start,
            end,
            txn_id,
            commit_ts: None,
            aborted: false,
        });
        Ok(start)
    }

    /// Inserts committed rows directly, used by replay. Skips runs already
    /// present so replay stays idempotent.
    pub fn append_committed(
        &mut self,
        start: u32,
        rows: &Batch,
        commit_ts: Timestamp,
    ) -> StrataResult<()> {
        if self.rows_total() > start {
            return Ok(());
        }
        if self.rows_total() != start {
            return Err(StrataError::corruption(format!(
                "replayed append at row {start} but block has {} rows",
                self.rows_total()
            )));
        }
        let begin = self.append(TxnId::INVALID, rows)?;
        self.commit_append_at(begin, commit_ts);
        Ok(())
    }

    fn commit_append_at(&mut self, start: u32, commit_ts: Timestamp) {
        for node in &mut self.appends {
            if node.start == start {
                node.commit_ts = Some(commit_ts);
            }
        }
    }

    /// Commits every pending append of `txn_id`.
    pub fn commit_txn(&mut self, txn_id: TxnId, commit_ts: Timestamp) {
        for node in &mut self.appends {
            if node.commit_ts.is_none() && node.txn_id == txn_id && !node.aborted {
                node.commit_ts = Some(commit_ts);
            }
        }
        self.deletes.commit_txn(txn_id, commit_ts);
    }

    /// Rolls back every pending append and delete of `txn_id`. Aborted
    /// rows stay in the batch but leave the primary-key index.
    pub fn rollback_txn(&mut self, txn_id: TxnId) {
        let pk_pos = self.schema.pk_pos();
        for i in 0..self.appends.len() {
            let (start, end, matches) = {
                let node = &self.appends[i];
                (
                    node.start,
                    node.end,
                    node.commit_ts.is_none() && node.txn_id == txn_id && !node.aborted,
                )
            };
            if !matches {
                continue;
            }
            self.appends[i].aborted = true;
            if let Some(pk_pos) = pk_pos {
                for row in start..end {
                    let key = self
                        .batch
                        .value(row as usize, pk_pos)
                        .cloned()
                        .unwrap_or(Value::Null);
                    if let Some(pk) = &mut self.pk {
                        pk.remove(&key, row);
                    }
                }
            }
        }
        self.deletes.rollback_txn(txn_id);
    }

    /// Returns true if `row` belongs to a node visible at the snapshot and
    /// is not deleted.
    #[must_use]
    pub fn row_alive(&self, row: u32, snapshot: Timestamp, txn_id: TxnId) -> bool {
        let in_visible_node = self
            .appends
            .iter()
            .any(|n| n.start <= row && row < n.end && n.visible(snapshot, txn_id));
        in_visible_node && !self.deletes.is_deleted(row, snapshot, txn_id)
    }

    /// Computes the view bounds at a snapshot: the row count covered by
    /// visible nodes, and the mask of rows within it that must be hidden
    /// (deleted, aborted, or belonging to foreign pending nodes).
    #[must_use]
    pub fn view_bounds(&self, snapshot: Timestamp, txn_id: TxnId) -> (u32, Bitmap) {
        let len = self
            .appends
            .iter()
            .filter(|n| n.visible(snapshot, txn_id))
            .map(|n| n.end)
            .max()
            .unwrap_or(0);
        let mut mask = self.deletes.mask_at(snapshot, txn_id);
        for node in &self.appends {
            if node.start < len && !node.visible(snapshot, txn_id) {
                for row in node.start..node.end.min(len) {
                    mask.insert(row);
                }
            }
        }
        (len, mask)
    }

    /// Rows alive at the snapshot.
    #[must_use]
    pub fn live_rows(&self, snapshot: Timestamp, txn_id: TxnId) -> u32 {
        let (len, mask) = self.view_bounds(snapshot, txn_id);
        len - (0..len).filter(|r| mask.contains(*r)).count() as u32
    }

    /// Candidate rows for a primary key, oldest first.
    #[must_use]
    pub fn pk_candidates(&self, key: &Value) -> &[u32] {
        self.pk.as_ref().map_or(&[], |pk| pk.candidates(key))
    }

    /// Returns the newest candidate row alive at the snapshot.
    #[must_use]
    pub fn find_alive(&self, key: &Value, snapshot: Timestamp, txn_id: TxnId) -> Option<u32> {
        self.pk_candidates(key)
            .iter()
            .rev()
            .copied()
            .find(|&row| self.row_alive(row, snapshot, txn_id))
    }

    /// Reads one cell.
    pub fn get_value(&self, row: u32, col: usize) -> StrataResult<Value> {
        self.batch
            .value(row as usize, col)
            .cloned()
            .ok_or_else(|| StrataError::not_found(format!("row {row} col {col}")))
    }

    /// Append nodes committed in `(from, to]`, as `(commit_ts, start, end)`.
    #[must_use]
    pub fn committed_appends_in(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Vec<(Timestamp, u32, u32)> {
        let mut out: Vec<(Timestamp, u32, u32)> = self
            .appends
            .iter()
            .filter_map(|n| match (n.aborted, n.commit_ts) {
                (false, Some(ts)) if ts > from && ts <= to => Some((ts, n.start, n.end)),
                _ => None,
            })
            .collect();
        out.sort_by_key(|(ts, start, _)| (*ts, *start));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_batch::mock::{mock_batch, mock_schema};

    fn ts(n: i64) -> Timestamp {
        Timestamp::new(n, 0)
    }

    fn setup() -> (Arc<Schema>, AppendableData) {
        let mut schema = mock_schema(4, 3);
        schema.block_max_rows = 10;
        let schema = Arc::new(schema);
        let data = AppendableData::new(Arc::clone(&schema));
        (schema, data)
    }

    #[test]
    fn test_append_visibility() {
        let (schema, mut data) = setup();
        let batch = mock_batch(&schema, 3);
        data.append(TxnId::new(1), &batch).unwrap();

        // Pending rows: visible to the owner only.
        assert_eq!(data.live_rows(ts(100), TxnId::new(1)), 3);
        assert_eq!(data.live_rows(ts(100), TxnId::new(2)), 0);

        data.commit_txn(TxnId::new(1), ts(10));
        assert_eq!(data.live_rows(ts(10), TxnId::new(2)), 3);
        assert_eq!(data.live_rows(ts(9), TxnId::new(2)), 0);
    }

    #[test]
    fn test_rollback_masks_rows_and_clears_pk() {
        let (schema, mut data) = setup();
        let batch = mock_batch(&schema, 3);
        data.append(TxnId::new(1), &batch).unwrap();
        data.rollback_txn(TxnId::new(1));

        assert_eq!(data.rows_total(), 3);
        assert_eq!(data.live_rows(ts(100), TxnId::new(1)), 0);
        let key = batch.value(0, 3).unwrap().clone();
        assert!(data.pk_candidates(&key).is_empty());
    }

    #[test]
    fn test_ada_phantoms() {
        let (schema, mut data) = setup();
        let one = mock_batch(&schema, 1);
        let key = one.value(0, 3).unwrap().clone();
        let txn = TxnId::new(1);

        // Append, delete, append, delete, append: 3 rows, 2 phantoms.
        for round in 0..3 {
            let start = data.append(txn, &one).unwrap();
            assert_eq!(start, round);
            if round < 2 {
                let row = data.find_alive(&key, ts(0), txn).unwrap();
                data.deletes
                    .delete([row].into_iter().collect(), txn, ts(0), DeleteKind::Normal)
                    .unwrap();
                assert!(data.find_alive(&key, ts(0), txn).is_none());
            }
        }
        data.commit_txn(txn, ts(10));

        let reader = TxnId::new(2);
        let (len, mask) = data.view_bounds(ts(10), reader);
        assert_eq!(len, 3);
        assert_eq!(mask.cardinality(), 2);
        assert_eq!(data.find_alive(&key, ts(10), reader), Some(2));
    }

    use crate::data::deletes::DeleteKind;

    #[test]
    fn test_view_masks_foreign_pending() {
        let (schema, mut data) = setup();
        data.append(TxnId::new(1), &mock_batch(&schema, 2)).unwrap();
        data.commit_txn(TxnId::new(1), ts(10));
        data.append(TxnId::new(2), &mock_batch_from(&schema, 2, 2))
            .unwrap();

        // Reader at ts 20 does not see txn 2's pending rows.
        let (len, mask) = data.view_bounds(ts(20), TxnId::new(9));
        assert_eq!(len, 2);
        assert_eq!(mask.cardinality(), 0);

        // But txn 2 sees all 4.
        let (len, _) = data.view_bounds(ts(20), TxnId::new(2));
        assert_eq!(len, 4);
    }

    fn mock_batch_from(schema: &Schema, start: usize, n: usize) -> Batch {
        strata_batch::mock::mock_batch_range(schema, start, n)
    }

    #[test]
    fn test_capacity() {
        let (schema, mut data) = setup();
        data.append(TxnId::new(1), &mock_batch(&schema, 10)).unwrap();
        assert!(data.is_full());
        assert_eq!(data.capacity_left(), 0);
    }

    #[test]
    fn test_append_committed_idempotent() {
        let (schema, mut data) = setup();
        let batch = mock_batch(&schema, 3);
        data.append_committed(0, &batch, ts(5)).unwrap();
        // Replaying the same run is a no-op.
        data.append_committed(0, &batch, ts(5)).unwrap();
        assert_eq!(data.rows_total(), 3);
        assert_eq!(data.live_rows(ts(5), TxnId::new(9)), 3);
    }
}
