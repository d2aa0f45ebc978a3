//! In-memory MVCC delete chains.
//!
//! Deletes against a block accumulate as nodes tagged with the deleting
//! transaction and, once committed, a timestamp. The mask a reader sees is
//! the union of nodes committed at or below its snapshot plus its own
//! pending node. Committed nodes are drained into delta-delete objects by
//! the flush path and pruned once covered.

use strata_batch::Bitmap;
use strata_common::types::{Timestamp, TxnId};
use strata_common::{StrataError, StrataResult};

/// Why rows were deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteKind {
    /// A user-issued delete.
    Normal,
    /// A delete carried forward by a compaction or merge task.
    Compact,
}

#[derive(Debug)]
struct DeleteNode {
    rows: Bitmap,
    txn_id: TxnId,
    commit_ts: Option<Timestamp>,
    kind: DeleteKind,
}

/// The delete chain of one block.
#[derive(Debug, Default)]
pub struct DeleteChain {
    nodes: Vec<DeleteNode>,
}

impl DeleteChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending delete of `rows` by `txn_id`.
    ///
    /// Rows already deleted at the caller's snapshot fail `NotFound`; rows
    /// deleted by a later commit or another pending transaction fail
    /// `WwConflict`.
    pub fn delete(
        &mut self,
        rows: Bitmap,
        txn_id: TxnId,
        snapshot: Timestamp,
        kind: DeleteKind,
    ) -> StrataResult<()> {
        for node in &self.nodes {
            let overlaps = rows.iter().any(|r| node.rows.contains(r));
            if !overlaps {
                continue;
            }
            return match node.commit_ts {
                Some(ts) if ts <= snapshot => Err(StrataError::not_found("row")),
                Some(_) => Err(StrataError::ww_conflict("row")),
                None if node.txn_id == txn_id => Err(StrataError::not_found("row")),
                None => Err(StrataError::ww_conflict("row")),
            };
        }
        self.nodes.push(DeleteNode {
            rows,
            txn_id,
            commit_ts: None,
            kind,
        });
        Ok(())
    }

    /// Inserts an already-committed delete, used by replay and by tasks
    /// carrying deletes forward. Rows already covered by a committed node
    /// are skipped, keeping replay idempotent.
    pub fn insert_committed(&mut self, rows: &Bitmap, commit_ts: Timestamp, kind: DeleteKind) {
        let mut fresh = Bitmap::new();
        for row in rows.iter() {
            let covered = self
                .nodes
                .iter()
                .any(|n| n.commit_ts.is_some() && n.rows.contains(row));
            if !covered {
                fresh.insert(row);
            }
        }
        if fresh.is_empty() {
            return;
        }
        self.nodes.push(DeleteNode {
            rows: fresh,
            txn_id: TxnId::INVALID,
            commit_ts: Some(commit_ts),
            kind,
        });
    }

    /// Returns true if `row` is deleted at `snapshot` for `txn_id`.
    #[must_use]
    pub fn is_deleted(&self, row: u32, snapshot: Timestamp, txn_id: TxnId) -> bool {
        self.nodes.iter().any(|n| {
            n.rows.contains(row)
                && match n.commit_ts {
                    Some(ts) => ts <= snapshot,
                    None => n.txn_id == txn_id,
                }
        })
    }

    /// The delete mask visible at `snapshot` for `txn_id`.
    #[must_use]
    pub fn mask_at(&self, snapshot: Timestamp, txn_id: TxnId) -> Bitmap {
        let mut mask = Bitmap::new();
        for node in &self.nodes {
            let visible = match node.commit_ts {
                Some(ts) => ts <= snapshot,
                None => node.txn_id == txn_id,
            };
            if visible {
                mask.union(&node.rows);
            }
        }
        mask
    }

    /// Commits the pending nodes of `txn_id` at `commit_ts`.
    pub fn commit_txn(&mut self, txn_id: TxnId, commit_ts: Timestamp) {
        for node in &mut self.nodes {
            if node.commit_ts.is_none() && node.txn_id == txn_id {
                node.commit_ts = Some(commit_ts);
            }
        }
    }

    /// Drops the pending nodes of `txn_id`.
    pub fn rollback_txn(&mut self, txn_id: TxnId) {
        self.nodes
            .retain(|n| !(n.commit_ts.is_none() && n.txn_id == txn_id));
    }

    /// Returns `(commit_ts, rows, kind)` for nodes committed in
    /// `(from, to]`, oldest first.
    #[must_use]
    pub fn committed_in(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Vec<(Timestamp, Bitmap, DeleteKind)> {
        let mut out: Vec<(Timestamp, Bitmap, DeleteKind)> = self
            .nodes
            .iter()
            .filter_map(|n| match n.commit_ts {
                Some(ts) if ts > from && ts <= to => Some((ts, n.rows.clone(), n.kind)),
                _ => None,
            })
            .collect();
        out.sort_by_key(|(ts, _, _)| *ts);
        out
    }

    /// Prunes nodes committed at or before `upto`, after their rows were
    /// persisted into a delta-delete object.
    pub fn prune_committed(&mut self, upto: Timestamp) {
        self.nodes
            .retain(|n| !matches!(n.commit_ts, Some(ts) if ts <= upto));
    }

    /// Returns true if no node exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total rows in committed nodes.
    #[must_use]
    pub fn committed_cardinality(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.commit_ts.is_some())
            .map(|n| n.rows.cardinality())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(n: i64) -> Timestamp {
        Timestamp::new(n, 0)
    }

    fn rows(v: &[u32]) -> Bitmap {
        v.iter().copied().collect()
    }

    #[test]
    fn test_delete_and_visibility() {
        let mut chain = DeleteChain::new();
        chain
            .delete(rows(&[3, 4]), TxnId::new(1), ts(10), DeleteKind::Normal)
            .unwrap();

        // Pending: only the owner sees the deletion.
        assert!(chain.is_deleted(3, ts(10), TxnId::new(1)));
        assert!(!chain.is_deleted(3, ts(10), TxnId::new(2)));

        chain.commit_txn(TxnId::new(1), ts(20));
        assert!(chain.is_deleted(3, ts(20), TxnId::new(2)));
        assert!(!chain.is_deleted(3, ts(19), TxnId::new(2)));
    }

    #[test]
    fn test_ww_conflict_on_pending_overlap() {
        let mut chain = DeleteChain::new();
        chain
            .delete(rows(&[1]), TxnId::new(1), ts(10), DeleteKind::Normal)
            .unwrap();
        let err = chain
            .delete(rows(&[1]), TxnId::new(2), ts(10), DeleteKind::Normal)
            .unwrap_err();
        assert!(matches!(err, StrataError::WwConflict { .. }));
    }

    #[test]
    fn test_conflict_on_later_committed_delete() {
        let mut chain = DeleteChain::new();
        chain
            .delete(rows(&[1]), TxnId::new(1), ts(10), DeleteKind::Normal)
            .unwrap();
        chain.commit_txn(TxnId::new(1), ts(30));

        // Snapshot 20 never saw the delete at 30: conflict.
        let err = chain
            .delete(rows(&[1]), TxnId::new(2), ts(20), DeleteKind::Normal)
            .unwrap_err();
        assert!(matches!(err, StrataError::WwConflict { .. }));

        // Snapshot 40 saw it: the row is simply gone.
        let err = chain
            .delete(rows(&[1]), TxnId::new(3), ts(40), DeleteKind::Normal)
            .unwrap_err();
        assert!(matches!(err, StrataError::NotFound { .. }));
    }

    #[test]
    fn test_rollback() {
        let mut chain = DeleteChain::new();
        chain
            .delete(rows(&[1]), TxnId::new(1), ts(10), DeleteKind::Normal)
            .unwrap();
        chain.rollback_txn(TxnId::new(1));
        assert!(chain.is_empty());
        // Row is deletable again.
        chain
            .delete(rows(&[1]), TxnId::new(2), ts(10), DeleteKind::Normal)
            .unwrap();
    }

    #[test]
    fn test_committed_in_window() {
        let mut chain = DeleteChain::new();
        chain.insert_committed(&rows(&[1]), ts(10), DeleteKind::Normal);
        chain.insert_committed(&rows(&[2]), ts(20), DeleteKind::Normal);
        chain.insert_committed(&rows(&[3]), ts(30), DeleteKind::Compact);

        let window = chain.committed_in(ts(10), ts(30));
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].0, ts(20));
        assert_eq!(window[1].0, ts(30));
    }

    #[test]
    fn test_insert_committed_idempotent() {
        let mut chain = DeleteChain::new();
        chain.insert_committed(&rows(&[1, 2]), ts(10), DeleteKind::Normal);
        chain.insert_committed(&rows(&[2, 3]), ts(10), DeleteKind::Normal);
        assert_eq!(chain.committed_cardinality(), 3);
    }

    #[test]
    fn test_prune_committed() {
        let mut chain = DeleteChain::new();
        chain.insert_committed(&rows(&[1]), ts(10), DeleteKind::Normal);
        chain.insert_committed(&rows(&[2]), ts(20), DeleteKind::Normal);
        chain.prune_committed(ts(10));
        assert!(!chain.is_deleted(1, ts(100), TxnId::new(9)));
        assert!(chain.is_deleted(2, ts(100), TxnId::new(9)));
    }
}
