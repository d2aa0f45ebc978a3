//! The logtail producer.
//!
//! Every commit publishes, per affected table, batches of inserts,
//! deletes, and meta changes tagged with the commit timestamp. A
//! subscriber reads a `(have, want]` window per table; delivery within a
//! table is ordered by commit timestamp.
//!
//! Data batches carry one column per data attribute plus the reserved
//! columns `rowid` and `commit_ts`; delete batches add `aborted` and the
//! primary key.

pub mod systable;

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use strata_batch::{Batch, Value};
use strata_common::types::{BlockId, TableId, Timestamp};

/// Whether a logtail command carries inserts or deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Rows inserted (data or metadata).
    Insert,
    /// Rows deleted.
    Delete,
}

/// One published command.
#[derive(Debug, Clone)]
pub struct LogtailRecord {
    /// Commit timestamp of the producing transaction.
    pub commit_ts: Timestamp,
    /// Insert or delete.
    pub entry_type: EntryType,
    /// The affected table.
    pub table_id: TableId,
    /// Table name at commit time.
    pub table_name: String,
    /// The payload batch, reserved columns included.
    pub batch: Batch,
}

/// The answer to a logtail read.
#[derive(Debug, Clone)]
pub struct SyncLogtailResp {
    /// Commands with `commit_ts` in the requested window, in order.
    pub commands: Vec<LogtailRecord>,
}

/// The logtail producer.
#[derive(Debug, Default)]
pub struct LogtailMgr {
    tables: DashMap<TableId, Arc<RwLock<Vec<LogtailRecord>>>>,
}

impl LogtailMgr {
    /// Creates an empty producer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes one record. Records for a table must arrive in commit
    /// order, which the commit critical section guarantees.
    pub fn publish(&self, record: LogtailRecord) {
        let tail = self
            .tables
            .entry(record.table_id)
            .or_insert_with(|| Arc::new(RwLock::new(Vec::new())))
            .clone();
        tail.write().push(record);
    }

    /// Reads all commands for `table_id` with `commit_ts` in
    /// `(have, want]`.
    #[must_use]
    pub fn sync(&self, have: Timestamp, want: Timestamp, table_id: TableId) -> SyncLogtailResp {
        let commands = match self.tables.get(&table_id) {
            Some(tail) => tail
                .read()
                .iter()
                .filter(|r| r.commit_ts > have && r.commit_ts <= want)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        SyncLogtailResp { commands }
    }

    /// Drops records at or below `upto`, once a checkpoint covers them.
    pub fn prune(&self, upto: Timestamp) {
        for tail in self.tables.iter() {
            tail.write().retain(|r| r.commit_ts > upto);
        }
    }

    /// Number of retained records across all tables.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.tables.iter().map(|t| t.read().len()).sum()
    }
}

/// Encodes a physical row address for the reserved `rowid` column.
#[must_use]
pub fn rowid_value(block: BlockId, row: u32) -> Value {
    let mut raw = Vec::with_capacity(24);
    raw.extend_from_slice(&block.to_be_bytes());
    raw.extend_from_slice(&row.to_be_bytes());
    Value::Binary(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_batch::mock::{mock_batch, mock_schema};
    use strata_common::types::SegmentId;

    fn ts(n: i64) -> Timestamp {
        Timestamp::new(n, 0)
    }

    fn record(table: u64, commit: i64) -> LogtailRecord {
        let schema = mock_schema(2, 0);
        LogtailRecord {
            commit_ts: ts(commit),
            entry_type: EntryType::Insert,
            table_id: TableId::new(table),
            table_name: "t".into(),
            batch: mock_batch(&schema, 1),
        }
    }

    #[test]
    fn test_window_read() {
        let mgr = LogtailMgr::new();
        for commit in [10, 20, 30, 40] {
            mgr.publish(record(1, commit));
        }
        mgr.publish(record(2, 25));

        let resp = mgr.sync(ts(10), ts(30), TableId::new(1));
        let tss: Vec<i64> = resp.commands.iter().map(|c| c.commit_ts.physical).collect();
        // (10, 30]: excludes the left edge, includes the right.
        assert_eq!(tss, vec![20, 30]);

        // Other tables do not leak in.
        let resp = mgr.sync(ts(0), ts(100), TableId::new(2));
        assert_eq!(resp.commands.len(), 1);
    }

    #[test]
    fn test_prune() {
        let mgr = LogtailMgr::new();
        for commit in [10, 20, 30] {
            mgr.publish(record(1, commit));
        }
        mgr.prune(ts(20));
        assert_eq!(mgr.record_count(), 1);
        let resp = mgr.sync(ts(0), ts(100), TableId::new(1));
        assert_eq!(resp.commands[0].commit_ts, ts(30));
    }

    #[test]
    fn test_rowid_encoding() {
        let v = rowid_value(BlockId::new(SegmentId::new(7), 1), 42);
        match v {
            Value::Binary(raw) => assert_eq!(raw.len(), 24),
            _ => panic!("rowid must be binary"),
        }
    }
}
