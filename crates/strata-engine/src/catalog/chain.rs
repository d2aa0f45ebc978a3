//! Per-entry commit chains.
//!
//! Every catalog entry owns an ordered vector of commit records, newest
//! first. The chain is the MVCC truth for the entry: visibility is a
//! newest-first scan for the first committed record at or below the
//! snapshot, write-write conflicts are records newer than a transaction's
//! start, and GC prunes the tail once no snapshot can reach it.

use strata_common::types::{Lsn, Timestamp, TxnId};
use strata_common::{StrataError, StrataResult};

/// The operation a commit record applied to its entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommitOp {
    /// Entry came into existence.
    Create = 1,
    /// Appendable block reached capacity.
    UpgradeFull = 2,
    /// Appendable data replaced by a persisted location.
    UpgradeClose = 3,
    /// Persisted data rewritten in primary-key order.
    UpgradeSorted = 4,
    /// Entry logically dropped; still reachable by id.
    SoftDelete = 5,
    /// Entry unreachable; awaiting physical GC.
    HardDelete = 6,
}

impl CommitOp {
    /// Decodes an op from its wire tag.
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Create),
            2 => Some(Self::UpgradeFull),
            3 => Some(Self::UpgradeClose),
            4 => Some(Self::UpgradeSorted),
            5 => Some(Self::SoftDelete),
            6 => Some(Self::HardDelete),
            _ => None,
        }
    }

    /// Returns the wire tag.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One commit record.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    /// The owning transaction.
    pub txn_id: TxnId,
    /// Commit timestamp; `None` while the transaction is pending.
    pub commit_ts: Option<Timestamp>,
    /// What the record did.
    pub op: CommitOp,
    /// WAL index of the record that produced this commit, when known.
    pub prev_index: Option<Lsn>,
}

/// What an entry looks like at a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Not yet created at the snapshot.
    NotCreated,
    /// Alive.
    Visible,
    /// Soft-deleted: hidden from name lookups, reachable by id.
    SoftDeleted,
    /// Hard-deleted: unreachable.
    Dropped,
}

/// An entry's commit chain, newest record first.
#[derive(Debug, Default)]
pub struct CommitChain {
    records: Vec<CommitInfo>,
}

impl CommitChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a chain seeded with a committed record, used by replay.
    #[must_use]
    pub fn committed(op: CommitOp, txn_id: TxnId, commit_ts: Timestamp) -> Self {
        Self {
            records: vec![CommitInfo {
                txn_id,
                commit_ts: Some(commit_ts),
                op,
                prev_index: None,
            }],
        }
    }

    /// Pushes a pending record owned by `txn_id`.
    pub fn push_pending(&mut self, op: CommitOp, txn_id: TxnId) {
        self.records.insert(
            0,
            CommitInfo {
                txn_id,
                commit_ts: None,
                op,
                prev_index: None,
            },
        );
    }

    /// Pushes an already-committed record, used by replay and GC.
    pub fn push_committed(&mut self, op: CommitOp, txn_id: TxnId, commit_ts: Timestamp) {
        self.records.insert(
            0,
            CommitInfo {
                txn_id,
                commit_ts: Some(commit_ts),
                op,
                prev_index: None,
            },
        );
    }

    /// Returns the newest record.
    #[must_use]
    pub fn head(&self) -> Option<&CommitInfo> {
        self.records.first()
    }

    /// Returns all records, newest first.
    #[must_use]
    pub fn records(&self) -> &[CommitInfo] {
        &self.records
    }

    /// Finds the record that governs visibility at `snapshot` for `txn_id`:
    /// the newest record that is either committed at or below the snapshot
    /// or pending and owned by `txn_id`.
    #[must_use]
    pub fn visible_record(&self, snapshot: Timestamp, txn_id: TxnId) -> Option<&CommitInfo> {
        self.records.iter().find(|rec| match rec.commit_ts {
            Some(ts) => ts <= snapshot,
            None => rec.txn_id == txn_id,
        })
    }

    /// Resolves the entry state at `snapshot` for `txn_id`.
    #[must_use]
    pub fn state_at(&self, snapshot: Timestamp, txn_id: TxnId) -> EntryState {
        match self.visible_record(snapshot, txn_id) {
            None => EntryState::NotCreated,
            Some(rec) => match rec.op {
                CommitOp::HardDelete => EntryState::Dropped,
                CommitOp::SoftDelete => EntryState::SoftDeleted,
                _ => EntryState::Visible,
            },
        }
    }

    /// Returns true if the entry is alive at `snapshot` for `txn_id`.
    #[must_use]
    pub fn is_visible(&self, snapshot: Timestamp, txn_id: TxnId) -> bool {
        self.state_at(snapshot, txn_id) == EntryState::Visible
    }

    /// The commit timestamp of the entry's creation, if committed.
    #[must_use]
    pub fn created_at(&self) -> Option<Timestamp> {
        self.records
            .iter()
            .rev()
            .find(|r| r.op == CommitOp::Create)
            .and_then(|r| r.commit_ts)
    }

    /// The commit timestamp of the entry's soft or hard delete, if any.
    #[must_use]
    pub fn deleted_at(&self) -> Option<Timestamp> {
        self.records
            .iter()
            .find(|r| matches!(r.op, CommitOp::SoftDelete | CommitOp::HardDelete))
            .and_then(|r| r.commit_ts)
    }

    /// Write-write conflict check for a transaction that started at
    /// `start_ts`: any record committed after the start, or pending from
    /// another transaction, conflicts.
    pub fn check_ww(&self, start_ts: Timestamp, txn_id: TxnId, entity: &str) -> StrataResult<()> {
        for rec in &self.records {
            match rec.commit_ts {
                Some(ts) if ts > start_ts => {
                    return Err(StrataError::ww_conflict(entity.to_string()));
                }
                None if rec.txn_id != txn_id => {
                    return Err(StrataError::ww_conflict(entity.to_string()));
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Commits every pending record owned by `txn_id` at `commit_ts`.
    pub fn commit_pending(&mut self, txn_id: TxnId, commit_ts: Timestamp, lsn: Option<Lsn>) {
        for rec in &mut self.records {
            if rec.commit_ts.is_none() && rec.txn_id == txn_id {
                rec.commit_ts = Some(commit_ts);
                rec.prev_index = lsn;
            }
        }
    }

    /// Drops every pending record owned by `txn_id`. Returns true if the
    /// chain is now empty (a rolled-back create: the entry never existed).
    pub fn rollback_pending(&mut self, txn_id: TxnId) -> bool {
        self.records
            .retain(|rec| !(rec.commit_ts.is_none() && rec.txn_id == txn_id));
        self.records.is_empty()
    }

    /// Returns true if any record is pending.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.records.iter().any(|r| r.commit_ts.is_none())
    }

    /// Prunes committed records strictly older than the newest record at
    /// or below `safe_ts`, keeping that record as the new tail. Pending
    /// records are never pruned.
    pub fn prune(&mut self, safe_ts: Timestamp) {
        let Some(keep) = self
            .records
            .iter()
            .position(|r| matches!(r.commit_ts, Some(ts) if ts <= safe_ts))
        else {
            return;
        };
        self.records.truncate(keep + 1);
    }
}
