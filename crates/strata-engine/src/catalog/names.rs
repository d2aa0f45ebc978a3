//! Name resolution index.
//!
//! A per-parent multimap from `(tenant, name)` to the entries that have
//! carried that name. Each record keeps `(id, create_ts, drop_ts)` so the
//! index tolerates rename and re-create: after `t1` is renamed to `t2`, a
//! new table named `t1` coexists with the old id, and snapshot readers
//! still resolve the name they saw.

use dashmap::DashMap;
use strata_common::types::{TenantId, Timestamp, TxnId};
use strata_common::{StrataError, StrataResult};

/// One binding of a name to an entry id.
#[derive(Debug, Clone)]
struct NameRecord {
    id: u64,
    created_by: TxnId,
    create_ts: Option<Timestamp>,
    dropped_by: Option<TxnId>,
    drop_ts: Option<Timestamp>,
}

impl NameRecord {
    fn visible(&self, snapshot: Timestamp, txn_id: TxnId) -> bool {
        let born = match self.create_ts {
            Some(ts) => ts <= snapshot,
            None => self.created_by == txn_id,
        };
        if !born {
            return false;
        }
        match (self.drop_ts, self.dropped_by) {
            (Some(ts), _) => ts > snapshot,
            (None, Some(by)) => by != txn_id,
            (None, None) => true,
        }
    }

    fn may_conflict(&self, txn_id: TxnId, snapshot: Timestamp) -> bool {
        // A binding still pending from another transaction, or committed
        // alive past our snapshot, blocks reuse of the name.
        match self.create_ts {
            None => self.created_by != txn_id,
            Some(_) => match self.drop_ts {
                // Dropped before our snapshot frees the name; a drop we
                // cannot see yet means the binding is still alive to us.
                Some(drop_ts) => drop_ts > snapshot,
                None => match self.dropped_by {
                    // Our own pending drop frees the name for us; another
                    // transaction's pending drop does not.
                    Some(by) => by != txn_id,
                    None => true,
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NameKey {
    tenant: TenantId,
    name: String,
}

/// The name index.
#[derive(Debug, Default)]
pub struct NameIndex {
    entries: DashMap<NameKey, Vec<NameRecord>>,
}

impl NameIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(tenant: TenantId, name: &str) -> NameKey {
        NameKey {
            tenant,
            name: name.to_string(),
        }
    }

    /// Binds `name` to `id` pending under `txn_id`. Fails when a live or
    /// pending binding exists.
    pub fn insert_pending(
        &self,
        tenant: TenantId,
        name: &str,
        id: u64,
        txn_id: TxnId,
        snapshot: Timestamp,
    ) -> StrataResult<()> {
        let mut records = self.entries.entry(Self::key(tenant, name)).or_default();
        for rec in records.iter() {
            if rec.created_by != txn_id || rec.create_ts.is_some() {
                if rec.may_conflict(txn_id, snapshot) {
                    return if rec.create_ts.is_none() {
                        Err(StrataError::ww_conflict(format!("name {name}")))
                    } else {
                        Err(StrataError::duplicate(name.to_string()))
                    };
                }
            } else if rec.dropped_by != Some(txn_id) {
                // Our own pending binding is still alive.
                return Err(StrataError::duplicate(name.to_string()));
            }
        }
        records.push(NameRecord {
            id,
            created_by: txn_id,
            create_ts: None,
            dropped_by: None,
            drop_ts: None,
        });
        Ok(())
    }

    /// Inserts a committed binding, used by replay.
    pub fn insert_committed(
        &self,
        tenant: TenantId,
        name: &str,
        id: u64,
        create_ts: Timestamp,
    ) {
        let mut records = self.entries.entry(Self::key(tenant, name)).or_default();
        if records
            .iter()
            .any(|r| r.id == id && r.create_ts == Some(create_ts))
        {
            return;
        }
        records.push(NameRecord {
            id,
            created_by: TxnId::INVALID,
            create_ts: Some(create_ts),
            dropped_by: None,
            drop_ts: None,
        });
    }

    /// Marks the live binding of `name` as dropped, pending under `txn_id`.
    pub fn drop_pending(
        &self,
        tenant: TenantId,
        name: &str,
        id: u64,
        txn_id: TxnId,
    ) -> StrataResult<()> {
        let mut records = self
            .entries
            .get_mut(&Self::key(tenant, name))
            .ok_or_else(|| StrataError::not_found(name.to_string()))?;
        for rec in records.iter_mut() {
            if rec.id == id && rec.drop_ts.is_none() && rec.dropped_by.is_none() {
                rec.dropped_by = Some(txn_id);
                return Ok(());
            }
        }
        Err(StrataError::not_found(name.to_string()))
    }

    /// Reverts a pending drop staged by `txn_id`, used when a later step
    /// of the same operation fails.
    pub fn undo_drop_pending(&self, tenant: TenantId, name: &str, id: u64, txn_id: TxnId) {
        if let Some(mut records) = self.entries.get_mut(&Self::key(tenant, name)) {
            for rec in records.iter_mut() {
                if rec.id == id && rec.drop_ts.is_none() && rec.dropped_by == Some(txn_id) {
                    rec.dropped_by = None;
                    return;
                }
            }
        }
    }

    /// Marks a binding dropped at a committed timestamp, used by replay.
    pub fn drop_committed(&self, tenant: TenantId, name: &str, id: u64, drop_ts: Timestamp) {
        if let Some(mut records) = self.entries.get_mut(&Self::key(tenant, name)) {
            for rec in records.iter_mut() {
                if rec.id == id && rec.drop_ts.is_none() {
                    rec.drop_ts = Some(drop_ts);
                    return;
                }
            }
        }
    }

    /// Resolves `name` at a snapshot. Soft-deleted bindings are hidden.
    #[must_use]
    pub fn resolve(
        &self,
        tenant: TenantId,
        name: &str,
        snapshot: Timestamp,
        txn_id: TxnId,
    ) -> Option<u64> {
        let records = self.entries.get(&Self::key(tenant, name))?;
        records
            .iter()
            .rev()
            .find(|r| r.visible(snapshot, txn_id))
            .map(|r| r.id)
    }

    /// Commits every pending record owned by `txn_id` at `commit_ts`.
    pub fn commit_txn(&self, txn_id: TxnId, commit_ts: Timestamp) {
        for mut entry in self.entries.iter_mut() {
            for rec in entry.value_mut().iter_mut() {
                if rec.create_ts.is_none() && rec.created_by == txn_id {
                    rec.create_ts = Some(commit_ts);
                }
                if rec.drop_ts.is_none() && rec.dropped_by == Some(txn_id) {
                    rec.drop_ts = Some(commit_ts);
                }
            }
        }
    }

    /// Reverts every pending record owned by `txn_id`.
    pub fn rollback_txn(&self, txn_id: TxnId) {
        for mut entry in self.entries.iter_mut() {
            entry
                .value_mut()
                .retain(|rec| !(rec.create_ts.is_none() && rec.created_by == txn_id));
            for rec in entry.value_mut().iter_mut() {
                if rec.drop_ts.is_none() && rec.dropped_by == Some(txn_id) {
                    rec.dropped_by = None;
                }
            }
        }
    }

    /// Removes bindings of entries hard-deleted at or before `safe_ts`.
    pub fn gc(&self, safe_ts: Timestamp) {
        self.entries.retain(|_, records| {
            records.retain(|r| match r.drop_ts {
                Some(ts) => ts > safe_ts,
                None => true,
            });
            !records.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(n: i64) -> Timestamp {
        Timestamp::new(n, 0)
    }

    const T: TenantId = TenantId::SYS;

    #[test]
    fn test_pending_visible_to_owner_only() {
        let idx = NameIndex::new();
        idx.insert_pending(T, "t1", 7, TxnId::new(1), ts(5)).unwrap();

        assert_eq!(idx.resolve(T, "t1", ts(100), TxnId::new(1)), Some(7));
        assert_eq!(idx.resolve(T, "t1", ts(100), TxnId::new(2)), None);

        idx.commit_txn(TxnId::new(1), ts(10));
        assert_eq!(idx.resolve(T, "t1", ts(10), TxnId::new(2)), Some(7));
        assert_eq!(idx.resolve(T, "t1", ts(9), TxnId::new(2)), None);
    }

    #[test]
    fn test_duplicate_rejected() {
        let idx = NameIndex::new();
        idx.insert_pending(T, "t1", 1, TxnId::new(1), ts(0)).unwrap();
        idx.commit_txn(TxnId::new(1), ts(5));

        let err = idx
            .insert_pending(T, "t1", 2, TxnId::new(2), ts(10))
            .unwrap_err();
        assert!(matches!(err, StrataError::DuplicateEntry { .. }));
    }

    #[test]
    fn test_pending_other_is_conflict() {
        let idx = NameIndex::new();
        idx.insert_pending(T, "t1", 1, TxnId::new(1), ts(0)).unwrap();

        let err = idx
            .insert_pending(T, "t1", 2, TxnId::new(2), ts(0))
            .unwrap_err();
        assert!(matches!(err, StrataError::WwConflict { .. }));
    }

    #[test]
    fn test_rename_frees_name() {
        let idx = NameIndex::new();
        idx.insert_pending(T, "t1", 1, TxnId::new(1), ts(0)).unwrap();
        idx.commit_txn(TxnId::new(1), ts(5));

        // Rename: drop (t1, 1), insert (t2, 1).
        idx.drop_pending(T, "t1", 1, TxnId::new(2)).unwrap();
        idx.insert_pending(T, "t2", 1, TxnId::new(2), ts(6)).unwrap();
        idx.commit_txn(TxnId::new(2), ts(10));

        // A new table may take the old name.
        idx.insert_pending(T, "t1", 3, TxnId::new(3), ts(11)).unwrap();
        idx.commit_txn(TxnId::new(3), ts(15));

        let reader = TxnId::new(9);
        assert_eq!(idx.resolve(T, "t1", ts(15), reader), Some(3));
        assert_eq!(idx.resolve(T, "t2", ts(15), reader), Some(1));
        // Old snapshot still sees the original binding.
        assert_eq!(idx.resolve(T, "t1", ts(7), reader), Some(1));
        assert_eq!(idx.resolve(T, "t2", ts(7), reader), Some(1));
    }

    #[test]
    fn test_rollback_removes_pending() {
        let idx = NameIndex::new();
        idx.insert_pending(T, "t1", 1, TxnId::new(1), ts(0)).unwrap();
        idx.rollback_txn(TxnId::new(1));
        assert_eq!(idx.resolve(T, "t1", ts(100), TxnId::new(1)), None);
        // Name is free again.
        idx.insert_pending(T, "t1", 2, TxnId::new(2), ts(0)).unwrap();
    }

    #[test]
    fn test_tenant_scoping() {
        let idx = NameIndex::new();
        let a = TenantId::new(1);
        let b = TenantId::new(2);
        idx.insert_pending(a, "t", 1, TxnId::new(1), ts(0)).unwrap();
        idx.insert_pending(b, "t", 2, TxnId::new(2), ts(0)).unwrap();
        idx.commit_txn(TxnId::new(1), ts(5));
        idx.commit_txn(TxnId::new(2), ts(5));

        let reader = TxnId::new(9);
        assert_eq!(idx.resolve(a, "t", ts(5), reader), Some(1));
        assert_eq!(idx.resolve(b, "t", ts(5), reader), Some(2));
    }
}
