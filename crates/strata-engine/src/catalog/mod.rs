//! The catalog tree.
//!
//! A mutable in-memory hierarchy Database → Table → Segment → Block.
//! Children are held in id-keyed maps and refer to parents by id; every
//! entry carries a commit chain ([`chain::CommitChain`]) that drives
//! snapshot visibility, write-write detection, and logical GC. Name
//! resolution goes through per-parent [`names::NameIndex`] multimaps that
//! tolerate rename and re-create.

pub mod block;
pub mod chain;
pub mod database;
pub mod names;
pub mod segment;
pub mod table;

use std::sync::Arc;

use dashmap::DashMap;
use strata_batch::{AlterRequest, AlterTableReq, Schema};
use strata_common::constants::SYSTEM_DB_NAME;
use strata_common::types::{DatabaseId, TableId, TenantId, Timestamp, TxnId};
use strata_common::{Sequence, StrataError, StrataResult};
use tracing::debug;

pub use block::BlockEntry;
pub use chain::{CommitChain, CommitInfo, CommitOp, EntryState};
pub use database::DatabaseEntry;
pub use names::NameIndex;
pub use segment::SegmentEntry;
pub use table::TableEntry;

/// The catalog.
#[derive(Debug)]
pub struct Catalog {
    databases: DashMap<DatabaseId, Arc<DatabaseEntry>>,
    db_names: NameIndex,
    sequence: Arc<Sequence>,
}

impl Catalog {
    /// Creates a catalog holding only the reserved system database.
    #[must_use]
    pub fn new(sequence: Arc<Sequence>) -> Self {
        let catalog = Self {
            databases: DashMap::new(),
            db_names: NameIndex::new(),
            sequence,
        };
        let sys = DatabaseEntry::new_committed(
            DatabaseId::SYSTEM,
            TenantId::SYS,
            SYSTEM_DB_NAME.to_string(),
            Timestamp::ZERO,
        );
        catalog.db_names.insert_committed(
            TenantId::SYS,
            SYSTEM_DB_NAME,
            DatabaseId::SYSTEM.as_u64(),
            Timestamp::ZERO,
        );
        catalog.databases.insert(DatabaseId::SYSTEM, sys);
        catalog
    }

    /// The id allocator.
    #[must_use]
    pub fn sequence(&self) -> &Arc<Sequence> {
        &self.sequence
    }

    // =========================================================================
    // Transactional operations
    // =========================================================================

    /// Creates a database pending under `txn_id`.
    pub fn create_database(
        &self,
        tenant: TenantId,
        name: &str,
        txn_id: TxnId,
        snapshot: Timestamp,
    ) -> StrataResult<Arc<DatabaseEntry>> {
        if name == SYSTEM_DB_NAME {
            return Err(StrataError::duplicate(name.to_string()));
        }
        let id = self.sequence.next_database_id();
        self.db_names
            .insert_pending(tenant, name, id.as_u64(), txn_id, snapshot)?;
        let entry = DatabaseEntry::new(id, tenant, name.to_string(), txn_id);
        self.databases.insert(id, Arc::clone(&entry));
        debug!(db = %id, name, "database created (pending)");
        Ok(entry)
    }

    /// Soft-deletes a database pending under `txn_id`.
    pub fn drop_database(
        &self,
        tenant: TenantId,
        name: &str,
        txn_id: TxnId,
        snapshot: Timestamp,
    ) -> StrataResult<Arc<DatabaseEntry>> {
        if name == SYSTEM_DB_NAME {
            return Err(StrataError::invalid_argument(
                "the system database cannot be dropped",
            ));
        }
        let id = self
            .db_names
            .resolve(tenant, name, snapshot, txn_id)
            .map(DatabaseId::new)
            .ok_or_else(|| StrataError::not_found(format!("database {name}")))?;
        let entry = self
            .databases
            .get(&id)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| StrataError::not_found(format!("database {name}")))?;
        {
            let mut chain = entry.chain().write();
            chain.check_ww(snapshot, txn_id, &format!("database {name}"))?;
            chain.push_pending(CommitOp::SoftDelete, txn_id);
        }
        self.db_names
            .drop_pending(tenant, name, id.as_u64(), txn_id)?;
        Ok(entry)
    }

    /// Resolves a database by name at a snapshot. The system database is
    /// visible to every tenant.
    pub fn database_by_name(
        &self,
        tenant: TenantId,
        name: &str,
        snapshot: Timestamp,
        txn_id: TxnId,
    ) -> StrataResult<Arc<DatabaseEntry>> {
        let lookup_tenant = if name == SYSTEM_DB_NAME {
            TenantId::SYS
        } else {
            tenant
        };
        let id = self
            .db_names
            .resolve(lookup_tenant, name, snapshot, txn_id)
            .map(DatabaseId::new)
            .ok_or_else(|| StrataError::not_found(format!("database {name}")))?;
        self.databases
            .get(&id)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| StrataError::not_found(format!("database {name}")))
    }

    /// Resolves a database by id. Soft-deleted entries remain reachable.
    pub fn database_by_id(
        &self,
        id: DatabaseId,
        snapshot: Timestamp,
        txn_id: TxnId,
    ) -> StrataResult<Arc<DatabaseEntry>> {
        let entry = self
            .databases
            .get(&id)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| StrataError::not_found(format!("database {id}")))?;
        let state = entry.chain().read().state_at(snapshot, txn_id);
        match state {
            EntryState::Visible | EntryState::SoftDeleted => Ok(entry),
            _ => Err(StrataError::not_found(format!("database {id}"))),
        }
    }

    /// Looks up a database entry regardless of visibility, for replay and
    /// internal plumbing.
    #[must_use]
    pub fn database_raw(&self, id: DatabaseId) -> Option<Arc<DatabaseEntry>> {
        self.databases.get(&id).map(|e| Arc::clone(&e))
    }

    /// All database entries, unordered.
    #[must_use]
    pub fn databases_snapshot(&self) -> Vec<Arc<DatabaseEntry>> {
        self.databases.iter().map(|e| Arc::clone(&e)).collect()
    }

    /// Removes a database entry, used by rollback and GC.
    pub fn remove_database(&self, id: DatabaseId) {
        self.databases.remove(&id);
    }

    /// Creates a table pending under `txn_id`.
    pub fn create_table(
        &self,
        db: &Arc<DatabaseEntry>,
        tenant: TenantId,
        schema: Schema,
        txn_id: TxnId,
        snapshot: Timestamp,
    ) -> StrataResult<Arc<TableEntry>> {
        let id = self.sequence.next_table_id();
        db.table_names()
            .insert_pending(tenant, &schema.name, id.as_u64(), txn_id, snapshot)?;
        let entry = TableEntry::new(id, db.id(), tenant, Arc::new(schema), txn_id);
        db.add_table(Arc::clone(&entry));
        debug!(db = %db.id(), table = %id, "table created (pending)");
        Ok(entry)
    }

    /// Soft-deletes a table pending under `txn_id`.
    pub fn drop_table(
        &self,
        db: &Arc<DatabaseEntry>,
        tenant: TenantId,
        name: &str,
        txn_id: TxnId,
        snapshot: Timestamp,
    ) -> StrataResult<Arc<TableEntry>> {
        let id = db
            .table_names()
            .resolve(tenant, name, snapshot, txn_id)
            .map(TableId::new)
            .ok_or_else(|| StrataError::not_found(format!("table {name}")))?;
        let entry = db
            .table(id)
            .ok_or_else(|| StrataError::not_found(format!("table {name}")))?;
        {
            let mut chain = entry.chain().write();
            chain.check_ww(snapshot, txn_id, &format!("table {name}"))?;
            chain.push_pending(CommitOp::SoftDelete, txn_id);
        }
        db.table_names()
            .drop_pending(tenant, name, id.as_u64(), txn_id)?;
        Ok(entry)
    }

    /// Resolves a table by name at a snapshot.
    pub fn table_by_name(
        &self,
        db: &Arc<DatabaseEntry>,
        tenant: TenantId,
        name: &str,
        snapshot: Timestamp,
        txn_id: TxnId,
    ) -> StrataResult<Arc<TableEntry>> {
        let id = db
            .table_names()
            .resolve(tenant, name, snapshot, txn_id)
            .map(TableId::new)
            .ok_or_else(|| StrataError::not_found(format!("table {name}")))?;
        db.table(id)
            .ok_or_else(|| StrataError::not_found(format!("table {name}")))
    }

    /// Resolves a table by id. Soft-deleted entries remain reachable.
    pub fn table_by_id(
        &self,
        db: &Arc<DatabaseEntry>,
        id: TableId,
        snapshot: Timestamp,
        txn_id: TxnId,
    ) -> StrataResult<Arc<TableEntry>> {
        let entry = db
            .table(id)
            .ok_or_else(|| StrataError::not_found(format!("table {id}")))?;
        let state = entry.chain().read().state_at(snapshot, txn_id);
        match state {
            EntryState::Visible | EntryState::SoftDeleted => Ok(entry),
            _ => Err(StrataError::not_found(format!("table {id}"))),
        }
    }

    /// Validates and stages an alteration: checks the entry chain for
    /// write-write conflicts, applies the request to a copy of the latest
    /// schema, stages any rename in the name index, installs the new
    /// version, and leaves a pending upgrade record on the chain.
    ///
    /// Steps are ordered so every failure leaves no stray pending state.
    pub fn stage_alter(
        &self,
        db: &Arc<DatabaseEntry>,
        table: &Arc<TableEntry>,
        tenant: TenantId,
        alter: &AlterTableReq,
        txn_id: TxnId,
        snapshot: Timestamp,
    ) -> StrataResult<()> {
        table
            .chain()
            .read()
            .check_ww(snapshot, txn_id, &format!("table {}", table.id()))?;

        let mut schema = (*table.schema()).clone();
        schema.apply_alter(alter)?;

        if let AlterRequest::RenameTable { old, new } = &alter.req {
            db.table_names()
                .drop_pending(tenant, old, table.id().as_u64(), txn_id)?;
            if let Err(err) = db.table_names().insert_pending(
                tenant,
                new,
                table.id().as_u64(),
                txn_id,
                snapshot,
            ) {
                db.table_names()
                    .undo_drop_pending(tenant, old, table.id().as_u64(), txn_id);
                return Err(err);
            }
        }

        table.install_schema(Arc::new(schema))?;
        table.chain().write().push_pending(CommitOp::UpgradeFull, txn_id);
        Ok(())
    }

    /// The database name index, for commit/rollback plumbing.
    #[must_use]
    pub fn db_names(&self) -> &NameIndex {
        &self.db_names
    }

    // =========================================================================
    // Replay
    // =========================================================================

    /// Installs a committed database, skipping existing ids.
    pub fn ensure_database_committed(
        &self,
        id: DatabaseId,
        tenant: TenantId,
        name: &str,
        commit_ts: Timestamp,
    ) {
        if self.databases.contains_key(&id) {
            return;
        }
        let entry = DatabaseEntry::new_committed(id, tenant, name.to_string(), commit_ts);
        self.db_names
            .insert_committed(tenant, name, id.as_u64(), commit_ts);
        self.databases.insert(id, entry);
        self.sequence.observe_database_id(id);
    }

    /// Applies a committed database drop, skipping already-dropped entries.
    pub fn drop_database_committed(&self, id: DatabaseId, commit_ts: Timestamp) {
        let Some(entry) = self.database_raw(id) else {
            return;
        };
        let mut chain = entry.chain().write();
        if chain.deleted_at().is_none() {
            chain.push_committed(CommitOp::SoftDelete, TxnId::INVALID, commit_ts);
            self.db_names
                .drop_committed(entry.tenant(), entry.name(), id.as_u64(), commit_ts);
        }
    }

    /// Installs a committed table, skipping existing ids.
    pub fn ensure_table_committed(
        &self,
        db_id: DatabaseId,
        id: TableId,
        tenant: TenantId,
        schema: Schema,
        commit_ts: Timestamp,
    ) -> StrataResult<()> {
        let db = self
            .database_raw(db_id)
            .ok_or_else(|| StrataError::corruption(format!("replayed table in unknown db {db_id}")))?;
        if db.table(id).is_some() {
            return Ok(());
        }
        db.table_names()
            .insert_committed(tenant, &schema.name, id.as_u64(), commit_ts);
        let entry = TableEntry::new_committed(id, db_id, tenant, Arc::new(schema), commit_ts);
        db.add_table(entry);
        self.sequence.observe_table_id(id);
        Ok(())
    }

    /// Applies a committed table drop.
    pub fn drop_table_committed(&self, db_id: DatabaseId, id: TableId, commit_ts: Timestamp) {
        let Some(db) = self.database_raw(db_id) else {
            return;
        };
        let Some(table) = db.table(id) else {
            return;
        };
        let mut chain = table.chain().write();
        if chain.deleted_at().is_none() {
            chain.push_committed(CommitOp::SoftDelete, TxnId::INVALID, commit_ts);
            let name = table.schema().name.clone();
            db.table_names()
                .drop_committed(table.tenant(), &name, id.as_u64(), commit_ts);
        }
    }

    /// Applies a committed alteration. Returns false when the request is
    /// already reflected in the schema version, keeping replay idempotent.
    pub fn apply_alter_committed(
        &self,
        db_id: DatabaseId,
        table_id: TableId,
        alter: &AlterTableReq,
        commit_ts: Timestamp,
    ) -> StrataResult<bool> {
        let Some(db) = self.database_raw(db_id) else {
            return Ok(false);
        };
        let Some(table) = db.table(table_id) else {
            return Ok(false);
        };
        let current = table.schema();
        if current.version > alter.expected_version {
            return Ok(false);
        }
        let mut schema = (*current).clone();
        schema.apply_alter(alter)?;
        if let AlterRequest::RenameTable { old, new } = &alter.req {
            db.table_names()
                .drop_committed(table.tenant(), old, table_id.as_u64(), commit_ts);
            db.table_names()
                .insert_committed(table.tenant(), new, table_id.as_u64(), commit_ts);
        }
        let mut chain = table.chain().write();
        chain.push_committed(CommitOp::UpgradeFull, TxnId::INVALID, commit_ts);
        drop(chain);
        table.install_schema(Arc::new(schema))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_batch::LogicalType;

    fn ts(n: i64) -> Timestamp {
        Timestamp::new(n, 0)
    }

    fn catalog() -> Catalog {
        Catalog::new(Arc::new(Sequence::new()))
    }

    fn schema(name: &str) -> Schema {
        Schema::new(name, &[("id", LogicalType::Int64, true)]).unwrap()
    }

    #[test]
    fn test_system_db_always_visible() {
        let cat = catalog();
        let db = cat
            .database_by_name(TenantId::new(7), SYSTEM_DB_NAME, ts(0), TxnId::new(1))
            .unwrap();
        assert!(db.id().is_system());
    }

    #[test]
    fn test_create_commit_visibility() {
        let cat = catalog();
        let txn = TxnId::new(1);
        let db = cat
            .create_database(TenantId::SYS, "db1", txn, ts(0))
            .unwrap();

        // Pending: other transactions cannot see it.
        assert!(cat
            .database_by_name(TenantId::SYS, "db1", ts(100), TxnId::new(2))
            .is_err());
        assert!(cat
            .database_by_name(TenantId::SYS, "db1", ts(100), txn)
            .is_ok());

        db.chain().write().commit_pending(txn, ts(10), None);
        cat.db_names().commit_txn(txn, ts(10));
        assert!(cat
            .database_by_name(TenantId::SYS, "db1", ts(10), TxnId::new(2))
            .is_ok());
        assert!(cat
            .database_by_name(TenantId::SYS, "db1", ts(9), TxnId::new(2))
            .is_err());
    }

    #[test]
    fn test_drop_hides_name_keeps_id() {
        let cat = catalog();
        let t1 = TxnId::new(1);
        let db = cat.create_database(TenantId::SYS, "db1", t1, ts(0)).unwrap();
        db.chain().write().commit_pending(t1, ts(10), None);
        cat.db_names().commit_txn(t1, ts(10));

        let t2 = TxnId::new(2);
        cat.drop_database(TenantId::SYS, "db1", t2, ts(20)).unwrap();
        db.chain().write().commit_pending(t2, ts(30), None);
        cat.db_names().commit_txn(t2, ts(30));

        let reader = TxnId::new(3);
        assert!(cat
            .database_by_name(TenantId::SYS, "db1", ts(30), reader)
            .is_err());
        // Id lookup still reaches the soft-deleted entry.
        assert!(cat.database_by_id(db.id(), ts(30), reader).is_ok());
        // Old snapshots still resolve the name.
        assert!(cat
            .database_by_name(TenantId::SYS, "db1", ts(20), reader)
            .is_ok());
    }

    #[test]
    fn test_concurrent_drop_is_ww_conflict() {
        let cat = catalog();
        let t1 = TxnId::new(1);
        let db = cat.create_database(TenantId::SYS, "db1", t1, ts(0)).unwrap();
        db.chain().write().commit_pending(t1, ts(10), None);
        cat.db_names().commit_txn(t1, ts(10));

        let t2 = TxnId::new(2);
        cat.drop_database(TenantId::SYS, "db1", t2, ts(20)).unwrap();

        let t3 = TxnId::new(3);
        let err = cat
            .drop_database(TenantId::SYS, "db1", t3, ts(20))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_table_lifecycle() {
        let cat = catalog();
        let t1 = TxnId::new(1);
        let db = cat.create_database(TenantId::SYS, "db1", t1, ts(0)).unwrap();
        let table = cat
            .create_table(&db, TenantId::SYS, schema("t1"), t1, ts(0))
            .unwrap();
        db.chain().write().commit_pending(t1, ts(10), None);
        table.chain().write().commit_pending(t1, ts(10), None);
        cat.db_names().commit_txn(t1, ts(10));
        db.table_names().commit_txn(t1, ts(10));

        let reader = TxnId::new(9);
        let found = cat
            .table_by_name(&db, TenantId::SYS, "t1", ts(10), reader)
            .unwrap();
        assert_eq!(found.id(), table.id());
    }

    #[test]
    fn test_stage_alter_stale_version() {
        let cat = catalog();
        let t1 = TxnId::new(1);
        let db = cat.create_database(TenantId::SYS, "db1", t1, ts(0)).unwrap();
        let table = cat
            .create_table(&db, TenantId::SYS, schema("t1"), t1, ts(0))
            .unwrap();
        db.chain().write().commit_pending(t1, ts(10), None);
        table.chain().write().commit_pending(t1, ts(10), None);
        cat.db_names().commit_txn(t1, ts(10));
        db.table_names().commit_txn(t1, ts(10));

        let err = cat
            .stage_alter(
                &db,
                &table,
                TenantId::SYS,
                &AlterTableReq {
                    expected_version: 5,
                    req: AlterRequest::UpdateComment("x".into()),
                },
                TxnId::new(2),
                ts(20),
            )
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_replay_idempotent() {
        let cat = catalog();
        cat.ensure_database_committed(DatabaseId::new(5), TenantId::SYS, "db1", ts(10));
        cat.ensure_database_committed(DatabaseId::new(5), TenantId::SYS, "db1", ts(10));
        assert_eq!(cat.databases_snapshot().len(), 2); // system + db1

        cat.ensure_table_committed(
            DatabaseId::new(5),
            TableId::new(3),
            TenantId::SYS,
            schema("t1"),
            ts(11),
        )
        .unwrap();
        cat.ensure_table_committed(
            DatabaseId::new(5),
            TableId::new(3),
            TenantId::SYS,
            schema("t1"),
            ts(11),
        )
        .unwrap();
        let db = cat.database_raw(DatabaseId::new(5)).unwrap();
        assert_eq!(db.tables_snapshot().len(), 1);

        // Sequence resumes above replayed ids.
        assert!(cat.sequence().next_database_id().as_u64() > 5);
        assert!(cat.sequence().next_table_id().as_u64() > 3);
    }
}
