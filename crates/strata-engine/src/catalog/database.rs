//! Database catalog entries.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use strata_common::types::{DatabaseId, TableId, TenantId, Timestamp, TxnId};

use crate::catalog::chain::{CommitChain, CommitOp};
use crate::catalog::names::NameIndex;
use crate::catalog::table::TableEntry;

/// A database entry: owns its tables and their name index.
#[derive(Debug)]
pub struct DatabaseEntry {
    id: DatabaseId,
    tenant: TenantId,
    name: String,
    chain: RwLock<CommitChain>,
    tables: DashMap<TableId, Arc<TableEntry>>,
    table_names: NameIndex,
}

impl DatabaseEntry {
    /// Creates a database pending under `txn_id`.
    #[must_use]
    pub fn new(id: DatabaseId, tenant: TenantId, name: String, txn_id: TxnId) -> Arc<Self> {
        let mut chain = CommitChain::new();
        chain.push_pending(CommitOp::Create, txn_id);
        Arc::new(Self {
            id,
            tenant,
            name,
            chain: RwLock::new(chain),
            tables: DashMap::new(),
            table_names: NameIndex::new(),
        })
    }

    /// Creates a committed database, used by replay and for the system
    /// database.
    #[must_use]
    pub fn new_committed(
        id: DatabaseId,
        tenant: TenantId,
        name: String,
        commit_ts: Timestamp,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            tenant,
            name,
            chain: RwLock::new(CommitChain::committed(
                CommitOp::Create,
                TxnId::INVALID,
                commit_ts,
            )),
            tables: DashMap::new(),
            table_names: NameIndex::new(),
        })
    }

    /// The database id.
    #[must_use]
    pub fn id(&self) -> DatabaseId {
        self.id
    }

    /// The owning tenant.
    #[must_use]
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// The database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The commit chain.
    #[must_use]
    pub fn chain(&self) -> &RwLock<CommitChain> {
        &self.chain
    }

    /// The table name index.
    #[must_use]
    pub fn table_names(&self) -> &NameIndex {
        &self.table_names
    }

    /// Inserts a table entry.
    pub fn add_table(&self, table: Arc<TableEntry>) {
        self.tables.insert(table.id(), table);
    }

    /// Removes a table entry, used by rollback and GC.
    pub fn remove_table(&self, id: TableId) {
        self.tables.remove(&id);
    }

    /// Looks up a table by id.
    #[must_use]
    pub fn table(&self, id: TableId) -> Option<Arc<TableEntry>> {
        self.tables.get(&id).map(|t| Arc::clone(&t))
    }

    /// All tables, unordered.
    #[must_use]
    pub fn tables_snapshot(&self) -> Vec<Arc<TableEntry>> {
        self.tables.iter().map(|t| Arc::clone(&t)).collect()
    }

    /// Returns true if the entry is alive at the snapshot.
    #[must_use]
    pub fn is_visible(&self, snapshot: Timestamp, txn_id: TxnId) -> bool {
        self.chain.read().is_visible(snapshot, txn_id)
    }
}
