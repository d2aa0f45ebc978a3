//! Transaction write-sets.
//!
//! Mutations land directly in shared structures as pending nodes tagged
//! with the transaction id; the workspace is the bookkeeping that lets the
//! commit pipeline find them again: to validate, to build the WAL payload,
//! to publish logtail, and to undo on rollback.

use std::collections::{BTreeMap, HashMap};

use strata_batch::{AlterTableReq, Bitmap, Value};
use strata_common::types::{BlockId, DatabaseId, SegmentId, TableId, TenantId, Timestamp};
use strata_fs::Location;

/// One run of rows appended by this transaction.
#[derive(Debug, Clone)]
pub struct AppendRecord {
    /// Target block.
    pub block: BlockId,
    /// First row of the run.
    pub start: u32,
    /// Number of rows.
    pub count: u32,
}

/// A persisted block staged by a flush or merge task.
#[derive(Debug, Clone)]
pub struct MetaInstall {
    /// The new persisted block.
    pub block: BlockId,
    /// Column location.
    pub meta_loc: Location,
    /// Schema version the block was written under.
    pub schema_version: u32,
    /// Whether rows keep primary-key order.
    pub sorted: bool,
}

/// A delta-delete object staged by a delete flush.
#[derive(Debug, Clone)]
pub struct DeltaInstall {
    /// The target persisted block.
    pub block: BlockId,
    /// Persisted-delete location.
    pub delta_loc: Location,
    /// Resident deletes at or below this timestamp are covered.
    pub flushed_upto: Timestamp,
}

/// Per-table write-set.
#[derive(Debug, Default)]
pub struct TableWrites {
    /// Owning database.
    pub db_id: DatabaseId,
    /// Table created by this transaction.
    pub created: bool,
    /// Table dropped by this transaction.
    pub dropped: bool,
    /// Schema version before this transaction's first alteration.
    pub base_schema_version: Option<u32>,
    /// Alterations in order.
    pub alters: Vec<AlterTableReq>,
    /// Segments created by this transaction.
    pub created_segments: Vec<SegmentId>,
    /// Segments retired by a merge task.
    pub soft_deleted_segments: Vec<SegmentId>,
    /// Appendable blocks created by this transaction.
    pub created_blocks: Vec<BlockId>,
    /// Blocks retired by a flush or merge task.
    pub soft_deleted_blocks: Vec<BlockId>,
    /// Appended row runs.
    pub appends: Vec<AppendRecord>,
    /// Primary keys appended, for the prepare-time dedup re-check.
    pub appended_keys: Vec<Value>,
    /// Deleted rows per block.
    pub deletes: HashMap<BlockId, Bitmap>,
    /// Persisted blocks staged by tasks.
    pub installed_meta: Vec<MetaInstall>,
    /// Delta-delete objects staged by delete flushes.
    pub installed_delta: Vec<DeltaInstall>,
    /// Row transfer maps to install at commit: `(old block, old row →
    /// new address)`.
    pub transfers: Vec<(BlockId, HashMap<u32, (BlockId, u32)>)>,
}

impl TableWrites {
    /// Returns true when nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.created
            && !self.dropped
            && self.alters.is_empty()
            && self.created_segments.is_empty()
            && self.soft_deleted_segments.is_empty()
            && self.created_blocks.is_empty()
            && self.soft_deleted_blocks.is_empty()
            && self.appends.is_empty()
            && self.deletes.is_empty()
            && self.installed_meta.is_empty()
            && self.installed_delta.is_empty()
    }
}

/// The full write-set of one transaction.
#[derive(Debug, Default)]
pub struct Workspace {
    /// Databases created: `(id, tenant, name)`.
    pub created_dbs: Vec<(DatabaseId, TenantId, String)>,
    /// Databases dropped: `(id, tenant, name)`.
    pub dropped_dbs: Vec<(DatabaseId, TenantId, String)>,
    /// Per-table writes, ordered by table id for deterministic encoding.
    pub tables: BTreeMap<TableId, TableWrites>,
}

impl Workspace {
    /// The per-table write-set, created on first touch.
    pub fn table_mut(&mut self, table: TableId, db: DatabaseId) -> &mut TableWrites {
        let writes = self.tables.entry(table).or_default();
        writes.db_id = db;
        writes
    }

    /// Returns true when the transaction wrote nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created_dbs.is_empty()
            && self.dropped_dbs.is_empty()
            && self.tables.values().all(TableWrites::is_empty)
    }

    /// Every database id this transaction touched.
    #[must_use]
    pub fn touched_dbs(&self) -> Vec<DatabaseId> {
        let mut dbs: Vec<DatabaseId> = self
            .created_dbs
            .iter()
            .chain(self.dropped_dbs.iter())
            .map(|(id, _, _)| *id)
            .chain(self.tables.values().map(|w| w.db_id))
            .collect();
        dbs.sort();
        dbs.dedup();
        dbs
    }
}
