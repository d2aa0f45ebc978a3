//! Table catalog entries.
//!
//! A table owns its segments and the immutable history of its schema
//! versions. Blocks written under an old schema keep an `Arc` to that
//! version; readers map requested columns by seqnum.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use strata_batch::{AlterTableReq, Schema};
use strata_common::types::{BlockId, DatabaseId, SegmentId, TableId, TenantId, Timestamp, TxnId};
use strata_common::{StrataError, StrataResult};

use crate::catalog::chain::{CommitChain, CommitOp};
use crate::catalog::segment::SegmentEntry;

/// A table entry.
#[derive(Debug)]
pub struct TableEntry {
    id: TableId,
    db_id: DatabaseId,
    tenant: TenantId,
    chain: RwLock<CommitChain>,
    schema: RwLock<Arc<Schema>>,
    schema_versions: RwLock<Vec<Arc<Schema>>>,
    alter_log: RwLock<Vec<(Timestamp, AlterTableReq)>>,
    segments: RwLock<BTreeMap<SegmentId, Arc<SegmentEntry>>>,
}

impl TableEntry {
    /// Creates a table pending under `txn_id`.
    #[must_use]
    pub fn new(
        id: TableId,
        db_id: DatabaseId,
        tenant: TenantId,
        schema: Arc<Schema>,
        txn_id: TxnId,
    ) -> Arc<Self> {
        let mut chain = CommitChain::new();
        chain.push_pending(CommitOp::Create, txn_id);
        Arc::new(Self {
            id,
            db_id,
            tenant,
            chain: RwLock::new(chain),
            schema: RwLock::new(Arc::clone(&schema)),
            schema_versions: RwLock::new(vec![schema]),
            alter_log: RwLock::new(Vec::new()),
            segments: RwLock::new(BTreeMap::new()),
        })
    }

    /// Creates a committed table, used by replay.
    #[must_use]
    pub fn new_committed(
        id: TableId,
        db_id: DatabaseId,
        tenant: TenantId,
        schema: Arc<Schema>,
        commit_ts: Timestamp,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            db_id,
            tenant,
            chain: RwLock::new(CommitChain::committed(
                CommitOp::Create,
                TxnId::INVALID,
                commit_ts,
            )),
            schema: RwLock::new(Arc::clone(&schema)),
            schema_versions: RwLock::new(vec![schema]),
            alter_log: RwLock::new(Vec::new()),
            segments: RwLock::new(BTreeMap::new()),
        })
    }

    /// The table id.
    #[must_use]
    pub fn id(&self) -> TableId {
        self.id
    }

    /// The owning database.
    #[must_use]
    pub fn db_id(&self) -> DatabaseId {
        self.db_id
    }

    /// The owning tenant.
    #[must_use]
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// The commit chain.
    #[must_use]
    pub fn chain(&self) -> &RwLock<CommitChain> {
        &self.chain
    }

    /// The latest schema.
    #[must_use]
    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema.read())
    }

    /// A specific schema version, if it ever existed.
    #[must_use]
    pub fn schema_version(&self, version: u32) -> Option<Arc<Schema>> {
        self.schema_versions.read().get(version as usize).cloned()
    }

    /// Installs a new schema version produced by an alteration.
    pub fn install_schema(&self, schema: Arc<Schema>) -> StrataResult<()> {
        let mut versions = self.schema_versions.write();
        if schema.version as usize != versions.len() {
            return Err(StrataError::internal(format!(
                "schema version {} installed out of order (have {})",
                schema.version,
                versions.len()
            )));
        }
        versions.push(Arc::clone(&schema));
        *self.schema.write() = schema;
        Ok(())
    }

    /// Records a committed alteration for checkpoint collection.
    pub fn log_alter(&self, commit_ts: Timestamp, req: AlterTableReq) {
        self.alter_log.write().push((commit_ts, req));
    }

    /// Alterations committed in `(from, to]`, oldest first.
    #[must_use]
    pub fn alters_in(&self, from: Timestamp, to: Timestamp) -> Vec<(Timestamp, AlterTableReq)> {
        self.alter_log
            .read()
            .iter()
            .filter(|(ts, _)| *ts > from && *ts <= to)
            .cloned()
            .collect()
    }

    /// Drops schema versions newer than `keep_latest`, used by rollback.
    pub fn truncate_schema_versions(&self, keep_latest: u32) {
        let mut versions = self.schema_versions.write();
        versions.truncate(keep_latest as usize + 1);
        if let Some(latest) = versions.last() {
            *self.schema.write() = Arc::clone(latest);
        }
    }

    /// Inserts a segment entry.
    pub fn add_segment(&self, segment: Arc<SegmentEntry>) {
        self.segments.write().insert(segment.id(), segment);
    }

    /// Removes a segment entry, used by rollback and GC.
    pub fn remove_segment(&self, id: SegmentId) {
        self.segments.write().remove(&id);
    }

    /// Looks up a segment.
    #[must_use]
    pub fn segment(&self, id: SegmentId) -> Option<Arc<SegmentEntry>> {
        self.segments.read().get(&id).cloned()
    }

    /// All segments in id (allocation) order.
    #[must_use]
    pub fn segments_snapshot(&self) -> Vec<Arc<SegmentEntry>> {
        self.segments.read().values().cloned().collect()
    }

    /// The newest segment.
    #[must_use]
    pub fn last_segment(&self) -> Option<Arc<SegmentEntry>> {
        self.segments.read().values().next_back().cloned()
    }

    /// Looks up a block through its embedded segment id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<Arc<crate::catalog::block::BlockEntry>> {
        self.segment(id.segment)?.block(id.offset)
    }

    /// Returns true if the entry is alive at the snapshot.
    #[must_use]
    pub fn is_visible(&self, snapshot: Timestamp, txn_id: TxnId) -> bool {
        self.chain.read().is_visible(snapshot, txn_id)
    }
}
