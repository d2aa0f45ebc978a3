//! Block catalog entries.

use std::sync::Arc;

use parking_lot::RwLock;
use strata_batch::Schema;
use strata_common::types::{BlockId, DatabaseId, TableId, Timestamp, TxnId};

use crate::catalog::chain::{CommitChain, CommitOp};
use crate::data::{AppendableData, BlockData, PersistedData};

/// A block entry: immutable identity, a commit chain, and the data payload
/// swapped between appendable and persisted states.
#[derive(Debug)]
pub struct BlockEntry {
    id: BlockId,
    table_id: TableId,
    db_id: DatabaseId,
    schema: Arc<Schema>,
    chain: RwLock<CommitChain>,
    data: RwLock<BlockData>,
}

impl BlockEntry {
    /// Creates an appendable block pending under `txn_id`.
    #[must_use]
    pub fn new_appendable(
        id: BlockId,
        table_id: TableId,
        db_id: DatabaseId,
        schema: Arc<Schema>,
        txn_id: TxnId,
    ) -> Arc<Self> {
        let mut chain = CommitChain::new();
        chain.push_pending(CommitOp::Create, txn_id);
        Arc::new(Self {
            id,
            table_id,
            db_id,
            schema: Arc::clone(&schema),
            chain: RwLock::new(chain),
            data: RwLock::new(BlockData::Appendable(AppendableData::new(schema))),
        })
    }

    /// Creates an appendable block already committed, used by replay.
    #[must_use]
    pub fn new_appendable_committed(
        id: BlockId,
        table_id: TableId,
        db_id: DatabaseId,
        schema: Arc<Schema>,
        commit_ts: Timestamp,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            table_id,
            db_id,
            schema: Arc::clone(&schema),
            chain: RwLock::new(CommitChain::committed(
                CommitOp::Create,
                TxnId::INVALID,
                commit_ts,
            )),
            data: RwLock::new(BlockData::Appendable(AppendableData::new(schema))),
        })
    }

    /// Creates a persisted block pending under `txn_id`, installed by a
    /// flush or merge task.
    #[must_use]
    pub fn new_persisted(
        id: BlockId,
        table_id: TableId,
        db_id: DatabaseId,
        schema: Arc<Schema>,
        data: PersistedData,
        txn_id: TxnId,
    ) -> Arc<Self> {
        let mut chain = CommitChain::new();
        chain.push_pending(CommitOp::Create, txn_id);
        Arc::new(Self {
            id,
            table_id,
            db_id,
            schema,
            chain: RwLock::new(chain),
            data: RwLock::new(BlockData::Persisted(data)),
        })
    }

    /// Creates a persisted block already committed, used by replay.
    #[must_use]
    pub fn new_persisted_committed(
        id: BlockId,
        table_id: TableId,
        db_id: DatabaseId,
        schema: Arc<Schema>,
        data: PersistedData,
        commit_ts: Timestamp,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            table_id,
            db_id,
            schema,
            chain: RwLock::new(CommitChain::committed(
                CommitOp::Create,
                TxnId::INVALID,
                commit_ts,
            )),
            data: RwLock::new(BlockData::Persisted(data)),
        })
    }

    /// The block id.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// The owning table.
    #[must_use]
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// The owning database.
    #[must_use]
    pub fn db_id(&self) -> DatabaseId {
        self.db_id
    }

    /// The schema version the block was written under.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The commit chain.
    #[must_use]
    pub fn chain(&self) -> &RwLock<CommitChain> {
        &self.chain
    }

    /// The data payload.
    #[must_use]
    pub fn data(&self) -> &RwLock<BlockData> {
        &self.data
    }

    /// Returns true while the payload is appendable.
    #[must_use]
    pub fn is_appendable(&self) -> bool {
        self.data.read().is_appendable()
    }

    /// Returns true if the entry is alive at the snapshot.
    #[must_use]
    pub fn is_visible(&self, snapshot: Timestamp, txn_id: TxnId) -> bool {
        self.chain.read().is_visible(snapshot, txn_id)
    }

    /// The creation commit timestamp, once committed.
    #[must_use]
    pub fn created_at(&self) -> Option<Timestamp> {
        self.chain.read().created_at()
    }

    /// The soft-delete commit timestamp, if retired.
    #[must_use]
    pub fn deleted_at(&self) -> Option<Timestamp> {
        self.chain.read().deleted_at()
    }
}
