//! Segment catalog entries.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use strata_common::types::{DatabaseId, SegmentId, TableId, Timestamp, TxnId};

use crate::catalog::block::BlockEntry;
use crate::catalog::chain::{CommitChain, CommitOp};

/// A segment entry: owns its blocks, ordered by offset.
#[derive(Debug)]
pub struct SegmentEntry {
    id: SegmentId,
    table_id: TableId,
    db_id: DatabaseId,
    sorted: bool,
    appendable: bool,
    chain: RwLock<CommitChain>,
    blocks: RwLock<BTreeMap<u32, Arc<BlockEntry>>>,
    next_block_offset: AtomicU32,
}

impl SegmentEntry {
    /// Creates a segment pending under `txn_id`.
    #[must_use]
    pub fn new(
        id: SegmentId,
        table_id: TableId,
        db_id: DatabaseId,
        sorted: bool,
        appendable: bool,
        txn_id: TxnId,
    ) -> Arc<Self> {
        let mut chain = CommitChain::new();
        chain.push_pending(CommitOp::Create, txn_id);
        Arc::new(Self {
            id,
            table_id,
            db_id,
            sorted,
            appendable,
            chain: RwLock::new(chain),
            blocks: RwLock::new(BTreeMap::new()),
            next_block_offset: AtomicU32::new(0),
        })
    }

    /// Creates a committed segment, used by replay.
    #[must_use]
    pub fn new_committed(
        id: SegmentId,
        table_id: TableId,
        db_id: DatabaseId,
        sorted: bool,
        appendable: bool,
        commit_ts: Timestamp,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            table_id,
            db_id,
            sorted,
            appendable,
            chain: RwLock::new(CommitChain::committed(
                CommitOp::Create,
                TxnId::INVALID,
                commit_ts,
            )),
            blocks: RwLock::new(BTreeMap::new()),
            next_block_offset: AtomicU32::new(0),
        })
    }

    /// The segment id.
    #[must_use]
    pub fn id(&self) -> SegmentId {
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

    /// Whether blocks keep primary-key order.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Whether the append path may place new blocks here. Segments
    /// produced by merge tasks are not appendable.
    #[must_use]
    pub fn is_appendable(&self) -> bool {
        self.appendable
    }

    /// The commit chain.
    #[must_use]
    pub fn chain(&self) -> &RwLock<CommitChain> {
        &self.chain
    }

    /// Allocates the next block offset within this segment.
    pub fn alloc_block_offset(&self) -> u32 {
        self.next_block_offset.fetch_add(1, Ordering::SeqCst)
    }

    /// Raises the offset allocator past `offset`, used by replay.
    pub fn observe_block_offset(&self, offset: u32) {
        self.next_block_offset
            .fetch_max(offset + 1, Ordering::SeqCst);
    }

    /// Inserts a block entry.
    pub fn add_block(&self, block: Arc<BlockEntry>) {
        self.blocks.write().insert(block.id().offset, block);
    }

    /// Removes a block entry, used by rollback and GC.
    pub fn remove_block(&self, offset: u32) {
        self.blocks.write().remove(&offset);
    }

    /// Looks up a block by offset.
    #[must_use]
    pub fn block(&self, offset: u32) -> Option<Arc<BlockEntry>> {
        self.blocks.read().get(&offset).cloned()
    }

    /// All blocks in offset order.
    #[must_use]
    pub fn blocks_snapshot(&self) -> Vec<Arc<BlockEntry>> {
        self.blocks.read().values().cloned().collect()
    }

    /// The newest block by offset.
    #[must_use]
    pub fn last_block(&self) -> Option<Arc<BlockEntry>> {
        self.blocks.read().values().next_back().cloned()
    }

    /// Number of blocks currently in the segment (any state).
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    /// Returns true if the entry is alive at the snapshot.
    #[must_use]
    pub fn is_visible(&self, snapshot: Timestamp, txn_id: TxnId) -> bool {
        self.chain.read().is_visible(snapshot, txn_id)
    }
}
