//! Row transfer tables.
//!
//! When a compaction or merge retires a block, it installs a short-lived
//! mapping from the old block's surviving rows to their new addresses.
//! In-flight transactions that targeted the old block remap their deletes
//! through it at commit. A missing entry means the task itself dropped the
//! row (it was already deleted), so the caller's delete becomes a no-op.
//!
//! Maps are retained until no live transaction has a snapshot older than
//! the block's retire timestamp, then swept.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use strata_common::types::{BlockId, Timestamp};

/// The transfer map of one retired block.
#[derive(Debug)]
pub struct TransferMap {
    retired_at: Timestamp,
    rows: HashMap<u32, (BlockId, u32)>,
}

impl TransferMap {
    /// Creates a map retiring a block at `retired_at`.
    #[must_use]
    pub fn new(retired_at: Timestamp, rows: HashMap<u32, (BlockId, u32)>) -> Self {
        Self { retired_at, rows }
    }

    /// The retire timestamp of the old block.
    #[must_use]
    pub fn retired_at(&self) -> Timestamp {
        self.retired_at
    }

    /// Maps an old row to its new `(block, row)` address. `None` means the
    /// row did not survive the task.
    #[must_use]
    pub fn get(&self, row: u32) -> Option<(BlockId, u32)> {
        self.rows.get(&row).copied()
    }

    /// Number of surviving rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no row survived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// All live transfer maps, keyed by retired block.
#[derive(Debug, Default)]
pub struct TransferTable {
    maps: DashMap<BlockId, Arc<TransferMap>>,
}

impl TransferTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the transfer map for a retired block.
    pub fn install(&self, old_block: BlockId, map: TransferMap) {
        self.maps.insert(old_block, Arc::new(map));
    }

    /// Looks up the transfer map of a retired block.
    #[must_use]
    pub fn get(&self, old_block: BlockId) -> Option<Arc<TransferMap>> {
        self.maps.get(&old_block).map(|m| Arc::clone(&m))
    }

    /// Drops maps no active transaction can still need: those whose
    /// retire timestamp is older than the oldest active snapshot.
    pub fn sweep(&self, min_active_start: Timestamp) -> usize {
        let before = self.maps.len();
        self.maps.retain(|_, m| m.retired_at() >= min_active_start);
        before - self.maps.len()
    }

    /// Number of live maps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// Returns true if no map is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::types::SegmentId;

    fn ts(n: i64) -> Timestamp {
        Timestamp::new(n, 0)
    }

    fn blk(seg: u128, off: u32) -> BlockId {
        BlockId::new(SegmentId::new(seg), off)
    }

    #[test]
    fn test_install_and_lookup() {
        let table = TransferTable::new();
        let mut rows = HashMap::new();
        rows.insert(0, (blk(2, 0), 0));
        rows.insert(3, (blk(2, 0), 1));
        table.install(blk(1, 0), TransferMap::new(ts(100), rows));

        let map = table.get(blk(1, 0)).unwrap();
        assert_eq!(map.get(0), Some((blk(2, 0), 0)));
        assert_eq!(map.get(3), Some((blk(2, 0), 1)));
        // Row 1 did not survive: deleted by the task.
        assert_eq!(map.get(1), None);
        assert!(table.get(blk(9, 9)).is_none());
    }

    #[test]
    fn test_sweep_respects_active_snapshots() {
        let table = TransferTable::new();
        table.install(blk(1, 0), TransferMap::new(ts(100), HashMap::new()));
        table.install(blk(1, 1), TransferMap::new(ts(200), HashMap::new()));

        // A transaction with snapshot 150 may still remap through the map
        // retired at 200.
        assert_eq!(table.sweep(ts(150)), 1);
        assert!(table.get(blk(1, 0)).is_none());
        assert!(table.get(blk(1, 1)).is_some());
    }
}
