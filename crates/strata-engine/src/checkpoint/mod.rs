//! Checkpoints.
//!
//! The incremental checkpointer collects every committed mutation in a
//! window `(prev_end, end]` (catalog ops, alters, block creates, appends,
//! deletes, meta and delta installs) and writes them as one
//! self-describing object. Windows are contiguous: each entry's exclusive start is the
//! previous entry's end. When enough incrementals accumulate they fold
//! into a global checkpoint capturing the state as of its end, which
//! bounds WAL replay: restart loads the newest global, applies newer
//! incrementals, then replays the WAL tail. GC runs behind the global
//! checkpoint.

pub mod gc;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::Mutex;
use strata_common::types::{BlockId, Lsn, TableId, Timestamp, TxnId};
use strata_common::{StrataError, StrataResult};
use strata_fs::{Extent, FileService};
use strata_wal::{RecordFlags, RecordKind};
use tracing::info;

use crate::data::BlockData;
use crate::db::EngineCtx;
use crate::tasks::CancelToken;
use crate::walrec::{Command, TxnPayload};

/// Name of the checkpoint registry object.
pub const REGISTRY_OBJECT: &str = "ckp/meta";

/// Blocks touched since the last incremental window closed.
#[derive(Debug, Default)]
pub struct DirtySet {
    tables: DashMap<TableId, HashSet<BlockId>>,
    count: AtomicUsize,
}

impl DirtySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a block dirty.
    pub fn mark(&self, table: TableId, block: BlockId) {
        let mut entry = self.tables.entry(table).or_default();
        if entry.insert(block) {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of dirty blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Returns true when nothing is dirty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dirty blocks per table.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(TableId, Vec<BlockId>)> {
        self.tables
            .iter()
            .map(|e| (*e.key(), e.value().iter().copied().collect()))
            .collect()
    }

    /// Clears the set after a window closes.
    pub fn clear(&self) {
        self.tables.clear();
        self.count.store(0, Ordering::Relaxed);
    }
}

/// Incremental or global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CheckpointKind {
    /// Window delta.
    Incremental = 1,
    /// State as of `end`, folded from incrementals.
    Global = 2,
}

/// One checkpoint in the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointEntry {
    /// Incremental or global.
    pub kind: CheckpointKind,
    /// Exclusive window start (zero for globals).
    pub start: Timestamp,
    /// Inclusive window end.
    pub end: Timestamp,
    /// Object holding the encoded payloads.
    pub location: String,
    /// Every WAL record at or below this LSN is covered.
    pub covered_lsn: Lsn,
}

/// The checkpoint manager.
pub struct CheckpointManager {
    ctx: Arc<EngineCtx>,
    entries: Mutex<Vec<CheckpointEntry>>,
}

impl CheckpointManager {
    /// Creates a manager with an empty registry.
    #[must_use]
    pub fn new(ctx: Arc<EngineCtx>) -> Self {
        Self {
            ctx,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// The registry entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<CheckpointEntry> {
        self.entries.lock().clone()
    }

    /// Replaces the registry, used by restart.
    pub fn set_entries(&self, entries: Vec<CheckpointEntry>) {
        *self.entries.lock() = entries;
    }

    /// End of the newest checkpoint, or zero.
    #[must_use]
    pub fn last_end(&self) -> Timestamp {
        self.entries
            .lock()
            .iter()
            .map(|e| e.end)
            .max()
            .unwrap_or(Timestamp::ZERO)
    }

    /// Incremental entries newer than the last global.
    #[must_use]
    pub fn incrementals_since_global(&self) -> usize {
        let entries = self.entries.lock();
        let last_global = entries
            .iter()
            .rposition(|e| e.kind == CheckpointKind::Global);
        match last_global {
            Some(pos) => entries[pos + 1..].len(),
            None => entries.len(),
        }
    }

    /// Closes the window: all commits at or below the returned timestamp
    /// are applied, and all their WAL records are at or below the
    /// returned LSN.
    fn barrier(&self) -> (Timestamp, Lsn) {
        let _guard = self.ctx.commit_lock.lock();
        let end = self.ctx.ts.alloc();
        let covered = Lsn::new(self.ctx.wal.next_lsn().as_u64().saturating_sub(1));
        (end, covered)
    }

    /// Runs one incremental checkpoint. Returns `None` when the window
    /// holds no committed work.
    pub fn run_incremental(
        &self,
        cancel: &CancelToken,
    ) -> StrataResult<Option<CheckpointEntry>> {
        cancel.checked()?;
        let start = self.last_end();
        let (end, covered_lsn) = self.barrier();
        let payloads = collect_window(&self.ctx, start, end)?;
        if payloads.is_empty() {
            return Ok(None);
        }
        cancel.checked()?;

        let location = format!(
            "{}i_{}_{}",
            strata_common::constants::CHECKPOINT_PREFIX,
            end.physical,
            end.logical
        );
        self.write_checkpoint_object(&location, &payloads)?;
        let entry = CheckpointEntry {
            kind: CheckpointKind::Incremental,
            start,
            end,
            location,
            covered_lsn,
        };
        self.install_entry(entry.clone())?;
        self.ctx.dirty.clear();
        info!(start = %start, end = %end, payloads = payloads.len(), "incremental checkpoint");
        Ok(Some(entry))
    }

    /// Folds the incremental run into a global checkpoint when the
    /// threshold is reached, then truncates the WAL and runs GC.
    pub fn maybe_run_global(
        &self,
        min_active: Option<Timestamp>,
    ) -> StrataResult<Option<CheckpointEntry>> {
        if self.incrementals_since_global() < self.ctx.config.checkpoint.global_every {
            return Ok(None);
        }
        self.run_global(min_active)
    }

    /// Unconditionally folds the state as of the newest incremental end
    /// into a global checkpoint.
    pub fn run_global(
        &self,
        min_active: Option<Timestamp>,
    ) -> StrataResult<Option<CheckpointEntry>> {
        let (end, covered_lsn) = {
            let entries = self.entries.lock();
            let Some(newest) = entries.last() else {
                return Ok(None);
            };
            (newest.end, newest.covered_lsn)
        };

        let payloads = collect_window(&self.ctx, Timestamp::ZERO, end)?;
        let location = format!(
            "{}g_{}_{}",
            strata_common::constants::CHECKPOINT_PREFIX,
            end.physical,
            end.logical
        );
        self.write_checkpoint_object(&location, &payloads)?;
        let entry = CheckpointEntry {
            kind: CheckpointKind::Global,
            start: Timestamp::ZERO,
            end,
            location,
            covered_lsn,
        };
        self.install_entry(entry.clone())?;

        self.ctx.wal.truncate_to(covered_lsn)?;
        self.ctx.logtail.prune(end);
        let removed = gc::run_gc(&self.ctx, end, min_active);
        info!(end = %end, covered = %covered_lsn, gc_removed = removed, "global checkpoint");
        Ok(Some(entry))
    }

    fn install_entry(&self, entry: CheckpointEntry) -> StrataResult<()> {
        let snapshot = {
            let mut entries = self.entries.lock();
            entries.push(entry.clone());
            entries.clone()
        };
        self.persist_registry(&snapshot)?;
        let pointer = encode_entry(&entry);
        self.ctx.wal.append(
            RecordKind::CheckpointPointer,
            RecordFlags::COMMIT_BOUNDARY,
            pointer,
        )?;
        Ok(())
    }

    fn persist_registry(&self, entries: &[CheckpointEntry]) -> StrataResult<()> {
        let mut buf = BytesMut::new();
        buf.put_u32(entries.len() as u32);
        for entry in entries {
            let encoded = encode_entry(entry);
            buf.put_u32(encoded.len() as u32);
            buf.put_slice(&encoded);
        }
        self.ctx.fs.write(REGISTRY_OBJECT, buf.freeze())?;
        Ok(())
    }

    fn write_checkpoint_object(
        &self,
        location: &str,
        payloads: &[TxnPayload],
    ) -> StrataResult<()> {
        let encoded = encode_payloads(payloads);
        let mut last_err = None;
        for _ in 0..=self.ctx.config.io_retry_limit {
            match self.ctx.fs.write(location, encoded.clone()) {
                Ok(_) => return Ok(()),
                Err(err) => last_err = Some(err),
            }
        }
        Err(StrataError::internal(format!(
            "checkpoint write for '{location}' failed: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

/// Loads the checkpoint registry, if one was ever written.
pub fn load_registry(fs: &dyn FileService) -> StrataResult<Vec<CheckpointEntry>> {
    let raw = match fs.read(REGISTRY_OBJECT, Extent::WHOLE) {
        Ok(raw) => raw,
        Err(strata_fs::FsError::NotFound { .. }) => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut buf = raw;
    if buf.remaining() < 4 {
        return Err(StrataError::corruption("truncated checkpoint registry"));
    }
    let count = buf.get_u32() as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        if buf.remaining() < 4 {
            return Err(StrataError::corruption("truncated registry entry"));
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(StrataError::corruption("truncated registry entry body"));
        }
        let mut body = buf.copy_to_bytes(len);
        entries.push(decode_entry(&mut body)?);
    }
    Ok(entries)
}

/// Reads and decodes a checkpoint object.
pub fn read_checkpoint_object(
    fs: &dyn FileService,
    location: &str,
) -> StrataResult<Vec<TxnPayload>> {
    let raw = fs.read(location, Extent::WHOLE)?;
    decode_payloads(raw)
}

/// Encodes a checkpoint pointer entry.
#[must_use]
pub fn encode_entry(entry: &CheckpointEntry) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(entry.kind as u8);
    buf.put_slice(&entry.start.to_be_bytes());
    buf.put_slice(&entry.end.to_be_bytes());
    buf.put_u64(entry.covered_lsn.as_u64());
    buf.put_u32(entry.location.len() as u32);
    buf.put_slice(entry.location.as_bytes());
    buf.freeze()
}

/// Decodes a checkpoint pointer entry.
pub fn decode_entry(buf: &mut impl Buf) -> StrataResult<CheckpointEntry> {
    if buf.remaining() < 37 {
        return Err(StrataError::corruption("truncated checkpoint entry"));
    }
    let kind = match buf.get_u8() {
        1 => CheckpointKind::Incremental,
        2 => CheckpointKind::Global,
        tag => {
            return Err(StrataError::corruption(format!(
                "bad checkpoint kind {tag}"
            )))
        }
    };
    let mut raw = [0u8; 12];
    buf.copy_to_slice(&mut raw);
    let start = Timestamp::from_be_bytes(raw);
    buf.copy_to_slice(&mut raw);
    let end = Timestamp::from_be_bytes(raw);
    let covered_lsn = Lsn::new(buf.get_u64());
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(StrataError::corruption("truncated checkpoint location"));
    }
    let mut name = vec![0u8; len];
    buf.copy_to_slice(&mut name);
    let location = String::from_utf8(name)
        .map_err(|_| StrataError::corruption("checkpoint location is not valid UTF-8"))?;
    Ok(CheckpointEntry {
        kind,
        start,
        end,
        location,
        covered_lsn,
    })
}

fn encode_payloads(payloads: &[TxnPayload]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32(payloads.len() as u32);
    for payload in payloads {
        let encoded = payload.encode();
        buf.put_u32(encoded.len() as u32);
        buf.put_slice(&encoded);
    }
    buf.freeze()
}

fn decode_payloads(mut buf: Bytes) -> StrataResult<Vec<TxnPayload>> {
    if buf.remaining() < 4 {
        return Err(StrataError::corruption("truncated checkpoint object"));
    }
    let count = buf.get_u32() as usize;
    let mut payloads = Vec::with_capacity(count);
    for _ in 0..count {
        if buf.remaining() < 4 {
            return Err(StrataError::corruption("truncated checkpoint payload"));
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(StrataError::corruption("truncated checkpoint payload body"));
        }
        let mut body = buf.copy_to_bytes(len);
        payloads.push(TxnPayload::decode(&mut body)?);
    }
    Ok(payloads)
}

/// Application priority within one commit timestamp: parents before
/// children, creates before data, data before drops.
fn command_priority(cmd: &Command) -> u8 {
    match cmd {
        Command::CreateDatabase { .. } => 0,
        Command::CreateTable { .. } => 1,
        Command::Alter { .. } => 2,
        Command::CreateSegment { .. } => 3,
        Command::CreateBlock { .. } => 4,
        Command::InstallMeta { .. } => 5,
        Command::Append { .. } => 6,
        Command::Delete { .. } => 7,
        Command::InstallDelta { .. } => 8,
        Command::SoftDeleteBlock { .. } => 9,
        Command::DropSegment { .. } => 10,
        Command::DropTable { .. } => 11,
        Command::DropDatabase { .. } => 12,
    }
}

/// Collects every committed mutation with `commit_ts` in `(from, to]`,
/// grouped into payloads by commit timestamp.
pub fn collect_window(
    ctx: &EngineCtx,
    from: Timestamp,
    to: Timestamp,
) -> StrataResult<Vec<TxnPayload>> {
    let in_window = |ts: Option<Timestamp>| matches!(ts, Some(t) if t > from && t <= to);
    let mut stamped: Vec<(Timestamp, Command)> = Vec::new();

    for db in ctx.catalog.databases_snapshot() {
        let db_id = db.id();
        if !db_id.is_system() {
            let chain = db.chain().read();
            if let Some(ts) = chain.created_at().filter(|t| *t > from && *t <= to) {
                stamped.push((
                    ts,
                    Command::CreateDatabase {
                        id: db_id,
                        tenant: db.tenant(),
                        name: db.name().to_string(),
                    },
                ));
            }
            if let Some(ts) = chain.deleted_at().filter(|t| *t > from && *t <= to) {
                stamped.push((ts, Command::DropDatabase { id: db_id }));
            }
        }

        for table in db.tables_snapshot() {
            let table_id = table.id();
            {
                let chain = table.chain().read();
                if let Some(ts) = chain.created_at().filter(|t| *t > from && *t <= to) {
                    let schema = table
                        .schema_version(0)
                        .unwrap_or_else(|| table.schema());
                    stamped.push((
                        ts,
                        Command::CreateTable {
                            db: db_id,
                            id: table_id,
                            tenant: table.tenant(),
                            schema: (*schema).clone(),
                        },
                    ));
                }
                if let Some(ts) = chain.deleted_at().filter(|t| *t > from && *t <= to) {
                    stamped.push((ts, Command::DropTable { db: db_id, id: table_id }));
                }
            }
            for (ts, alter) in table.alters_in(from, to) {
                stamped.push((
                    ts,
                    Command::Alter {
                        db: db_id,
                        table: table_id,
                        alter,
                    },
                ));
            }

            for segment in table.segments_snapshot() {
                let seg_id = segment.id();
                {
                    let chain = segment.chain().read();
                    if let Some(ts) = chain.created_at().filter(|t| *t > from && *t <= to) {
                        stamped.push((
                            ts,
                            Command::CreateSegment {
                                db: db_id,
                                table: table_id,
                                segment: seg_id,
                                sorted: segment.is_sorted(),
                                appendable: segment.is_appendable(),
                            },
                        ));
                    }
                    if let Some(ts) = chain.deleted_at().filter(|t| *t > from && *t <= to) {
                        stamped.push((
                            ts,
                            Command::DropSegment {
                                db: db_id,
                                table: table_id,
                                segment: seg_id,
                            },
                        ));
                    }
                }

                for block in segment.blocks_snapshot() {
                    let block_id = block.id();
                    let created = block.created_at();
                    let deleted = block.deleted_at();
                    let data = block.data().read();
                    match &*data {
                        BlockData::Appendable(a) => {
                            if in_window(created) {
                                stamped.push((
                                    created.unwrap_or(to),
                                    Command::CreateBlock {
                                        db: db_id,
                                        table: table_id,
                                        block: block_id,
                                    },
                                ));
                            }
                            for (ts, start, end) in a.committed_appends_in(from, to) {
                                stamped.push((
                                    ts,
                                    Command::Append {
                                        db: db_id,
                                        table: table_id,
                                        block: block_id,
                                        start_row: start,
                                        batch: a
                                            .batch()
                                            .window(start as usize, (end - start) as usize),
                                    },
                                ));
                            }
                            for (ts, rows, _) in a.deletes.committed_in(from, to) {
                                stamped.push((
                                    ts,
                                    Command::Delete {
                                        db: db_id,
                                        table: table_id,
                                        block: block_id,
                                        rows,
                                    },
                                ));
                            }
                        }
                        BlockData::Persisted(p) => {
                            if in_window(created) {
                                stamped.push((
                                    created.unwrap_or(to),
                                    Command::InstallMeta {
                                        db: db_id,
                                        table: table_id,
                                        block: block_id,
                                        meta_loc: p.meta_loc().clone(),
                                        schema_version: p.schema().version,
                                        sorted: p.is_sorted(),
                                    },
                                ));
                            }
                            for (ts, rows, _) in p.deletes.committed_in(from, to) {
                                stamped.push((
                                    ts,
                                    Command::Delete {
                                        db: db_id,
                                        table: table_id,
                                        block: block_id,
                                        rows,
                                    },
                                ));
                            }
                            if let (Some(loc), Some(ts)) =
                                (p.delta_loc(), p.delta_installed_at())
                            {
                                if ts > from && ts <= to {
                                    stamped.push((
                                        ts,
                                        Command::InstallDelta {
                                            db: db_id,
                                            table: table_id,
                                            block: block_id,
                                            delta_loc: loc.clone(),
                                            flushed_upto: p
                                                .delta_flushed_upto()
                                                .unwrap_or(ts),
                                        },
                                    ));
                                }
                            }
                        }
                    }
                    if in_window(deleted) {
                        stamped.push((
                            deleted.unwrap_or(to),
                            Command::SoftDeleteBlock {
                                db: db_id,
                                table: table_id,
                                block: block_id,
                            },
                        ));
                    }
                }
            }
        }
    }

    stamped.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| command_priority(&a.1).cmp(&command_priority(&b.1)))
    });

    let mut payloads: Vec<TxnPayload> = Vec::new();
    for (ts, cmd) in stamped {
        match payloads.last_mut() {
            Some(last) if last.commit_ts == ts => last.commands.push(cmd),
            _ => payloads.push(TxnPayload {
                txn_id: TxnId::INVALID,
                commit_ts: ts,
                commands: vec![cmd],
            }),
        }
    }
    Ok(payloads)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_set() {
        let dirty = DirtySet::new();
        let block = BlockId::new(strata_common::types::SegmentId::new(1), 0);
        dirty.mark(TableId::new(1), block);
        dirty.mark(TableId::new(1), block);
        assert_eq!(dirty.len(), 1);
        dirty.clear();
        assert!(dirty.is_empty());
    }

    #[test]
    fn test_entry_roundtrip() {
        let entry = CheckpointEntry {
            kind: CheckpointKind::Global,
            start: Timestamp::ZERO,
            end: Timestamp::new(500, 2),
            location: "ckp/g_500_2".into(),
            covered_lsn: Lsn::new(42),
        };
        let mut encoded = encode_entry(&entry);
        assert_eq!(decode_entry(&mut encoded).unwrap(), entry);
    }

    #[test]
    fn test_payloads_roundtrip() {
        let payloads = vec![TxnPayload {
            txn_id: TxnId::INVALID,
            commit_ts: Timestamp::new(7, 0),
            commands: vec![Command::DropDatabase {
                id: strata_common::types::DatabaseId::new(3),
            }],
        }];
        let encoded = encode_payloads(&payloads);
        assert_eq!(decode_payloads(encoded).unwrap(), payloads);
    }
}
