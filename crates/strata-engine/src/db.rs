//! The engine front door.
//!
//! [`Engine::open`] builds the shared context, replays checkpoints and the
//! WAL tail to rebuild the catalog and block state, and starts the
//! background worker. Restart follows the same path: a fresh `open`
//! against the same file service and WAL directory yields the state of
//! every committed transaction (and nothing else).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use strata_batch::Schema;
use strata_common::config::EngineConfig;
use strata_common::types::{BlockId, DatabaseId, TableId, TenantId, Timestamp, TxnId};
use strata_common::{Sequence, StrataError, StrataResult};
use strata_fs::FileService;
use strata_wal::{RecordKind, Wal, WalConfig};
use tracing::{debug, info, warn};

use crate::catalog::{BlockEntry, Catalog, CommitOp, DatabaseEntry, SegmentEntry, TableEntry};
use crate::checkpoint::{
    load_registry, read_checkpoint_object, CheckpointEntry, CheckpointKind, CheckpointManager,
    DirtySet,
};
use crate::data::persisted::ColumnCache;
use crate::data::{DeleteKind, PersistedData, TransferTable};
use crate::logtail::systable::{
    mo_columns_rows, mo_columns_schema, mo_database_row, mo_database_schema, mo_tables_row,
    mo_tables_schema, rows_to_batch, FIRST_USER_TABLE_ID, MO_COLUMNS_ID, MO_DATABASE_ID,
    MO_TABLES_ID,
};
use crate::logtail::{EntryType, LogtailMgr, LogtailRecord, SyncLogtailResp};
use crate::tasks::{flush_block, flush_block_deletes, merge_blocks, CancelToken, Worker};
use crate::txn::{AccessInfo, DedupType, Relation, TxnManager, TxnRef};
use crate::walrec::{Command, TxnPayload};

/// Shared services every subsystem hangs off.
pub struct EngineCtx {
    /// Engine configuration.
    pub config: EngineConfig,
    /// The catalog tree.
    pub catalog: Catalog,
    /// Object storage.
    pub fs: Arc<dyn FileService>,
    /// The write-ahead log.
    pub wal: Wal,
    /// The timestamp allocator.
    pub ts: strata_common::types::TsAllocator,
    /// Decoded column extent cache.
    pub column_cache: ColumnCache,
    /// Live row transfer maps.
    pub transfers: TransferTable,
    /// The logtail producer.
    pub logtail: LogtailMgr,
    /// Blocks touched since the last checkpoint window.
    pub dirty: DirtySet,
    /// Serializes commit application and checkpoint barriers.
    pub commit_lock: Mutex<()>,
    object_refs: DashMap<String, u64>,
}

impl EngineCtx {
    /// Registers a persisted block's reference to an object.
    pub fn ref_object(&self, name: &str) {
        *self.object_refs.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Drops one reference. Returns true when the object became
    /// unreferenced and may be unlinked.
    pub fn unref_object(&self, name: &str) -> bool {
        let remaining = match self.object_refs.get_mut(name) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            self.object_refs.remove(name);
            true
        } else {
            false
        }
    }
}

/// The storage engine.
pub struct Engine {
    ctx: Arc<EngineCtx>,
    mgr: Arc<TxnManager>,
    ckp: Arc<CheckpointManager>,
    worker: Mutex<Option<Worker>>,
}

impl Engine {
    /// Opens an engine over a file service and a WAL directory, replaying
    /// any persisted state.
    pub fn open(
        config: EngineConfig,
        fs: Arc<dyn FileService>,
        wal_dir: impl AsRef<Path>,
    ) -> StrataResult<Self> {
        config.validate()?;
        let wal = Wal::open(WalConfig::new(wal_dir.as_ref()))?;
        let sequence = Arc::new(Sequence::with_seeds(2, FIRST_USER_TABLE_ID, 1, 1));
        let ctx = Arc::new(EngineCtx {
            column_cache: ColumnCache::new(config.column_cache_capacity),
            config,
            catalog: Catalog::new(sequence),
            fs,
            wal,
            ts: strata_common::types::TsAllocator::new(),
            transfers: TransferTable::new(),
            logtail: LogtailMgr::new(),
            dirty: DirtySet::new(),
            commit_lock: Mutex::new(()),
            object_refs: DashMap::new(),
        });
        let mgr = Arc::new(TxnManager::new(Arc::clone(&ctx)));
        let ckp = Arc::new(CheckpointManager::new(Arc::clone(&ctx)));
        let engine = Self {
            ctx,
            mgr,
            ckp,
            worker: Mutex::new(None),
        };
        engine.replay()?;
        engine.spawn_worker();
        info!("engine open");
        Ok(engine)
    }

    /// The shared context.
    #[must_use]
    pub fn ctx(&self) -> &Arc<EngineCtx> {
        &self.ctx
    }

    /// The transaction manager.
    #[must_use]
    pub fn txn_manager(&self) -> &Arc<TxnManager> {
        &self.mgr
    }

    /// The checkpoint manager.
    #[must_use]
    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        &self.ckp
    }

    fn spawn_worker(&self) {
        let ctx = Arc::clone(&self.ctx);
        let ckp = Arc::clone(&self.ckp);
        let mgr = Arc::clone(&self.mgr);
        let mut last_attempt = Instant::now();
        let tick = ctx.config.worker_tick;
        let worker = Worker::spawn("strata-housekeeping", tick, move || {
            let due = last_attempt.elapsed() >= ctx.config.checkpoint.interval;
            let dirty_enough = ctx.dirty.len() >= ctx.config.checkpoint.dirty_threshold;
            if due || dirty_enough {
                last_attempt = Instant::now();
                let cancel = CancelToken::new();
                if let Err(err) = ckp.run_incremental(&cancel) {
                    warn!(%err, "incremental checkpoint failed");
                }
                if let Err(err) = ckp.maybe_run_global(mgr.min_active_start()) {
                    warn!(%err, "global checkpoint failed");
                }
            }
            let floor = mgr.min_active_start().unwrap_or_else(|| ctx.ts.peek());
            ctx.transfers.sweep(floor);
        });
        *self.worker.lock() = Some(worker);
    }

    /// Stops background work and closes the WAL.
    pub fn close(&self) -> StrataResult<()> {
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
        }
        self.ctx.wal.close()?;
        info!("engine closed");
        Ok(())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Starts a transaction with default identity.
    pub fn start_txn(&self) -> TxnRef {
        self.mgr.start()
    }

    /// Starts a transaction with explicit identity and dedup mode.
    pub fn start_txn_with(&self, access: AccessInfo, dedup: DedupType) -> TxnRef {
        self.mgr.start_with(access, dedup)
    }

    /// Commits a transaction.
    pub fn commit(&self, txn: &TxnRef) -> StrataResult<Timestamp> {
        self.mgr.commit(txn)
    }

    /// Rolls back a transaction.
    pub fn rollback(&self, txn: &TxnRef) -> StrataResult<()> {
        self.mgr.rollback(txn)
    }

    // =========================================================================
    // Catalog surface
    // =========================================================================

    /// Creates a database under the transaction's tenant.
    pub fn create_database(&self, txn: &TxnRef, name: &str) -> StrataResult<DatabaseId> {
        txn.ensure_active()?;
        let tenant = txn.access().tenant;
        let db = self
            .ctx
            .catalog
            .create_database(tenant, name, txn.id(), txn.start_ts())?;
        let id = db.id();
        txn.with_ws(|ws| {
            ws.created_dbs.push((id, tenant, name.to_string()));
        })?;
        Ok(id)
    }

    /// Drops a database by name.
    pub fn drop_database(&self, txn: &TxnRef, name: &str) -> StrataResult<DatabaseId> {
        txn.ensure_active()?;
        let tenant = txn.access().tenant;
        let db = self
            .ctx
            .catalog
            .drop_database(tenant, name, txn.id(), txn.start_ts())?;
        let id = db.id();
        txn.with_ws(|ws| {
            ws.dropped_dbs.push((id, tenant, name.to_string()));
        })?;
        Ok(id)
    }

    /// Creates a table and returns a relation handle on it.
    pub fn create_relation(
        &self,
        txn: &TxnRef,
        db_name: &str,
        schema: Schema,
    ) -> StrataResult<Relation> {
        txn.ensure_active()?;
        let tenant = txn.access().tenant;
        let db = self
            .ctx
            .catalog
            .database_by_name(tenant, db_name, txn.start_ts(), txn.id())?;
        let table = self
            .ctx
            .catalog
            .create_table(&db, tenant, schema, txn.id(), txn.start_ts())?;
        let (table_id, db_id) = (table.id(), db.id());
        txn.with_ws(|ws| {
            ws.table_mut(table_id, db_id).created = true;
        })?;
        Ok(Relation::new(
            Arc::clone(&self.ctx),
            Arc::clone(txn),
            db,
            table,
        ))
    }

    /// Drops a table by name.
    pub fn drop_relation(
        &self,
        txn: &TxnRef,
        db_name: &str,
        table_name: &str,
    ) -> StrataResult<TableId> {
        txn.ensure_active()?;
        let tenant = txn.access().tenant;
        let db = self
            .ctx
            .catalog
            .database_by_name(tenant, db_name, txn.start_ts(), txn.id())?;
        let table = self
            .ctx
            .catalog
            .drop_table(&db, tenant, table_name, txn.id(), txn.start_ts())?;
        let (table_id, db_id) = (table.id(), db.id());
        txn.with_ws(|ws| {
            ws.table_mut(table_id, db_id).dropped = true;
        })?;
        Ok(table_id)
    }

    /// Opens a relation handle by name at the transaction's snapshot.
    pub fn relation(
        &self,
        txn: &TxnRef,
        db_name: &str,
        table_name: &str,
    ) -> StrataResult<Relation> {
        txn.ensure_active()?;
        let tenant = txn.access().tenant;
        let db = self
            .ctx
            .catalog
            .database_by_name(tenant, db_name, txn.start_ts(), txn.id())?;
        let table = self
            .ctx
            .catalog
            .table_by_name(&db, tenant, table_name, txn.start_ts(), txn.id())?;
        Ok(Relation::new(
            Arc::clone(&self.ctx),
            Arc::clone(txn),
            db,
            table,
        ))
    }

    fn resolve_table(
        &self,
        db_name: &str,
        table_name: &str,
    ) -> StrataResult<(Arc<DatabaseEntry>, Arc<TableEntry>)> {
        let snapshot = self.ctx.ts.peek();
        let db = self.ctx.catalog.database_by_name(
            TenantId::SYS,
            db_name,
            snapshot,
            TxnId::INVALID,
        )?;
        let table =
            self.ctx
                .catalog
                .table_by_name(&db, TenantId::SYS, table_name, snapshot, TxnId::INVALID)?;
        Ok((db, table))
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    fn appendable_blocks(&self, table: &Arc<TableEntry>) -> Vec<Arc<BlockEntry>> {
        let snapshot = self.ctx.ts.peek();
        table
            .segments_snapshot()
            .into_iter()
            .flat_map(|s: Arc<SegmentEntry>| s.blocks_snapshot())
            .filter(|b| {
                b.is_visible(snapshot, TxnId::INVALID)
                    && b.data().read().is_appendable()
                    && b.data().read().rows_total() > 0
            })
            .collect()
    }

    fn persisted_blocks(&self, table: &Arc<TableEntry>) -> Vec<Arc<BlockEntry>> {
        let snapshot = self.ctx.ts.peek();
        table
            .segments_snapshot()
            .into_iter()
            .flat_map(|s| s.blocks_snapshot())
            .filter(|b| {
                b.is_visible(snapshot, TxnId::INVALID) && !b.data().read().is_appendable()
            })
            .collect()
    }

    /// Flushes every populated appendable block of a table. Returns how
    /// many blocks were persisted.
    pub fn compact_blocks(&self, db_name: &str, table_name: &str) -> StrataResult<usize> {
        let (_, table) = self.resolve_table(db_name, table_name)?;
        let cancel = CancelToken::new();
        let mut flushed = 0;
        for block in self.appendable_blocks(&table) {
            match flush_block(&self.mgr, &block, &cancel) {
                Ok(_) => flushed += 1,
                // A racing writer keeps the block alive; later pass retries.
                Err(err) if err.is_conflict() => {
                    debug!(block = %block.id(), %err, "flush skipped");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(flushed)
    }

    /// Merges every persisted block of a table into a fresh segment.
    pub fn merge_table_blocks(
        &self,
        db_name: &str,
        table_name: &str,
    ) -> StrataResult<Vec<BlockId>> {
        let (_, table) = self.resolve_table(db_name, table_name)?;
        let inputs = self.persisted_blocks(&table);
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let cancel = CancelToken::new();
        merge_blocks(&self.mgr, &table, &inputs, &cancel)
    }

    /// Flushes a table's appendable blocks within a bounded wait. Blocks
    /// pinned by in-flight writers are retried until the budget runs out,
    /// then `FlushTimeout` is returned and partial work stays discarded.
    pub fn flush_table(
        &self,
        db_name: &str,
        table_name: &str,
        budget: Duration,
    ) -> StrataResult<()> {
        let (_, table) = self.resolve_table(db_name, table_name)?;
        let cancel = CancelToken::new();
        let deadline = Instant::now() + budget;
        loop {
            let pending = self.appendable_blocks(&table);
            if pending.is_empty() {
                return Ok(());
            }
            let mut conflicted: Option<BlockId> = None;
            for block in pending {
                match flush_block(&self.mgr, &block, &cancel) {
                    Ok(_) => {}
                    Err(err) if err.is_conflict() => conflicted = Some(block.id()),
                    Err(err) => return Err(err),
                }
            }
            match conflicted {
                None => return Ok(()),
                Some(block) => {
                    if Instant::now() >= deadline {
                        return Err(StrataError::FlushTimeout {
                            block,
                            waited_ms: budget.as_millis() as u64,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }
    }

    /// Drains resident committed deletes of every persisted block into
    /// delta-delete objects. Returns how many blocks got a new delta.
    pub fn flush_deletes(&self, db_name: &str, table_name: &str) -> StrataResult<usize> {
        let (_, table) = self.resolve_table(db_name, table_name)?;
        let cancel = CancelToken::new();
        let mut flushed = 0;
        for block in self.persisted_blocks(&table) {
            if flush_block_deletes(&self.mgr, &block, &cancel)?.is_some() {
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Forces one incremental checkpoint.
    pub fn checkpoint_incremental(&self) -> StrataResult<Option<CheckpointEntry>> {
        self.ckp.run_incremental(&CancelToken::new())
    }

    /// Forces a global checkpoint fold (plus WAL truncation and GC).
    pub fn checkpoint_global(&self) -> StrataResult<Option<CheckpointEntry>> {
        self.ckp.run_global(self.mgr.min_active_start())
    }

    // =========================================================================
    // Logtail
    // =========================================================================

    /// Reads the logtail window `(have, want]` for a table. With
    /// `want_state`, a synthetic full catalog snapshot at `want` is
    /// appended for the system tables.
    pub fn sync_logtail(
        &self,
        have: Timestamp,
        want: Timestamp,
        table_id: TableId,
        want_state: bool,
    ) -> StrataResult<SyncLogtailResp> {
        let mut resp = self.ctx.logtail.sync(have, want, table_id);
        if want_state {
            resp.commands.extend(self.catalog_state_records(want, table_id));
        }
        Ok(resp)
    }

    fn catalog_state_records(&self, at: Timestamp, table_id: TableId) -> Vec<LogtailRecord> {
        let mut out = Vec::new();
        let reader = TxnId::INVALID;
        if table_id == MO_DATABASE_ID {
            let schema = mo_database_schema();
            let rows: Vec<_> = self
                .ctx
                .catalog
                .databases_snapshot()
                .into_iter()
                .filter(|db| db.is_visible(at, reader))
                .map(|db| mo_database_row(db.id(), db.name(), db.tenant(), at))
                .collect();
            if !rows.is_empty() {
                out.push(LogtailRecord {
                    commit_ts: at,
                    entry_type: EntryType::Insert,
                    table_id: MO_DATABASE_ID,
                    table_name: schema.name.clone(),
                    batch: rows_to_batch(&schema, &rows),
                });
            }
        }
        if table_id == MO_TABLES_ID || table_id == MO_COLUMNS_ID {
            let tables_schema = mo_tables_schema();
            let columns_schema = mo_columns_schema();
            for db in self.ctx.catalog.databases_snapshot() {
                for table in db.tables_snapshot() {
                    if !table.is_visible(at, reader) {
                        continue;
                    }
                    let schema = table.schema();
                    if table_id == MO_TABLES_ID {
                        let row = mo_tables_row(
                            table.id(),
                            &schema.name,
                            db.id(),
                            table.tenant(),
                            schema.version,
                            at,
                        );
                        out.push(LogtailRecord {
                            commit_ts: at,
                            entry_type: EntryType::Insert,
                            table_id: MO_TABLES_ID,
                            table_name: tables_schema.name.clone(),
                            batch: rows_to_batch(&tables_schema, &[row]),
                        });
                    } else {
                        let rows = mo_columns_rows(table.id(), &schema, at);
                        out.push(LogtailRecord {
                            commit_ts: at,
                            entry_type: EntryType::Insert,
                            table_id: MO_COLUMNS_ID,
                            table_name: columns_schema.name.clone(),
                            batch: rows_to_batch(&columns_schema, &rows),
                        });
                    }
                }
            }
        }
        out
    }

    // =========================================================================
    // Replay
    // =========================================================================

    fn replay(&self) -> StrataResult<()> {
        let entries = load_registry(self.ctx.fs.as_ref())?;
        self.ckp.set_entries(entries.clone());

        let global = entries
            .iter()
            .filter(|e| e.kind == CheckpointKind::Global)
            .last()
            .cloned();
        if let Some(global) = &global {
            for payload in read_checkpoint_object(self.ctx.fs.as_ref(), &global.location)? {
                self.apply_payload(&payload)?;
            }
        }
        let global_end = global.as_ref().map(|g| g.end).unwrap_or(Timestamp::ZERO);
        for entry in &entries {
            if entry.kind == CheckpointKind::Incremental && entry.end > global_end {
                for payload in read_checkpoint_object(self.ctx.fs.as_ref(), &entry.location)? {
                    self.apply_payload(&payload)?;
                }
            }
        }

        // WAL tail: buffer a transaction's records until its commit
        // boundary; unterminated buffers are discarded.
        let from = global
            .as_ref()
            .map(|g| g.covered_lsn.next())
            .unwrap_or(strata_common::types::Lsn::FIRST);
        let mut records: Vec<(TxnPayload, bool)> = Vec::new();
        let mut replay_err: Option<StrataError> = None;
        self.ctx.wal.replay(from, |rec| {
            if rec.kind == RecordKind::CheckpointPointer {
                return Ok(());
            }
            let mut body = rec.payload.clone();
            match TxnPayload::decode(&mut body) {
                Ok(payload) => {
                    let boundary = rec
                        .flags
                        .contains(strata_wal::RecordFlags::COMMIT_BOUNDARY);
                    records.push((payload, boundary));
                }
                Err(err) => replay_err = Some(err),
            }
            Ok(())
        })?;
        if let Some(err) = replay_err {
            return Err(err);
        }

        let mut pending: HashMap<TxnId, Vec<TxnPayload>> = HashMap::new();
        for (payload, boundary) in records {
            let txn_id = payload.txn_id;
            pending.entry(txn_id).or_default().push(payload);
            if boundary {
                if let Some(parts) = pending.remove(&txn_id) {
                    for part in parts {
                        self.apply_payload(&part)?;
                    }
                }
            }
        }
        if !pending.is_empty() {
            debug!(txns = pending.len(), "discarded unterminated WAL transactions");
        }
        Ok(())
    }

    fn apply_payload(&self, payload: &TxnPayload) -> StrataResult<()> {
        for command in &payload.commands {
            self.apply_command(payload.commit_ts, command)?;
        }
        self.ctx.ts.advance_to(payload.commit_ts);
        Ok(())
    }

    fn apply_command(&self, ts: Timestamp, command: &Command) -> StrataResult<()> {
        let catalog = &self.ctx.catalog;
        match command {
            Command::CreateDatabase { id, tenant, name } => {
                catalog.ensure_database_committed(*id, *tenant, name, ts);
            }
            Command::DropDatabase { id } => {
                catalog.drop_database_committed(*id, ts);
            }
            Command::CreateTable {
                db,
                id,
                tenant,
                schema,
            } => {
                catalog.ensure_table_committed(*db, *id, *tenant, schema.clone(), ts)?;
            }
            Command::DropTable { db, id } => {
                catalog.drop_table_committed(*db, *id, ts);
            }
            Command::Alter { db, table, alter } => {
                let applied = catalog.apply_alter_committed(*db, *table, alter, ts)?;
                if applied {
                    if let Some(entry) =
                        catalog.database_raw(*db).and_then(|d| d.table(*table))
                    {
                        entry.log_alter(ts, alter.clone());
                    }
                }
            }
            Command::CreateSegment {
                db,
                table,
                segment,
                sorted,
                appendable,
            } => {
                let Some(entry) = catalog.database_raw(*db).and_then(|d| d.table(*table))
                else {
                    return Ok(());
                };
                if entry.segment(*segment).is_none() {
                    entry.add_segment(SegmentEntry::new_committed(
                        *segment,
                        *table,
                        *db,
                        *sorted,
                        *appendable,
                        ts,
                    ));
                    catalog.sequence().observe_segment_id(*segment);
                }
            }
            Command::DropSegment { db, table, segment } => {
                if let Some(seg) = catalog
                    .database_raw(*db)
                    .and_then(|d| d.table(*table))
                    .and_then(|t| t.segment(*segment))
                {
                    let mut chain = seg.chain().write();
                    if chain.deleted_at().is_none() {
                        chain.push_committed(CommitOp::SoftDelete, TxnId::INVALID, ts);
                    }
                }
            }
            Command::CreateBlock { db, table, block } => {
                let Some(entry) = catalog.database_raw(*db).and_then(|d| d.table(*table))
                else {
                    return Ok(());
                };
                let Some(segment) = entry.segment(block.segment) else {
                    return Ok(());
                };
                if segment.block(block.offset).is_none() {
                    let schema = entry.schema();
                    segment.add_block(BlockEntry::new_appendable_committed(
                        *block, *table, *db, schema, ts,
                    ));
                    segment.observe_block_offset(block.offset);
                }
            }
            Command::SoftDeleteBlock { db, table, block } => {
                if let Some(entry) = catalog
                    .database_raw(*db)
                    .and_then(|d| d.table(*table))
                    .and_then(|t| t.block(*block))
                {
                    let mut chain = entry.chain().write();
                    if chain.deleted_at().is_none() {
                        chain.push_committed(CommitOp::SoftDelete, TxnId::INVALID, ts);
                    }
                }
            }
            Command::Append {
                db,
                table,
                block,
                start_row,
                batch,
            } => {
                if let Some(entry) = catalog
                    .database_raw(*db)
                    .and_then(|d| d.table(*table))
                    .and_then(|t| t.block(*block))
                {
                    let mut data = entry.data().write();
                    let appendable = data.as_appendable_mut()?;
                    appendable.fill_aborted_gap(*start_row)?;
                    appendable.append_committed(*start_row, batch, ts)?;
                }
            }
            Command::Delete {
                db,
                table,
                block,
                rows,
            } => {
                if let Some(entry) = catalog
                    .database_raw(*db)
                    .and_then(|d| d.table(*table))
                    .and_then(|t| t.block(*block))
                {
                    entry
                        .data()
                        .write()
                        .delete_chain_mut()
                        .insert_committed(rows, ts, DeleteKind::Normal);
                }
            }
            Command::InstallMeta {
                db,
                table,
                block,
                meta_loc,
                schema_version,
                sorted,
            } => {
                let Some(entry) = catalog.database_raw(*db).and_then(|d| d.table(*table))
                else {
                    return Ok(());
                };
                let Some(segment) = entry.segment(block.segment) else {
                    return Ok(());
                };
                if segment.block(block.offset).is_none() {
                    let schema = entry
                        .schema_version(*schema_version)
                        .unwrap_or_else(|| entry.schema());
                    let pdata = PersistedData::load(
                        self.ctx.fs.as_ref(),
                        Arc::clone(&schema),
                        meta_loc.clone(),
                        *sorted,
                    )?;
                    segment.add_block(BlockEntry::new_persisted_committed(
                        *block, *table, *db, schema, pdata, ts,
                    ));
                    segment.observe_block_offset(block.offset);
                    self.ctx.ref_object(&meta_loc.object);
                }
            }
            Command::InstallDelta {
                db,
                table,
                block,
                delta_loc,
                flushed_upto,
            } => {
                if let Some(entry) = catalog
                    .database_raw(*db)
                    .and_then(|d| d.table(*table))
                    .and_then(|t| t.block(*block))
                {
                    let mut data = entry.data().write();
                    if let Ok(p) = data.as_persisted_mut() {
                        p.install_delta(delta_loc.clone(), *flushed_upto, ts);
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
