//! Transaction management.
//!
//! The manager owns the set of active transactions and the commit
//! pipeline. Prepare-phase validation (dedup re-check, retired-block
//! remapping) and apply run inside the commit critical section, so
//! committed effects are linearized by commit timestamp; everything before
//! that runs concurrently across transactions.

mod relation;
mod txn;
mod workspace;

pub use relation::Relation;
pub use txn::{AccessInfo, DedupType, Txn, TxnCore, TxnRef, TxnState};
pub use workspace::{AppendRecord, DeltaInstall, MetaInstall, TableWrites, Workspace};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use strata_batch::{Batch, Bitmap, Value};
use strata_common::types::{BlockId, Timestamp, TxnId};
use strata_common::{StrataError, StrataResult};
use strata_wal::{RecordFlags, RecordKind};
use tracing::debug;

use crate::catalog::{BlockEntry, TableEntry};
use crate::data::persisted::ts_value;
use crate::data::{BlockData, DeleteKind, TransferMap};
use crate::db::EngineCtx;
use crate::logtail::systable::{
    mo_columns_rows, mo_columns_schema, mo_database_row, mo_database_schema, mo_tables_row,
    mo_tables_schema, rows_to_batch, MO_COLUMNS_ID, MO_DATABASE_ID, MO_TABLES_ID,
};
use crate::logtail::{rowid_value, EntryType, LogtailRecord};
use crate::walrec::{Command, TxnPayload};

/// Transaction counters.
#[derive(Debug, Default)]
pub struct TxnStats {
    /// Transactions started.
    pub started: AtomicU64,
    /// Transactions committed.
    pub committed: AtomicU64,
    /// Transactions aborted.
    pub aborted: AtomicU64,
    /// Aborts caused by conflicts.
    pub conflicts: AtomicU64,
}

/// The transaction manager.
pub struct TxnManager {
    ctx: Arc<EngineCtx>,
    active: DashMap<TxnId, TxnRef>,
    stats: TxnStats,
}

impl TxnManager {
    /// Creates a manager over the shared engine context.
    #[must_use]
    pub fn new(ctx: Arc<EngineCtx>) -> Self {
        Self {
            ctx,
            active: DashMap::new(),
            stats: TxnStats::default(),
        }
    }

    /// The shared context.
    #[must_use]
    pub fn ctx(&self) -> &Arc<EngineCtx> {
        &self.ctx
    }

    /// Starts a transaction with default identity and dedup mode.
    pub fn start(&self) -> TxnRef {
        self.start_with(AccessInfo::default(), DedupType::Normal)
    }

    /// Starts a transaction.
    pub fn start_with(&self, access: AccessInfo, dedup: DedupType) -> TxnRef {
        let id = self.ctx.catalog.sequence().next_txn_id();
        let start_ts = self.ctx.ts.alloc();
        let txn = Arc::new(Txn::new(id, start_ts, access, dedup));
        self.active.insert(id, Arc::clone(&txn));
        self.stats.started.fetch_add(1, Ordering::Relaxed);
        txn
    }

    /// Statistics.
    #[must_use]
    pub fn stats(&self) -> &TxnStats {
        &self.stats
    }

    /// Number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// The oldest active snapshot, if any transaction is running.
    #[must_use]
    pub fn min_active_start(&self) -> Option<Timestamp> {
        self.active.iter().map(|t| t.start_ts()).min()
    }

    /// Commits a transaction. A second call after the terminal state fails
    /// `TxnNotFound`. Any prepare failure rolls the transaction back.
    pub fn commit(&self, txn: &TxnRef) -> StrataResult<Timestamp> {
        {
            let mut core = txn.core().lock();
            if core.state != TxnState::Active {
                return Err(StrataError::TxnNotFound { txn_id: txn.id() });
            }
            core.state = TxnState::Preparing;
            core.prepare_ts = Some(self.ctx.ts.alloc());
        }

        match self.commit_inner(txn) {
            Ok(commit_ts) => {
                self.active.remove(&txn.id());
                self.stats.committed.fetch_add(1, Ordering::Relaxed);
                debug!(txn = %txn.id(), ts = %commit_ts, "txn committed");
                Ok(commit_ts)
            }
            Err(err) => {
                if err.is_conflict() {
                    self.stats.conflicts.fetch_add(1, Ordering::Relaxed);
                }
                self.rollback_inner(txn);
                self.active.remove(&txn.id());
                self.stats.aborted.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Rolls back a transaction. A second call after the terminal state
    /// fails `TxnNotFound`.
    pub fn rollback(&self, txn: &TxnRef) -> StrataResult<()> {
        {
            let mut core = txn.core().lock();
            if core.state != TxnState::Active {
                return Err(StrataError::TxnNotFound { txn_id: txn.id() });
            }
            core.state = TxnState::Preparing;
        }
        self.rollback_inner(txn);
        self.active.remove(&txn.id());
        self.stats.aborted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    // =========================================================================
    // Commit pipeline
    // =========================================================================

    fn commit_inner(&self, txn: &TxnRef) -> StrataResult<Timestamp> {
        let ctx = &self.ctx;
        let _commit_guard = ctx.commit_lock.lock();

        self.check_dedup(txn)?;
        self.remap_retired(txn)?;

        let commit_ts = ctx.ts.alloc();
        let commands = self.build_commands(txn, commit_ts)?;

        let mut last_lsn = None;
        if !commands.is_empty() {
            let groups = group_by_kind(&commands);
            let n = groups.len();
            for (i, (kind, cmds)) in groups.into_iter().enumerate() {
                let payload = TxnPayload {
                    txn_id: txn.id(),
                    commit_ts,
                    commands: cmds,
                }
                .encode();
                let flags = if i + 1 == n {
                    RecordFlags::COMMIT_BOUNDARY
                } else {
                    RecordFlags::empty()
                };
                let lsn = ctx.wal.append(kind, flags, payload)?;
                last_lsn = Some(lsn);
            }
        }

        {
            let mut core = txn.core().lock();
            core.state = TxnState::Prepared;
            core.commit_ts = Some(commit_ts);
        }
        self.apply_commit(txn, commit_ts, last_lsn)?;
        txn.core().lock().state = TxnState::Committed;
        Ok(commit_ts)
    }

    /// Re-checks appended keys against rows this transaction could not see
    /// at its snapshot: rows committed after it started, or still pending
    /// from other transactions. Any hit is a write-write conflict (the
    /// later preparer loses).
    fn check_dedup(&self, txn: &TxnRef) -> StrataResult<()> {
        let core = txn.core().lock();
        for (table_id, writes) in &core.ws.tables {
            if writes.appended_keys.is_empty() {
                continue;
            }
            let Some(db) = self.ctx.catalog.database_raw(writes.db_id) else {
                continue;
            };
            let Some(table) = db.table(*table_id) else {
                continue;
            };
            for key in &writes.appended_keys {
                self.check_key_conflict(&table, key, txn)?;
            }
        }
        Ok(())
    }

    fn check_key_conflict(
        &self,
        table: &Arc<TableEntry>,
        key: &Value,
        txn: &TxnRef,
    ) -> StrataResult<()> {
        let start = txn.start_ts();
        let key_bytes = key.sort_key_bytes();
        for segment in table.segments_snapshot() {
            for block in segment.blocks_snapshot() {
                let data = block.data().read();
                match &*data {
                    BlockData::Appendable(a) => {
                        for &row in a.pk_candidates(key) {
                            let Some(node) = a.node_of(row) else {
                                continue;
                            };
                            if node.aborted {
                                continue;
                            }
                            let conflicting = match node.commit_ts {
                                Some(ts) => ts > start,
                                None => node.txn_id != txn.id(),
                            };
                            if conflicting {
                                return Err(StrataError::ww_conflict(format!(
                                    "pk {key} in block {}",
                                    block.id()
                                )));
                            }
                        }
                    }
                    BlockData::Persisted(p) => {
                        // Only blocks installed after our snapshot can hold
                        // rows we failed to dedup against at append time.
                        let installed_after = match block.created_at() {
                            Some(ts) => ts > start,
                            None => false,
                        };
                        if !installed_after {
                            continue;
                        }
                        if p.probe(&key_bytes).is_ok() {
                            continue;
                        }
                        let found = p.find_key_row(
                            self.ctx.fs.as_ref(),
                            &self.ctx.column_cache,
                            key,
                        )?;
                        if let Some(row) = found {
                            let mask = p.delete_mask_at(
                                self.ctx.fs.as_ref(),
                                Timestamp::MAX,
                                TxnId::INVALID,
                            )?;
                            if !mask.contains(row) {
                                return Err(StrataError::ww_conflict(format!(
                                    "pk {key} in block {}",
                                    block.id()
                                )));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Redirects writes that targeted blocks retired by a compaction or
    /// merge that committed after this transaction's snapshot. Deletes
    /// follow the transfer table; appends into a retired block abort.
    fn remap_retired(&self, txn: &TxnRef) -> StrataResult<()> {
        let mut core = txn.core().lock();
        let snapshot = txn.start_ts();
        let txn_id = txn.id();
        for (table_id, writes) in core.ws.tables.iter_mut() {
            let Some(db) = self.ctx.catalog.database_raw(writes.db_id) else {
                continue;
            };
            let Some(table) = db.table(*table_id) else {
                continue;
            };

            for rec in &writes.appends {
                let Some(block) = table.block(rec.block) else {
                    return Err(StrataError::internal(format!(
                        "append target {} vanished",
                        rec.block
                    )));
                };
                if block.deleted_at().is_some() {
                    return Err(StrataError::ww_conflict(format!(
                        "block {} was compacted",
                        rec.block
                    )));
                }
            }

            let targets: Vec<BlockId> = writes.deletes.keys().copied().collect();
            for old_id in targets {
                let Some(old_entry) = table.block(old_id) else {
                    continue;
                };
                if old_entry.deleted_at().is_none() {
                    continue;
                }
                let rows = writes.deletes.remove(&old_id).unwrap_or_default();
                // Drop our pending node on the retired block.
                old_entry.data().write().delete_chain_mut().rollback_txn(txn_id);

                let map = self.ctx.transfers.get(old_id).ok_or_else(|| {
                    StrataError::ww_conflict(format!("block {old_id} retired, transfer expired"))
                })?;
                let mut remapped: HashMap<BlockId, Bitmap> = HashMap::new();
                for row in rows.iter() {
                    // A missing entry means the task already dropped the
                    // row; the delete becomes a no-op.
                    if let Some((new_block, new_row)) = map.get(row) {
                        remapped.entry(new_block).or_default().insert(new_row);
                    }
                }
                for (new_id, new_rows) in remapped {
                    let target = table.block(new_id).ok_or_else(|| {
                        StrataError::internal(format!("transfer target {new_id} missing"))
                    })?;
                    if target.deleted_at().is_some() {
                        return Err(StrataError::ww_conflict(format!(
                            "transfer target {new_id} was itself compacted"
                        )));
                    }
                    target.data().write().delete_chain_mut().delete(
                        new_rows.clone(),
                        txn_id,
                        snapshot,
                        DeleteKind::Normal,
                    )?;
                    writes
                        .deletes
                        .entry(new_id)
                        .or_default()
                        .union(&new_rows);
                }
            }
        }
        Ok(())
    }

    fn build_commands(&self, txn: &TxnRef, commit_ts: Timestamp) -> StrataResult<Vec<Command>> {
        let mut core = txn.core().lock();
        let txn_start = txn.start_ts();
        let mut commands = Vec::new();

        for (id, tenant, name) in &core.ws.created_dbs {
            commands.push(Command::CreateDatabase {
                id: *id,
                tenant: *tenant,
                name: name.clone(),
            });
        }

        for (table_id, writes) in core.ws.tables.iter_mut() {
            let Some(db) = self.ctx.catalog.database_raw(writes.db_id) else {
                continue;
            };
            let Some(table) = db.table(*table_id) else {
                continue;
            };
            let db_id = writes.db_id;

            if writes.created {
                let schema = table
                    .schema_version(0)
                    .ok_or_else(|| StrataError::internal("created table has no schema v0"))?;
                commands.push(Command::CreateTable {
                    db: db_id,
                    id: *table_id,
                    tenant: table.tenant(),
                    schema: (*schema).clone(),
                });
            }
            for alter in &writes.alters {
                commands.push(Command::Alter {
                    db: db_id,
                    table: *table_id,
                    alter: alter.clone(),
                });
            }
            for seg_id in &writes.created_segments {
                let (sorted, appendable) = table
                    .segment(*seg_id)
                    .map(|s| (s.is_sorted(), s.is_appendable()))
                    .unwrap_or((false, true));
                commands.push(Command::CreateSegment {
                    db: db_id,
                    table: *table_id,
                    segment: *seg_id,
                    sorted,
                    appendable,
                });
            }
            for block_id in &writes.created_blocks {
                commands.push(Command::CreateBlock {
                    db: db_id,
                    table: *table_id,
                    block: *block_id,
                });
            }
            for rec in &writes.appends {
                let block = table
                    .block(rec.block)
                    .ok_or_else(|| StrataError::internal("append block vanished"))?;
                let data = block.data().read();
                let batch = data
                    .as_appendable()?
                    .batch()
                    .window(rec.start as usize, rec.count as usize);
                commands.push(Command::Append {
                    db: db_id,
                    table: *table_id,
                    block: rec.block,
                    start_row: rec.start,
                    batch,
                });
            }
            for install in &writes.installed_meta {
                commands.push(Command::InstallMeta {
                    db: db_id,
                    table: *table_id,
                    block: install.block,
                    meta_loc: install.meta_loc.clone(),
                    schema_version: install.schema_version,
                    sorted: install.sorted,
                });
            }
            for (block_id, rows) in &writes.deletes {
                commands.push(Command::Delete {
                    db: db_id,
                    table: *table_id,
                    block: *block_id,
                    rows: rows.clone(),
                });
            }

            // Deletes committed on a retiring block while its task ran are
            // carried into the replacement blocks, both in memory and in
            // the WAL payload. Their logtail records already streamed
            // against the old block when they committed.
            for (old_id, map) in &writes.transfers {
                let Some(old_entry) = table.block(*old_id) else {
                    continue;
                };
                let window = old_entry
                    .data()
                    .read()
                    .delete_chain()
                    .committed_in(txn_start, commit_ts);
                let mut per_block: HashMap<BlockId, Bitmap> = HashMap::new();
                for (_, rows, _) in window {
                    for row in rows.iter() {
                        if let Some((new_block, new_row)) = map.get(&row).copied() {
                            per_block.entry(new_block).or_default().insert(new_row);
                        }
                    }
                }
                for (new_block, rows) in per_block {
                    if let Some(target) = table.block(new_block) {
                        target.data().write().delete_chain_mut().insert_committed(
                            &rows,
                            commit_ts,
                            DeleteKind::Compact,
                        );
                    }
                    commands.push(Command::Delete {
                        db: db_id,
                        table: *table_id,
                        block: new_block,
                        rows,
                    });
                }
            }

            for block_id in &writes.soft_deleted_blocks {
                commands.push(Command::SoftDeleteBlock {
                    db: db_id,
                    table: *table_id,
                    block: *block_id,
                });
            }
            for seg_id in &writes.soft_deleted_segments {
                commands.push(Command::DropSegment {
                    db: db_id,
                    table: *table_id,
                    segment: *seg_id,
                });
            }
            for install in &writes.installed_delta {
                commands.push(Command::InstallDelta {
                    db: db_id,
                    table: *table_id,
                    block: install.block,
                    delta_loc: install.delta_loc.clone(),
                    flushed_upto: install.flushed_upto,
                });
            }
            if writes.dropped {
                commands.push(Command::DropTable {
                    db: db_id,
                    id: *table_id,
                });
            }
        }

        for (id, _, _) in &core.ws.dropped_dbs {
            commands.push(Command::DropDatabase { id: *id });
        }
        Ok(commands)
    }

    fn apply_commit(
        &self,
        txn: &TxnRef,
        commit_ts: Timestamp,
        lsn: Option<strata_common::types::Lsn>,
    ) -> StrataResult<()> {
        let core = txn.core().lock();
        let ws = &core.ws;
        let txn_id = txn.id();
        let ctx = &self.ctx;

        // Catalog chains and name indexes.
        for (id, _, _) in ws.created_dbs.iter().chain(ws.dropped_dbs.iter()) {
            if let Some(db) = ctx.catalog.database_raw(*id) {
                db.chain().write().commit_pending(txn_id, commit_ts, lsn);
            }
        }
        ctx.catalog.db_names().commit_txn(txn_id, commit_ts);
        for db_id in ws.touched_dbs() {
            if let Some(db) = ctx.catalog.database_raw(db_id) {
                db.table_names().commit_txn(txn_id, commit_ts);
            }
        }

        for (table_id, writes) in &ws.tables {
            let Some(db) = ctx.catalog.database_raw(writes.db_id) else {
                continue;
            };
            let Some(table) = db.table(*table_id) else {
                continue;
            };
            table.chain().write().commit_pending(txn_id, commit_ts, lsn);

            for seg_id in writes
                .created_segments
                .iter()
                .chain(writes.soft_deleted_segments.iter())
            {
                if let Some(seg) = table.segment(*seg_id) {
                    seg.chain().write().commit_pending(txn_id, commit_ts, lsn);
                }
            }

            let mut touched_blocks: Vec<BlockId> = writes
                .created_blocks
                .iter()
                .chain(writes.soft_deleted_blocks.iter())
                .copied()
                .chain(writes.appends.iter().map(|a| a.block))
                .chain(writes.deletes.keys().copied())
                .chain(writes.installed_meta.iter().map(|m| m.block))
                .collect();
            touched_blocks.sort();
            touched_blocks.dedup();
            for block_id in &touched_blocks {
                if let Some(block) = table.block(*block_id) {
                    block.chain().write().commit_pending(txn_id, commit_ts, lsn);
                    block.data().write().commit_txn(txn_id, commit_ts);
                    ctx.dirty.mark(*table_id, *block_id);
                }
            }

            // Carried deletes on transfer targets were registered under
            // `deletes` during build; committed above with the rest.
            for (old_id, map) in &writes.transfers {
                ctx.transfers
                    .install(*old_id, TransferMap::new(commit_ts, map.clone()));
            }
            for install in &writes.installed_delta {
                if let Some(block) = table.block(install.block) {
                    let mut data = block.data().write();
                    if let Ok(p) = data.as_persisted_mut() {
                        p.install_delta(
                            install.delta_loc.clone(),
                            install.flushed_upto,
                            commit_ts,
                        );
                    }
                }
            }
            for install in &writes.installed_meta {
                ctx.ref_object(&install.meta_loc.object);
            }
            for alter in &writes.alters {
                table.log_alter(commit_ts, alter.clone());
            }

            self.publish_table_logtail(&table, writes, commit_ts);
        }

        self.publish_catalog_logtail(ws, commit_ts);
        Ok(())
    }

    fn publish_table_logtail(
        &self,
        table: &Arc<TableEntry>,
        writes: &TableWrites,
        commit_ts: Timestamp,
    ) {
        let ctx = &self.ctx;
        let table_name = table.schema().name.clone();
        let table_id = table.id();

        for rec in &writes.appends {
            let Some(block) = table.block(rec.block) else {
                continue;
            };
            let data = block.data().read();
            let Ok(appendable) = data.as_appendable() else {
                continue;
            };
            let mut batch = appendable
                .batch()
                .window(rec.start as usize, rec.count as usize);
            let rowids: Vec<Value> = (rec.start..rec.start + rec.count)
                .map(|row| rowid_value(rec.block, row))
                .collect();
            let commit_col = vec![ts_value(commit_ts); rec.count as usize];
            if append_reserved(&mut batch, rowids, commit_col).is_err() {
                continue;
            }
            ctx.logtail.publish(LogtailRecord {
                commit_ts,
                entry_type: EntryType::Insert,
                table_id,
                table_name: table_name.clone(),
                batch,
            });
        }

        for (block_id, rows) in &writes.deletes {
            let Some(block) = table.block(*block_id) else {
                continue;
            };
            let pk_values: Vec<Value> = rows
                .iter()
                .map(|row| self.pk_value_of(&block, row).unwrap_or(Value::Null))
                .collect();
            let batch = delete_batch(*block_id, rows, &pk_values, commit_ts);
            ctx.logtail.publish(LogtailRecord {
                commit_ts,
                entry_type: EntryType::Delete,
                table_id,
                table_name: table_name.clone(),
                batch,
            });
        }

        for install in &writes.installed_meta {
            let batch = meta_batch(install, commit_ts);
            ctx.logtail.publish(LogtailRecord {
                commit_ts,
                entry_type: EntryType::Insert,
                table_id,
                table_name: table_name.clone(),
                batch,
            });
        }
    }

    fn pk_value_of(&self, block: &Arc<BlockEntry>, row: u32) -> Option<Value> {
        let pk_pos = block.schema().pk_pos()?;
        let data = block.data().read();
        match &*data {
            BlockData::Appendable(a) => a.get_value(row, pk_pos).ok(),
            BlockData::Persisted(p) => p
                .read_column(self.ctx.fs.as_ref(), &self.ctx.column_cache, pk_pos)
                .ok()
                .and_then(|col| col.get(row as usize).cloned()),
        }
    }

    fn publish_catalog_logtail(&self, ws: &Workspace, commit_ts: Timestamp) {
        let ctx = &self.ctx;
        let db_schema = mo_database_schema();
        for (id, tenant, name) in &ws.created_dbs {
            let row = mo_database_row(*id, name, *tenant, commit_ts);
            ctx.logtail.publish(LogtailRecord {
                commit_ts,
                entry_type: EntryType::Insert,
                table_id: MO_DATABASE_ID,
                table_name: db_schema.name.clone(),
                batch: rows_to_batch(&db_schema, &[row]),
            });
        }
        for (id, tenant, name) in &ws.dropped_dbs {
            let row = mo_database_row(*id, name, *tenant, commit_ts);
            ctx.logtail.publish(LogtailRecord {
                commit_ts,
                entry_type: EntryType::Delete,
                table_id: MO_DATABASE_ID,
                table_name: db_schema.name.clone(),
                batch: rows_to_batch(&db_schema, &[row]),
            });
        }

        let tables_schema = mo_tables_schema();
        let columns_schema = mo_columns_schema();
        for (table_id, writes) in &ws.tables {
            if !writes.created && writes.alters.is_empty() && !writes.dropped {
                continue;
            }
            let Some(db) = ctx.catalog.database_raw(writes.db_id) else {
                continue;
            };
            let Some(table) = db.table(*table_id) else {
                continue;
            };
            let schema = table.schema();
            let entry_type = if writes.dropped {
                EntryType::Delete
            } else {
                EntryType::Insert
            };
            let row = mo_tables_row(
                *table_id,
                &schema.name,
                writes.db_id,
                table.tenant(),
                schema.version,
                commit_ts,
            );
            ctx.logtail.publish(LogtailRecord {
                commit_ts,
                entry_type,
                table_id: MO_TABLES_ID,
                table_name: tables_schema.name.clone(),
                batch: rows_to_batch(&tables_schema, &[row]),
            });
            let col_rows = mo_columns_rows(*table_id, &schema, commit_ts);
            ctx.logtail.publish(LogtailRecord {
                commit_ts,
                entry_type,
                table_id: MO_COLUMNS_ID,
                table_name: columns_schema.name.clone(),
                batch: rows_to_batch(&columns_schema, &col_rows),
            });
        }
    }

    // =========================================================================
    // Rollback
    // =========================================================================

    fn rollback_inner(&self, txn: &TxnRef) {
        let mut core = txn.core().lock();
        let ws = &core.ws;
        let txn_id = txn.id();
        let ctx = &self.ctx;

        for (table_id, writes) in &ws.tables {
            let Some(db) = ctx.catalog.database_raw(writes.db_id) else {
                continue;
            };
            let Some(table) = db.table(*table_id) else {
                continue;
            };

            let mut touched_blocks: Vec<BlockId> = writes
                .appends
                .iter()
                .map(|a| a.block)
                .chain(writes.deletes.keys().copied())
                .chain(writes.soft_deleted_blocks.iter().copied())
                .collect();
            touched_blocks.sort();
            touched_blocks.dedup();
            for block_id in &touched_blocks {
                if let Some(block) = table.block(*block_id) {
                    block.data().write().rollback_txn(txn_id);
                    block.chain().write().rollback_pending(txn_id);
                }
            }

            for install in &writes.installed_meta {
                if let Some(segment) = table.segment(install.block.segment) {
                    if let Some(block) = segment.block(install.block.offset) {
                        if block.chain().write().rollback_pending(txn_id) {
                            segment.remove_block(install.block.offset);
                        }
                    }
                }
            }
            for block_id in &writes.created_blocks {
                if let Some(segment) = table.segment(block_id.segment) {
                    if let Some(block) = segment.block(block_id.offset) {
                        if block.chain().write().rollback_pending(txn_id) {
                            segment.remove_block(block_id.offset);
                        }
                    }
                }
            }
            for seg_id in &writes.created_segments {
                if let Some(segment) = table.segment(*seg_id) {
                    if segment.chain().write().rollback_pending(txn_id) {
                        table.remove_segment(*seg_id);
                    }
                }
            }
            for seg_id in &writes.soft_deleted_segments {
                if let Some(segment) = table.segment(*seg_id) {
                    segment.chain().write().rollback_pending(txn_id);
                }
            }

            if let Some(base) = writes.base_schema_version {
                table.truncate_schema_versions(base);
            }
            let emptied = table.chain().write().rollback_pending(txn_id);
            if emptied && writes.created {
                db.remove_table(*table_id);
            }
            db.table_names().rollback_txn(txn_id);
        }

        for (id, _, _) in &ws.created_dbs {
            if let Some(db) = ctx.catalog.database_raw(*id) {
                if db.chain().write().rollback_pending(txn_id) {
                    ctx.catalog.remove_database(*id);
                }
            }
        }
        for (id, _, _) in &ws.dropped_dbs {
            if let Some(db) = ctx.catalog.database_raw(*id) {
                db.chain().write().rollback_pending(txn_id);
            }
        }
        ctx.catalog.db_names().rollback_txn(txn_id);

        core.state = TxnState::Aborted;
        debug!(txn = %txn_id, "txn rolled back");
    }
}

/// Splits commands into runs of equal record kind, preserving order.
fn group_by_kind(commands: &[Command]) -> Vec<(RecordKind, Vec<Command>)> {
    let mut groups: Vec<(RecordKind, Vec<Command>)> = Vec::new();
    for cmd in commands {
        let kind = cmd.record_kind();
        match groups.last_mut() {
            Some((last_kind, run)) if *last_kind == kind => run.push(cmd.clone()),
            _ => groups.push((kind, vec![cmd.clone()])),
        }
    }
    groups
}

/// Appends the reserved `rowid` and `commit_ts` columns to a data batch.
fn append_reserved(
    batch: &mut Batch,
    rowids: Vec<Value>,
    commit_col: Vec<Value>,
) -> StrataResult<()> {
    use strata_batch::{ColumnVector, LogicalType};
    let rowid_vec = ColumnVector::from_values(LogicalType::Binary, rowids)?;
    let ts_vec = ColumnVector::from_values(LogicalType::Binary, commit_col)?;
    let mut vecs: Vec<ColumnVector> = batch.vecs().to_vec();
    vecs.push(rowid_vec);
    vecs.push(ts_vec);
    *batch = Batch::new(vecs)?;
    Ok(())
}

/// Builds a logtail delete batch: `rowid`, `commit_ts`, `aborted`, pk.
fn delete_batch(
    block: BlockId,
    rows: &Bitmap,
    pk_values: &[Value],
    commit_ts: Timestamp,
) -> Batch {
    use strata_batch::{ColumnVector, LogicalType};
    let rowids: Vec<Value> = rows.iter().map(|row| rowid_value(block, row)).collect();
    let n = rowids.len();
    let mut vecs = vec![
        ColumnVector::from_values(LogicalType::Binary, rowids).expect("rowids are binary"),
        ColumnVector::from_values(LogicalType::Binary, vec![ts_value(commit_ts); n])
            .expect("commit_ts is binary"),
        ColumnVector::from_values(LogicalType::Bool, vec![Value::Bool(false); n])
            .expect("aborted is bool"),
    ];
    let pk_ty = pk_values
        .iter()
        .find_map(|v| v.ty())
        .unwrap_or(strata_batch::LogicalType::Binary);
    vecs.push(
        ColumnVector::from_values(pk_ty, pk_values.to_vec())
            .unwrap_or_else(|_| ColumnVector::all_null(pk_ty, n)),
    );
    Batch::new(vecs).expect("delete batch columns are equal length")
}

/// Builds a logtail meta batch for a persisted block installation.
fn meta_batch(install: &MetaInstall, commit_ts: Timestamp) -> Batch {
    use strata_batch::{ColumnVector, LogicalType};
    let vecs = vec![
        ColumnVector::from_values(
            LogicalType::Binary,
            vec![Value::Binary(install.block.to_be_bytes().to_vec())],
        )
        .expect("block id is binary"),
        ColumnVector::from_values(
            LogicalType::Binary,
            vec![Value::Binary(install.meta_loc.encode().to_vec())],
        )
        .expect("meta_loc is binary"),
        ColumnVector::from_values(LogicalType::Binary, vec![ts_value(commit_ts)])
            .expect("commit_ts is binary"),
    ];
    Batch::new(vecs).expect("meta batch columns are equal length")
}
