//! The relation handle.
//!
//! A `Relation` binds a transaction to a table and exposes the data
//! plane: appends, range deletes, filter lookups, point reads, scans, and
//! schema alteration. Reads see the transaction's snapshot plus its own
//! pending writes; mutations land as pending nodes tagged with the
//! transaction id and are finalized by the commit pipeline.

use std::collections::HashSet;
use std::sync::Arc;

use strata_batch::{AlterTableReq, Batch, Bitmap, ColumnVector, Schema, Value};
use strata_common::types::{BlockId, Timestamp, TxnId};
use strata_common::{StrataError, StrataResult};

use crate::catalog::{BlockEntry, DatabaseEntry, SegmentEntry, TableEntry};
use crate::data::{BlockData, BlockView, ColumnView, DeleteKind};
use crate::db::EngineCtx;
use crate::txn::txn::{DedupType, TxnRef};
use crate::txn::workspace::AppendRecord;

/// A transaction-scoped handle on one table.
pub struct Relation {
    ctx: Arc<EngineCtx>,
    txn: TxnRef,
    db: Arc<DatabaseEntry>,
    table: Arc<TableEntry>,
}

impl std::fmt::Debug for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relation")
            .field("db", &self.db)
            .field("table", &self.table)
            .finish()
    }
}

impl Relation {
    /// Creates a handle. Engine code constructs these via
    /// `Engine::relation`.
    #[must_use]
    pub fn new(
        ctx: Arc<EngineCtx>,
        txn: TxnRef,
        db: Arc<DatabaseEntry>,
        table: Arc<TableEntry>,
    ) -> Self {
        Self {
            ctx,
            txn,
            db,
            table,
        }
    }

    /// The bound table's id.
    #[must_use]
    pub fn table_id(&self) -> strata_common::types::TableId {
        self.table.id()
    }

    /// The bound table entry.
    #[must_use]
    pub fn table(&self) -> &Arc<TableEntry> {
        &self.table
    }

    /// The latest schema.
    #[must_use]
    pub fn schema(&self) -> Arc<Schema> {
        self.table.schema()
    }

    fn snapshot(&self) -> Timestamp {
        self.txn.start_ts()
    }

    fn txn_id(&self) -> TxnId {
        self.txn.id()
    }

    /// Blocks visible at the snapshot, oldest first.
    #[must_use]
    pub fn visible_blocks(&self) -> Vec<Arc<BlockEntry>> {
        let snapshot = self.snapshot();
        let txn_id = self.txn_id();
        let mut out = Vec::new();
        for segment in self.table.segments_snapshot() {
            if !segment.is_visible(snapshot, txn_id) {
                continue;
            }
            for block in segment.blocks_snapshot() {
                if block.is_visible(snapshot, txn_id) {
                    out.push(block);
                }
            }
        }
        out
    }

    /// Ids of blocks visible at the snapshot, oldest first.
    #[must_use]
    pub fn blocks(&self) -> Vec<BlockId> {
        self.visible_blocks().iter().map(|b| b.id()).collect()
    }

    /// Logical row count at the snapshot.
    pub fn row_count(&self) -> StrataResult<u64> {
        let snapshot = self.snapshot();
        let txn_id = self.txn_id();
        let mut total = 0u64;
        for block in self.visible_blocks() {
            let data = block.data().read();
            match &*data {
                BlockData::Appendable(a) => {
                    total += u64::from(a.live_rows(snapshot, txn_id));
                }
                BlockData::Persisted(p) => {
                    let mask = p.delete_mask_at(self.ctx.fs.as_ref(), snapshot, txn_id)?;
                    total += u64::from(p.rows()) - mask.cardinality() as u64;
                }
            }
        }
        Ok(total)
    }

    // =========================================================================
    // Append
    // =========================================================================

    /// Appends a batch. Fails `DuplicateEntry` when a primary key is
    /// already alive at the snapshot (or in this transaction), and
    /// `WwConflict` later at commit if a racing transaction wins the key.
    pub fn append(&self, batch: &Batch) -> StrataResult<()> {
        self.txn.ensure_active()?;
        if batch.is_empty() {
            return Ok(());
        }
        let schema = self.schema();
        if batch.col_count() != schema.col_count() {
            return Err(StrataError::invalid_argument(format!(
                "batch has {} columns, table {} has {}",
                batch.col_count(),
                schema.name,
                schema.col_count()
            )));
        }

        if let Some(pk_pos) = schema.pk_pos() {
            let keys = batch
                .vec(pk_pos)
                .ok_or_else(|| StrataError::internal("pk column missing"))?;
            let mut in_batch = HashSet::new();
            for key in keys.values() {
                if key.is_null() {
                    return Err(StrataError::invalid_argument(
                        "primary key may not be NULL",
                    ));
                }
                if !in_batch.insert(key.clone()) {
                    return Err(StrataError::duplicate(format!("pk {key}")));
                }
            }
            match self.txn.dedup_type() {
                DedupType::Normal => self.dedup_batch(keys, false)?,
                DedupType::FullSkipWorkspace => self.dedup_batch(keys, true)?,
                // Conflicts against rows newer than the snapshot are
                // caught by the prepare re-check.
                DedupType::Incremental => {}
            }
        }

        let total = batch.row_count();
        let mut offset = 0usize;
        while offset < total {
            let (_, block) = self.appendable_location(&schema)?;
            let mut data = block.data().write();
            let appendable = data.as_appendable_mut()?;
            let cap = appendable.capacity_left() as usize;
            if cap == 0 || appendable.is_frozen() {
                continue;
            }
            let take = cap.min(total - offset);
            let chunk = batch.window(offset, take);
            let start = appendable.append(self.txn_id(), &chunk)?;
            drop(data);

            let block_id = block.id();
            let pk_pos = schema.pk_pos();
            self.txn.with_ws(|ws| {
                let writes = ws.table_mut(self.table.id(), self.db.id());
                writes.appends.push(AppendRecord {
                    block: block_id,
                    start,
                    count: take as u32,
                });
                if let Some(pk_pos) = pk_pos {
                    if let Some(col) = chunk.vec(pk_pos) {
                        writes.appended_keys.extend(col.values().iter().cloned());
                    }
                }
            })?;
            offset += take;
        }
        Ok(())
    }

    /// Finds the tail appendable block, allocating a block or segment when
    /// the current one is full.
    fn appendable_location(
        &self,
        schema: &Arc<Schema>,
    ) -> StrataResult<(Arc<SegmentEntry>, Arc<BlockEntry>)> {
        let snapshot = self.snapshot();
        let txn_id = self.txn_id();

        let tail = self
            .table
            .segments_snapshot()
            .into_iter()
            .rev()
            .find(|s| s.is_appendable() && s.is_visible(snapshot, txn_id));

        if let Some(segment) = tail {
            if let Some(block) = segment.last_block() {
                if block.is_visible(snapshot, txn_id) {
                    let data = block.data().read();
                    if let BlockData::Appendable(a) = &*data {
                        if !a.is_frozen() && !a.is_full() {
                            drop(data);
                            return Ok((segment, block));
                        }
                    }
                }
            }
            if segment.block_count() < schema.segment_max_blocks as usize {
                let block = self.create_block(&segment, schema)?;
                return Ok((segment, block));
            }
        }

        let segment = self.create_segment(schema)?;
        let block = self.create_block(&segment, schema)?;
        Ok((segment, block))
    }

    /// Returns the current appendable location without creating one.
    pub fn get_appender(&self) -> StrataResult<(Arc<SegmentEntry>, Arc<BlockEntry>)> {
        let snapshot = self.snapshot();
        let txn_id = self.txn_id();
        for segment in self.table.segments_snapshot().into_iter().rev() {
            if !segment.is_appendable() || !segment.is_visible(snapshot, txn_id) {
                continue;
            }
            if let Some(block) = segment.last_block() {
                if block.is_visible(snapshot, txn_id) {
                    let data = block.data().read();
                    if let BlockData::Appendable(a) = &*data {
                        if !a.is_frozen() && !a.is_full() {
                            drop(data);
                            return Ok((segment, block));
                        }
                    }
                }
            }
        }
        Err(StrataError::AppendableSegmentNotFound)
    }

    fn create_segment(&self, schema: &Arc<Schema>) -> StrataResult<Arc<SegmentEntry>> {
        let id = self.ctx.catalog.sequence().next_segment_id();
        let segment = SegmentEntry::new(
            id,
            self.table.id(),
            self.db.id(),
            schema.is_sorted(),
            true,
            self.txn_id(),
        );
        self.table.add_segment(Arc::clone(&segment));
        self.txn.with_ws(|ws| {
            ws.table_mut(self.table.id(), self.db.id())
                .created_segments
                .push(id);
        })?;
        Ok(segment)
    }

    fn create_block(
        &self,
        segment: &Arc<SegmentEntry>,
        schema: &Arc<Schema>,
    ) -> StrataResult<Arc<BlockEntry>> {
        let offset = segment.alloc_block_offset();
        let id = BlockId::new(segment.id(), offset);
        let block = BlockEntry::new_appendable(
            id,
            self.table.id(),
            self.db.id(),
            Arc::clone(schema),
            self.txn_id(),
        );
        segment.add_block(Arc::clone(&block));
        self.txn.with_ws(|ws| {
            ws.table_mut(self.table.id(), self.db.id())
                .created_blocks
                .push(id);
        })?;
        Ok(block)
    }

    /// Checks a batch of keys against every visible row. Persisted blocks
    /// are pruned through the zonemap fast-intersect and bloom layers
    /// before any exact probe; `skip_own` ignores rows this transaction
    /// appended itself.
    fn dedup_batch(&self, keys: &ColumnVector, skip_own: bool) -> StrataResult<()> {
        let snapshot = self.snapshot();
        let txn_id = self.txn_id();
        let key_bytes: Vec<Vec<u8>> =
            keys.values().iter().map(Value::sort_key_bytes).collect();
        let keys_min = key_bytes.iter().min().cloned().unwrap_or_default();
        let keys_max = key_bytes.iter().max().cloned().unwrap_or_default();

        for block in self.visible_blocks().into_iter().rev() {
            let data = block.data().read();
            match &*data {
                BlockData::Appendable(a) => {
                    for key in keys.values() {
                        if let Some(row) = a.find_alive(key, snapshot, txn_id) {
                            if skip_own
                                && a.node_of(row).is_some_and(|n| n.txn_id == txn_id)
                            {
                                continue;
                            }
                            return Err(StrataError::duplicate(format!("pk {key}")));
                        }
                    }
                }
                BlockData::Persisted(p) => {
                    match p
                        .immut_index()
                        .batch_dedup(&key_bytes, &keys_min, &keys_max)
                    {
                        Ok(()) => continue,
                        Err(StrataError::ExpectedPossibleDup) => {}
                        Err(err) => return Err(err),
                    }
                    for key in keys.values() {
                        let found = p.find_key_row(
                            self.ctx.fs.as_ref(),
                            &self.ctx.column_cache,
                            key,
                        )?;
                        if let Some(row) = found {
                            let mask =
                                p.delete_mask_at(self.ctx.fs.as_ref(), snapshot, txn_id)?;
                            if !mask.contains(row) {
                                return Err(StrataError::duplicate(format!("pk {key}")));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Delete / update
    // =========================================================================

    /// Deletes the row range `[lo, hi]` of a block.
    pub fn range_delete(
        &self,
        block_id: BlockId,
        lo: u32,
        hi: u32,
        kind: DeleteKind,
    ) -> StrataResult<()> {
        self.txn.ensure_active()?;
        let snapshot = self.snapshot();
        let txn_id = self.txn_id();
        let block = self
            .table
            .block(block_id)
            .ok_or_else(|| StrataError::not_found(format!("block {block_id}")))?;

        // Writing to a block retired before our snapshot redirects
        // immediately through the transfer table; retirement after our
        // snapshot is handled the same way at commit.
        if let Some(retired_at) = block.deleted_at() {
            if retired_at <= snapshot {
                return self.redirect_delete(block_id, lo, hi, kind);
            }
        }

        let rows = Bitmap::from_range(lo, hi);
        {
            let mut data = block.data().write();
            match &mut *data {
                BlockData::Appendable(a) => {
                    for row in lo..=hi {
                        if !a.row_alive(row, snapshot, txn_id) {
                            return Err(StrataError::not_found(format!(
                                "row {row} of block {block_id}"
                            )));
                        }
                    }
                    a.deletes.delete(rows.clone(), txn_id, snapshot, kind)?;
                }
                BlockData::Persisted(p) => {
                    if hi >= p.rows() {
                        return Err(StrataError::not_found(format!(
                            "row {hi} of block {block_id}"
                        )));
                    }
                    let mask = p.delete_mask_at(self.ctx.fs.as_ref(), snapshot, txn_id)?;
                    for row in lo..=hi {
                        if mask.contains(row) {
                            return Err(StrataError::not_found(format!(
                                "row {row} of block {block_id}"
                            )));
                        }
                    }
                    p.deletes.delete(rows.clone(), txn_id, snapshot, kind)?;
                }
            }
        }
        self.txn.with_ws(|ws| {
            ws.table_mut(self.table.id(), self.db.id())
                .deletes
                .entry(block_id)
                .or_default()
                .union(&rows);
        })?;
        Ok(())
    }

    fn redirect_delete(
        &self,
        old_block: BlockId,
        lo: u32,
        hi: u32,
        kind: DeleteKind,
    ) -> StrataResult<()> {
        let map = self.ctx.transfers.get(old_block).ok_or_else(|| {
            StrataError::ww_conflict(format!("block {old_block} retired, transfer expired"))
        })?;
        for row in lo..=hi {
            if let Some((new_block, new_row)) = map.get(row) {
                self.range_delete(new_block, new_row, new_row, kind)?;
            }
        }
        Ok(())
    }

    /// Deletes the row matching a primary key.
    pub fn delete_by_filter(&self, key: &Value) -> StrataResult<()> {
        let (block, row) = self.get_by_filter(key)?;
        self.range_delete(block, row, row, DeleteKind::Normal)
    }

    /// Updates one column of the row matching a primary key, as a delete
    /// plus a re-append. The primary key column itself cannot be updated.
    pub fn update_by_filter(
        &self,
        key: &Value,
        col_pos: usize,
        value: Value,
        is_null: bool,
    ) -> StrataResult<()> {
        self.txn.ensure_active()?;
        let schema = self.schema();
        if schema.pk_pos() == Some(col_pos) {
            return Err(StrataError::invalid_argument(
                "primary key updates must be expressed as delete + insert",
            ));
        }
        if col_pos >= schema.col_count() {
            return Err(StrataError::not_found(format!("column {col_pos}")));
        }
        let (block_id, row) = self.get_by_filter(key)?;
        let mut values = self.read_row(block_id, row, &schema)?;
        values[col_pos] = if is_null { Value::Null } else { value };

        self.range_delete(block_id, row, row, DeleteKind::Normal)?;
        let mut batch = Batch::empty_like(&schema);
        batch.push_row(&values)?;
        self.append(&batch)
    }

    fn read_row(
        &self,
        block_id: BlockId,
        row: u32,
        schema: &Arc<Schema>,
    ) -> StrataResult<Vec<Value>> {
        let block = self
            .table
            .block(block_id)
            .ok_or_else(|| StrataError::not_found(format!("block {block_id}")))?;
        let data = block.data().read();
        match &*data {
            BlockData::Appendable(a) => (0..schema.col_count())
                .map(|pos| {
                    let seq = schema.cols[pos].seq_num;
                    match block.schema().pos_of_seqnum(seq) {
                        Some(write_pos) => a.get_value(row, write_pos),
                        None => Ok(Value::Null),
                    }
                })
                .collect(),
            BlockData::Persisted(p) => schema
                .cols
                .iter()
                .map(|col| {
                    let vec = p.read_column_by_seqnum(
                        self.ctx.fs.as_ref(),
                        &self.ctx.column_cache,
                        col.seq_num,
                        col.ty,
                    )?;
                    vec.get(row as usize)
                        .cloned()
                        .ok_or_else(|| StrataError::not_found(format!("row {row}")))
                })
                .collect(),
        }
    }

    // =========================================================================
    // Point reads
    // =========================================================================

    /// Finds the live row holding a primary key. Scans newest block first,
    /// pruning persisted blocks through their zonemap and bloom summary.
    pub fn get_by_filter(&self, key: &Value) -> StrataResult<(BlockId, u32)> {
        self.txn.ensure_active()?;
        let snapshot = self.snapshot();
        let txn_id = self.txn_id();
        let key_bytes = key.sort_key_bytes();
        for block in self.visible_blocks().into_iter().rev() {
            let data = block.data().read();
            match &*data {
                BlockData::Appendable(a) => {
                    if let Some(row) = a.find_alive(key, snapshot, txn_id) {
                        return Ok((block.id(), row));
                    }
                }
                BlockData::Persisted(p) => {
                    match p.probe(&key_bytes) {
                        Ok(()) => continue,
                        Err(StrataError::ExpectedPossibleDup) => {}
                        Err(err) => return Err(err),
                    }
                    if let Some(row) = p.find_key_row(
                        self.ctx.fs.as_ref(),
                        &self.ctx.column_cache,
                        key,
                    )? {
                        let mask =
                            p.delete_mask_at(self.ctx.fs.as_ref(), snapshot, txn_id)?;
                        if !mask.contains(row) {
                            return Ok((block.id(), row));
                        }
                    }
                }
            }
        }
        Err(StrataError::not_found(format!("pk {key}")))
    }

    /// Reads one cell of a live row.
    pub fn get_value(&self, block_id: BlockId, row: u32, col_pos: usize) -> StrataResult<Value> {
        self.txn.ensure_active()?;
        let snapshot = self.snapshot();
        let txn_id = self.txn_id();
        let schema = self.schema();
        if col_pos >= schema.col_count() {
            return Err(StrataError::not_found(format!("column {col_pos}")));
        }
        let block = self
            .table
            .block(block_id)
            .ok_or_else(|| StrataError::not_found(format!("block {block_id}")))?;
        let data = block.data().read();
        match &*data {
            BlockData::Appendable(a) => {
                if !a.row_alive(row, snapshot, txn_id) {
                    return Err(StrataError::not_found(format!("row {row}")));
                }
                let seq = schema.cols[col_pos].seq_num;
                match block.schema().pos_of_seqnum(seq) {
                    Some(write_pos) => a.get_value(row, write_pos),
                    None => Ok(Value::Null),
                }
            }
            BlockData::Persisted(p) => {
                if row >= p.rows()
                    || p.delete_mask_at(self.ctx.fs.as_ref(), snapshot, txn_id)?
                        .contains(row)
                {
                    return Err(StrataError::not_found(format!("row {row}")));
                }
                let col = &schema.cols[col_pos];
                let vec = p.read_column_by_seqnum(
                    self.ctx.fs.as_ref(),
                    &self.ctx.column_cache,
                    col.seq_num,
                    col.ty,
                )?;
                vec.get(row as usize)
                    .cloned()
                    .ok_or_else(|| StrataError::not_found(format!("row {row}")))
            }
        }
    }

    // =========================================================================
    // Scans
    // =========================================================================

    /// Builds the view of one block for the given logical columns of the
    /// latest schema.
    pub fn block_view(&self, block_id: BlockId, cols: &[usize]) -> StrataResult<BlockView> {
        self.txn.ensure_active()?;
        let snapshot = self.snapshot();
        let txn_id = self.txn_id();
        let schema = self.schema();
        let block = self
            .table
            .block(block_id)
            .ok_or_else(|| StrataError::not_found(format!("block {block_id}")))?;
        if !block.is_visible(snapshot, txn_id) {
            return Err(StrataError::not_found(format!("block {block_id}")));
        }

        let data = block.data().read();
        let (vecs, mask): (Vec<ColumnVector>, Bitmap) = match &*data {
            BlockData::Appendable(a) => {
                let (len, mask) = a.view_bounds(snapshot, txn_id);
                let vecs = cols
                    .iter()
                    .map(|&pos| {
                        let col = schema.cols.get(pos).ok_or_else(|| {
                            StrataError::not_found(format!("column {pos}"))
                        })?;
                        Ok(match block.schema().pos_of_seqnum(col.seq_num) {
                            Some(write_pos) => a
                                .batch()
                                .vec(write_pos)
                                .map(|v| v.window(0, len as usize))
                                .unwrap_or_else(|| {
                                    ColumnVector::all_null(col.ty, len as usize)
                                }),
                            None => ColumnVector::all_null(col.ty, len as usize),
                        })
                    })
                    .collect::<StrataResult<Vec<_>>>()?;
                (vecs, mask)
            }
            BlockData::Persisted(p) => {
                let mask = p.delete_mask_at(self.ctx.fs.as_ref(), snapshot, txn_id)?;
                let vecs = cols
                    .iter()
                    .map(|&pos| {
                        let col = schema.cols.get(pos).ok_or_else(|| {
                            StrataError::not_found(format!("column {pos}"))
                        })?;
                        let vec = p.read_column_by_seqnum(
                            self.ctx.fs.as_ref(),
                            &self.ctx.column_cache,
                            col.seq_num,
                            col.ty,
                        )?;
                        Ok((*vec).clone())
                    })
                    .collect::<StrataResult<Vec<_>>>()?;
                (vecs, mask)
            }
        };
        Ok(BlockView {
            block: block_id,
            batch: Batch::new(vecs)?,
            delete_mask: mask,
        })
    }

    /// Builds the view of one column of one block.
    pub fn column_view(&self, block_id: BlockId, col_pos: usize) -> StrataResult<ColumnView> {
        let view = self.block_view(block_id, &[col_pos])?;
        view.column(0)
            .ok_or_else(|| StrataError::not_found(format!("column {col_pos}")))
    }

    /// Scans every visible block for the given logical columns.
    pub fn scan(&self, cols: &[usize]) -> StrataResult<Vec<BlockView>> {
        self.blocks()
            .into_iter()
            .map(|block| self.block_view(block, cols))
            .collect()
    }

    // =========================================================================
    // DDL
    // =========================================================================

    /// Stages a schema alteration under this transaction.
    pub fn alter(&self, req: AlterTableReq) -> StrataResult<()> {
        self.txn.ensure_active()?;
        let base_version = req.expected_version;
        self.ctx.catalog.stage_alter(
            &self.db,
            &self.table,
            self.txn.access().tenant,
            &req,
            self.txn_id(),
            self.snapshot(),
        )?;
        self.txn.with_ws(|ws| {
            let writes = ws.table_mut(self.table.id(), self.db.id());
            if writes.base_schema_version.is_none() {
                writes.base_schema_version = Some(base_version);
            }
            writes.alters.push(req);
        })
    }
}
