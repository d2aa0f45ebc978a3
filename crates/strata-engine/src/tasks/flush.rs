//! Flush (compaction) tasks.
//!
//! A flush reads the live rows of one appendable block at the task's
//! snapshot, writes them as a persisted object, and at commit retires the
//! old block, installs the new one, and leaves a row transfer map behind.
//! Deletes that commit while the task runs are carried forward by the
//! commit pipeline; writers that race past the task either remap through
//! the transfer table or abort.
//!
//! A delete flush ([`flush_block_deletes`]) drains a persisted block's
//! resident delete chain into a delta-delete object.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use strata_batch::{Batch, ColumnVector, LogicalType, Value};
use strata_common::types::{BlockId, Timestamp, TxnId};
use strata_common::{StrataError, StrataResult};
use strata_fs::{Location, ObjectWriter};
use strata_index::{BloomFilter, ImmutIndex, ZoneMap};
use tracing::{info, warn};

use crate::catalog::{BlockEntry, CommitOp, TableEntry};
use crate::data::persisted::{encode_column, ts_value};
use crate::data::PersistedData;
use crate::db::EngineCtx;
use crate::tasks::CancelToken;
use crate::txn::{DeltaInstall, MetaInstall, TxnManager};

/// Sections of one output block, reusable across write retries.
pub(crate) struct BlockSections {
    pub columns: Vec<Bytes>,
    pub zonemaps: Vec<Bytes>,
    pub bloom: Option<Bytes>,
    pub rows: u32,
}

impl BlockSections {
    /// Builds encoded sections from a batch of live rows.
    pub(crate) fn build(batch: &Batch, pk_pos: Option<usize>, bloom_fpp: f64) -> Self {
        let columns: Vec<Bytes> = batch.vecs().iter().map(encode_column).collect();
        let zonemaps: Vec<Bytes> = batch
            .vecs()
            .iter()
            .map(|col| {
                let keys: Vec<Vec<u8>> = col
                    .values()
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(Value::sort_key_bytes)
                    .collect();
                let zm = ZoneMap::from_keys(keys.iter().map(Vec::as_slice));
                let mut buf = BytesMut::new();
                zm.encode(&mut buf);
                buf.freeze()
            })
            .collect();
        let bloom = pk_pos.and_then(|pos| batch.vec(pos)).map(|col| {
            let mut bloom = BloomFilter::with_rate(col.len().max(1), bloom_fpp);
            for v in col.values() {
                bloom.insert(&v.sort_key_bytes());
            }
            let mut buf = BytesMut::new();
            bloom.encode(&mut buf);
            buf.freeze()
        });
        Self {
            columns,
            zonemaps,
            bloom,
            rows: batch.row_count() as u32,
        }
    }
}

/// Writes an object of staged blocks, retrying transient I/O errors up to
/// the configured limit before promoting to `Internal`.
pub(crate) fn write_object_with_retry(
    ctx: &EngineCtx,
    name: &str,
    sections: &[BlockSections],
) -> StrataResult<Vec<Location>> {
    let mut last_err = None;
    for attempt in 0..=ctx.config.io_retry_limit {
        let mut writer = ObjectWriter::new();
        for s in sections {
            writer.add_block(s.columns.clone(), s.zonemaps.clone(), s.bloom.clone(), s.rows)?;
        }
        match writer.finish(ctx.fs.as_ref(), name) {
            Ok(locs) => return Ok(locs),
            Err(err) => {
                warn!(object = name, attempt, %err, "object write failed");
                last_err = Some(err);
            }
        }
    }
    Err(StrataError::internal(format!(
        "object write for '{name}' failed after {} attempts: {}",
        ctx.config.io_retry_limit + 1,
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Flushes one appendable block into a persisted block.
///
/// Returns the new block id, or `None` when no row survived (the old
/// block is retired without a replacement).
pub fn flush_block(
    mgr: &TxnManager,
    block: &Arc<BlockEntry>,
    cancel: &CancelToken,
) -> StrataResult<Option<BlockId>> {
    let ctx = Arc::clone(mgr.ctx());
    let txn = mgr.start();

    let result = (|| -> StrataResult<Option<BlockId>> {
        cancel.checked()?;
        let table = resolve_table(&ctx, block)?;

        // Claim the block: no new appends may land behind the task.
        {
            let mut data = block.data().write();
            data.as_appendable_mut()?.freeze();
        }
        {
            let mut chain = block.chain().write();
            chain.check_ww(txn.start_ts(), txn.id(), &format!("block {}", block.id()))?;
            chain.push_pending(CommitOp::SoftDelete, txn.id());
        }
        // Recorded before any fallible step so rollback can undo the claim.
        txn.with_ws(|ws| {
            ws.table_mut(table.id(), block.db_id())
                .soft_deleted_blocks
                .push(block.id());
        })?;

        // Rows from transactions the task cannot see would be lost by the
        // retirement; back off and let them finish first.
        let (live_batch, mapping, schema) = {
            let data = block.data().read();
            let appendable = data.as_appendable()?;
            let unsettled = appendable.appends().iter().any(|n| {
                !n.aborted
                    && match n.commit_ts {
                        Some(ts) => ts > txn.start_ts(),
                        None => true,
                    }
            });
            if unsettled {
                return Err(StrataError::ww_conflict(format!(
                    "block {} has in-flight appends",
                    block.id()
                )));
            }
            let (len, mask) = appendable.view_bounds(txn.start_ts(), TxnId::INVALID);
            let schema = Arc::clone(appendable.schema());
            let mut survivors: Vec<u32> = (0..len).filter(|r| !mask.contains(*r)).collect();
            // Persisted blocks keep primary-key order; appends arrive in
            // insert order, so re-establish it here the way merge does.
            if let Some(pk_pos) = schema.pk_pos() {
                let batch = appendable.batch();
                survivors.sort_by(|a, b| {
                    batch
                        .value(*a as usize, pk_pos)
                        .cmp(&batch.value(*b as usize, pk_pos))
                });
            }
            let mut live = Batch::empty_like(&schema);
            let mut mapping = HashMap::new();
            for (new_row, old_row) in survivors.iter().enumerate() {
                let row = appendable
                    .batch()
                    .row(*old_row as usize)
                    .ok_or_else(|| StrataError::internal("live row out of bounds"))?;
                live.push_row(&row)?;
                mapping.insert(*old_row, new_row as u32);
            }
            (live, mapping, schema)
        };
        cancel.checked()?;

        let old_id = block.id();
        if live_batch.is_empty() {
            txn.with_ws(|ws| {
                ws.table_mut(table.id(), block.db_id())
                    .transfers
                    .push((old_id, HashMap::new()));
            })?;
            mgr.commit(&txn)?;
            info!(block = %old_id, "empty block retired");
            return Ok(None);
        }

        let sections = BlockSections::build(&live_batch, schema.pk_pos(), ctx.config.bloom_fpp);
        let object_name = format!(
            "{}{}_{}_{}",
            strata_common::constants::OBJECT_PREFIX,
            txn.id(),
            old_id.segment,
            old_id.offset
        );
        let locs = write_object_with_retry(&ctx, &object_name, std::slice::from_ref(&sections))?;
        let meta_loc = locs[0].clone();
        cancel.checked()?;

        let segment = table
            .segment(old_id.segment)
            .ok_or_else(|| StrataError::internal("flush segment vanished"))?;
        let new_offset = segment.alloc_block_offset();
        let new_id = BlockId::new(segment.id(), new_offset);

        let immut = build_immut(&live_batch, schema.pk_pos(), ctx.config.bloom_fpp);
        let pdata = PersistedData::new(
            Arc::clone(&schema),
            meta_loc.clone(),
            immut,
            schema.is_sorted(),
        );
        let new_block = BlockEntry::new_persisted(
            new_id,
            table.id(),
            block.db_id(),
            Arc::clone(&schema),
            pdata,
            txn.id(),
        );
        segment.add_block(new_block);

        let full_map: HashMap<u32, (BlockId, u32)> = mapping
            .into_iter()
            .map(|(old, new)| (old, (new_id, new)))
            .collect();
        txn.with_ws(|ws| {
            let writes = ws.table_mut(table.id(), block.db_id());
            writes.installed_meta.push(MetaInstall {
                block: new_id,
                meta_loc,
                schema_version: schema.version,
                sorted: schema.is_sorted(),
            });
            writes.transfers.push((old_id, full_map));
        })?;
        mgr.commit(&txn)?;
        info!(old = %old_id, new = %new_id, rows = live_batch.row_count(), "block flushed");
        Ok(Some(new_id))
    })();

    if result.is_err() {
        // Release the claim so the block keeps accepting appends and a
        // later flush can retry.
        {
            let mut data = block.data().write();
            if let Ok(a) = data.as_appendable_mut() {
                a.unfreeze();
            }
        }
        let _ = mgr.rollback(&txn);
    }
    result
}

/// Drains a persisted block's resident committed deletes, merged with any
/// existing delta object, into a new delta-delete object.
pub fn flush_block_deletes(
    mgr: &TxnManager,
    block: &Arc<BlockEntry>,
    cancel: &CancelToken,
) -> StrataResult<Option<Location>> {
    let ctx = Arc::clone(mgr.ctx());
    let txn = mgr.start();

    let result = (|| -> StrataResult<Option<Location>> {
        cancel.checked()?;
        let table = resolve_table(&ctx, block)?;

        // Collect prior delta rows plus resident committed deletes.
        let (entries, pk_values, flushed_upto) = {
            let data = block.data().read();
            let persisted = data.as_persisted()?;
            let mut entries: Vec<(u32, Timestamp)> = persisted
                .delta_rows_snapshot(ctx.fs.as_ref())?
                .iter()
                .map(|d| (d.row, d.commit_ts))
                .collect();
            let window = persisted
                .deletes
                .committed_in(Timestamp::ZERO, txn.start_ts());
            let mut max_ts = Timestamp::ZERO;
            for (ts, rows, _) in window {
                for row in rows.iter() {
                    entries.push((row, ts));
                }
                max_ts = max_ts.max(ts);
            }
            if max_ts.is_zero() {
                return Ok(None);
            }
            entries.sort_by_key(|(row, _)| *row);
            entries.dedup_by_key(|(row, _)| *row);

            let pk_values: Vec<Value> = match persisted.schema().pk_pos() {
                Some(pk_pos) => {
                    let col =
                        persisted.read_column(ctx.fs.as_ref(), &ctx.column_cache, pk_pos)?;
                    entries
                        .iter()
                        .map(|(row, _)| col.get(*row as usize).cloned().unwrap_or(Value::Null))
                        .collect()
                }
                None => vec![Value::Null; entries.len()],
            };
            (entries, pk_values, max_ts)
        };
        cancel.checked()?;

        let n = entries.len();
        let batch = Batch::new(vec![
            ColumnVector::from_values(
                LogicalType::UInt32,
                entries.iter().map(|(row, _)| Value::UInt32(*row)).collect(),
            )?,
            ColumnVector::from_values(
                LogicalType::Binary,
                entries.iter().map(|(_, ts)| ts_value(*ts)).collect(),
            )?,
            ColumnVector::from_values(LogicalType::Bool, vec![Value::Bool(false); n])?,
            ColumnVector::from_values(
                pk_values.iter().find_map(|v| v.ty()).unwrap_or(LogicalType::Binary),
                pk_values,
            )
            .unwrap_or_else(|_| ColumnVector::all_null(LogicalType::Binary, n)),
        ])?;

        let sections = BlockSections::build(&batch, None, ctx.config.bloom_fpp);
        let object_name = format!(
            "{}{}_{}_{}",
            strata_common::constants::DELTA_PREFIX,
            txn.id(),
            block.id().segment,
            block.id().offset
        );
        let locs = write_object_with_retry(&ctx, &object_name, std::slice::from_ref(&sections))?;
        let delta_loc = locs[0].clone();

        txn.with_ws(|ws| {
            ws.table_mut(table.id(), block.db_id())
                .installed_delta
                .push(DeltaInstall {
                    block: block.id(),
                    delta_loc: delta_loc.clone(),
                    flushed_upto,
                });
        })?;
        mgr.commit(&txn)?;
        info!(block = %block.id(), rows = n, "deletes flushed to delta");
        Ok(Some(delta_loc))
    })();

    if result.is_err() {
        let _ = mgr.rollback(&txn);
    }
    result
}

pub(crate) fn resolve_table(
    ctx: &EngineCtx,
    block: &Arc<BlockEntry>,
) -> StrataResult<Arc<TableEntry>> {
    ctx.catalog
        .database_raw(block.db_id())
        .and_then(|db| db.table(block.table_id()))
        .ok_or_else(|| StrataError::internal(format!("table of block {} vanished", block.id())))
}

pub(crate) fn build_immut(batch: &Batch, pk_pos: Option<usize>, bloom_fpp: f64) -> ImmutIndex {
    match pk_pos.and_then(|pos| batch.vec(pos)) {
        Some(col) => {
            let keys: Vec<Vec<u8>> = col.values().iter().map(Value::sort_key_bytes).collect();
            ImmutIndex::build(keys.iter().map(Vec::as_slice), bloom_fpp)
        }
        None => ImmutIndex::from_parts(ZoneMap::new(), BloomFilter::new(64, 1)),
    }
}
