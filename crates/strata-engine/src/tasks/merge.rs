//! Merge tasks.
//!
//! A merge reads the live rows of N persisted blocks at the task's
//! snapshot, concatenates them (re-establishing primary-key order for
//! sorted schemas), and writes one object holding the output blocks in a
//! fresh non-appendable segment. Inputs are retired with per-input
//! transfer maps; emptied input segments are retired too.

use std::collections::HashMap;
use std::sync::Arc;

use strata_batch::{Batch, Value};
use strata_common::types::{BlockId, SegmentId, TxnId};
use strata_common::{StrataError, StrataResult};
use tracing::info;

use crate::catalog::{BlockEntry, CommitOp, SegmentEntry, TableEntry};
use crate::data::PersistedData;
use crate::tasks::flush::{build_immut, write_object_with_retry, BlockSections};
use crate::tasks::CancelToken;
use crate::txn::{MetaInstall, TxnManager};

/// Merges persisted blocks of one table into a new segment.
///
/// Returns the output block ids.
pub fn merge_blocks(
    mgr: &TxnManager,
    table: &Arc<TableEntry>,
    inputs: &[Arc<BlockEntry>],
    cancel: &CancelToken,
) -> StrataResult<Vec<BlockId>> {
    if inputs.is_empty() {
        return Err(StrataError::invalid_argument("merge needs at least one block"));
    }
    let ctx = Arc::clone(mgr.ctx());
    let txn = mgr.start();

    let result = (|| -> StrataResult<Vec<BlockId>> {
        cancel.checked()?;
        let schema = table.schema();
        let pk_pos = schema.pk_pos();

        // Claim every input, recording each claim before the next fallible
        // step so rollback can undo it.
        for block in inputs {
            if block.table_id() != table.id() {
                return Err(StrataError::invalid_argument(format!(
                    "block {} belongs to another table",
                    block.id()
                )));
            }
            {
                let mut chain = block.chain().write();
                chain.check_ww(txn.start_ts(), txn.id(), &format!("block {}", block.id()))?;
                chain.push_pending(CommitOp::SoftDelete, txn.id());
            }
            txn.with_ws(|ws| {
                ws.table_mut(table.id(), table.db_id())
                    .soft_deleted_blocks
                    .push(block.id());
            })?;
        }

        // Gather live rows: (input index, old row, values in latest-schema
        // column order).
        let mut rows: Vec<(usize, u32, Vec<Value>)> = Vec::new();
        for (input_idx, block) in inputs.iter().enumerate() {
            cancel.checked()?;
            let data = block.data().read();
            let persisted = data.as_persisted()?;
            let mask =
                persisted.delete_mask_at(ctx.fs.as_ref(), txn.start_ts(), TxnId::INVALID)?;
            let cols: Vec<Arc<strata_batch::ColumnVector>> = schema
                .cols
                .iter()
                .map(|col| {
                    persisted.read_column_by_seqnum(
                        ctx.fs.as_ref(),
                        &ctx.column_cache,
                        col.seq_num,
                        col.ty,
                    )
                })
                .collect::<StrataResult<_>>()?;
            for row in 0..persisted.rows() {
                if mask.contains(row) {
                    continue;
                }
                let values: Vec<Value> = cols
                    .iter()
                    .map(|c| c.get(row as usize).cloned().unwrap_or(Value::Null))
                    .collect();
                rows.push((input_idx, row, values));
            }
        }

        if let Some(pk_pos) = pk_pos {
            rows.sort_by(|a, b| a.2[pk_pos].cmp(&b.2[pk_pos]));
        }
        cancel.checked()?;

        // Split into output blocks and remember each row's new address.
        let block_rows = schema.block_max_rows as usize;
        let chunks: Vec<&[(usize, u32, Vec<Value>)]> = if rows.is_empty() {
            Vec::new()
        } else {
            rows.chunks(block_rows.max(1)).collect()
        };

        let mut sections = Vec::with_capacity(chunks.len());
        let mut chunk_batches = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let mut batch = Batch::empty_like(&schema);
            for (_, _, values) in *chunk {
                batch.push_row(values)?;
            }
            sections.push(BlockSections::build(&batch, pk_pos, ctx.config.bloom_fpp));
            chunk_batches.push(batch);
        }

        let new_segment_id = ctx.catalog.sequence().next_segment_id();
        let object_name = format!(
            "{}{}_{}",
            strata_common::constants::OBJECT_PREFIX,
            txn.id(),
            new_segment_id
        );
        let locs = if sections.is_empty() {
            Vec::new()
        } else {
            write_object_with_retry(&ctx, &object_name, &sections)?
        };
        cancel.checked()?;

        // Install the output segment and blocks.
        let mut new_ids = Vec::with_capacity(locs.len());
        let mut installs = Vec::with_capacity(locs.len());
        let segment = if locs.is_empty() {
            None
        } else {
            let segment = SegmentEntry::new(
                new_segment_id,
                table.id(),
                table.db_id(),
                schema.is_sorted(),
                false,
                txn.id(),
            );
            table.add_segment(Arc::clone(&segment));
            Some(segment)
        };
        if let Some(segment) = &segment {
            for (chunk_idx, meta_loc) in locs.iter().enumerate() {
                let offset = segment.alloc_block_offset();
                let new_id = BlockId::new(segment.id(), offset);
                let immut =
                    build_immut(&chunk_batches[chunk_idx], pk_pos, ctx.config.bloom_fpp);
                let pdata = PersistedData::new(
                    Arc::clone(&schema),
                    meta_loc.clone(),
                    immut,
                    schema.is_sorted(),
                );
                let new_block = BlockEntry::new_persisted(
                    new_id,
                    table.id(),
                    table.db_id(),
                    Arc::clone(&schema),
                    pdata,
                    txn.id(),
                );
                segment.add_block(new_block);
                installs.push(MetaInstall {
                    block: new_id,
                    meta_loc: meta_loc.clone(),
                    schema_version: schema.version,
                    sorted: schema.is_sorted(),
                });
                new_ids.push(new_id);
            }
        }

        // Per-input transfer maps from the chunk layout.
        let mut transfer_maps: Vec<HashMap<u32, (BlockId, u32)>> =
            vec![HashMap::new(); inputs.len()];
        for (chunk_idx, chunk) in chunks.iter().enumerate() {
            let new_block = new_ids[chunk_idx];
            for (pos, (input_idx, old_row, _)) in chunk.iter().enumerate() {
                transfer_maps[*input_idx].insert(*old_row, (new_block, pos as u32));
            }
        }

        // Input segments that lose their last live block retire too.
        let input_ids: Vec<BlockId> = inputs.iter().map(|b| b.id()).collect();
        let mut retired_segments: Vec<SegmentId> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for block in inputs {
            let seg_id = block.id().segment;
            if !seen.insert(seg_id) {
                continue;
            }
            let Some(seg) = table.segment(seg_id) else {
                continue;
            };
            let all_retired = seg.blocks_snapshot().iter().all(|b| {
                input_ids.contains(&b.id()) || b.deleted_at().is_some()
            });
            if all_retired {
                let mut chain = seg.chain().write();
                if chain
                    .check_ww(txn.start_ts(), txn.id(), "segment")
                    .is_ok()
                {
                    chain.push_pending(CommitOp::SoftDelete, txn.id());
                    retired_segments.push(seg_id);
                }
            }
        }

        txn.with_ws(|ws| {
            let writes = ws.table_mut(table.id(), table.db_id());
            if segment.is_some() {
                writes.created_segments.push(new_segment_id);
            }
            for install in installs {
                writes.installed_meta.push(install);
            }
            for (block, map) in input_ids.iter().zip(transfer_maps) {
                writes.transfers.push((*block, map));
            }
            writes.soft_deleted_segments.extend(retired_segments);
        })?;
        mgr.commit(&txn)?;
        info!(
            table = %table.id(),
            inputs = inputs.len(),
            outputs = new_ids.len(),
            "blocks merged"
        );
        Ok(new_ids)
    })();

    if result.is_err() {
        let _ = mgr.rollback(&txn);
    }
    result
}
