//! Logical and physical garbage collection.
//!
//! Behind a global checkpoint, entries soft-deleted at or before the
//! checkpoint end and invisible to every active snapshot are
//! hard-deleted: removed from the catalog maps, their commit chains
//! pruned, and their objects unlinked once no surviving block references
//! them.

use strata_common::types::Timestamp;
use tracing::{debug, warn};

use crate::data::BlockData;
use crate::db::EngineCtx;

/// The newest timestamp strictly below `ts`.
fn just_below(ts: Timestamp) -> Timestamp {
    if ts.logical > 0 {
        Timestamp::new(ts.physical, ts.logical - 1)
    } else {
        Timestamp::new(ts.physical.saturating_sub(1), u32::MAX)
    }
}

/// Runs one GC pass. `global_end` bounds what any future replay needs;
/// `min_active` protects running snapshots. Returns the number of entries
/// hard-deleted.
pub fn run_gc(ctx: &EngineCtx, global_end: Timestamp, min_active: Option<Timestamp>) -> usize {
    let safe_ts = match min_active {
        Some(m) if m <= global_end => just_below(m),
        _ => global_end,
    };
    let removable = |deleted: Option<Timestamp>| matches!(deleted, Some(ts) if ts <= safe_ts);
    let mut removed = 0usize;

    for db in ctx.catalog.databases_snapshot() {
        for table in db.tables_snapshot() {
            for segment in table.segments_snapshot() {
                for block in segment.blocks_snapshot() {
                    if removable(block.deleted_at()) {
                        let object = {
                            let data = block.data().read();
                            match &*data {
                                BlockData::Persisted(p) => Some((
                                    p.meta_loc().object.clone(),
                                    p.delta_loc().map(|l| l.object.clone()),
                                )),
                                BlockData::Appendable(_) => None,
                            }
                        };
                        if let Some((meta_object, delta_object)) = object {
                            if ctx.unref_object(&meta_object) {
                                if let Err(err) = ctx.fs.delete(&meta_object) {
                                    warn!(object = %meta_object, %err, "gc unlink failed");
                                }
                            }
                            if let Some(delta) = delta_object {
                                if let Err(err) = ctx.fs.delete(&delta) {
                                    warn!(object = %delta, %err, "gc unlink failed");
                                }
                            }
                        }
                        segment.remove_block(block.id().offset);
                        removed += 1;
                    } else {
                        block.chain().write().prune(safe_ts);
                    }
                }
                if removable(segment.chain().read().deleted_at()) && segment.block_count() == 0
                {
                    table.remove_segment(segment.id());
                    removed += 1;
                } else {
                    segment.chain().write().prune(safe_ts);
                }
            }
            if removable(table.chain().read().deleted_at())
                && table.segments_snapshot().is_empty()
            {
                db.remove_table(table.id());
                removed += 1;
            } else {
                table.chain().write().prune(safe_ts);
            }
        }
        db.table_names().gc(safe_ts);
        if !db.id().is_system()
            && removable(db.chain().read().deleted_at())
            && db.tables_snapshot().is_empty()
        {
            ctx.catalog.remove_database(db.id());
            removed += 1;
        } else {
            db.chain().write().prune(safe_ts);
        }
    }
    ctx.catalog.db_names().gc(safe_ts);

    let swept = match min_active {
        Some(m) => ctx.transfers.sweep(m),
        None => ctx.transfers.sweep(ctx.ts.peek()),
    };
    if removed > 0 || swept > 0 {
        debug!(removed, swept, safe = %safe_ts, "gc pass");
    }
    removed
}
