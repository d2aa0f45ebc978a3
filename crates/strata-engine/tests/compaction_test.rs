//! Flush, merge, transfer-table, and delta-delete behavior.

use std::time::Duration;

use strata_batch::mock::mock_value;
use strata_batch::{Batch, Schema, Value};
use strata_common::StrataError;
use strata_engine::testutil::{small_batch, small_schema, TestEngine};

/// One row per key ordinal, in the order given, so insert order and
/// primary-key order can disagree.
fn batch_with_keys(schema: &Schema, keys: &[i64]) -> Batch {
    let mut batch = Batch::empty_like(schema);
    for &k in keys {
        let row: Vec<Value> = schema
            .cols
            .iter()
            .map(|c| mock_value(c.ty, k as usize))
            .collect();
        batch.push_row(&row).expect("row matches schema");
    }
    batch
}

#[test]
fn test_flush_preserves_live_rows() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 10, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 10));

    // Delete keys 5..=9, then compact.
    let (txn, rel) = harness.get_relation("db", "t1");
    for k in 5..10 {
        rel.delete_by_filter(&Value::Int64(k)).unwrap();
    }
    harness.engine().commit(&txn).unwrap();
    assert_eq!(harness.engine().compact_blocks("db", "t1").unwrap(), 1);

    let (txn, rel) = harness.get_relation("db", "t1");
    assert_eq!(rel.row_count().unwrap(), 5);
    for k in 0..5 {
        let (block, row) = rel.get_by_filter(&Value::Int64(k)).unwrap();
        assert_eq!(rel.get_value(block, row, 3).unwrap(), Value::Int64(k));
    }
    for k in 5..10 {
        assert!(rel.get_by_filter(&Value::Int64(k)).is_err());
    }
    // The old appendable block is gone from the visible set.
    let blocks = rel.blocks();
    assert_eq!(blocks.len(), 1);
    harness.engine().commit(&txn).unwrap();
}

#[test]
fn test_flush_restores_pk_order_for_shuffled_appends() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 16, 2);
    // Insert order deliberately disagrees with key order.
    let keys = [7i64, 2, 9, 0, 5, 3, 8, 1, 6, 4];
    harness.create_rel_and_append("db", schema.clone(), &batch_with_keys(&schema, &keys));
    assert_eq!(harness.engine().compact_blocks("db", "t1").unwrap(), 1);

    // Every live key resolves against the persisted block.
    let (txn, rel) = harness.get_relation("db", "t1");
    assert_eq!(rel.row_count().unwrap(), 10);
    for k in 0..10 {
        let (block, row) = rel
            .get_by_filter(&Value::Int64(k))
            .unwrap_or_else(|_| panic!("key {k} must survive the flush"));
        assert_eq!(rel.get_value(block, row, 3).unwrap(), Value::Int64(k));
    }

    // A re-insert of an existing key is still a duplicate.
    let err = rel
        .append(&batch_with_keys(&schema, &[5]))
        .unwrap_err();
    assert!(matches!(err, StrataError::DuplicateEntry { .. }));

    // A fresh key still goes through.
    rel.append(&batch_with_keys(&schema, &[100])).unwrap();
    harness.engine().commit(&txn).unwrap();
}

#[test]
fn test_merge_after_deletes() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 10, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 30));

    // Delete keys 5..=9 (all in the first block), compact, then merge
    // everything into one fresh segment.
    let (txn, rel) = harness.get_relation("db", "t1");
    for k in 5..10 {
        rel.delete_by_filter(&Value::Int64(k)).unwrap();
    }
    harness.engine().commit(&txn).unwrap();

    assert_eq!(harness.engine().compact_blocks("db", "t1").unwrap(), 3);
    let outputs = harness.engine().merge_table_blocks("db", "t1").unwrap();
    assert!(!outputs.is_empty());
    let merged_segment = outputs[0].segment;
    assert!(outputs.iter().all(|b| b.segment == merged_segment));

    let (txn, rel) = harness.get_relation("db", "t1");
    assert_eq!(rel.row_count().unwrap(), 25);
    for k in 0..30 {
        let found = rel.get_by_filter(&Value::Int64(k));
        if (5..10).contains(&k) {
            assert!(found.is_err(), "key {k} should be deleted");
        } else {
            let (block, _) = found.unwrap_or_else(|_| panic!("key {k} must survive merge"));
            assert_eq!(block.segment, merged_segment);
        }
    }
    harness.engine().commit(&txn).unwrap();
}

#[test]
fn test_inflight_delete_remaps_through_transfer() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 10, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 10));

    // T1 opens before the compaction and targets the old block.
    let (t1, rel1) = harness.get_relation("db", "t1");
    let (old_block, old_row) = rel1.get_by_filter(&Value::Int64(2)).unwrap();

    assert_eq!(harness.engine().compact_blocks("db", "t1").unwrap(), 1);

    // The delete lands against the retired block and is redirected through
    // the transfer table at commit.
    rel1.range_delete(old_block, old_row, old_row, strata_engine::data::DeleteKind::Normal)
        .unwrap();
    harness.engine().commit(&t1).unwrap();

    let (txn, rel) = harness.get_relation("db", "t1");
    assert_eq!(rel.row_count().unwrap(), 9);
    assert!(rel.get_by_filter(&Value::Int64(2)).is_err());
    harness.engine().commit(&txn).unwrap();
}

#[test]
fn test_flush_backs_off_from_inflight_appends() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 100, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 5));

    // T1 holds pending rows in the tail block.
    let (t1, rel1) = harness.get_relation("db", "t1");
    rel1.append(&strata_engine::testutil::small_batch_from(&schema, 50, 3))
        .unwrap();

    // The flush declines rather than losing T1's rows.
    assert_eq!(harness.engine().compact_blocks("db", "t1").unwrap(), 0);
    let err = harness
        .engine()
        .flush_table("db", "t1", Duration::from_millis(30))
        .unwrap_err();
    assert!(matches!(err, StrataError::FlushTimeout { .. }));

    // Once T1 settles, the flush goes through.
    harness.engine().commit(&t1).unwrap();
    harness
        .engine()
        .flush_table("db", "t1", Duration::from_secs(5))
        .unwrap();

    let (txn, rel) = harness.get_relation("db", "t1");
    assert_eq!(rel.row_count().unwrap(), 8);
    harness.engine().commit(&txn).unwrap();
}

#[test]
fn test_delete_committed_during_task_is_carried() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 10, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 10));

    // A deleter that commits before the task does is simply part of the
    // task snapshot; one that is pending at flush time remaps at its own
    // commit. Either way the row must not survive.
    let (deleter, rel) = harness.get_relation("db", "t1");
    rel.delete_by_filter(&Value::Int64(7)).unwrap();

    assert_eq!(harness.engine().compact_blocks("db", "t1").unwrap(), 1);
    harness.engine().commit(&deleter).unwrap();

    let (txn, rel) = harness.get_relation("db", "t1");
    assert_eq!(rel.row_count().unwrap(), 9);
    assert!(rel.get_by_filter(&Value::Int64(7)).is_err());
    harness.engine().commit(&txn).unwrap();
}

#[test]
fn test_delta_delete_flush() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 10, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 10));
    assert_eq!(harness.engine().compact_blocks("db", "t1").unwrap(), 1);

    // Delete on the persisted block, then drain to a delta object.
    let (txn, rel) = harness.get_relation("db", "t1");
    rel.delete_by_filter(&Value::Int64(2)).unwrap();
    rel.delete_by_filter(&Value::Int64(3)).unwrap();
    harness.engine().commit(&txn).unwrap();
    assert_eq!(harness.engine().flush_deletes("db", "t1").unwrap(), 1);

    // Reads merge the persisted deletes.
    let (txn, rel) = harness.get_relation("db", "t1");
    assert_eq!(rel.row_count().unwrap(), 8);
    assert!(rel.get_by_filter(&Value::Int64(2)).is_err());
    assert!(rel.get_by_filter(&Value::Int64(4)).is_ok());
    harness.engine().commit(&txn).unwrap();

    // A second wave merges with the existing delta.
    let (txn, rel) = harness.get_relation("db", "t1");
    rel.delete_by_filter(&Value::Int64(5)).unwrap();
    harness.engine().commit(&txn).unwrap();
    assert_eq!(harness.engine().flush_deletes("db", "t1").unwrap(), 1);

    let (txn, rel) = harness.get_relation("db", "t1");
    assert_eq!(rel.row_count().unwrap(), 7);
    for k in [2i64, 3, 5] {
        assert!(rel.get_by_filter(&Value::Int64(k)).is_err());
    }
    harness.engine().commit(&txn).unwrap();
}

#[test]
fn test_compact_empty_block_retires_without_replacement() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 10, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 3));

    let (txn, rel) = harness.get_relation("db", "t1");
    for k in 0..3 {
        rel.delete_by_filter(&Value::Int64(k)).unwrap();
    }
    harness.engine().commit(&txn).unwrap();

    assert_eq!(harness.engine().compact_blocks("db", "t1").unwrap(), 1);

    let (txn, rel) = harness.get_relation("db", "t1");
    assert_eq!(rel.row_count().unwrap(), 0);
    assert!(rel.blocks().is_empty());
    harness.engine().commit(&txn).unwrap();
}
