//! Restart, checkpoint, WAL truncation, GC, and zonemap persistence.

use strata_batch::{Batch, LogicalType, Schema, Value};
use strata_engine::testutil::{small_batch, small_schema, TestEngine};

#[test]
fn test_restart_replays_wal() {
    let mut harness = TestEngine::new();
    let schema = small_schema("t1", 10, 2);
    harness.create_rel_and_append("db1", schema.clone(), &small_batch(&schema, 25));
    harness.create_rel_and_append("db2", schema.clone(), &small_batch(&schema, 7));

    let (txn, rel) = harness.get_relation("db1", "t1");
    rel.delete_by_filter(&Value::Int64(3)).unwrap();
    harness.engine().commit(&txn).unwrap();

    harness.restart();

    let (txn, rel) = harness.get_relation("db1", "t1");
    assert_eq!(rel.row_count().unwrap(), 24);
    assert!(rel.get_by_filter(&Value::Int64(3)).is_err());
    let (block, row) = rel.get_by_filter(&Value::Int64(20)).unwrap();
    assert_eq!(rel.get_value(block, row, 3).unwrap(), Value::Int64(20));
    harness.engine().commit(&txn).unwrap();

    let (txn, rel) = harness.get_relation("db2", "t1");
    assert_eq!(rel.row_count().unwrap(), 7);
    harness.engine().commit(&txn).unwrap();

    // Replaying the same log again yields the same state.
    harness.restart();
    let (txn, rel) = harness.get_relation("db1", "t1");
    assert_eq!(rel.row_count().unwrap(), 24);
    harness.engine().commit(&txn).unwrap();
}

#[test]
fn test_incremental_checkpoint_restart() {
    let mut harness = TestEngine::new();
    let schema = small_schema("t", 10, 2);
    for i in 0..4 {
        let db = format!("db{i}");
        harness.create_rel_and_append(&db, schema.clone(), &small_batch(&schema, 5 + i));
        let engine = harness.engine();
        let txn = engine.start_txn();
        let rel = engine
            .create_relation(&txn, &db, small_schema("extra", 10, 2))
            .unwrap();
        rel.append(&small_batch(&schema, 3)).unwrap();
        engine.commit(&txn).unwrap();
    }

    let entry = harness
        .engine()
        .checkpoint_incremental()
        .unwrap()
        .expect("window has work");
    assert!(entry.end > entry.start);

    harness.restart();

    for i in 0..4 {
        let db = format!("db{i}");
        let (txn, rel) = harness.get_relation(&db, "t");
        assert_eq!(rel.row_count().unwrap(), (5 + i) as u64);
        let (block, row) = rel.get_by_filter(&Value::Int64(2)).unwrap();
        assert_eq!(rel.get_value(block, row, 3).unwrap(), Value::Int64(2));
        let extra = harness.engine().relation(&txn, &db, "extra").unwrap();
        assert_eq!(extra.row_count().unwrap(), 3);
        harness.engine().commit(&txn).unwrap();
    }
}

#[test]
fn test_global_checkpoint_truncates_and_gcs() {
    let mut harness = TestEngine::new();
    let schema = small_schema("t1", 10, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 12));

    // Drop a second table so GC has a tombstone to collect.
    let engine = harness.engine();
    let txn = engine.start_txn();
    let rel = engine
        .create_relation(&txn, "db", small_schema("doomed", 10, 2))
        .unwrap();
    rel.append(&small_batch(&schema, 4)).unwrap();
    engine.commit(&txn).unwrap();
    let txn = engine.start_txn();
    engine.drop_relation(&txn, "db", "doomed").unwrap();
    engine.commit(&txn).unwrap();

    engine.checkpoint_incremental().unwrap().expect("incremental");
    let global = engine
        .checkpoint_global()
        .unwrap()
        .expect("global folds the incremental");
    assert!(global.covered_lsn.is_valid());

    harness.restart();

    let (txn, rel) = harness.get_relation("db", "t1");
    assert_eq!(rel.row_count().unwrap(), 12);
    assert!(harness.engine().relation(&txn, "db", "doomed").is_err());
    harness.engine().commit(&txn).unwrap();

    // Work after the global checkpoint still replays from the WAL tail.
    let (txn, rel) = harness.get_relation("db", "t1");
    rel.delete_by_filter(&Value::Int64(0)).unwrap();
    harness.engine().commit(&txn).unwrap();
    harness.restart();
    let (txn, rel) = harness.get_relation("db", "t1");
    assert_eq!(rel.row_count().unwrap(), 11);
    harness.engine().commit(&txn).unwrap();
}

#[test]
fn test_flush_then_restart_reads_persisted() {
    let mut harness = TestEngine::new();
    let schema = small_schema("t1", 10, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 10));
    assert_eq!(harness.engine().compact_blocks("db", "t1").unwrap(), 1);

    // Persisted deletes survive via the delta object.
    let (txn, rel) = harness.get_relation("db", "t1");
    rel.delete_by_filter(&Value::Int64(4)).unwrap();
    harness.engine().commit(&txn).unwrap();
    assert_eq!(harness.engine().flush_deletes("db", "t1").unwrap(), 1);

    harness.restart();

    let (txn, rel) = harness.get_relation("db", "t1");
    assert_eq!(rel.row_count().unwrap(), 9);
    assert!(rel.get_by_filter(&Value::Int64(4)).is_err());
    let (block, row) = rel.get_by_filter(&Value::Int64(7)).unwrap();
    assert_eq!(rel.get_value(block, row, 3).unwrap(), Value::Int64(7));
    harness.engine().commit(&txn).unwrap();
}

fn varlen_pk_schema() -> Schema {
    let mut schema = Schema::new(
        "t1",
        &[
            ("v", LogicalType::Int32, false),
            ("pk", LogicalType::Binary, true),
        ],
    )
    .unwrap();
    schema.block_max_rows = 10;
    schema.segment_max_blocks = 2;
    schema
}

fn varlen_batch(schema: &Schema, rows: usize) -> Batch {
    let mut batch = Batch::empty_like(schema);
    for i in 0..rows {
        batch
            .push_row(&[
                Value::Int32(i as i32),
                Value::Binary((i as u64).to_be_bytes().to_vec()),
            ])
            .unwrap();
    }
    batch
}

#[test]
fn test_zonemap_truncation_long_keys() {
    let mut harness = TestEngine::new();
    let schema = varlen_pk_schema();

    // Long bounds that truncate in the zonemap: a 35-byte minimum of
    // zeros and a 35-byte maximum starting "abc".
    let minv = vec![0u8; 35];
    let mut maxv = vec![0xffu8; 35];
    maxv[0] = 0x61;
    maxv[1] = 0x62;
    maxv[2] = 0x63;
    let tricky_min = vec![0u8; 33]; // below the true min
    let tricky_max = b"abd".to_vec(); // above the true max

    let mut batch = varlen_batch(&schema, 29);
    let mut vecs = batch.vecs().to_vec();
    vecs[1].set(8, Value::Binary(maxv.clone())).unwrap();
    vecs[1].set(11, Value::Binary(minv.clone())).unwrap();
    vecs[1].set(22, Value::Binary(b"abcc".to_vec())).unwrap();
    batch = Batch::new(vecs).unwrap();

    harness.create_rel_and_append("db", schema, &batch);

    let check = |harness: &TestEngine| {
        let (txn, rel) = harness.get_relation("db", "t1");
        assert!(rel.get_by_filter(&Value::Binary(tricky_min.clone())).is_err());
        assert!(rel.get_by_filter(&Value::Binary(tricky_max.clone())).is_err());
        rel.get_by_filter(&Value::Binary(minv.clone()))
            .expect("exact min is present");
        rel.get_by_filter(&Value::Binary(maxv.clone()))
            .expect("exact max is present");
        rel.get_by_filter(&Value::Binary(b"abcc".to_vec()))
            .expect("mid key is present");
        harness.engine().commit(&txn).unwrap();
    };

    // In-memory, after restart, and after compact + merge + restart.
    check(&harness);
    harness.restart();
    check(&harness);

    assert!(harness.engine().compact_blocks("db", "t1").unwrap() > 0);
    assert!(!harness.engine().merge_table_blocks("db", "t1").unwrap().is_empty());
    check(&harness);
    harness.restart();
    check(&harness);
}

#[test]
fn test_restart_resumes_id_allocation() {
    let mut harness = TestEngine::new();
    let schema = small_schema("t1", 10, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 5));
    harness.restart();

    // New entities allocate above everything replayed.
    let engine = harness.engine();
    let txn = engine.start_txn();
    engine.create_database(&txn, "db2").unwrap();
    let rel = engine
        .create_relation(&txn, "db2", small_schema("t2", 10, 2))
        .unwrap();
    rel.append(&small_batch(&schema, 5)).unwrap();
    engine.commit(&txn).unwrap();

    let (txn, rel1) = harness.get_relation("db", "t1");
    let rel2 = engine.relation(&txn, "db2", "t2").unwrap();
    assert_ne!(rel1.table_id(), rel2.table_id());
    assert_eq!(rel1.row_count().unwrap(), 5);
    assert_eq!(rel2.row_count().unwrap(), 5);
    engine.commit(&txn).unwrap();
}
