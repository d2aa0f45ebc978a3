//! Logtail windows, reserved columns, and system-table streaming.

use strata_batch::Value;
use strata_common::types::Timestamp;
use strata_engine::logtail::systable::{MO_COLUMNS_ID, MO_DATABASE_ID, MO_TABLES_ID};
use strata_engine::logtail::EntryType;
use strata_engine::testutil::{small_batch, small_schema, TestEngine};

#[test]
fn test_data_window_reads() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 1000, 2);

    let engine = harness.engine();
    let txn = engine.start_txn();
    engine.create_database(&txn, "db").unwrap();
    let rel = engine.create_relation(&txn, "db", schema.clone()).unwrap();
    rel.append(&small_batch(&schema, 5)).unwrap();
    let table_id = rel.table_id();
    let ts_insert = engine.commit(&txn).unwrap();

    let (txn, rel) = harness.get_relation("db", "t1");
    rel.delete_by_filter(&Value::Int64(1)).unwrap();
    let ts_delete = engine.commit(&txn).unwrap();

    // Full window: one insert command, one delete command.
    let resp = engine
        .sync_logtail(Timestamp::ZERO, ts_delete, table_id, false)
        .unwrap();
    assert_eq!(resp.commands.len(), 2);

    let insert = &resp.commands[0];
    assert_eq!(insert.entry_type, EntryType::Insert);
    assert_eq!(insert.commit_ts, ts_insert);
    assert_eq!(insert.batch.row_count(), 5);
    // Data attributes plus reserved `rowid` and `commit_ts`.
    assert_eq!(insert.batch.col_count(), schema.col_count() + 2);

    let delete = &resp.commands[1];
    assert_eq!(delete.entry_type, EntryType::Delete);
    assert_eq!(delete.commit_ts, ts_delete);
    // `rowid`, `commit_ts`, `aborted`, pk.
    assert_eq!(delete.batch.col_count(), 4);
    assert_eq!(delete.batch.row_count(), 1);
    assert_eq!(delete.batch.value(0, 3), Some(&Value::Int64(1)));

    // The window is half-open: (insert, delete] excludes the insert.
    let resp = engine
        .sync_logtail(ts_insert, ts_delete, table_id, false)
        .unwrap();
    assert_eq!(resp.commands.len(), 1);
    assert_eq!(resp.commands[0].entry_type, EntryType::Delete);
}

#[test]
fn test_catalog_streams_to_system_tables() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 1000, 2);

    let engine = harness.engine();
    let txn = engine.start_txn();
    engine.create_database(&txn, "db").unwrap();
    let rel = engine.create_relation(&txn, "db", schema.clone()).unwrap();
    let table_id = rel.table_id();
    let ts = engine.commit(&txn).unwrap();

    let dbs = engine
        .sync_logtail(Timestamp::ZERO, ts, MO_DATABASE_ID, false)
        .unwrap();
    assert_eq!(dbs.commands.len(), 1);
    assert_eq!(
        dbs.commands[0].batch.value(0, 1),
        Some(&Value::Varchar("db".into()))
    );

    let tables = engine
        .sync_logtail(Timestamp::ZERO, ts, MO_TABLES_ID, false)
        .unwrap();
    assert_eq!(tables.commands.len(), 1);
    assert_eq!(
        tables.commands[0].batch.value(0, 0),
        Some(&Value::UInt64(table_id.as_u64()))
    );

    // One mo_columns row per active column, keyed by seqnum.
    let columns = engine
        .sync_logtail(Timestamp::ZERO, ts, MO_COLUMNS_ID, false)
        .unwrap();
    assert_eq!(columns.commands.len(), 1);
    assert_eq!(columns.commands[0].batch.row_count(), schema.col_count());

    // Dropping streams delete records.
    let txn = engine.start_txn();
    engine.drop_relation(&txn, "db", "t1").unwrap();
    let drop_ts = engine.commit(&txn).unwrap();
    let tables = engine
        .sync_logtail(ts, drop_ts, MO_TABLES_ID, false)
        .unwrap();
    assert_eq!(tables.commands.len(), 1);
    assert_eq!(tables.commands[0].entry_type, EntryType::Delete);
}

#[test]
fn test_want_state_returns_catalog_snapshot() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 1000, 2);
    harness.create_rel_and_append("db", schema, &small_batch(&small_schema("t1", 1000, 2), 2));

    let engine = harness.engine();
    let now = engine.ctx().ts.peek();
    // An empty window with state still yields the full snapshot.
    let resp = engine.sync_logtail(now, now, MO_TABLES_ID, true).unwrap();
    assert!(
        resp.commands
            .iter()
            .any(|c| c.batch.value(0, 1) == Some(&Value::Varchar("t1".into()))),
        "state snapshot lists the table"
    );
}

#[test]
fn test_meta_changes_stream_on_flush() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 10, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 10));

    let engine = harness.engine();
    let (txn, rel) = harness.get_relation("db", "t1");
    let table_id = rel.table_id();
    engine.commit(&txn).unwrap();

    let before = engine.ctx().ts.peek();
    assert_eq!(engine.compact_blocks("db", "t1").unwrap(), 1);
    let after = engine.ctx().ts.peek();

    let resp = engine.sync_logtail(before, after, table_id, false).unwrap();
    // The flush publishes a meta-change record (block id, meta_loc,
    // commit_ts) for the new persisted block.
    let meta = resp
        .commands
        .iter()
        .find(|c| c.entry_type == EntryType::Insert && c.batch.col_count() == 3)
        .expect("meta change streamed");
    assert_eq!(meta.batch.row_count(), 1);
}

#[test]
fn test_per_table_ordering() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 1000, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 1));

    let engine = harness.engine();
    let mut commits = Vec::new();
    for i in 0..5 {
        let (txn, rel) = harness.get_relation("db", "t1");
        rel.append(&strata_engine::testutil::small_batch_from(&schema, 10 + i, 1))
            .unwrap();
        commits.push(engine.commit(&txn).unwrap());
    }
    let (txn, rel) = harness.get_relation("db", "t1");
    let table_id = rel.table_id();
    engine.commit(&txn).unwrap();

    let resp = engine
        .sync_logtail(Timestamp::ZERO, *commits.last().unwrap(), table_id, false)
        .unwrap();
    let times: Vec<Timestamp> = resp.commands.iter().map(|c| c.commit_ts).collect();
    let mut sorted = times.clone();
    sorted.sort();
    assert_eq!(times, sorted, "delivery is ordered by commit timestamp");
}
