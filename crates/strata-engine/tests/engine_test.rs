//! End-to-end transaction and catalog behavior.

use strata_batch::{AlterRequest, AlterTableReq, LogicalType, Value};
use strata_common::types::SeqNum;
use strata_common::StrataError;
use strata_engine::data::DeleteKind;
use strata_engine::testutil::{small_batch, small_batch_from, small_schema, TestEngine};
use strata_engine::txn::AccessInfo;
use strata_engine::DedupType;

#[test]
fn test_append_and_read_back() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 1000, 2);
    harness.create_rel_and_append("db", schema, &small_batch(&small_schema("t1", 1000, 2), 5));

    let (txn, rel) = harness.get_relation("db", "t1");
    assert_eq!(rel.row_count().unwrap(), 5);
    let (block, row) = rel.get_by_filter(&Value::Int64(3)).unwrap();
    assert_eq!(rel.get_value(block, row, 3).unwrap(), Value::Int64(3));
    assert_eq!(rel.get_value(block, row, 2).unwrap(), Value::Int32(3));
    harness.engine().commit(&txn).unwrap();
}

#[test]
fn test_ada_cycle() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 1000, 2);
    let one = small_batch(&schema, 1);
    let key = Value::Int64(0);
    harness.create_rel_and_append("db", schema, &one);

    // Delete the row.
    let (txn, rel) = harness.get_relation("db", "t1");
    let (block, row) = rel.get_by_filter(&key).unwrap();
    rel.range_delete(block, row, row, DeleteKind::Normal).unwrap();
    assert!(rel.get_by_filter(&key).is_err());
    harness.engine().commit(&txn).unwrap();

    // Append, delete, append again in one transaction.
    let (txn, rel) = harness.get_relation("db", "t1");
    assert!(rel.get_by_filter(&key).is_err());
    rel.append(&one).unwrap();
    let (block, row) = rel.get_by_filter(&key).unwrap();
    rel.range_delete(block, row, row, DeleteKind::Normal).unwrap();
    assert!(rel.get_by_filter(&key).is_err());
    rel.append(&one).unwrap();
    assert!(rel.get_by_filter(&key).is_ok());
    harness.engine().commit(&txn).unwrap();

    // A duplicate append fails while the key is alive.
    let (txn, rel) = harness.get_relation("db", "t1");
    let err = rel.append(&one).unwrap_err();
    assert!(matches!(err, StrataError::DuplicateEntry { .. }));
    let (block, row) = rel.get_by_filter(&key).unwrap();
    rel.range_delete(block, row, row, DeleteKind::Normal).unwrap();
    rel.append(&one).unwrap();
    harness.engine().commit(&txn).unwrap();

    // One live row, three deleted phantoms.
    let (txn, rel) = harness.get_relation("db", "t1");
    let blocks = rel.blocks();
    assert_eq!(blocks.len(), 1);
    let view = rel.column_view(blocks[0], 3).unwrap();
    assert_eq!(view.len(), 4);
    assert_eq!(view.delete_mask.cardinality(), 3);
    let (_, row) = rel.get_by_filter(&key).unwrap();
    assert_eq!(row, 3);
    harness.engine().commit(&txn).unwrap();
}

#[test]
fn test_ww_conflict_on_update() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 1000, 2);
    harness.create_rel_and_append("db", schema, &small_batch(&small_schema("t1", 1000, 2), 5));
    let key = Value::Int64(3);

    let (t1, rel1) = harness.get_relation("db", "t1");
    let (t2, rel2) = harness.get_relation("db", "t1");
    // Both see the row.
    rel1.get_by_filter(&key).unwrap();
    rel2.get_by_filter(&key).unwrap();

    // T2 updates and commits first.
    rel2.update_by_filter(&key, 2, Value::Int32(2222), false)
        .unwrap();
    harness.engine().commit(&t2).unwrap();

    // T1's update and delete both lose.
    let err = rel1
        .update_by_filter(&key, 2, Value::Int32(1111), false)
        .unwrap_err();
    assert!(err.is_conflict());
    let err = rel1.delete_by_filter(&key).unwrap_err();
    assert!(err.is_conflict());
    harness.engine().rollback(&t1).unwrap();

    // The winner's value stands.
    let (txn, rel) = harness.get_relation("db", "t1");
    let (block, row) = rel.get_by_filter(&key).unwrap();
    assert_eq!(rel.get_value(block, row, 2).unwrap(), Value::Int32(2222));
    harness.engine().commit(&txn).unwrap();
}

#[test]
fn test_snapshot_isolation() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 1000, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 5));

    let (t1, rel1) = harness.get_relation("db", "t1");
    assert_eq!(rel1.row_count().unwrap(), 5);

    // A later writer commits five more rows.
    let (t2, rel2) = harness.get_relation("db", "t1");
    rel2.append(&small_batch_from(&schema, 5, 5)).unwrap();
    harness.engine().commit(&t2).unwrap();

    // T1 still sees its snapshot.
    assert_eq!(rel1.row_count().unwrap(), 5);
    assert!(rel1.get_by_filter(&Value::Int64(7)).is_err());
    harness.engine().commit(&t1).unwrap();

    let (t3, rel3) = harness.get_relation("db", "t1");
    assert_eq!(rel3.row_count().unwrap(), 10);
    harness.engine().commit(&t3).unwrap();
}

#[test]
fn test_concurrent_same_pk_later_preparer_aborts() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 1000, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 1));

    let fresh = small_batch_from(&schema, 100, 1);
    let (t1, rel1) = harness.get_relation("db", "t1");
    let (t2, rel2) = harness.get_relation("db", "t1");
    rel1.append(&fresh).unwrap();
    rel2.append(&fresh).unwrap();

    harness.engine().commit(&t2).unwrap();
    let err = harness.engine().commit(&t1).unwrap_err();
    assert!(matches!(err, StrataError::WwConflict { .. }));

    let (txn, rel) = harness.get_relation("db", "t1");
    assert_eq!(rel.row_count().unwrap(), 2);
    harness.engine().commit(&txn).unwrap();
}

#[test]
fn test_block_and_segment_rolling() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 10, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 50));

    let (txn, rel) = harness.get_relation("db", "t1");
    assert_eq!(rel.row_count().unwrap(), 50);
    let blocks = rel.blocks();
    assert_eq!(blocks.len(), 5);
    let mut segments: Vec<_> = blocks.iter().map(|b| b.segment).collect();
    segments.dedup();
    assert_eq!(segments.len(), 3, "two full segments plus the tail");
    // Every row is reachable by key.
    for k in 0..50 {
        rel.get_by_filter(&Value::Int64(k)).unwrap();
    }
    harness.engine().commit(&txn).unwrap();
}

#[test]
fn test_rollback_undoes_everything() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 1000, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 3));

    let engine = harness.engine();
    let txn = engine.start_txn();
    let rel = engine.relation(&txn, "db", "t1").unwrap();
    rel.append(&small_batch_from(&schema, 10, 3)).unwrap();
    engine.create_database(&txn, "doomed").unwrap();
    engine.rollback(&txn).unwrap();

    // Terminal transitions are not repeatable.
    assert!(matches!(
        engine.commit(&txn),
        Err(StrataError::TxnNotFound { .. })
    ));
    assert!(matches!(
        engine.rollback(&txn),
        Err(StrataError::TxnNotFound { .. })
    ));

    let (t2, rel2) = harness.get_relation("db", "t1");
    assert_eq!(rel2.row_count().unwrap(), 3);
    assert!(engine.relation(&t2, "doomed", "t1").is_err());
    // The rolled-back name is free again.
    engine.create_database(&t2, "doomed").unwrap();
    engine.commit(&t2).unwrap();
}

#[test]
fn test_rename_then_reinsert_same_keys() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 1000, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 10));

    // Rename t1 -> t2.
    let (txn, rel) = harness.get_relation("db", "t1");
    rel.alter(AlterTableReq {
        expected_version: 0,
        req: AlterRequest::RenameTable {
            old: "t1".into(),
            new: "t2".into(),
        },
    })
    .unwrap();
    harness.engine().commit(&txn).unwrap();

    // A new t1 accepts the same primary keys: different table id.
    let engine = harness.engine();
    let txn = engine.start_txn();
    let rel = engine
        .create_relation(&txn, "db", small_schema("t1", 1000, 2))
        .unwrap();
    rel.append(&small_batch(&schema, 10)).unwrap();
    engine.commit(&txn).unwrap();

    // The renamed table still returns its original rows.
    let (txn, rel2) = harness.get_relation("db", "t2");
    assert_eq!(rel2.row_count().unwrap(), 10);
    for k in 0..10 {
        rel2.get_by_filter(&Value::Int64(k)).unwrap();
    }
    let rel1 = engine.relation(&txn, "db", "t1").unwrap();
    assert_eq!(rel1.row_count().unwrap(), 10);
    engine.commit(&txn).unwrap();
}

#[test]
fn test_drop_created_table_in_same_txn() {
    let harness = TestEngine::new();
    let engine = harness.engine();
    let txn = engine.start_txn();
    engine.create_database(&txn, "db").unwrap();
    engine
        .create_relation(&txn, "db", small_schema("t1", 100, 2))
        .unwrap();
    engine.drop_relation(&txn, "db", "t1").unwrap();
    engine.commit(&txn).unwrap();

    let txn = engine.start_txn();
    assert!(engine.relation(&txn, "db", "t1").is_err());
    engine.commit(&txn).unwrap();
}

#[test]
fn test_tenant_scoped_names() {
    let harness = TestEngine::new();
    let engine = harness.engine();
    let tenant_a = AccessInfo {
        tenant: strata_common::types::TenantId::new(1),
        user_id: 1,
        role_id: 0,
    };
    let tenant_b = AccessInfo {
        tenant: strata_common::types::TenantId::new(2),
        user_id: 1,
        role_id: 0,
    };

    let txn_a = engine.start_txn_with(tenant_a, DedupType::Normal);
    engine.create_database(&txn_a, "shared-name").unwrap();
    engine.commit(&txn_a).unwrap();

    // Another tenant may reuse the name and cannot see the first.
    let txn_b = engine.start_txn_with(tenant_b, DedupType::Normal);
    engine.create_database(&txn_b, "shared-name").unwrap();
    engine.commit(&txn_b).unwrap();

    // The system database is visible to every tenant.
    let txn_b2 = engine.start_txn_with(tenant_b, DedupType::Normal);
    engine
        .relation(&txn_b2, "mo_catalog", "nope")
        .expect_err("no such table, but the database resolves");
    engine.commit(&txn_b2).unwrap();
}

#[test]
fn test_alter_add_and_remove_column() {
    let harness = TestEngine::new();
    let schema = small_schema("t1", 1000, 2);
    harness.create_rel_and_append("db", schema.clone(), &small_batch(&schema, 4));

    // Add a column at position 1.
    let (txn, rel) = harness.get_relation("db", "t1");
    rel.alter(AlterTableReq {
        expected_version: 0,
        req: AlterRequest::AddColumn {
            name: "extra".into(),
            ty: LogicalType::Int64,
            logical_pos: 1,
        },
    })
    .unwrap();
    harness.engine().commit(&txn).unwrap();

    // Old rows read NULL in the new column; stale-version DDL conflicts.
    let (txn, rel) = harness.get_relation("db", "t1");
    let blocks = rel.blocks();
    let view = rel.column_view(blocks[0], 1).unwrap();
    assert!(view.data.get(0).unwrap().is_null());
    let err = rel
        .alter(AlterTableReq {
            expected_version: 0,
            req: AlterRequest::UpdateComment("stale".into()),
        })
        .unwrap_err();
    assert!(err.is_conflict());
    harness.engine().rollback(&txn).unwrap();

    // Remove the original column at seqnum 1 ("attr_1").
    let (txn, rel) = harness.get_relation("db", "t1");
    rel.alter(AlterTableReq {
        expected_version: 1,
        req: AlterRequest::RemoveColumn {
            logical_pos: 2,
            seq_num: SeqNum::new(1),
        },
    })
    .unwrap();
    harness.engine().commit(&txn).unwrap();

    let (txn, rel) = harness.get_relation("db", "t1");
    let schema_now = rel.schema();
    assert_eq!(schema_now.col_count(), 4); // 4 original + 1 added - 1 removed
    assert!(schema_now.dropped_attrs.contains(&SeqNum::new(1)));
    harness.engine().commit(&txn).unwrap();
}

#[test]
fn test_get_appender_requires_location() {
    let harness = TestEngine::new();
    let engine = harness.engine();
    let txn = engine.start_txn();
    engine.create_database(&txn, "db").unwrap();
    let rel = engine
        .create_relation(&txn, "db", small_schema("t1", 100, 2))
        .unwrap();
    assert!(matches!(
        rel.get_appender(),
        Err(StrataError::AppendableSegmentNotFound)
    ));
    rel.append(&small_batch(&small_schema("t1", 100, 2), 1)).unwrap();
    assert!(rel.get_appender().is_ok());
    engine.commit(&txn).unwrap();
}

#[test]
fn test_cross_database_txn() {
    let harness = TestEngine::new();
    let engine = harness.engine();
    let txn = engine.start_txn();
    engine.create_database(&txn, "db1").unwrap();
    engine.create_database(&txn, "db2").unwrap();
    let schema = small_schema("t", 1000, 2);
    let rel1 = engine.create_relation(&txn, "db1", schema.clone()).unwrap();
    let rel2 = engine.create_relation(&txn, "db2", schema.clone()).unwrap();
    rel1.append(&small_batch(&schema, 3)).unwrap();
    rel2.append(&small_batch(&schema, 7)).unwrap();
    engine.commit(&txn).unwrap();

    let (txn, rel1) = harness.get_relation("db1", "t");
    assert_eq!(rel1.row_count().unwrap(), 3);
    let rel2 = engine.relation(&txn, "db2", "t").unwrap();
    assert_eq!(rel2.row_count().unwrap(), 7);
    engine.commit(&txn).unwrap();
}
