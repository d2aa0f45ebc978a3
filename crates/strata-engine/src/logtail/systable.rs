//! System table schemas.
//!
//! Catalog mutations stream to subscribers as rows of three fixed tables:
//! `mo_database`, `mo_tables`, and `mo_columns`. Their ids and schemas are
//! stable; user table ids start above them.

use strata_batch::{Batch, LogicalType, Schema, Value};
use strata_common::constants::{MO_COLUMNS, MO_DATABASE, MO_TABLES};
use strata_common::types::{DatabaseId, TableId, TenantId, Timestamp};

use crate::data::persisted::ts_value;

/// Fixed id of `mo_database`.
pub const MO_DATABASE_ID: TableId = TableId::new(1);
/// Fixed id of `mo_tables`.
pub const MO_TABLES_ID: TableId = TableId::new(2);
/// Fixed id of `mo_columns`.
pub const MO_COLUMNS_ID: TableId = TableId::new(3);
/// User table ids are allocated above the reserved system range.
pub const FIRST_USER_TABLE_ID: u64 = 4;

/// Schema of `mo_database`: one row per database.
#[must_use]
pub fn mo_database_schema() -> Schema {
    Schema::new(
        MO_DATABASE,
        &[
            ("dat_id", LogicalType::UInt64, true),
            ("datname", LogicalType::Varchar, false),
            ("account_id", LogicalType::UInt32, false),
            ("created_ts", LogicalType::Binary, false),
        ],
    )
    .expect("mo_database schema is valid")
}

/// Schema of `mo_tables`: one row per table.
#[must_use]
pub fn mo_tables_schema() -> Schema {
    Schema::new(
        MO_TABLES,
        &[
            ("rel_id", LogicalType::UInt64, true),
            ("relname", LogicalType::Varchar, false),
            ("reldatabase_id", LogicalType::UInt64, false),
            ("account_id", LogicalType::UInt32, false),
            ("rel_version", LogicalType::UInt32, false),
            ("created_ts", LogicalType::Binary, false),
        ],
    )
    .expect("mo_tables schema is valid")
}

/// Schema of `mo_columns`: one row per column of every table.
#[must_use]
pub fn mo_columns_schema() -> Schema {
    Schema::new(
        MO_COLUMNS,
        &[
            ("att_uniq_name", LogicalType::Varchar, true),
            ("att_relname_id", LogicalType::UInt64, false),
            ("attname", LogicalType::Varchar, false),
            ("atttyp", LogicalType::UInt32, false),
            ("attnum", LogicalType::UInt32, false),
            ("att_logical_pos", LogicalType::UInt32, false),
            ("created_ts", LogicalType::Binary, false),
        ],
    )
    .expect("mo_columns schema is valid")
}

/// Builds the `mo_database` row for a database.
#[must_use]
pub fn mo_database_row(
    id: DatabaseId,
    name: &str,
    tenant: TenantId,
    commit_ts: Timestamp,
) -> Vec<Value> {
    vec![
        Value::UInt64(id.as_u64()),
        Value::Varchar(name.to_string()),
        Value::UInt32(tenant.as_u32()),
        ts_value(commit_ts),
    ]
}

/// Builds the `mo_tables` row for a table.
#[must_use]
pub fn mo_tables_row(
    id: TableId,
    name: &str,
    db: DatabaseId,
    tenant: TenantId,
    version: u32,
    commit_ts: Timestamp,
) -> Vec<Value> {
    vec![
        Value::UInt64(id.as_u64()),
        Value::Varchar(name.to_string()),
        Value::UInt64(db.as_u64()),
        Value::UInt32(tenant.as_u32()),
        Value::UInt32(version),
        ts_value(commit_ts),
    ]
}

/// Builds the `mo_columns` rows for every active column of a schema.
#[must_use]
pub fn mo_columns_rows(table: TableId, schema: &Schema, commit_ts: Timestamp) -> Vec<Vec<Value>> {
    schema
        .cols
        .iter()
        .enumerate()
        .map(|(pos, col)| {
            vec![
                Value::Varchar(format!("{}-{}", table.as_u64(), col.seq_num)),
                Value::UInt64(table.as_u64()),
                Value::Varchar(col.name.clone()),
                Value::UInt32(u32::from(col.ty.as_u8())),
                Value::UInt32(u32::from(col.seq_num.as_u16())),
                Value::UInt32(pos as u32),
                ts_value(commit_ts),
            ]
        })
        .collect()
}

/// Builds a batch from system-table rows.
pub fn rows_to_batch(schema: &Schema, rows: &[Vec<Value>]) -> Batch {
    let mut batch = Batch::empty_like(schema);
    for row in rows {
        batch.push_row(row).expect("system row matches schema");
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_schemas_have_pks() {
        assert_eq!(mo_database_schema().pk_pos(), Some(0));
        assert_eq!(mo_tables_schema().pk_pos(), Some(0));
        assert_eq!(mo_columns_schema().pk_pos(), Some(0));
    }

    #[test]
    fn test_rows_match_schemas() {
        let ts = Timestamp::new(10, 0);
        let schema = mo_database_schema();
        let row = mo_database_row(DatabaseId::new(2), "db1", TenantId::SYS, ts);
        let batch = rows_to_batch(&schema, &[row]);
        assert_eq!(batch.row_count(), 1);

        let cols_schema = mo_columns_schema();
        let table_schema = mo_tables_schema();
        let rows = mo_columns_rows(TableId::new(5), &table_schema, ts);
        assert_eq!(rows.len(), table_schema.col_count());
        let batch = rows_to_batch(&cols_schema, &rows);
        assert_eq!(batch.row_count(), table_schema.col_count());
    }
}
