//! Deterministic schema and batch builders for tests and benches.

use crate::batch::Batch;
use crate::schema::Schema;
use crate::types::LogicalType;
use crate::value::Value;

/// Column types handed out by [`mock_schema`], by logical position modulo
/// this list. Position 12 is varchar so `mock_schema(13, 12)` yields a
/// varchar primary key.
const MOCK_TYPES: [LogicalType; 13] = [
    LogicalType::Int8,
    LogicalType::Int16,
    LogicalType::Int32,
    LogicalType::Int64,
    LogicalType::UInt32,
    LogicalType::UInt64,
    LogicalType::Float64,
    LogicalType::Varchar,
    LogicalType::Binary,
    LogicalType::Bool,
    LogicalType::Int64,
    LogicalType::Int32,
    LogicalType::Varchar,
];

/// Builds a schema with `col_count` columns named `attr_<i>` of rotating
/// types, with the column at `pk_pos` as primary key.
pub fn mock_schema(col_count: usize, pk_pos: usize) -> Schema {
    let names: Vec<String> = (0..col_count).map(|i| format!("attr_{i}")).collect();
    let cols: Vec<(&str, LogicalType, bool)> = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let mut ty = MOCK_TYPES[i % MOCK_TYPES.len()];
            if i == pk_pos && !ty.is_pk_supported() {
                ty = LogicalType::Int64;
            }
            (name.as_str(), ty, i == pk_pos)
        })
        .collect();
    Schema::new("mock", &cols).expect("mock schema is valid")
}

/// Builds a batch of `rows` rows for `schema`, with distinct values per row
/// derived from the row ordinal (primary keys are unique).
pub fn mock_batch(schema: &Schema, rows: usize) -> Batch {
    mock_batch_range(schema, 0, rows)
}

/// Builds a batch whose row ordinals run `start..start + rows`.
pub fn mock_batch_range(schema: &Schema, start: usize, rows: usize) -> Batch {
    let mut batch = Batch::empty_like(schema);
    for r in start..start + rows {
        let row: Vec<Value> = schema
            .cols
            .iter()
            .map(|c| mock_value(c.ty, r))
            .collect();
        batch.push_row(&row).expect("mock row matches schema");
    }
    batch
}

/// A deterministic value of the given type for row ordinal `r`.
pub fn mock_value(ty: LogicalType, r: usize) -> Value {
    match ty {
        LogicalType::Bool => Value::Bool(r % 2 == 0),
        LogicalType::Int8 => Value::Int8(r as i8),
        LogicalType::Int16 => Value::Int16(r as i16),
        LogicalType::Int32 => Value::Int32(r as i32),
        LogicalType::Int64 => Value::Int64(r as i64),
        LogicalType::UInt32 => Value::UInt32(r as u32),
        LogicalType::UInt64 => Value::UInt64(r as u64),
        LogicalType::Float64 => Value::Float64(r as f64),
        LogicalType::Varchar => Value::Varchar(format!("str-{r:08}")),
        LogicalType::Binary => Value::Binary((r as u64).to_be_bytes().to_vec()),
    }
}
