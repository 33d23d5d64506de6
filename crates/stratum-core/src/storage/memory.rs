//! In-memory record store.
//!
//! Rows live in insertion order per table behind one `parking_lot::RwLock`.
//! Computed fields are evaluated on every read, so rollups always reflect the
//! current related rows.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use super::{
    timestamp, AggregateFunction, AggregateRequest, Record, RecordStore, SelectQuery,
    SortDirection, StorageError, StorageResult,
};
use crate::catalog::{Aggregation, FieldType, SpecialField, ORGANIZATION_ID};
use crate::compiler::formula::compare_values;
use crate::compiler::{
    aggregate, coerce_result, CompiledTable, ComputedField, ConstraintKind, RollupLink,
};
use crate::security::RowFilter;

#[derive(Debug, Default)]
struct TableRows {
    rows: Vec<Record>,
    serials: HashMap<String, i64>,
}

/// Record store keeping everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, TableRows>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physical rows of `table`, deleted or not.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.rows.len())
    }
}

/// Row with its computed fields evaluated.
fn materialize(tables: &HashMap<String, TableRows>, table: &CompiledTable, row: &Record) -> Record {
    let mut out = row.clone();
    for field in &table.computed {
        let value = match field {
            ComputedField::Formula {
                expr, result_type, ..
            } => coerce_result(expr.evaluate(row), *result_type),
            ComputedField::Rollup(rollup) => {
                let related = tables
                    .get(&rollup.related_table)
                    .map(|t| t.rows.as_slice())
                    .unwrap_or_default();
                let values: Vec<Value> = related
                    .iter()
                    .filter(|r| match &rollup.link {
                        RollupLink::Inbound { column } => {
                            linked(r.get(column.as_str()), row.get(SpecialField::Id.name()))
                        }
                        RollupLink::Outbound { column } => {
                            linked(r.get(SpecialField::Id.name()), row.get(column.as_str()))
                        }
                    })
                    .filter(|r| {
                        !rollup.organization_scoped
                            || linked(r.get(ORGANIZATION_ID), row.get(ORGANIZATION_ID))
                    })
                    .filter(|r| rollup.filter.matches(r))
                    .map(|r| r.get(&rollup.related_field).cloned().unwrap_or(Value::Null))
                    .collect();
                aggregate(rollup.aggregation, &values)
            }
        };
        out.insert(field.name().to_string(), value);
    }
    out
}

fn linked(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => !a.is_null() && a == b,
        _ => false,
    }
}

/// Ordering of one sort column: nulls sort after every value.
fn compare_field(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

fn visible(
    tables: &HashMap<String, TableRows>,
    table: &CompiledTable,
    filter: &RowFilter,
) -> Vec<Record> {
    tables
        .get(table.name())
        .map(|t| t.rows.as_slice())
        .unwrap_or_default()
        .iter()
        .map(|row| materialize(tables, table, row))
        .filter(|row| filter.matches(row))
        .collect()
}

/// Check unique and primary key constraints of `candidate` against every
/// other row.
fn check_unique(
    table: &CompiledTable,
    rows: &[Record],
    candidate: &Record,
    skip: Option<usize>,
) -> StorageResult<()> {
    for constraint in &table.constraints {
        let columns = match &constraint.kind {
            ConstraintKind::PrimaryKey(columns) | ConstraintKind::Unique(columns) => columns,
            ConstraintKind::Check(_) => continue,
        };
        let key: Vec<&Value> = columns
            .iter()
            .map(|c| candidate.get(c).unwrap_or(&Value::Null))
            .collect();
        if key.iter().any(|v| v.is_null()) {
            continue;
        }
        let clash = rows.iter().enumerate().any(|(i, row)| {
            Some(i) != skip
                && columns
                    .iter()
                    .zip(&key)
                    .all(|(c, v)| row.get(c).map_or(false, |existing| existing == *v))
        });
        if clash {
            return Err(StorageError::Conflict {
                constraint: constraint.name.clone(),
            });
        }
    }
    Ok(())
}

fn check_not_null(table: &CompiledTable, row: &Record) -> StorageResult<()> {
    for column in table.columns.iter().filter(|c| !c.nullable) {
        if row.get(&column.name).map_or(true, Value::is_null) {
            return Err(StorageError::Backend(format!(
                "null value in column {} of {} violates not-null constraint",
                column.name,
                table.name()
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn select(&self, table: &CompiledTable, query: &SelectQuery) -> StorageResult<Vec<Record>> {
        let tables = self.tables.read();
        let mut rows = visible(&tables, table, &query.filter);
        if !query.sort.is_empty() {
            rows.sort_by(|a, b| {
                query
                    .sort
                    .iter()
                    .map(|key| {
                        let a = a.get(&key.field).unwrap_or(&Value::Null);
                        let b = b.get(&key.field).unwrap_or(&Value::Null);
                        match key.direction {
                            SortDirection::Asc => compare_field(a, b),
                            SortDirection::Desc => compare_field(b, a),
                        }
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(query.offset).take(limit).collect())
    }

    async fn count(&self, table: &CompiledTable, filter: &RowFilter) -> StorageResult<u64> {
        let tables = self.tables.read();
        Ok(visible(&tables, table, filter).len() as u64)
    }

    async fn aggregate(
        &self,
        table: &CompiledTable,
        filter: &RowFilter,
        requests: &[AggregateRequest],
    ) -> StorageResult<Record> {
        let tables = self.tables.read();
        let rows = visible(&tables, table, filter);
        let mut out = Record::new();
        for request in requests {
            let value = match &request.field {
                None => Value::from(rows.len() as u64),
                Some(field) => {
                    let values: Vec<Value> = rows
                        .iter()
                        .map(|r| r.get(field).cloned().unwrap_or(Value::Null))
                        .collect();
                    let aggregation = match request.function {
                        AggregateFunction::Count => Aggregation::Count,
                        AggregateFunction::Sum => Aggregation::Sum,
                        AggregateFunction::Avg => Aggregation::Avg,
                        AggregateFunction::Min => Aggregation::Min,
                        AggregateFunction::Max => Aggregation::Max,
                    };
                    aggregate(aggregation, &values)
                }
            };
            out.insert(request.key(), value);
        }
        Ok(out)
    }

    async fn insert(&self, table: &CompiledTable, mut values: Record) -> StorageResult<Record> {
        let mut tables = self.tables.write();
        let entry = tables.entry(table.name().to_string()).or_default();

        let mut row = Record::new();
        for column in &table.columns {
            let value = match values.remove(&column.name) {
                Some(value) if !value.is_null() => value,
                supplied => {
                    if column.name == SpecialField::Id.name() {
                        Value::String(uuid::Uuid::new_v4().to_string())
                    } else {
                        match column.field_type {
                            FieldType::CreatedAt | FieldType::UpdatedAt => timestamp(),
                            FieldType::Autonumber => {
                                let next = entry.serials.entry(column.name.clone()).or_insert(0);
                                *next += 1;
                                Value::from(*next)
                            }
                            FieldType::Checkbox => Value::Bool(false),
                            _ if supplied.is_some() => Value::Null,
                            _ => table
                                .definition
                                .get_field(&column.name)
                                .and_then(|f| f.default.clone())
                                .unwrap_or(Value::Null),
                        }
                    }
                }
            };
            row.insert(column.name.clone(), value);
        }

        check_not_null(table, &row)?;
        check_unique(table, &entry.rows, &row, None)?;
        entry.rows.push(row.clone());

        debug!(table = %table.name(), record_id = ?row.get("id"), "record inserted");
        Ok(materialize(&tables, table, &row))
    }

    async fn update(
        &self,
        table: &CompiledTable,
        id: &str,
        values: Record,
    ) -> StorageResult<Option<Record>> {
        let mut tables = self.tables.write();
        let Some(entry) = tables.get_mut(table.name()) else {
            return Ok(None);
        };
        let Some(index) = entry
            .rows
            .iter()
            .position(|r| r.get(SpecialField::Id.name()).and_then(Value::as_str) == Some(id))
        else {
            return Ok(None);
        };

        let mut row = entry.rows[index].clone();
        for (name, value) in values {
            if table.column(&name).is_some() {
                row.insert(name, value);
            }
        }
        check_not_null(table, &row)?;
        check_unique(table, &entry.rows, &row, Some(index))?;
        entry.rows[index] = row.clone();

        debug!(table = %table.name(), record_id = %id, "record updated");
        Ok(Some(materialize(&tables, table, &row)))
    }

    async fn delete(&self, table: &CompiledTable, id: &str) -> StorageResult<bool> {
        let mut tables = self.tables.write();
        let Some(entry) = tables.get_mut(table.name()) else {
            return Ok(false);
        };
        let before = entry.rows.len();
        entry
            .rows
            .retain(|r| r.get(SpecialField::Id.name()).and_then(Value::as_str) != Some(id));
        let removed = entry.rows.len() != before;
        if removed {
            debug!(table = %table.name(), record_id = %id, "record removed");
        }
        Ok(removed)
    }
}
