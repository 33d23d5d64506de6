//! PostgreSQL record store.
//!
//! Reads go through the table's read relation (the computed-field view when
//! there is one) and come back as `to_jsonb(row)`. Writes decode the JSON
//! record with `jsonb_populate_record`, so PostgreSQL performs every type
//! conversion. Filter values are always bound, never inlined.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use super::{
    AggregateFunction, AggregateRequest, Record, RecordStore, SelectQuery, SortDirection,
    StorageError, StorageResult,
};
use crate::catalog::SpecialField;
use crate::compiler::sql::{quote_str, Ident};
use crate::compiler::{CompiledTable, MigrationPlan};
use crate::security::RowFilter;

const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";

/// Record store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to `url` with at most `max_connections` connections.
    pub async fn connect(url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(storage_error)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply a migration plan in one transaction.
    pub async fn migrate(&self, plan: &MigrationPlan) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        for statement in plan.statements() {
            let sql = statement.to_string();
            debug!(sql = %sql, "applying migration step");
            sqlx::raw_sql(&sql)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        }
        tx.commit().await.map_err(storage_error)?;
        info!(steps = plan.step_count(), "migration applied");
        Ok(())
    }

    async fn fetch_by_id<'e, E>(
        executor: E,
        table: &CompiledTable,
        id: &str,
    ) -> StorageResult<Option<Record>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let sql = format!(
            "SELECT to_jsonb(t) FROM {} t WHERE t.{} = $1",
            Ident(table.read_relation()),
            Ident(SpecialField::Id.name())
        );
        let row: Option<Value> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(storage_error)?;
        row.map(into_record).transpose()
    }
}

fn storage_error(err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Database(db)
            if matches!(db.code().as_deref(), Some(UNIQUE_VIOLATION | CHECK_VIOLATION)) =>
        {
            StorageError::Conflict {
                constraint: db.constraint().unwrap_or_default().to_string(),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StorageError::Unavailable(err.to_string())
        }
        other => StorageError::Backend(other.to_string()),
    }
}

fn into_record(value: Value) -> StorageResult<Record> {
    match value {
        Value::Object(record) => Ok(record),
        other => Err(StorageError::Backend(format!("expected a row object, got {other}"))),
    }
}

/// `WHERE` clause for `filter`, binding its values into `params`.
fn where_clause(filter: &RowFilter, params: &mut Vec<Value>) -> String {
    format!("WHERE {}", filter.to_sql_bound(Some("t"), params))
}

fn bind_all<'q>(
    mut query: sqlx::query::QueryScalar<'q, sqlx::Postgres, Value, sqlx::postgres::PgArguments>,
    params: Vec<Value>,
) -> sqlx::query::QueryScalar<'q, sqlx::Postgres, Value, sqlx::postgres::PgArguments> {
    for param in params {
        query = query.bind(param);
    }
    query
}

/// Physical columns of `table` present in `values`.
fn written_columns<'a>(table: &'a CompiledTable, values: &Record) -> Vec<&'a str> {
    table
        .columns
        .iter()
        .filter(|c| values.contains_key(&c.name))
        .map(|c| c.name.as_str())
        .collect()
}

#[async_trait]
impl RecordStore for PgStore {
    async fn select(&self, table: &CompiledTable, query: &SelectQuery) -> StorageResult<Vec<Record>> {
        let mut params = Vec::new();
        let mut sql = format!(
            "SELECT to_jsonb(t) FROM {} t {}",
            Ident(table.read_relation()),
            where_clause(&query.filter, &mut params)
        );

        let mut order: Vec<String> = query
            .sort
            .iter()
            .map(|key| {
                let direction = match key.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                format!("t.{} {direction}", Ident(&key.field))
            })
            .collect();
        order.push(format!("t.{}", Ident(SpecialField::CreatedAt.name())));
        order.push(format!("t.{}", Ident(SpecialField::Id.name())));
        sql.push_str(&format!(" ORDER BY {}", order.join(", ")));

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if query.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", query.offset));
        }

        debug!(table = %table.name(), sql = %sql, "select");
        let rows = bind_all(sqlx::query_scalar(&sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        rows.into_iter().map(into_record).collect()
    }

    async fn count(&self, table: &CompiledTable, filter: &RowFilter) -> StorageResult<u64> {
        let mut params = Vec::new();
        let sql = format!(
            "SELECT to_jsonb(COUNT(*)) FROM {} t {}",
            Ident(table.read_relation()),
            where_clause(filter, &mut params)
        );
        let count = bind_all(sqlx::query_scalar(&sql), params)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        count
            .as_u64()
            .ok_or_else(|| StorageError::Backend(format!("unexpected count {count}")))
    }

    async fn aggregate(
        &self,
        table: &CompiledTable,
        filter: &RowFilter,
        requests: &[AggregateRequest],
    ) -> StorageResult<Record> {
        if requests.is_empty() {
            return Ok(Record::new());
        }
        let pairs: Vec<String> = requests
            .iter()
            .map(|request| {
                let expr = match (&request.field, request.function) {
                    (None, _) => "COUNT(*)".to_string(),
                    (Some(field), function) => {
                        let x = format!("t.{}", Ident(field));
                        match function {
                            AggregateFunction::Count => format!("COUNT({x})"),
                            AggregateFunction::Sum => format!("COALESCE(SUM({x}), 0)"),
                            AggregateFunction::Avg => format!("AVG({x})"),
                            AggregateFunction::Min => format!("MIN({x})"),
                            AggregateFunction::Max => format!("MAX({x})"),
                        }
                    }
                };
                format!("{}, {expr}", quote_str(&request.key()))
            })
            .collect();

        let mut params = Vec::new();
        let sql = format!(
            "SELECT jsonb_build_object({}) FROM {} t {}",
            pairs.join(", "),
            Ident(table.read_relation()),
            where_clause(filter, &mut params)
        );
        let row = bind_all(sqlx::query_scalar(&sql), params)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        into_record(row)
    }

    async fn insert(&self, table: &CompiledTable, values: Record) -> StorageResult<Record> {
        let columns = written_columns(table, &values);
        let id_column = Ident(SpecialField::Id.name());
        let sql = if columns.is_empty() {
            format!(
                "INSERT INTO {} DEFAULT VALUES RETURNING {id_column}",
                Ident(table.name())
            )
        } else {
            let list: Vec<String> = columns.iter().map(|c| Ident(*c).to_string()).collect();
            format!(
                "INSERT INTO {table} ({list}) SELECT {list} FROM jsonb_populate_record(NULL::{table}, $1) RETURNING {id_column}",
                table = Ident(table.name()),
                list = list.join(", ")
            )
        };

        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        let mut insert = sqlx::query_scalar::<_, String>(&sql);
        if !columns.is_empty() {
            insert = insert.bind(Value::Object(values));
        }
        let id = insert.fetch_one(&mut *tx).await.map_err(storage_error)?;
        let record = Self::fetch_by_id(&mut *tx, table, &id)
            .await?
            .ok_or_else(|| StorageError::Backend(format!("inserted row {id} vanished")))?;
        tx.commit().await.map_err(storage_error)?;

        debug!(table = %table.name(), record_id = %id, "record inserted");
        Ok(record)
    }

    async fn update(
        &self,
        table: &CompiledTable,
        id: &str,
        values: Record,
    ) -> StorageResult<Option<Record>> {
        let columns = written_columns(table, &values);
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        if !columns.is_empty() {
            let assignments: Vec<String> = columns
                .iter()
                .map(|c| format!("{} = p.{}", Ident(*c), Ident(*c)))
                .collect();
            let sql = format!(
                "UPDATE {table} AS t SET {} FROM jsonb_populate_record(NULL::{table}, $1) p WHERE t.{} = $2 RETURNING t.{}",
                assignments.join(", "),
                Ident(SpecialField::Id.name()),
                Ident(SpecialField::Id.name()),
                table = Ident(table.name()),
            );
            let updated: Option<String> = sqlx::query_scalar(&sql)
                .bind(Value::Object(values))
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_error)?;
            if updated.is_none() {
                return Ok(None);
            }
        }

        let record = Self::fetch_by_id(&mut *tx, table, id).await?;
        tx.commit().await.map_err(storage_error)?;
        debug!(table = %table.name(), record_id = %id, "record updated");
        Ok(record)
    }

    async fn delete(&self, table: &CompiledTable, id: &str) -> StorageResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            Ident(table.name()),
            Ident(SpecialField::Id.name())
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected() > 0)
    }
}
