//! Storage abstraction.
//!
//! Records are JSON objects keyed by column name. A [`RecordStore`] reads
//! through the table's read relation (computed fields included) and writes
//! only physical columns. Access goes through a [`StoragePool`] lease.

mod error;
mod memory;
mod pool;
#[cfg(feature = "postgres")]
mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use pool::{PoolConfig, StorageLease, StoragePool};
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

use crate::compiler::CompiledTable;
use crate::security::RowFilter;

/// Current time as stored in timestamp columns.
pub(crate) fn timestamp() -> Value {
    Value::String(chrono::Utc::now().to_rfc3339())
}

/// A record: column (or computed field) name to value.
pub type Record = Map<String, Value>;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Smallest first.
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// Field to sort by.
    pub field: String,
    /// Direction.
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortKey {
    /// Ascending sort on `field`.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    /// Descending sort on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// A resolved read request.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    /// Rows to return.
    pub filter: RowFilter,
    /// Ordering; ties fall back to insertion order.
    pub sort: Vec<SortKey>,
    /// Maximum number of rows.
    pub limit: Option<usize>,
    /// Rows to skip.
    pub offset: usize,
}

impl SelectQuery {
    /// All rows matching `filter`, unordered.
    pub fn filtered(filter: RowFilter) -> Self {
        Self {
            filter,
            sort: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    /// Limit the number of rows.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Aggregate function over a filtered set of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    /// Number of rows, or of non-null values of a field.
    Count,
    /// Sum of a numeric field.
    Sum,
    /// Average of a numeric field.
    Avg,
    /// Smallest value of a field.
    Min,
    /// Largest value of a field.
    Max,
}

impl AggregateFunction {
    /// Function name as used in requests and result keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }
}

/// One requested aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRequest {
    /// Function to apply.
    pub function: AggregateFunction,
    /// Field to aggregate; `None` only for a row count.
    pub field: Option<String>,
}

impl AggregateRequest {
    /// Key of the aggregate in the result map: `count` or `<fn>_<field>`.
    pub fn key(&self) -> String {
        match &self.field {
            Some(field) => format!("{}_{field}", self.function.as_str()),
            None => self.function.as_str().to_string(),
        }
    }
}

/// Record storage backend.
///
/// Implementations must not hold locks across await points. Access control
/// happens before a store is called; writes address rows by `id` only.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Rows of `table` matching the query, computed fields included.
    async fn select(&self, table: &CompiledTable, query: &SelectQuery) -> StorageResult<Vec<Record>>;

    /// Number of rows matching `filter`.
    async fn count(&self, table: &CompiledTable, filter: &RowFilter) -> StorageResult<u64>;

    /// Aggregates over the rows matching `filter`, keyed by
    /// [`AggregateRequest::key`].
    async fn aggregate(
        &self,
        table: &CompiledTable,
        filter: &RowFilter,
        requests: &[AggregateRequest],
    ) -> StorageResult<Record>;

    /// Insert a row; omitted columns take their defaults. Returns the stored
    /// record.
    async fn insert(&self, table: &CompiledTable, values: Record) -> StorageResult<Record>;

    /// Set `values` on the row with `id`. Returns the stored record, `None`
    /// when no such row exists.
    async fn update(
        &self,
        table: &CompiledTable,
        id: &str,
        values: Record,
    ) -> StorageResult<Option<Record>>;

    /// Physically remove the row with `id`. Returns whether it existed.
    async fn delete(&self, table: &CompiledTable, id: &str) -> StorageResult<bool>;
}
