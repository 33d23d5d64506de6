//! Schema compiler and DDL generator.
//!
//! [`compile`] validates an [`AppSchema`](crate::catalog::AppSchema) and
//! realizes every table through the field type registry: columns, named
//! constraints, indexes, foreign keys and a read view for computed fields.
//! [`MigrationPlan`] turns the result into PostgreSQL DDL.

mod app;
mod ddl;
mod error;
pub(crate) mod formula;
mod plan;
mod rollup;
pub(crate) mod sql;
mod table;

pub use app::{compile, CompiledApp};
pub use ddl::{Constraint, ConstraintKind, ForeignKey, IndexSpec, Statement, ViewSpec};
pub use error::{SchemaError, SchemaResult};
pub use formula::{coerce_result, result_cast, BinaryOp, FormulaError, FormulaExpr, Function};
pub use plan::{MigrationPhase, MigrationPlan, MigrationStep};
pub use rollup::{aggregate, RollupLink, RollupSpec};
pub use table::{CompiledTable, ComputedField, SoftDelete};
