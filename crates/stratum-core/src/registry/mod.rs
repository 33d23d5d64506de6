//! Field type registry.
//!
//! Maps each abstract [`FieldType`](crate::catalog::FieldType) to a physical
//! realization: a stored column, a virtual relationship or a computed value.

mod column;
mod resolve;

pub use column::{
    ColumnSpec, ComputedSpec, ForeignKeySpec, IndexMethod, RelationshipSpec, ResolvedField,
    SqlType,
};
pub(crate) use resolve::number;
pub use resolve::{organization_column, resolve, special_column};
