//! Declarative application model.
//!
//! The catalog describes tables, fields, relationships and permission rules
//! exactly as the schema author wrote them. It is validated and realized by
//! the [`compiler`](crate::compiler).

mod field;
mod filter;
mod permission;
mod schema;
mod special;
mod table;
mod types;

pub use field::{FieldDefinition, FieldId, RollupDefinition};
pub use filter::{Condition, FilterNode, FilterOperator};
pub use permission::{FieldPermission, PermissionRule, TablePermissions};
pub use schema::{AppSchema, AuthConfig};
pub use special::{FieldRef, SpecialField, ORGANIZATION_ID};
pub use table::{IndexDefinition, PrimaryKey, TableDefinition, TableId};
pub use types::{Aggregation, FieldType, FormulaResultType, OnDelete, RelationType};
