//! Stratum Core - schema compiler and access-control enforcement engine.
//!
//! An application is described declaratively as an [`AppSchema`]: tables,
//! typed fields, relationships, computed fields and permission blocks.
//! [`compile`] validates the whole description and realizes it as a
//! [`CompiledApp`], from which a PostgreSQL [`MigrationPlan`] is derived.
//! At request time [`RecordService`] serves CRUD operations, scoping every
//! query to what the caller's [`SessionContext`] may see.

pub mod catalog;
pub mod compiler;
pub mod error;
pub mod record;
pub mod registry;
pub mod security;
pub mod storage;

pub use catalog::{
    AppSchema, AuthConfig, FieldDefinition, FieldType, PermissionRule, TableDefinition, TableId,
    TablePermissions,
};
pub use compiler::{compile, CompiledApp, CompiledTable, MigrationPlan, SchemaError};
pub use error::{Error, Result};
pub use record::{ListQuery, ListResponse, RecordError, RecordService};
pub use security::{Identity, PolicyEvaluator, SessionContext, SessionResolver};
pub use storage::{MemoryStore, PoolConfig, RecordStore, StoragePool};
