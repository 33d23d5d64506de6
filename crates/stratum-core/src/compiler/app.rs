//! Whole-application compilation.

use std::collections::{HashMap, HashSet};

use tracing::info;

use super::error::{SchemaError, SchemaResult};
use super::plan::MigrationPlan;
use super::table::{check_identifier, compile_table, CompiledTable};
use crate::catalog::{AppSchema, AuthConfig, TableId};

/// A compiled application: every table validated and realized.
///
/// Immutable once built; shared behind `Arc` and replaced wholesale when the
/// schema is redefined.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledApp {
    name: String,
    auth: Option<AuthConfig>,
    tables: Vec<CompiledTable>,
    by_id: HashMap<TableId, usize>,
    by_name: HashMap<String, usize>,
}

impl CompiledApp {
    /// Application name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Auth configuration.
    pub fn auth(&self) -> Option<&AuthConfig> {
        self.auth.as_ref()
    }

    /// All tables, in schema order.
    pub fn tables(&self) -> &[CompiledTable] {
        &self.tables
    }

    /// Table by id.
    pub fn table(&self, id: TableId) -> Option<&CompiledTable> {
        self.by_id.get(&id).map(|&i| &self.tables[i])
    }

    /// Table by name.
    pub fn table_by_name(&self, name: &str) -> Option<&CompiledTable> {
        self.by_name.get(name).map(|&i| &self.tables[i])
    }

    /// Complete idempotent DDL for the application.
    pub fn migration_plan(&self) -> MigrationPlan {
        MigrationPlan::full(self)
    }
}

/// Validate and realize an application schema.
///
/// All-or-nothing: the first error aborts compilation.
pub fn compile(schema: &AppSchema) -> SchemaResult<CompiledApp> {
    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    for table in &schema.tables {
        check_identifier(&table.name)?;
        if !ids.insert(table.id) {
            return Err(SchemaError::DuplicateTable(format!("id {}", table.id)));
        }
        if !names.insert(table.name.as_str()) {
            return Err(SchemaError::DuplicateTable(table.name.clone()));
        }
    }

    let tables = schema
        .tables
        .iter()
        .map(|table| compile_table(schema, table))
        .collect::<SchemaResult<Vec<_>>>()?;

    let by_id = tables.iter().enumerate().map(|(i, t)| (t.id(), i)).collect();
    let by_name = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name().to_string(), i))
        .collect();

    info!(app = %schema.name, tables = tables.len(), "schema compiled");

    Ok(CompiledApp {
        name: schema.name.clone(),
        auth: schema.auth.clone(),
        tables,
        by_id,
        by_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldDefinition, FieldType, TableDefinition};

    #[test]
    fn test_lookup_by_id_and_name() {
        let schema = AppSchema::new("crm")
            .with_table(TableDefinition::new(7, "contacts"))
            .with_table(TableDefinition::new(9, "deals"));
        let app = compile(&schema).unwrap();

        assert_eq!(app.name(), "crm");
        assert_eq!(app.table(9).unwrap().name(), "deals");
        assert_eq!(app.table_by_name("contacts").unwrap().id(), 7);
        assert!(app.table(1).is_none());
    }

    #[test]
    fn test_duplicate_tables() {
        let schema = AppSchema::new("crm")
            .with_table(TableDefinition::new(1, "contacts"))
            .with_table(TableDefinition::new(1, "deals"));
        assert!(matches!(compile(&schema).unwrap_err(), SchemaError::DuplicateTable(_)));

        let schema = AppSchema::new("crm")
            .with_table(TableDefinition::new(1, "contacts"))
            .with_table(TableDefinition::new(2, "contacts"));
        assert!(matches!(compile(&schema).unwrap_err(), SchemaError::DuplicateTable(_)));
    }

    #[test]
    fn test_all_or_nothing() {
        let schema = AppSchema::new("crm")
            .with_table(
                TableDefinition::new(1, "contacts")
                    .with_field(FieldDefinition::new(1, "name", FieldType::SingleLineText)),
            )
            .with_table(
                TableDefinition::new(2, "deals")
                    .with_field(FieldDefinition::new(1, "Bad Name", FieldType::Integer)),
            );
        assert!(matches!(
            compile(&schema).unwrap_err(),
            SchemaError::InvalidFieldName(ref name) if name == "Bad Name"
        ));
    }
}
