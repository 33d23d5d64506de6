//! Table definitions.

use serde::{Deserialize, Serialize};

use super::field::FieldDefinition;
use super::permission::TablePermissions;
use super::special::{FieldRef, SpecialField};
use super::types::FieldType;

/// Table identifier, unique within an application.
pub type TableId = u64;

/// Primary key declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PrimaryKey {
    /// Single-column key.
    Simple {
        /// Key field.
        field: String,
    },
    /// Multi-column key.
    Composite {
        /// Key fields, in order.
        fields: Vec<String>,
    },
}

impl PrimaryKey {
    /// Key fields, in order.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            PrimaryKey::Simple { field } => vec![field.as_str()],
            PrimaryKey::Composite { fields } => fields.iter().map(String::as_str).collect(),
        }
    }
}

/// Explicit multi-column index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Index name.
    pub name: String,
    /// Indexed fields, in order.
    pub fields: Vec<String>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    /// Table identifier (immutable).
    pub id: TableId,
    /// Table name.
    pub name: String,
    /// Field definitions, in column order.
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    /// Primary key; the special `id` field when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<PrimaryKey>,
    /// Additional indexes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDefinition>,
    /// Permission rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<TablePermissions>,
    /// Whether rows are partitioned by organization.
    #[serde(default)]
    pub organization_scoped: bool,
}

impl TableDefinition {
    /// Create an empty table definition.
    pub fn new(id: TableId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            fields: Vec::new(),
            primary_key: None,
            indexes: Vec::new(),
            permissions: None,
            organization_scoped: false,
        }
    }

    /// Add a field.
    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDefinition>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Set the primary key.
    pub fn with_primary_key(mut self, primary_key: PrimaryKey) -> Self {
        self.primary_key = Some(primary_key);
        self
    }

    /// Add an index.
    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    /// Set the permissions.
    pub fn with_permissions(mut self, permissions: TablePermissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Partition rows by organization.
    pub fn organization_scoped(mut self) -> Self {
        self.organization_scoped = true;
        self
    }

    /// Get an explicitly declared field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Resolve a field name: declared fields first, then special fields.
    pub fn resolve_field(&self, name: &str) -> Option<FieldRef<'_>> {
        self.get_field(name)
            .map(FieldRef::Declared)
            .or_else(|| SpecialField::lookup(name).map(FieldRef::Special))
    }

    /// First declared field of the given type.
    pub fn field_of_type(&self, field_type: FieldType) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.field_type == field_type)
    }

    /// Check if rows are soft-deleted (a `deleted-at` field is declared).
    pub fn has_soft_delete(&self) -> bool {
        self.field_of_type(FieldType::DeletedAt).is_some()
    }
}
