//! Application schema - the whole declarative document.

use serde::{Deserialize, Serialize};

use super::table::{TableDefinition, TableId};
use crate::compiler::SchemaError;

/// Authentication configuration of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Table of the authentication subsystem holding users.
    #[serde(default = "default_user_table")]
    pub user_table: String,
    /// Whether the organization plugin is enabled.
    #[serde(default)]
    pub organization: bool,
}

fn default_user_table() -> String {
    "users".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_table: default_user_table(),
            organization: false,
        }
    }
}

impl AuthConfig {
    /// Auth configuration with the organization plugin enabled.
    pub fn with_organizations() -> Self {
        Self {
            organization: true,
            ..Self::default()
        }
    }
}

/// A complete application schema.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppSchema {
    /// Application name.
    #[serde(default)]
    pub name: String,
    /// Table definitions.
    #[serde(default)]
    pub tables: Vec<TableDefinition>,
    /// Authentication configuration; absent means no authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
}

impl AppSchema {
    /// Create an empty schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Vec::new(),
            auth: None,
        }
    }

    /// Add a table.
    pub fn with_table(mut self, table: TableDefinition) -> Self {
        self.tables.push(table);
        self
    }

    /// Configure authentication.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Parse a schema document.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(json).map_err(|e| SchemaError::Parse(e.to_string()))
    }

    /// Get a table by id.
    pub fn table(&self, id: TableId) -> Option<&TableDefinition> {
        self.tables.iter().find(|t| t.id == id)
    }

    /// Get a table by name.
    pub fn table_by_name(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schema_document() {
        let schema = AppSchema::from_json(
            r#"{
                "name": "crm",
                "auth": {"organization": true},
                "tables": [
                    {
                        "id": 1,
                        "name": "contacts",
                        "organizationScoped": true,
                        "fields": [
                            {"id": 1, "name": "email", "type": "email", "required": true}
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(schema.name, "crm");
        let auth = schema.auth.as_ref().unwrap();
        assert!(auth.organization);
        assert_eq!(auth.user_table, "users");
        let contacts = schema.table_by_name("contacts").unwrap();
        assert!(contacts.organization_scoped);
        assert_eq!(schema.table(1).unwrap().name, "contacts");
    }

    #[test]
    fn test_parse_unknown_field_type() {
        let err = AppSchema::from_json(
            r#"{"tables": [{"id": 1, "name": "t", "fields": [
                {"id": 1, "name": "x", "type": "hologram"}
            ]}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown field type"));
    }
}
