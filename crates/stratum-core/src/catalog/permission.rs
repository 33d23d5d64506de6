//! Declarative permission rules attached to table definitions.

use serde::{Deserialize, Serialize};

/// A single permission rule.
///
/// Rules are tagged by `type` in schema documents:
///
/// ```json
/// {"type": "authenticated"}
/// {"type": "owner", "field": "owner_id"}
/// {"type": "roles", "roles": ["admin", "member"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PermissionRule {
    /// Any session with a user id.
    Authenticated,
    /// The row's `field` must equal the session's user id.
    Owner {
        /// Field holding the owning user id.
        field: String,
    },
    /// The session must hold at least one of `roles`.
    Roles {
        /// Accepted role names (opaque, no hierarchy).
        roles: Vec<String>,
    },
}

impl PermissionRule {
    /// Create an owner rule.
    pub fn owner(field: impl Into<String>) -> Self {
        PermissionRule::Owner {
            field: field.into(),
        }
    }

    /// Create a roles rule.
    pub fn roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PermissionRule::Roles {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Owner field, if this is an owner rule.
    pub fn owner_field(&self) -> Option<&str> {
        match self {
            PermissionRule::Owner { field } => Some(field),
            _ => None,
        }
    }
}

/// Field-level override of the table rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPermission {
    /// Field name.
    pub field: String,
    /// Rule for reading the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<PermissionRule>,
    /// Rule for writing the field (create and update).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<PermissionRule>,
}

/// Table-level permission block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TablePermissions {
    /// Rule for reading rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<PermissionRule>,
    /// Rule for creating rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<PermissionRule>,
    /// Rule for updating rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<PermissionRule>,
    /// Rule for deleting rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<PermissionRule>,
    /// Field-level overrides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldPermission>,
}

impl TablePermissions {
    /// Apply the same rule to every operation.
    pub fn all(rule: PermissionRule) -> Self {
        Self {
            read: Some(rule.clone()),
            create: Some(rule.clone()),
            update: Some(rule.clone()),
            delete: Some(rule),
            fields: Vec::new(),
        }
    }

    /// Set the read rule.
    pub fn with_read(mut self, rule: PermissionRule) -> Self {
        self.read = Some(rule);
        self
    }

    /// Set the create rule.
    pub fn with_create(mut self, rule: PermissionRule) -> Self {
        self.create = Some(rule);
        self
    }

    /// Set the update rule.
    pub fn with_update(mut self, rule: PermissionRule) -> Self {
        self.update = Some(rule);
        self
    }

    /// Set the delete rule.
    pub fn with_delete(mut self, rule: PermissionRule) -> Self {
        self.delete = Some(rule);
        self
    }

    /// Add a field-level override.
    pub fn with_field(mut self, permission: FieldPermission) -> Self {
        self.fields.push(permission);
        self
    }

    /// Every table-level rule that is set.
    pub fn table_rules(&self) -> impl Iterator<Item = &PermissionRule> {
        [&self.read, &self.create, &self.update, &self.delete]
            .into_iter()
            .flatten()
    }
}
