//! Permission model validation.
//!
//! Turns the declarative permission block of a table into the effective rule
//! of every operation, resolving defaults and checking references at compile
//! time.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::catalog::{AuthConfig, PermissionRule, TableDefinition, TablePermissions};
use crate::compiler::{SchemaError, SchemaResult};

/// Record operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// List or fetch.
    Read,
    /// Insert.
    Create,
    /// Modify.
    Update,
    /// Delete or restore.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "read"),
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Rule in force for one operation after defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveRule {
    /// No authentication configured and no permission block: anyone.
    Public,
    /// A permission block exists but names no rule for the operation.
    Deny,
    /// An explicit or defaulted rule.
    Rule(PermissionRule),
}

/// Field-level overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldRules {
    /// Rule for reading the field.
    pub read: Option<PermissionRule>,
    /// Rule for writing the field.
    pub write: Option<PermissionRule>,
}

/// Validated permissions of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPermissions {
    /// Rule for reads.
    pub read: EffectiveRule,
    /// Rule for creates.
    pub create: EffectiveRule,
    /// Rule for updates.
    pub update: EffectiveRule,
    /// Rule for deletes and restores.
    pub delete: EffectiveRule,
    /// Field-level overrides by field name.
    pub fields: BTreeMap<String, FieldRules>,
    /// Rows are partitioned by organization.
    pub organization_scoped: bool,
    /// Fields named by table-level owner rules; set from the session on create.
    pub owner_fields: BTreeSet<String>,
}

impl ValidatedPermissions {
    /// Effective rule of an operation.
    pub fn rule(&self, operation: Operation) -> &EffectiveRule {
        match operation {
            Operation::Read => &self.read,
            Operation::Create => &self.create,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
        }
    }

    /// Field-level rule overriding `operation` for `field`, if any.
    pub fn field_rule(&self, field: &str, operation: Operation) -> Option<&PermissionRule> {
        let rules = self.fields.get(field)?;
        match operation {
            Operation::Read => rules.read.as_ref(),
            Operation::Create | Operation::Update => rules.write.as_ref(),
            Operation::Delete => None,
        }
    }
}

/// Validate the permission block of `table`.
pub fn validate(
    permissions: Option<&TablePermissions>,
    table: &TableDefinition,
    auth: Option<&AuthConfig>,
) -> SchemaResult<ValidatedPermissions> {
    if table.organization_scoped && !auth.is_some_and(|a| a.organization) {
        return Err(SchemaError::AuthenticationRequired {
            table: table.name.clone(),
            field: "organizationScoped".to_string(),
            reason: "organization-scoped tables need auth with the organization plugin"
                .to_string(),
        });
    }

    let Some(permissions) = permissions else {
        let default = match auth {
            Some(_) => EffectiveRule::Rule(PermissionRule::Authenticated),
            None => EffectiveRule::Public,
        };
        return Ok(ValidatedPermissions {
            read: default.clone(),
            create: default.clone(),
            update: default.clone(),
            delete: default,
            fields: BTreeMap::new(),
            organization_scoped: table.organization_scoped,
            owner_fields: BTreeSet::new(),
        });
    };

    for rule in permissions.table_rules() {
        check_rule(rule, table, auth)?;
    }

    let mut fields = BTreeMap::new();
    for field_permission in &permissions.fields {
        if table.resolve_field(&field_permission.field).is_none() {
            return Err(SchemaError::InvalidFieldReference {
                table: table.name.clone(),
                field: "permissions".to_string(),
                reference: field_permission.field.clone(),
            });
        }
        for rule in [&field_permission.read, &field_permission.write].into_iter().flatten() {
            check_rule(rule, table, auth)?;
        }
        let previous = fields.insert(
            field_permission.field.clone(),
            FieldRules {
                read: field_permission.read.clone(),
                write: field_permission.write.clone(),
            },
        );
        if previous.is_some() {
            return Err(SchemaError::InvalidPermission {
                table: table.name.clone(),
                reason: format!("field {} has more than one override", field_permission.field),
            });
        }
    }

    let owner_fields = permissions
        .table_rules()
        .filter_map(PermissionRule::owner_field)
        .map(str::to_string)
        .collect();

    let effective = |rule: &Option<PermissionRule>| match rule {
        Some(rule) => EffectiveRule::Rule(rule.clone()),
        None => EffectiveRule::Deny,
    };

    Ok(ValidatedPermissions {
        read: effective(&permissions.read),
        create: effective(&permissions.create),
        update: effective(&permissions.update),
        delete: effective(&permissions.delete),
        fields,
        organization_scoped: table.organization_scoped,
        owner_fields,
    })
}

fn check_rule(
    rule: &PermissionRule,
    table: &TableDefinition,
    auth: Option<&AuthConfig>,
) -> SchemaResult<()> {
    if auth.is_none() {
        return Err(SchemaError::AuthenticationRequired {
            table: table.name.clone(),
            field: "permissions".to_string(),
            reason: "permission rules need an authenticated session".to_string(),
        });
    }
    match rule {
        PermissionRule::Authenticated => Ok(()),
        PermissionRule::Roles { roles } if roles.is_empty() => {
            Err(SchemaError::InvalidPermission {
                table: table.name.clone(),
                reason: "roles rule with an empty role list".to_string(),
            })
        }
        PermissionRule::Roles { .. } => Ok(()),
        PermissionRule::Owner { field } => match table.resolve_field(field) {
            Some(resolved) if resolved.is_stored() => Ok(()),
            _ => Err(SchemaError::InvalidFieldReference {
                table: table.name.clone(),
                field: "permissions".to_string(),
                reference: field.clone(),
            }),
        },
    }
}
