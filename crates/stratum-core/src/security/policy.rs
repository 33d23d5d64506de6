//! Policy evaluation and query scoping.
//!
//! For one session, table and operation the evaluator produces a
//! [`PolicyDecision`]: whether the operation may proceed at all, which rows it
//! may touch, and which fields must be hidden or refused. Three predicates are
//! ANDed: organization isolation, the operation's row rule and the field
//! rules. Anything unresolved denies.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use tracing::debug;

use super::context::SessionContext;
use super::filter::RowFilter;
use super::permission::{EffectiveRule, Operation};
use crate::catalog::{PermissionRule, ORGANIZATION_ID};
use crate::compiler::CompiledTable;

/// Outcome of the identity check of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// The operation may proceed, restricted by the row filter.
    Granted,
    /// The rule needs an identity the session lacks (401).
    Unauthenticated,
    /// The session can never satisfy the rule (403).
    Forbidden,
}

/// Per-field gate derived from a field-level rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldGate {
    /// Never accessible for this session.
    Deny,
    /// Accessible only on rows whose `column` holds the session's user id.
    OwnerOf(String),
}

impl FieldGate {
    fn allows(&self, row: Option<&Map<String, Value>>, user_id: Option<&str>) -> bool {
        match self {
            FieldGate::Deny => false,
            FieldGate::OwnerOf(column) => match (row, user_id) {
                (Some(row), Some(user_id)) => {
                    row.get(column).and_then(Value::as_str) == Some(user_id)
                }
                _ => false,
            },
        }
    }
}

/// Result of evaluating one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    /// Whether the operation may proceed.
    pub access: Access,
    /// Rows the operation may touch.
    pub row_filter: RowFilter,
    /// Read gates of restricted fields.
    pub read_gates: BTreeMap<String, FieldGate>,
    /// Write gates of restricted fields.
    pub write_gates: BTreeMap<String, FieldGate>,
    user_id: Option<String>,
}

impl PolicyDecision {
    /// Check if the operation may proceed.
    pub fn is_granted(&self) -> bool {
        self.access == Access::Granted
    }

    /// Fields that are hidden on at least some rows.
    pub fn field_redactions(&self) -> BTreeSet<&str> {
        self.read_gates.keys().map(String::as_str).collect()
    }

    /// Fields whose writes are refused on at least some rows.
    pub fn write_denied(&self) -> BTreeSet<&str> {
        self.write_gates.keys().map(String::as_str).collect()
    }

    /// Check if `field` may be read on `row`.
    pub fn can_read_field(&self, field: &str, row: &Map<String, Value>) -> bool {
        self.read_gates
            .get(field)
            .map_or(true, |gate| gate.allows(Some(row), self.user_id.as_deref()))
    }

    /// Check if `field` may be written; `row` is the stored row on update.
    pub fn can_write_field(&self, field: &str, row: Option<&Map<String, Value>>) -> bool {
        self.write_gates
            .get(field)
            .map_or(true, |gate| gate.allows(row, self.user_id.as_deref()))
    }

    /// Remove the fields the session may not read from `row`.
    pub fn redact(&self, row: &mut Map<String, Value>) {
        let hidden: Vec<String> = self
            .read_gates
            .iter()
            .filter(|(_, gate)| !gate.allows(Some(row), self.user_id.as_deref()))
            .map(|(field, _)| field.clone())
            .collect();
        for field in hidden {
            row.remove(&field);
        }
    }
}

/// Policy evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    /// Evaluate `operation` on `table`, optionally for a single `field`.
    ///
    /// With a field, a field-level rule for the operation replaces the table
    /// rule for the access check.
    pub fn evaluate(
        session: &SessionContext,
        table: &CompiledTable,
        operation: Operation,
        field: Option<&str>,
    ) -> PolicyDecision {
        let permissions = &table.permissions;

        let (mut access, rule_filter) =
            match field.and_then(|f| permissions.field_rule(f, operation)) {
                Some(rule) => check_rule(session, rule),
                None => match permissions.rule(operation) {
                    EffectiveRule::Public => (Access::Granted, RowFilter::True),
                    EffectiveRule::Deny => (Access::Forbidden, RowFilter::False),
                    EffectiveRule::Rule(rule) => check_rule(session, rule),
                },
            };

        let org_filter = if permissions.organization_scoped {
            match &session.organization_id {
                Some(org) => RowFilter::eq(ORGANIZATION_ID, org.as_str()),
                None => {
                    if operation == Operation::Create && access == Access::Granted {
                        access = Access::Forbidden;
                    }
                    RowFilter::False
                }
            }
        } else {
            RowFilter::True
        };

        let row_filter = if access == Access::Granted {
            org_filter.and(rule_filter)
        } else {
            RowFilter::False
        };

        let mut read_gates = BTreeMap::new();
        let mut write_gates = BTreeMap::new();
        for (name, rules) in &permissions.fields {
            if let Some(gate) = rules.read.as_ref().and_then(|r| field_gate(session, r)) {
                read_gates.insert(name.clone(), gate);
            }
            if let Some(gate) = rules.write.as_ref().and_then(|r| field_gate(session, r)) {
                write_gates.insert(name.clone(), gate);
            }
        }

        debug!(
            table = %table.name(),
            operation = %operation,
            user_id = ?session.user_id,
            access = ?access,
            row_filter = %row_filter,
            "policy evaluated"
        );

        PolicyDecision {
            access,
            row_filter,
            read_gates,
            write_gates,
            user_id: session.user_id.clone(),
        }
    }
}

fn check_rule(session: &SessionContext, rule: &PermissionRule) -> (Access, RowFilter) {
    let Some(user_id) = session.user_id.as_deref() else {
        return (Access::Unauthenticated, RowFilter::False);
    };
    match rule {
        PermissionRule::Authenticated => (Access::Granted, RowFilter::True),
        PermissionRule::Owner { field } => (Access::Granted, RowFilter::eq(field.as_str(), user_id)),
        PermissionRule::Roles { roles } if session.has_any_role(roles) => {
            (Access::Granted, RowFilter::True)
        }
        PermissionRule::Roles { .. } => (Access::Forbidden, RowFilter::False),
    }
}

/// Gate for a field rule, `None` when the session passes unconditionally.
fn field_gate(session: &SessionContext, rule: &PermissionRule) -> Option<FieldGate> {
    if !session.is_authenticated() {
        return Some(FieldGate::Deny);
    }
    match rule {
        PermissionRule::Authenticated => None,
        PermissionRule::Roles { roles } if session.has_any_role(roles) => None,
        PermissionRule::Roles { .. } => Some(FieldGate::Deny),
        PermissionRule::Owner { field } => Some(FieldGate::OwnerOf(field.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        AppSchema, AuthConfig, FieldDefinition, FieldPermission, FieldType, TableDefinition,
        TablePermissions,
    };
    use crate::compiler::compile;
    use serde_json::json;

    fn table(definition: TableDefinition) -> CompiledTable {
        let schema = AppSchema::new("test")
            .with_auth(AuthConfig::with_organizations())
            .with_table(definition);
        let app = compile(&schema).unwrap();
        app.tables()[0].clone()
    }

    fn notes() -> CompiledTable {
        table(
            TableDefinition::new(1, "personal_notes")
                .with_field(FieldDefinition::new(1, "title", FieldType::SingleLineText))
                .with_field(FieldDefinition::new(2, "owner_id", FieldType::User))
                .with_permissions(TablePermissions::all(PermissionRule::owner("owner_id"))),
        )
    }

    #[test]
    fn test_owner_rule_scopes_rows() {
        let decision = PolicyEvaluator::evaluate(
            &SessionContext::authenticated("alice"),
            &notes(),
            Operation::Read,
            None,
        );
        assert!(decision.is_granted());
        assert_eq!(decision.row_filter, RowFilter::eq("owner_id", "alice"));
    }

    #[test]
    fn test_anonymous_is_unauthenticated() {
        let decision =
            PolicyEvaluator::evaluate(&SessionContext::anonymous(), &notes(), Operation::Read, None);
        assert_eq!(decision.access, Access::Unauthenticated);
        assert!(decision.row_filter.is_false());
    }

    #[test]
    fn test_empty_session_roles_denied() {
        let compiled = table(
            TableDefinition::new(1, "reports")
                .with_permissions(TablePermissions::all(PermissionRule::roles(["admin"]))),
        );
        let decision = PolicyEvaluator::evaluate(
            &SessionContext::authenticated("bob"),
            &compiled,
            Operation::Read,
            None,
        );
        assert_eq!(decision.access, Access::Forbidden);

        let admin = SessionContext::authenticated("bob").with_role("admin");
        let decision = PolicyEvaluator::evaluate(&admin, &compiled, Operation::Read, None);
        assert!(decision.is_granted());
    }

    #[test]
    fn test_organization_filter_is_anded() {
        let compiled = table(
            TableDefinition::new(1, "contacts")
                .organization_scoped()
                .with_field(FieldDefinition::new(1, "name", FieldType::SingleLineText)),
        );
        let session = SessionContext::authenticated("u1").with_organization("org-a");
        let decision = PolicyEvaluator::evaluate(&session, &compiled, Operation::Read, None);
        assert_eq!(decision.row_filter, RowFilter::eq(ORGANIZATION_ID, "org-a"));

        let no_org = SessionContext::authenticated("u1");
        let decision = PolicyEvaluator::evaluate(&no_org, &compiled, Operation::Read, None);
        assert!(decision.is_granted());
        assert!(decision.row_filter.is_false());

        let decision = PolicyEvaluator::evaluate(&no_org, &compiled, Operation::Create, None);
        assert_eq!(decision.access, Access::Forbidden);
    }

    #[test]
    fn test_missing_rule_denies() {
        let compiled = table(
            TableDefinition::new(1, "audit_log")
                .with_permissions(TablePermissions::default().with_read(PermissionRule::Authenticated)),
        );
        let session = SessionContext::authenticated("u1");
        let decision = PolicyEvaluator::evaluate(&session, &compiled, Operation::Delete, None);
        assert_eq!(decision.access, Access::Forbidden);
    }

    #[test]
    fn test_field_gates() {
        let compiled = table(
            TableDefinition::new(1, "employees")
                .with_field(FieldDefinition::new(1, "name", FieldType::SingleLineText))
                .with_field(FieldDefinition::new(2, "salary", FieldType::Currency))
                .with_field(FieldDefinition::new(3, "account", FieldType::User))
                .with_permissions(
                    TablePermissions::all(PermissionRule::Authenticated)
                        .with_field(FieldPermission {
                            field: "salary".to_string(),
                            read: Some(PermissionRule::roles(["hr"])),
                            write: Some(PermissionRule::roles(["hr"])),
                        })
                        .with_field(FieldPermission {
                            field: "name".to_string(),
                            read: None,
                            write: Some(PermissionRule::owner("account")),
                        }),
                ),
        );

        let session = SessionContext::authenticated("u1");
        let decision = PolicyEvaluator::evaluate(&session, &compiled, Operation::Read, None);
        assert!(decision.field_redactions().contains("salary"));

        let mut row = json!({"name": "Ann", "salary": 100, "account": "u1"})
            .as_object()
            .cloned()
            .unwrap();
        decision.redact(&mut row);
        assert!(!row.contains_key("salary"));
        assert!(row.contains_key("name"));
        assert!(decision.can_write_field("name", Some(&row)));
        assert!(!decision.can_write_field("salary", Some(&row)));

        let hr = SessionContext::authenticated("u2").with_role("hr");
        let decision = PolicyEvaluator::evaluate(&hr, &compiled, Operation::Update, Some("salary"));
        assert!(decision.is_granted());
        assert!(decision.field_redactions().is_empty());
        assert!(!decision.can_write_field("name", Some(&row)));
    }
}
