//! Table compilation.

use std::collections::HashSet;

use super::ddl::{Constraint, ConstraintKind, ForeignKey, IndexSpec, ViewSpec};
use super::error::{SchemaError, SchemaResult};
use super::formula::{result_cast, FormulaExpr};
use super::rollup::{RollupLink, RollupSpec};
use super::sql::Ident;
use crate::catalog::{
    AppSchema, FieldDefinition, FieldType, FormulaResultType, RelationType,
    SpecialField, TableDefinition, TableId, ORGANIZATION_ID,
};
use crate::registry::{
    organization_column, resolve, special_column, ColumnSpec, ComputedSpec, IndexMethod,
    RelationshipSpec, ResolvedField,
};
use crate::security::{validate, RowFilter, ValidatedPermissions};

const MAX_IDENTIFIER_LEN: usize = 63;

/// A validated computed field.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputedField {
    /// Expression over the same row.
    Formula {
        /// Field name.
        name: String,
        /// Parsed expression.
        expr: FormulaExpr,
        /// Declared result type.
        result_type: FormulaResultType,
    },
    /// Aggregation over related rows.
    Rollup(RollupSpec),
}

impl ComputedField {
    /// Field name.
    pub fn name(&self) -> &str {
        match self {
            ComputedField::Formula { name, .. } => name,
            ComputedField::Rollup(rollup) => &rollup.name,
        }
    }

    fn to_sql(&self) -> String {
        match self {
            ComputedField::Formula {
                expr, result_type, ..
            } => format!("({})::{}", expr.to_sql("t"), result_cast(*result_type)),
            ComputedField::Rollup(rollup) => rollup.to_sql(),
        }
    }
}

/// Soft-delete columns of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDelete {
    /// `deleted-at` column.
    pub deleted_at: String,
    /// `deleted-by` column, if declared.
    pub deleted_by: Option<String>,
}

/// A fully validated and realized table.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTable {
    /// Source definition.
    pub definition: TableDefinition,
    /// Physical columns, in order.
    pub columns: Vec<ColumnSpec>,
    /// Virtual one-to-many relationships.
    pub relationships: Vec<RelationshipSpec>,
    /// Computed fields, realized in the read view.
    pub computed: Vec<ComputedField>,
    /// Primary key columns.
    pub primary_key: Vec<String>,
    /// Named table constraints (primary key, checks, uniques).
    pub constraints: Vec<Constraint>,
    /// Foreign keys.
    pub foreign_keys: Vec<ForeignKey>,
    /// Indexes.
    pub indexes: Vec<IndexSpec>,
    /// Read view, present when the table has computed fields.
    pub view: Option<ViewSpec>,
    /// Validated permissions.
    pub permissions: ValidatedPermissions,
    /// Soft-delete configuration.
    pub soft_delete: Option<SoftDelete>,
}

impl CompiledTable {
    /// Table id.
    pub fn id(&self) -> TableId {
        self.definition.id
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Physical column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Computed field by name.
    pub fn computed_field(&self, name: &str) -> Option<&ComputedField> {
        self.computed.iter().find(|c| c.name() == name)
    }

    /// Check if `name` is a readable field (column or computed value).
    pub fn is_readable_field(&self, name: &str) -> bool {
        self.column(name).is_some() || self.computed_field(name).is_some()
    }

    /// Relation to read records from: the view if any, else the table.
    pub fn read_relation(&self) -> &str {
        self.view.as_ref().map_or(self.name(), |v| v.name.as_str())
    }

    /// Physical columns realizing `field_type`.
    pub fn columns_of_type(&self, field_type: FieldType) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(move |c| c.field_type == field_type)
    }

    /// Check if the table carries a tenant column.
    pub fn is_organization_scoped(&self) -> bool {
        self.permissions.organization_scoped
    }
}

/// Check a table, field or index name.
pub(super) fn check_identifier(name: &str) -> SchemaResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_lowercase() || first == '_')
                && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
                && name.len() <= MAX_IDENTIFIER_LEN
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidFieldName(name.to_string()))
    }
}

/// Validate and realize one table of `schema`.
pub(super) fn compile_table(schema: &AppSchema, table: &TableDefinition) -> SchemaResult<CompiledTable> {
    let name = table.name.as_str();
    let auth = schema.auth.as_ref();

    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    for field in &table.fields {
        check_identifier(&field.name)?;
        if !ids.insert(field.id) {
            return Err(SchemaError::DuplicateFieldId {
                table: name.to_string(),
                id: field.id,
            });
        }
        if !names.insert(field.name.as_str())
            || (table.organization_scoped && field.name == ORGANIZATION_ID)
        {
            return Err(SchemaError::DuplicateFieldName {
                table: name.to_string(),
                field: field.name.clone(),
            });
        }
    }

    let mut declared_columns = Vec::new();
    let mut relationships = Vec::new();
    let mut computed_specs = Vec::new();
    for field in &table.fields {
        match resolve(name, field, auth)? {
            ResolvedField::Column(column) => {
                check_reference_target(schema, table, field, &column)?;
                declared_columns.push(column);
            }
            ResolvedField::Relationship(relationship) => {
                check_inbound_relationship(schema, table, &relationship)?;
                relationships.push(relationship);
            }
            ResolvedField::Computed(spec) => computed_specs.push(spec),
        }
    }

    let primary_key = match &table.primary_key {
        None => vec![SpecialField::Id.name().to_string()],
        Some(pk) => {
            let fields = pk.fields();
            if fields.is_empty() {
                return Err(SchemaError::InvalidPrimaryKey {
                    table: name.to_string(),
                    reason: "primary key names no field".to_string(),
                });
            }
            for field in &fields {
                match table.resolve_field(field) {
                    Some(resolved) if resolved.is_stored() => {}
                    _ => {
                        return Err(SchemaError::InvalidPrimaryKey {
                            table: name.to_string(),
                            reason: format!("{field} is not a stored field"),
                        })
                    }
                }
            }
            fields.into_iter().map(str::to_string).collect()
        }
    };

    let computed = computed_specs
        .iter()
        .map(|spec| compile_computed(schema, table, spec))
        .collect::<SchemaResult<Vec<_>>>()?;

    let permissions = validate(table.permissions.as_ref(), table, auth)?;

    // Physical columns: undeclared special fields, tenant column, declared fields.
    let mut columns = Vec::new();
    for special in SpecialField::ALL {
        if table.get_field(special.name()).is_none() {
            columns.push(special_column(special, table.primary_key.is_none()));
        }
    }
    if table.organization_scoped {
        columns.push(organization_column());
    }
    columns.extend(declared_columns);

    let mut constraints = vec![Constraint {
        name: format!("{name}_pkey"),
        kind: ConstraintKind::PrimaryKey(primary_key.clone()),
    }];
    let mut foreign_keys = Vec::new();
    let mut indexes = Vec::new();
    for column in &columns {
        if let Some(check) = &column.check {
            constraints.push(Constraint {
                name: format!("{name}_{}_check", column.name),
                kind: ConstraintKind::Check(check.clone()),
            });
        }
        if column.unique {
            constraints.push(Constraint {
                name: format!("{name}_{}_key", column.name),
                kind: ConstraintKind::Unique(vec![column.name.clone()]),
            });
        }
        if let Some(fk) = &column.foreign_key {
            foreign_keys.push(ForeignKey {
                name: format!("{name}_{}_fkey", column.name),
                table: name.to_string(),
                column: column.name.clone(),
                references_table: fk.references_table.clone(),
                references_column: fk.references_column.clone(),
                on_delete: fk.on_delete,
            });
        }
        if let Some(method) = column.index {
            indexes.push(IndexSpec {
                name: format!("idx_{name}_{}", column.name),
                table: name.to_string(),
                columns: vec![column.name.clone()],
                unique: false,
                method,
            });
        }
    }

    for index in &table.indexes {
        check_identifier(&index.name)?;
        for field in &index.fields {
            match table.resolve_field(field) {
                Some(resolved) if resolved.is_stored() => {}
                _ => {
                    return Err(SchemaError::InvalidFieldReference {
                        table: name.to_string(),
                        field: index.name.clone(),
                        reference: field.clone(),
                    })
                }
            }
        }
        indexes.push(IndexSpec {
            name: index.name.clone(),
            table: name.to_string(),
            columns: index.fields.clone(),
            unique: index.unique,
            method: IndexMethod::Btree,
        });
    }

    let view = (!computed.is_empty()).then(|| {
        let mut query = String::from("SELECT t.*");
        for field in &computed {
            query.push_str(&format!(",\n  {} AS {}", field.to_sql(), Ident(field.name())));
        }
        query.push_str(&format!("\nFROM {} t", Ident(name)));
        ViewSpec {
            name: format!("{name}_view"),
            query,
        }
    });

    let soft_delete = table
        .field_of_type(FieldType::DeletedAt)
        .map(|deleted_at| SoftDelete {
            deleted_at: deleted_at.name.clone(),
            deleted_by: table
                .field_of_type(FieldType::DeletedBy)
                .map(|f| f.name.clone()),
        });

    Ok(CompiledTable {
        definition: table.clone(),
        columns,
        relationships,
        computed,
        primary_key,
        constraints,
        foreign_keys,
        indexes,
        view,
        permissions,
        soft_delete,
    })
}

fn check_reference_target(
    schema: &AppSchema,
    table: &TableDefinition,
    field: &FieldDefinition,
    column: &ColumnSpec,
) -> SchemaResult<()> {
    match &column.foreign_key {
        Some(fk) if !fk.auth_table && schema.table_by_name(&fk.references_table).is_none() => {
            Err(SchemaError::InvalidRelationshipReference {
                table: table.name.clone(),
                field: field.name.clone(),
                reason: format!("related table {} does not exist", fk.references_table),
            })
        }
        _ => Ok(()),
    }
}

fn check_inbound_relationship(
    schema: &AppSchema,
    table: &TableDefinition,
    relationship: &RelationshipSpec,
) -> SchemaResult<()> {
    let invalid = |reason: String| SchemaError::InvalidRelationshipReference {
        table: table.name.clone(),
        field: relationship.name.clone(),
        reason,
    };
    let related = schema
        .table_by_name(&relationship.related_table)
        .ok_or_else(|| invalid(format!("related table {} does not exist", relationship.related_table)))?;
    let back_reference = related.get_field(&relationship.foreign_key).ok_or_else(|| {
        invalid(format!(
            "foreign key {}.{} does not exist",
            related.name, relationship.foreign_key
        ))
    })?;

    let points_back = back_reference.field_type == FieldType::Relationship
        && back_reference.relation() != RelationType::OneToMany
        && back_reference.related_table.as_deref() == Some(table.name.as_str());
    if !points_back {
        return Err(invalid(format!(
            "{}.{} is not a relationship to {}",
            related.name, relationship.foreign_key, table.name
        )));
    }
    Ok(())
}

fn compile_computed(
    schema: &AppSchema,
    table: &TableDefinition,
    spec: &ComputedSpec,
) -> SchemaResult<ComputedField> {
    match spec {
        ComputedSpec::Formula {
            name,
            expression,
            result_type,
        } => {
            let expr = FormulaExpr::parse(expression).map_err(|e| SchemaError::InvalidFormula {
                table: table.name.clone(),
                field: name.clone(),
                message: e.to_string(),
            })?;
            for reference in expr.references() {
                let stored = matches!(table.resolve_field(reference), Some(resolved) if resolved.is_stored());
                if !stored {
                    return Err(SchemaError::InvalidFieldReference {
                        table: table.name.clone(),
                        field: name.clone(),
                        reference: reference.to_string(),
                    });
                }
            }
            Ok(ComputedField::Formula {
                name: name.clone(),
                expr,
                result_type: *result_type,
            })
        }
        ComputedSpec::Rollup {
            name,
            relationship_field,
            related_field,
            aggregation,
            filters,
        } => {
            let invalid_rollup = |reason: String| SchemaError::InvalidRollup {
                table: table.name.clone(),
                field: name.clone(),
                reason,
            };

            let relationship = table
                .get_field(relationship_field)
                .filter(|f| f.field_type == FieldType::Relationship)
                .ok_or_else(|| SchemaError::InvalidRelationshipReference {
                    table: table.name.clone(),
                    field: name.clone(),
                    reason: format!("{relationship_field} is not a relationship field"),
                })?;
            let related_name = relationship.related_table.as_deref().unwrap_or_default();
            let related = schema.table_by_name(related_name).ok_or_else(|| {
                SchemaError::InvalidRelationshipReference {
                    table: table.name.clone(),
                    field: name.clone(),
                    reason: format!("related table {related_name} does not exist"),
                }
            })?;

            let link = match relationship.relation() {
                RelationType::OneToMany => RollupLink::Inbound {
                    column: relationship.foreign_key.clone().unwrap_or_default(),
                },
                RelationType::ManyToOne | RelationType::OneToOne => RollupLink::Outbound {
                    column: relationship.name.clone(),
                },
            };

            let target = related.resolve_field(related_field).ok_or_else(|| {
                SchemaError::InvalidFieldReference {
                    table: table.name.clone(),
                    field: name.clone(),
                    reference: format!("{}.{related_field}", related.name),
                }
            })?;
            if !target.is_stored() {
                return Err(invalid_rollup(format!(
                    "{}.{related_field} is not a stored field",
                    related.name
                )));
            }
            if aggregation.requires_numeric() && !target.field_type().is_numeric() {
                return Err(invalid_rollup(format!(
                    "{aggregation:?} needs a numeric field, {}.{related_field} is {}",
                    related.name,
                    target.field_type()
                )));
            }

            for condition in filters {
                let stored = matches!(
                    related.resolve_field(&condition.field),
                    Some(resolved) if resolved.is_stored()
                );
                if !stored {
                    return Err(SchemaError::InvalidFieldReference {
                        table: table.name.clone(),
                        field: name.clone(),
                        reference: format!("{}.{}", related.name, condition.field),
                    });
                }
            }
            let mut filter = RowFilter::from_conditions(filters)
                .map_err(|e| invalid_rollup(e.to_string()))?;
            if let Some(deleted_at) = related.field_of_type(FieldType::DeletedAt) {
                filter = RowFilter::is_null(deleted_at.name.as_str()).and(filter);
            }

            Ok(ComputedField::Rollup(RollupSpec {
                name: name.clone(),
                related_table: related.name.clone(),
                link,
                related_field: related_field.clone(),
                aggregation: *aggregation,
                filter,
                organization_scoped: table.organization_scoped && related.organization_scoped,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Aggregation, AuthConfig, PrimaryKey};

    fn compile_one(schema: &AppSchema) -> SchemaResult<CompiledTable> {
        compile_table(schema, &schema.tables[0])
    }

    #[test]
    fn test_identifiers() {
        assert!(check_identifier("total_salary").is_ok());
        assert!(check_identifier("_x1").is_ok());
        assert!(check_identifier("Total").is_err());
        assert!(check_identifier("1st").is_err());
        assert!(check_identifier("").is_err());
        assert!(check_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_special_columns_first() {
        let schema = AppSchema::new("t").with_table(
            TableDefinition::new(1, "notes")
                .with_field(FieldDefinition::new(1, "title", FieldType::SingleLineText)),
        );
        let table = compile_one(&schema).unwrap();
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "created_at", "updated_at", "title"]);
        assert_eq!(table.primary_key, vec!["id"]);
        assert!(table.view.is_none());
        assert_eq!(table.read_relation(), "notes");
    }

    #[test]
    fn test_custom_primary_key_keeps_id_unique() {
        let schema = AppSchema::new("t").with_table(
            TableDefinition::new(1, "codes")
                .with_field(FieldDefinition::new(1, "code", FieldType::SingleLineText).required())
                .with_primary_key(PrimaryKey::Simple {
                    field: "code".to_string(),
                }),
        );
        let table = compile_one(&schema).unwrap();
        assert_eq!(table.primary_key, vec!["code"]);
        assert!(table.column("id").unwrap().unique);
    }

    #[test]
    fn test_duplicate_field_id() {
        let schema = AppSchema::new("t").with_table(
            TableDefinition::new(1, "notes")
                .with_field(FieldDefinition::new(1, "a", FieldType::Integer))
                .with_field(FieldDefinition::new(1, "b", FieldType::Integer)),
        );
        assert!(matches!(
            compile_one(&schema).unwrap_err(),
            SchemaError::DuplicateFieldId { id: 1, .. }
        ));
    }

    #[test]
    fn test_formula_references() {
        let table = TableDefinition::new(1, "people")
            .with_field(FieldDefinition::new(1, "first", FieldType::SingleLineText))
            .with_field(
                FieldDefinition::new(2, "label", FieldType::Formula)
                    .with_formula("CONCAT(first, ' ', created_at)"),
            );
        let schema = AppSchema::new("t").with_table(table.clone());
        let compiled = compile_one(&schema).unwrap();
        let view = compiled.view.unwrap();
        assert_eq!(view.name, "people_view");
        assert!(view.query.contains("(CONCAT(t.\"first\", ' ', t.\"created_at\"))::TEXT AS \"label\""));

        let bad = table.with_field(
            FieldDefinition::new(3, "other", FieldType::Formula).with_formula("UPPER(label)"),
        );
        let schema = AppSchema::new("t").with_table(bad);
        assert!(matches!(
            compile_one(&schema).unwrap_err(),
            SchemaError::InvalidFieldReference { ref reference, .. } if reference == "label"
        ));
    }

    #[test]
    fn test_rollup_requires_numeric_sum() {
        let schema = AppSchema::new("t")
            .with_table(
                TableDefinition::new(1, "departments")
                    .with_field(
                        FieldDefinition::new(1, "employees", FieldType::Relationship)
                            .related_to("employees", RelationType::OneToMany)
                            .with_foreign_key("department"),
                    )
                    .with_field(FieldDefinition::new(2, "total", FieldType::Rollup).with_rollup(
                        "employees",
                        "name",
                        Aggregation::Sum,
                    )),
            )
            .with_table(
                TableDefinition::new(2, "employees")
                    .with_field(FieldDefinition::new(1, "name", FieldType::SingleLineText))
                    .with_field(
                        FieldDefinition::new(2, "department", FieldType::Relationship)
                            .related_to("departments", RelationType::ManyToOne),
                    ),
            );
        assert!(matches!(
            compile_one(&schema).unwrap_err(),
            SchemaError::InvalidRollup { .. }
        ));
    }

    #[test]
    fn test_rollup_relationship_references() {
        let departments = |rollup_over: &str, related: &str| {
            AppSchema::new("t")
                .with_table(
                    TableDefinition::new(1, "departments")
                        .with_field(FieldDefinition::new(1, "name", FieldType::SingleLineText))
                        .with_field(
                            FieldDefinition::new(2, "manager", FieldType::Relationship)
                                .related_to(related, RelationType::ManyToOne),
                        )
                        .with_field(FieldDefinition::new(3, "total", FieldType::Rollup).with_rollup(
                            rollup_over,
                            "salary",
                            Aggregation::Max,
                        )),
                )
                .with_table(
                    TableDefinition::new(2, "employees")
                        .with_field(FieldDefinition::new(1, "salary", FieldType::Currency)),
                )
        };

        assert!(compile_one(&departments("manager", "employees")).is_ok());
        assert!(matches!(
            compile_one(&departments("missing", "employees")).unwrap_err(),
            SchemaError::InvalidRelationshipReference { ref field, .. } if field == "total"
        ));
        assert!(matches!(
            compile_one(&departments("name", "employees")).unwrap_err(),
            SchemaError::InvalidRelationshipReference { ref reason, .. }
                if reason == "name is not a relationship field"
        ));
        assert!(matches!(
            compile_one(&departments("manager", "ghosts")).unwrap_err(),
            SchemaError::InvalidRelationshipReference { ref reason, .. }
                if reason.contains("ghosts")
        ));
    }

    #[test]
    fn test_user_field_without_auth() {
        let schema = AppSchema::new("t").with_table(
            TableDefinition::new(1, "tasks")
                .with_field(FieldDefinition::new(1, "deleted_by", FieldType::DeletedBy)),
        );
        assert!(matches!(
            compile_one(&schema).unwrap_err(),
            SchemaError::AuthenticationRequired { .. }
        ));

        let schema = schema.with_auth(AuthConfig::default());
        let table = compile_one(&schema).unwrap();
        assert_eq!(table.foreign_keys[0].name, "tasks_deleted_by_fkey");
        assert!(table.soft_delete.is_none());
    }
}
