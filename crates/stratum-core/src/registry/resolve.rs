//! Field type to column resolution.

use crate::catalog::{
    AuthConfig, FieldDefinition, FieldType, OnDelete, RelationType, SpecialField, ORGANIZATION_ID,
};
use crate::compiler::sql::{literal, quote_str, Ident};
use crate::compiler::{SchemaError, SchemaResult};

use super::column::{
    ColumnSpec, ComputedSpec, ForeignKeySpec, IndexMethod, RelationshipSpec, ResolvedField,
    SqlType,
};

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
const DEFAULT_VARCHAR: u32 = 255;
const DEFAULT_RATING_MAX: f64 = 5.0;

/// Resolve a declared field of `table` to its physical realization.
pub fn resolve(
    table: &str,
    field: &FieldDefinition,
    auth: Option<&AuthConfig>,
) -> SchemaResult<ResolvedField> {
    let ty = field.field_type;
    let name = field.name.as_str();

    let sql_type = match ty {
        FieldType::SingleLineText | FieldType::Email | FieldType::Url | FieldType::PhoneNumber => {
            SqlType::Varchar(field.max_length.unwrap_or(DEFAULT_VARCHAR))
        }
        FieldType::LongText | FieldType::RichText => SqlType::Text,
        FieldType::Integer | FieldType::Rating => SqlType::Integer,
        FieldType::Decimal => {
            SqlType::Numeric(field.precision.unwrap_or(10), field.scale.unwrap_or(2))
        }
        FieldType::Currency => SqlType::Numeric(19, 4),
        FieldType::Percentage => SqlType::Numeric(5, 2),
        FieldType::Autonumber => SqlType::Serial,
        FieldType::Checkbox => SqlType::Boolean,
        FieldType::Date => SqlType::Date,
        FieldType::Datetime
        | FieldType::CreatedAt
        | FieldType::UpdatedAt
        | FieldType::DeletedAt => SqlType::Timestamptz,
        FieldType::Time => SqlType::Time,
        FieldType::Duration => SqlType::Interval,
        FieldType::SingleSelect => SqlType::Varchar(DEFAULT_VARCHAR),
        FieldType::MultiSelect => SqlType::TextArray,
        FieldType::Json | FieldType::Attachment | FieldType::MultipleAttachments => SqlType::Jsonb,
        FieldType::User | FieldType::CreatedBy | FieldType::UpdatedBy | FieldType::DeletedBy => {
            SqlType::Text
        }
        FieldType::Relationship => return resolve_relationship(table, field),
        FieldType::Formula => {
            let expression = field.formula.clone().ok_or_else(|| SchemaError::InvalidFormula {
                table: table.to_string(),
                field: name.to_string(),
                message: "missing formula expression".to_string(),
            })?;
            return Ok(ResolvedField::Computed(ComputedSpec::Formula {
                name: name.to_string(),
                expression,
                result_type: field.result_type.unwrap_or_default(),
            }));
        }
        FieldType::Rollup => {
            let rollup = field
                .rollup_definition()
                .ok_or_else(|| SchemaError::InvalidRollup {
                    table: table.to_string(),
                    field: name.to_string(),
                    reason: "relationshipField, relatedField and aggregation are required"
                        .to_string(),
                })?;
            return Ok(ResolvedField::Computed(ComputedSpec::Rollup {
                name: name.to_string(),
                relationship_field: rollup.relationship_field.to_string(),
                related_field: rollup.related_field.to_string(),
                aggregation: rollup.aggregation,
                filters: rollup.filters.to_vec(),
            }));
        }
    };

    let mut column = ColumnSpec::new(name, ty, sql_type);
    column.nullable = !field.required;
    column.unique = field.unique;
    column.default = field.default.as_ref().map(literal);
    column.check = check_expression(field);

    match ty {
        FieldType::Checkbox => {
            column.nullable = false;
            column.default.get_or_insert_with(|| "false".to_string());
        }
        FieldType::CreatedAt | FieldType::UpdatedAt => {
            column.nullable = false;
            column.default = Some("NOW()".to_string());
        }
        FieldType::Autonumber => {
            column.nullable = true;
            column.default = None;
        }
        _ => {}
    }

    if ty.requires_authentication() {
        let auth = auth.ok_or_else(|| SchemaError::AuthenticationRequired {
            table: table.to_string(),
            field: name.to_string(),
            reason: format!("{ty} fields reference the auth user table"),
        })?;
        column.foreign_key = Some(ForeignKeySpec {
            references_table: auth.user_table.clone(),
            references_column: "id".to_string(),
            on_delete: OnDelete::SetNull,
            auth_table: true,
        });
    }

    if field.indexed {
        column.index = Some(match ty {
            FieldType::Json
            | FieldType::Attachment
            | FieldType::MultipleAttachments
            | FieldType::MultiSelect => IndexMethod::Gin,
            _ => IndexMethod::Btree,
        });
    }

    Ok(ResolvedField::Column(column))
}

fn resolve_relationship(table: &str, field: &FieldDefinition) -> SchemaResult<ResolvedField> {
    let invalid = |reason: &str| SchemaError::InvalidRelationshipReference {
        table: table.to_string(),
        field: field.name.clone(),
        reason: reason.to_string(),
    };
    let related_table = field
        .related_table
        .clone()
        .ok_or_else(|| invalid("relatedTable is required"))?;

    let relation_type = field.relation();
    if relation_type == RelationType::OneToMany {
        let foreign_key = field
            .foreign_key
            .clone()
            .ok_or_else(|| invalid("one-to-many relationships require foreignKey"))?;
        return Ok(ResolvedField::Relationship(RelationshipSpec {
            name: field.name.clone(),
            related_table,
            foreign_key,
            relation_type,
        }));
    }

    let mut column = ColumnSpec::new(&field.name, FieldType::Relationship, SqlType::Text);
    column.nullable = !field.required;
    column.default = field.default.as_ref().map(literal);
    column.foreign_key = Some(ForeignKeySpec {
        references_table: related_table,
        references_column: "id".to_string(),
        on_delete: field.on_delete.unwrap_or(if field.required {
            OnDelete::Restrict
        } else {
            OnDelete::SetNull
        }),
        auth_table: false,
    });
    match relation_type {
        RelationType::OneToOne => column.unique = true,
        _ => {
            column.unique = field.unique;
            column.index = Some(IndexMethod::Btree);
        }
    }
    Ok(ResolvedField::Column(column))
}

fn check_expression(field: &FieldDefinition) -> Option<String> {
    let col = Ident(&field.name).to_string();
    let mut parts = Vec::new();

    match field.field_type {
        FieldType::Email => parts.push(format!("{col} ~* {}", quote_str(EMAIL_PATTERN))),
        FieldType::Integer | FieldType::Decimal | FieldType::Currency => {
            push_bounds(&mut parts, &col, field.min, field.max);
        }
        FieldType::Percentage => {
            push_bounds(
                &mut parts,
                &col,
                Some(field.min.unwrap_or(0.0)),
                Some(field.max.unwrap_or(100.0)),
            );
        }
        FieldType::Rating => {
            push_bounds(
                &mut parts,
                &col,
                Some(0.0),
                Some(field.max.unwrap_or(DEFAULT_RATING_MAX)),
            );
        }
        FieldType::SingleSelect if !field.options.is_empty() => {
            let options: Vec<String> = field.options.iter().map(|o| quote_str(o)).collect();
            parts.push(format!("{col} IN ({})", options.join(", ")));
        }
        FieldType::MultiSelect if !field.options.is_empty() => {
            let options: Vec<String> = field.options.iter().map(|o| quote_str(o)).collect();
            parts.push(format!("{col} <@ ARRAY[{}]::TEXT[]", options.join(", ")));
        }
        _ => {}
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" AND "))
    }
}

fn push_bounds(parts: &mut Vec<String>, col: &str, min: Option<f64>, max: Option<f64>) {
    if let Some(min) = min {
        parts.push(format!("{col} >= {}", number(min)));
    }
    if let Some(max) = max {
        parts.push(format!("{col} <= {}", number(max)));
    }
}

/// Render a bound without a trailing `.0` for whole numbers.
pub(crate) fn number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Column of an implicit special field.
pub fn special_column(special: SpecialField, is_primary_key: bool) -> ColumnSpec {
    match special {
        SpecialField::Id => {
            let mut column = ColumnSpec::new("id", FieldType::SingleLineText, SqlType::Text);
            column.nullable = false;
            column.default = Some("gen_random_uuid()::text".to_string());
            column.unique = !is_primary_key;
            column.read_only = true;
            column
        }
        SpecialField::CreatedAt | SpecialField::UpdatedAt => {
            let mut column =
                ColumnSpec::new(special.name(), special.field_type(), SqlType::Timestamptz);
            column.nullable = false;
            column.default = Some("NOW()".to_string());
            column
        }
    }
}

/// Tenant column of organization-scoped tables.
pub fn organization_column() -> ColumnSpec {
    let mut column = ColumnSpec::new(ORGANIZATION_ID, FieldType::SingleLineText, SqlType::Text);
    column.nullable = false;
    column.index = Some(IndexMethod::Btree);
    column.read_only = true;
    column
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Aggregation;

    fn column(field: FieldDefinition) -> ColumnSpec {
        match resolve("t", &field, Some(&AuthConfig::default())).unwrap() {
            ResolvedField::Column(column) => column,
            other => panic!("expected column, got {other:?}"),
        }
    }

    #[test]
    fn test_text_types() {
        let c = column(FieldDefinition::new(1, "title", FieldType::SingleLineText).required());
        assert_eq!(c.definition(), "\"title\" VARCHAR(255) NOT NULL");

        let mut field = FieldDefinition::new(1, "code", FieldType::SingleLineText);
        field.max_length = Some(12);
        assert_eq!(column(field).sql_type, SqlType::Varchar(12));

        let c = column(FieldDefinition::new(2, "email", FieldType::Email));
        assert!(c.check.unwrap().starts_with("\"email\" ~* '^"));
    }

    #[test]
    fn test_numeric_checks() {
        let c = column(
            FieldDefinition::new(1, "age", FieldType::Integer).with_range(Some(0.0), Some(150.0)),
        );
        assert_eq!(c.check.as_deref(), Some("\"age\" >= 0 AND \"age\" <= 150"));

        let c = column(FieldDefinition::new(2, "stars", FieldType::Rating));
        assert_eq!(c.check.as_deref(), Some("\"stars\" >= 0 AND \"stars\" <= 5"));

        let c = column(FieldDefinition::new(3, "done_pct", FieldType::Percentage));
        assert_eq!(c.sql_type, SqlType::Numeric(5, 2));
        assert_eq!(c.check.as_deref(), Some("\"done_pct\" >= 0 AND \"done_pct\" <= 100"));

        let c = column(FieldDefinition::new(4, "price", FieldType::Decimal));
        assert_eq!(c.sql_type, SqlType::Numeric(10, 2));
        assert!(c.check.is_none());
    }

    #[test]
    fn test_select_checks() {
        let c = column(
            FieldDefinition::new(1, "status", FieldType::SingleSelect).with_options(["open", "done"]),
        );
        assert_eq!(c.check.as_deref(), Some("\"status\" IN ('open', 'done')"));

        let c = column(
            FieldDefinition::new(2, "tags", FieldType::MultiSelect).with_options(["a", "b"]),
        );
        assert_eq!(c.sql_type, SqlType::TextArray);
        assert_eq!(c.check.as_deref(), Some("\"tags\" <@ ARRAY['a', 'b']::TEXT[]"));
    }

    #[test]
    fn test_checkbox_and_timestamps() {
        let c = column(FieldDefinition::new(1, "done", FieldType::Checkbox));
        assert_eq!(c.definition(), "\"done\" BOOLEAN NOT NULL DEFAULT false");

        let c = column(FieldDefinition::new(2, "created_at", FieldType::CreatedAt));
        assert_eq!(c.definition(), "\"created_at\" TIMESTAMPTZ NOT NULL DEFAULT NOW()");
        assert!(c.read_only);

        let c = column(FieldDefinition::new(3, "deleted_at", FieldType::DeletedAt));
        assert_eq!(c.definition(), "\"deleted_at\" TIMESTAMPTZ");
    }

    #[test]
    fn test_json_index_is_gin() {
        let c = column(FieldDefinition::new(1, "meta", FieldType::Json).indexed());
        assert_eq!(c.index, Some(IndexMethod::Gin));
        let c = column(FieldDefinition::new(2, "title", FieldType::LongText).indexed());
        assert_eq!(c.index, Some(IndexMethod::Btree));
    }

    #[test]
    fn test_user_fields_require_auth() {
        let field = FieldDefinition::new(1, "deleted_by", FieldType::DeletedBy);
        let err = resolve("tasks", &field, None).unwrap_err();
        assert!(matches!(err, SchemaError::AuthenticationRequired { .. }));

        let c = column(FieldDefinition::new(2, "owner", FieldType::User));
        let fk = c.foreign_key.unwrap();
        assert_eq!(fk.references_table, "users");
        assert!(fk.auth_table);
    }

    #[test]
    fn test_relationships() {
        let c = column(
            FieldDefinition::new(1, "department", FieldType::Relationship)
                .related_to("departments", RelationType::ManyToOne),
        );
        assert_eq!(c.sql_type, SqlType::Text);
        assert_eq!(c.index, Some(IndexMethod::Btree));
        assert_eq!(c.foreign_key.unwrap().on_delete, OnDelete::SetNull);

        let c = column(
            FieldDefinition::new(2, "profile", FieldType::Relationship)
                .related_to("profiles", RelationType::OneToOne),
        );
        assert!(c.unique);

        let field = FieldDefinition::new(3, "employees", FieldType::Relationship)
            .related_to("employees", RelationType::OneToMany);
        let err = resolve("departments", &field, None).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidRelationshipReference { .. }));

        let field = field.with_foreign_key("department");
        assert!(matches!(
            resolve("departments", &field, None).unwrap(),
            ResolvedField::Relationship(_)
        ));
    }

    #[test]
    fn test_computed_fields() {
        let field = FieldDefinition::new(1, "total", FieldType::Rollup).with_rollup(
            "employees",
            "salary",
            Aggregation::Sum,
        );
        let resolved = resolve("departments", &field, None).unwrap();
        assert!(matches!(resolved, ResolvedField::Computed(ComputedSpec::Rollup { .. })));

        let field = FieldDefinition::new(2, "broken", FieldType::Rollup);
        assert!(matches!(
            resolve("departments", &field, None).unwrap_err(),
            SchemaError::InvalidRollup { .. }
        ));
    }

    #[test]
    fn test_special_columns() {
        let id = special_column(SpecialField::Id, true);
        assert_eq!(id.definition(), "\"id\" TEXT NOT NULL DEFAULT gen_random_uuid()::text");
        assert!(!id.unique);
        assert!(special_column(SpecialField::Id, false).unique);
        assert_eq!(organization_column().index, Some(IndexMethod::Btree));
    }
}
