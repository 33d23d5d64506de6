//! Value validation for writes.
//!
//! Mirrors the column constraints the compiler emits so that a violation is
//! reported with its semantic constraint name before storage is touched.

use chrono::{DateTime, NaiveDate, NaiveTime};
use serde_json::Value;

use super::error::{RecordError, RecordResult};
use crate::catalog::{FieldDefinition, FieldType};
use crate::compiler::CompiledTable;
use crate::registry::{ColumnSpec, SqlType};
use crate::storage::Record;

const DEFAULT_RATING_MAX: f64 = 5.0;

/// Check every value of `values` against its column.
pub(crate) fn validate_values(table: &CompiledTable, values: &Record) -> RecordResult<()> {
    for (name, value) in values {
        let Some(column) = table.column(name) else {
            return Err(RecordError::BadRequest(format!("Unknown field: {name}")));
        };
        validate_value(table, column, value)?;
    }
    Ok(())
}

/// Check that every NOT NULL column without a default has a value.
pub(crate) fn validate_required(table: &CompiledTable, row: &Record) -> RecordResult<()> {
    for column in table.columns.iter().filter(|c| !c.nullable && c.default.is_none()) {
        if row.get(&column.name).map_or(true, Value::is_null) {
            return Err(required(table, column));
        }
    }
    Ok(())
}

fn required(table: &CompiledTable, column: &ColumnSpec) -> RecordError {
    RecordError::violation(
        format!("{}_{}_not_null", table.name(), column.name),
        format!("Field {} is required", column.name),
    )
}

fn validate_value(table: &CompiledTable, column: &ColumnSpec, value: &Value) -> RecordResult<()> {
    if value.is_null() {
        return if column.nullable {
            Ok(())
        } else {
            Err(required(table, column))
        };
    }

    let name = column.name.as_str();
    let check = || format!("{}_{name}_check", table.name());
    let mismatch = |expected: &str| {
        RecordError::BadRequest(format!("Field {name} expects {expected}, got {value}"))
    };
    let field = table.definition.get_field(name);

    match column.field_type {
        FieldType::SingleLineText
        | FieldType::Email
        | FieldType::Url
        | FieldType::PhoneNumber
        | FieldType::LongText
        | FieldType::RichText
        | FieldType::SingleSelect
        | FieldType::User
        | FieldType::Relationship => {
            let text = value.as_str().ok_or_else(|| mismatch("text"))?;
            if let SqlType::Varchar(max) = column.sql_type {
                if text.chars().count() > max as usize {
                    return Err(RecordError::violation(
                        format!("{}_{name}_length", table.name()),
                        format!("Field {name} is longer than {max} characters"),
                    ));
                }
            }
            if column.field_type == FieldType::Email && !is_email(text) {
                return Err(RecordError::violation(
                    check(),
                    format!("Field {name} is not a valid email address"),
                ));
            }
            if column.field_type == FieldType::SingleSelect {
                check_options(field, std::slice::from_ref(value), name, check)?;
            }
        }
        FieldType::Integer | FieldType::Rating => {
            let number = value
                .as_f64()
                .filter(|n| n.fract() == 0.0)
                .ok_or_else(|| mismatch("an integer"))?;
            check_bounds(field, column.field_type, number, name, check)?;
        }
        FieldType::Decimal | FieldType::Currency | FieldType::Percentage => {
            let number = value.as_f64().ok_or_else(|| mismatch("a number"))?;
            check_bounds(field, column.field_type, number, name, check)?;
        }
        FieldType::Checkbox => {
            value.as_bool().ok_or_else(|| mismatch("a boolean"))?;
        }
        FieldType::Date => {
            let text = value.as_str().ok_or_else(|| mismatch("a date"))?;
            NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| mismatch("a YYYY-MM-DD date"))?;
        }
        FieldType::Datetime => {
            let text = value.as_str().ok_or_else(|| mismatch("a timestamp"))?;
            DateTime::parse_from_rfc3339(text).map_err(|_| mismatch("an RFC 3339 timestamp"))?;
        }
        FieldType::Time => {
            let text = value.as_str().ok_or_else(|| mismatch("a time"))?;
            NaiveTime::parse_from_str(text, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
                .map_err(|_| mismatch("an HH:MM[:SS] time"))?;
        }
        FieldType::Duration => {
            value.as_str().ok_or_else(|| mismatch("an interval"))?;
        }
        FieldType::MultiSelect => {
            let items = value.as_array().ok_or_else(|| mismatch("a list"))?;
            if items.iter().any(|item| !item.is_string()) {
                return Err(mismatch("a list of text values"));
            }
            check_options(field, items, name, check)?;
        }
        FieldType::Attachment => {
            value.as_object().ok_or_else(|| mismatch("a file object"))?;
        }
        FieldType::MultipleAttachments => {
            let items = value.as_array().ok_or_else(|| mismatch("a list of file objects"))?;
            if items.iter().any(|item| !item.is_object()) {
                return Err(mismatch("a list of file objects"));
            }
        }
        FieldType::Json => {}
        // System-managed values are stamped by the record layer.
        FieldType::Autonumber
        | FieldType::CreatedBy
        | FieldType::UpdatedBy
        | FieldType::DeletedBy
        | FieldType::CreatedAt
        | FieldType::UpdatedAt
        | FieldType::DeletedAt
        | FieldType::Formula
        | FieldType::Rollup => {}
    }
    Ok(())
}

fn check_bounds(
    field: Option<&FieldDefinition>,
    field_type: FieldType,
    number: f64,
    name: &str,
    check: impl Fn() -> String,
) -> RecordResult<()> {
    let (min, max) = field.map_or((None, None), |f| (f.min, f.max));
    let (min, max) = match field_type {
        FieldType::Percentage => (Some(min.unwrap_or(0.0)), Some(max.unwrap_or(100.0))),
        FieldType::Rating => (Some(0.0), Some(max.unwrap_or(DEFAULT_RATING_MAX))),
        _ => (min, max),
    };
    if let Some(min) = min.filter(|min| number < *min) {
        return Err(RecordError::violation(
            check(),
            format!("Field {name} must be at least {min}"),
        ));
    }
    if let Some(max) = max.filter(|max| number > *max) {
        return Err(RecordError::violation(
            check(),
            format!("Field {name} must be at most {max}"),
        ));
    }
    Ok(())
}

fn check_options(
    field: Option<&FieldDefinition>,
    values: &[Value],
    name: &str,
    check: impl Fn() -> String,
) -> RecordResult<()> {
    let Some(field) = field.filter(|f| !f.options.is_empty()) else {
        return Ok(());
    };
    for value in values {
        let allowed = value
            .as_str()
            .is_some_and(|v| field.options.iter().any(|o| o == v));
        if !allowed {
            return Err(RecordError::violation(
                check(),
                format!("Field {name} does not allow {value}"),
            ));
        }
    }
    Ok(())
}

/// Same shape as the column check: `local@domain.tld`, no whitespace.
fn is_email(text: &str) -> bool {
    let Some((local, domain)) = text.split_once('@') else {
        return false;
    };
    let valid_part = |s: &str| !s.is_empty() && !s.contains('@') && !s.chars().any(char::is_whitespace);
    match domain.rsplit_once('.') {
        Some((host, tld)) => valid_part(local) && valid_part(host) && valid_part(tld),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AppSchema, TableDefinition};
    use crate::compiler::compile;
    use serde_json::json;

    fn table() -> CompiledTable {
        let schema = AppSchema::new("t").with_table(
            TableDefinition::new(1, "employees")
                .with_field(FieldDefinition::new(1, "name", FieldType::SingleLineText).required())
                .with_field(FieldDefinition::new(2, "email", FieldType::Email))
                .with_field(
                    FieldDefinition::new(3, "salary", FieldType::Currency)
                        .with_range(Some(0.0), None),
                )
                .with_field(FieldDefinition::new(4, "score", FieldType::Rating))
                .with_field(
                    FieldDefinition::new(5, "level", FieldType::SingleSelect)
                        .with_options(["junior", "senior"]),
                )
                .with_field(FieldDefinition::new(6, "hired", FieldType::Date)),
        );
        compile(&schema).unwrap().tables()[0].clone()
    }

    fn values(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn constraint(err: RecordError) -> String {
        match err {
            RecordError::ConstraintViolation { constraint, .. } => constraint,
            other => panic!("expected constraint violation, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_values() {
        let table = table();
        let ok = values(json!({
            "name": "Ann", "email": "ann@example.com", "salary": 120000,
            "score": 4, "level": "senior", "hired": "2024-02-01"
        }));
        assert!(validate_values(&table, &ok).is_ok());
        assert!(validate_required(&table, &ok).is_ok());
    }

    #[test]
    fn test_semantic_constraint_names() {
        let table = table();
        let err = validate_values(&table, &values(json!({"salary": -1}))).unwrap_err();
        assert_eq!(constraint(err), "employees_salary_check");

        let err = validate_values(&table, &values(json!({"score": 6}))).unwrap_err();
        assert_eq!(constraint(err), "employees_score_check");

        let err = validate_values(&table, &values(json!({"email": "not-an-email"}))).unwrap_err();
        assert_eq!(constraint(err), "employees_email_check");

        let err = validate_values(&table, &values(json!({"level": "cto"}))).unwrap_err();
        assert_eq!(constraint(err), "employees_level_check");

        let err = validate_values(&table, &values(json!({"name": null}))).unwrap_err();
        assert_eq!(constraint(err), "employees_name_not_null");

        let err = validate_required(&table, &values(json!({"email": "a@b.co"}))).unwrap_err();
        assert_eq!(constraint(err), "employees_name_not_null");
    }

    #[test]
    fn test_type_mismatch_is_bad_request() {
        let table = table();
        for bad in [
            json!({"salary": "lots"}),
            json!({"score": 2.5}),
            json!({"hired": "yesterday"}),
            json!({"bogus": 1}),
        ] {
            let err = validate_values(&table, &values(bad)).unwrap_err();
            assert!(matches!(err, RecordError::BadRequest(_)));
        }
    }

    #[test]
    fn test_is_email() {
        assert!(is_email("a@b.co"));
        assert!(!is_email("a@b"));
        assert!(!is_email("a b@c.d"));
        assert!(!is_email("@b.co"));
    }
}
