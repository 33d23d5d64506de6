//! Compiling schema documents into migration plans.

use stratum_core::compiler::{MigrationPhase, Statement};
use stratum_core::{compile, AppSchema, MigrationPlan, SchemaError};

const HR: &str = r#"{
  "name": "hr",
  "tables": [
    {
      "id": 1,
      "name": "departments",
      "fields": [
        {"id": 1, "name": "name", "type": "single-line-text", "required": true, "unique": true},
        {"id": 2, "name": "employees", "type": "relationship",
         "relatedTable": "employees", "relationType": "one-to-many", "foreignKey": "department"},
        {"id": 3, "name": "total_salary", "type": "rollup",
         "relationshipField": "employees", "relatedField": "salary", "aggregation": "sum"}
      ]
    },
    {
      "id": 2,
      "name": "employees",
      "fields": [
        {"id": 1, "name": "name", "type": "single-line-text", "required": true},
        {"id": 2, "name": "salary", "type": "currency", "min": 0},
        {"id": 3, "name": "department", "type": "relationship",
         "relatedTable": "departments", "relationType": "many-to-one"}
      ]
    }
  ]
}"#;

fn parse(json: &str) -> AppSchema {
    AppSchema::from_json(json).unwrap()
}

#[test]
fn test_full_plan_names_objects() {
    let app = compile(&parse(HR)).unwrap();
    let sql = app.migration_plan().to_sql();

    assert!(sql.contains("CREATE TABLE IF NOT EXISTS \"departments\""));
    assert!(sql.contains("CREATE TABLE IF NOT EXISTS \"employees\""));
    assert!(sql.contains("\"idx_employees_department\""));
    assert!(sql.contains("\"employees_department_fkey\""));
    assert!(sql.contains("CREATE OR REPLACE VIEW \"departments_view\""));
    assert!(sql.find("\"employees_department_fkey\"") > sql.find("CREATE TABLE IF NOT EXISTS \"employees\""));
}

#[test]
fn test_recompilation_is_idempotent() {
    let first = compile(&parse(HR)).unwrap();
    let second = compile(&parse(HR)).unwrap();
    assert_eq!(first, second);
    assert!(MigrationPlan::between(&first, &second).is_empty());
    assert_eq!(first.migration_plan(), second.migration_plan());
}

#[test]
fn test_new_table_delta() {
    let before = compile(&parse(HR)).unwrap();
    let mut schema = parse(HR);
    schema.tables.push(
        serde_json::from_str(
            r#"{"id": 3, "name": "offices", "fields": [{"id": 1, "name": "city", "type": "single-line-text"}]}"#,
        )
        .unwrap(),
    );
    let after = compile(&schema).unwrap();

    let plan = MigrationPlan::between(&before, &after);
    let created: Vec<&Statement> = plan
        .steps_in_phase(MigrationPhase::Expand)
        .into_iter()
        .map(|step| &step.statement)
        .collect();
    assert_eq!(created.len(), 1);
    assert!(created[0].to_string().contains("\"offices\""));
    assert_eq!(plan.steps_in_phase(MigrationPhase::Contract).len(), 0);
}

#[test]
fn test_deleted_by_requires_authentication() {
    let schema = parse(
        r#"{"tables": [{"id": 1, "name": "tasks", "fields": [
            {"id": 1, "name": "title", "type": "single-line-text"},
            {"id": 2, "name": "deleted_at", "type": "deleted-at"},
            {"id": 3, "name": "deleted_by", "type": "deleted-by"}
        ]}]}"#,
    );
    assert!(matches!(
        compile(&schema).unwrap_err(),
        SchemaError::AuthenticationRequired { ref field, .. } if field == "deleted_by"
    ));

    let with_auth = parse(
        r#"{"auth": {}, "tables": [{"id": 1, "name": "tasks", "fields": [
            {"id": 1, "name": "title", "type": "single-line-text"},
            {"id": 2, "name": "deleted_at", "type": "deleted-at"},
            {"id": 3, "name": "deleted_by", "type": "deleted-by"}
        ]}]}"#,
    );
    let app = compile(&with_auth).unwrap();
    assert!(app.table_by_name("tasks").unwrap().soft_delete.is_some());
}

#[test]
fn test_unknown_field_type() {
    let err = AppSchema::from_json(
        r#"{"tables": [{"id": 1, "name": "t", "fields": [{"id": 1, "name": "x", "type": "hologram"}]}]}"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("hologram"));
}

#[test]
fn test_one_bad_table_rejects_everything() {
    let mut schema = parse(HR);
    schema.tables.push(
        serde_json::from_str(
            r#"{"id": 3, "name": "broken", "fields": [
                {"id": 1, "name": "total", "type": "formula", "formula": "missing_field * 2"}
            ]}"#,
        )
        .unwrap(),
    );
    assert!(compile(&schema).is_err());
}
