//! Row and tenant isolation through the record service.

use std::sync::Arc;

use serde_json::{json, Value};
use stratum_core::catalog::{FieldPermission, ORGANIZATION_ID};
use stratum_core::storage::{AggregateFunction, Record};
use stratum_core::{
    compile, AppSchema, AuthConfig, FieldDefinition, FieldType, ListQuery, MemoryStore,
    PermissionRule, PoolConfig, RecordError, RecordService, SessionContext, StoragePool,
    TableDefinition, TablePermissions,
};

const NOTES: u64 = 1;
const CONTACTS: u64 = 2;
const REPORTS: u64 = 3;

fn service() -> RecordService {
    let schema = AppSchema::new("workspace")
        .with_auth(AuthConfig::with_organizations())
        .with_table(
            TableDefinition::new(NOTES, "personal_notes")
                .with_field(FieldDefinition::new(1, "title", FieldType::SingleLineText))
                .with_field(FieldDefinition::new(2, "owner_id", FieldType::User))
                .with_permissions(TablePermissions::all(PermissionRule::owner("owner_id"))),
        )
        .with_table(
            TableDefinition::new(CONTACTS, "contacts")
                .organization_scoped()
                .with_field(FieldDefinition::new(1, "name", FieldType::SingleLineText).required())
                .with_field(FieldDefinition::new(2, "deal_size", FieldType::Currency))
                .with_permissions(
                    TablePermissions::all(PermissionRule::Authenticated).with_field(
                        FieldPermission {
                            field: "deal_size".to_string(),
                            read: Some(PermissionRule::roles(["sales"])),
                            write: None,
                        },
                    ),
                ),
        )
        .with_table(
            TableDefinition::new(REPORTS, "reports")
                .with_field(FieldDefinition::new(1, "title", FieldType::SingleLineText))
                .with_permissions(TablePermissions::all(PermissionRule::roles(["analyst"]))),
        );
    let app = Arc::new(compile(&schema).unwrap());
    let pool = StoragePool::new(Arc::new(MemoryStore::new()), PoolConfig::default());
    RecordService::new(app, pool)
}

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

fn member(user: &str, org: &str) -> SessionContext {
    SessionContext::authenticated(user).with_organization(org)
}

#[tokio::test]
async fn test_owner_read_rule() {
    let service = service();
    let a = member("user-a", "org-1");
    let b = member("user-b", "org-1");

    service
        .create(&a, NOTES, record(json!({"title": "private"})))
        .await
        .unwrap();

    let seen_by_b = service.list(&b, NOTES, &ListQuery::new()).await.unwrap();
    assert_eq!(seen_by_b.records.len(), 0);
    let seen_by_a = service.list(&a, NOTES, &ListQuery::new()).await.unwrap();
    assert_eq!(seen_by_a.records.len(), 1);
    assert_eq!(seen_by_a.records[0]["owner_id"], json!("user-a"));
}

#[tokio::test]
async fn test_cross_organization_invisibility() {
    let service = service();
    let x = member("x", "org-x").with_role("sales");
    let y = member("y", "org-y").with_role("sales");

    service
        .create(&x, CONTACTS, record(json!({"name": "X Corp", "deal_size": 10})))
        .await
        .unwrap();
    let hidden = service
        .create(&y, CONTACTS, record(json!({"name": "Y Corp", "deal_size": 20})))
        .await
        .unwrap();
    let hidden_id = hidden["id"].as_str().unwrap();

    assert_eq!(
        service.get(&x, CONTACTS, hidden_id).await.unwrap_err(),
        RecordError::NotFound
    );
    assert_eq!(
        service.delete(&x, CONTACTS, hidden_id, true).await.unwrap_err(),
        RecordError::NotFound
    );

    let query = ListQuery::new()
        .with_aggregate(AggregateFunction::Count, None)
        .with_aggregate(AggregateFunction::Sum, Some("deal_size"));
    let page = service.list(&x, CONTACTS, &query).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.records[0]["name"], json!("X Corp"));
    let aggregates = page.aggregates.unwrap();
    assert_eq!(aggregates["count"], json!(1));
    assert_eq!(aggregates["sum_deal_size"].as_f64(), Some(10.0));

    assert!(service.get(&y, CONTACTS, hidden_id).await.is_ok());
}

#[tokio::test]
async fn test_no_organization_sees_nothing() {
    let service = service();
    service
        .create(&member("x", "org-x"), CONTACTS, record(json!({"name": "X Corp"})))
        .await
        .unwrap();

    let orphan = SessionContext::authenticated("lost");
    let page = service.list(&orphan, CONTACTS, &ListQuery::new()).await.unwrap();
    assert_eq!(page.total, 0);

    let err = service
        .create(&orphan, CONTACTS, record(json!({"name": "Nope"})))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn test_create_overrides_organization() {
    let service = service();
    let z = member("z", "org-z");
    let created = service
        .create(
            &z,
            CONTACTS,
            record(json!({"name": "Acme", ORGANIZATION_ID: "other-org-id"})),
        )
        .await
        .unwrap();
    assert_eq!(created[ORGANIZATION_ID], json!("org-z"));
}

#[tokio::test]
async fn test_update_ignores_organization() {
    let service = service();
    let z = member("z", "org-z");
    let created = service
        .create(&z, CONTACTS, record(json!({"name": "Acme"})))
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();

    let updated = service
        .update(
            &z,
            CONTACTS,
            id,
            record(json!({"name": "Acme Ltd", ORGANIZATION_ID: "other-org-id"})),
        )
        .await
        .unwrap();
    assert_eq!(updated["name"], json!("Acme Ltd"));
    assert_eq!(updated[ORGANIZATION_ID], json!("org-z"));
}

#[tokio::test]
async fn test_redacted_field_hidden_and_unfilterable() {
    let service = service();
    let sales = member("s", "org-x").with_role("sales");
    let support = member("t", "org-x");

    service
        .create(&sales, CONTACTS, record(json!({"name": "X Corp", "deal_size": 500})))
        .await
        .unwrap();

    let page = service.list(&support, CONTACTS, &ListQuery::new()).await.unwrap();
    assert!(!page.records[0].contains_key("deal_size"));

    let query = ListQuery::new().with_aggregate(AggregateFunction::Max, Some("deal_size"));
    let err = service.list(&support, CONTACTS, &query).await.unwrap_err();
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn test_empty_roles_denied() {
    let service = service();
    let nobody = member("n", "org-x");
    let err = service.list(&nobody, REPORTS, &ListQuery::new()).await.unwrap_err();
    assert_eq!(err.status_code(), 403);

    let anonymous = SessionContext::anonymous();
    let err = service.list(&anonymous, REPORTS, &ListQuery::new()).await.unwrap_err();
    assert_eq!(err, RecordError::Unauthenticated);

    let analyst = nobody.with_role("analyst");
    assert!(service.list(&analyst, REPORTS, &ListQuery::new()).await.is_ok());
}
