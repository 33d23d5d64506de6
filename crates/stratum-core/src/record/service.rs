//! Record API orchestration.
//!
//! Every operation runs in two explicit steps: visibility (the read policy
//! decides whether the record exists for the session at all) and then
//! authorization of the write itself. Hidden records are indistinguishable
//! from absent ones.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::{RecordError, RecordResult};
use super::query::{ListQuery, ListResponse};
use super::validate::{validate_required, validate_values};
use crate::catalog::{FieldType, SpecialField, TableId, ORGANIZATION_ID};
use crate::compiler::{CompiledApp, CompiledTable};
use crate::security::{Access, Operation, PolicyDecision, PolicyEvaluator, RowFilter, SessionContext};
use crate::storage::{
    timestamp, AggregateFunction, Record, SelectQuery, StorageLease, StoragePool,
};

/// A table the session may read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    /// Table id.
    pub id: TableId,
    /// Table name.
    pub name: String,
}

/// CRUD over the tables of one compiled application.
#[derive(Clone)]
pub struct RecordService {
    app: Arc<CompiledApp>,
    pool: StoragePool,
}

impl RecordService {
    /// Create a service over `app`, storing records through `pool`.
    pub fn new(app: Arc<CompiledApp>, pool: StoragePool) -> Self {
        Self { app, pool }
    }

    /// The compiled application.
    pub fn app(&self) -> &Arc<CompiledApp> {
        &self.app
    }

    fn table(&self, id: TableId) -> RecordResult<&CompiledTable> {
        self.app.table(id).ok_or(RecordError::TableNotFound)
    }

    /// Tables whose records the session may list.
    pub fn readable_tables(&self, session: &SessionContext) -> Vec<TableSummary> {
        self.app
            .tables()
            .iter()
            .filter(|t| PolicyEvaluator::evaluate(session, t, Operation::Read, None).is_granted())
            .map(|t| TableSummary {
                id: t.id(),
                name: t.name().to_string(),
            })
            .collect()
    }

    /// List visible records.
    pub async fn list(
        &self,
        session: &SessionContext,
        table_id: TableId,
        query: &ListQuery,
    ) -> RecordResult<ListResponse> {
        let table = self.table(table_id)?;
        let decision = PolicyEvaluator::evaluate(session, table, Operation::Read, None);
        require(&decision, table, Operation::Read)?;

        let user_filter = match &query.filter {
            Some(node) => {
                check_readable(table, &decision, node.referenced_fields())?;
                RowFilter::from_node(node).map_err(|e| RecordError::BadRequest(e.to_string()))?
            }
            None => RowFilter::True,
        };
        check_readable(table, &decision, query.sort.iter().map(|k| k.field.as_str()))?;
        for request in &query.aggregates {
            let Some(field) = request.field.as_deref() else {
                continue;
            };
            check_readable(table, &decision, [field])?;
            let numeric_only = matches!(
                request.function,
                AggregateFunction::Sum | AggregateFunction::Avg
            );
            if numeric_only && table.column(field).is_some_and(|c| !c.field_type.is_numeric()) {
                return Err(RecordError::BadRequest(format!(
                    "Cannot {} non-numeric field {field}",
                    request.function.as_str()
                )));
            }
        }

        let filter = decision
            .row_filter
            .clone()
            .and(live_rows(table))
            .and(user_filter);
        let limit = query.effective_limit();
        let offset = query.offset.unwrap_or(0);

        let lease = self.pool.lease().await?;
        let total = lease.count(table, &filter).await?;
        let select = SelectQuery {
            filter: filter.clone(),
            sort: query.sort.clone(),
            limit: Some(limit),
            offset,
        };
        let mut records = lease.select(table, &select).await?;
        let aggregates = if query.aggregates.is_empty() {
            None
        } else {
            Some(lease.aggregate(table, &filter, &query.aggregates).await?)
        };
        drop(lease);

        for record in &mut records {
            decision.redact(record);
        }
        debug!(
            table = %table.name(),
            user_id = ?session.user_id,
            returned = records.len(),
            total,
            "records listed"
        );

        let has_more = ((offset + records.len()) as u64) < total;
        Ok(ListResponse {
            records,
            total,
            limit,
            offset,
            has_more,
            aggregates,
        })
    }

    /// Fetch one visible record.
    pub async fn get(
        &self,
        session: &SessionContext,
        table_id: TableId,
        id: &str,
    ) -> RecordResult<Record> {
        let table = self.table(table_id)?;
        let read = visibility(session, table)?;
        let lease = self.pool.lease().await?;
        let mut record = find(&lease, table, &read, id, true)
            .await?
            .ok_or(RecordError::NotFound)?;
        read.redact(&mut record);
        Ok(record)
    }

    /// Create a record.
    pub async fn create(
        &self,
        session: &SessionContext,
        table_id: TableId,
        input: Record,
    ) -> RecordResult<Record> {
        let table = self.table(table_id)?;
        let decision = PolicyEvaluator::evaluate(session, table, Operation::Create, None);
        require(&decision, table, Operation::Create)?;

        let mut values = input;
        strip_system_fields(session, table, &mut values);
        check_writable(table, &values)?;
        values.retain(|name, value| {
            !(value.is_null() && table.column(name).is_some_and(|c| c.default.is_some()))
        });
        validate_values(table, &values)?;
        let supplied: Vec<String> = values.keys().cloned().collect();

        let user_id = user_value(session);
        if table.is_organization_scoped() {
            let organization = session.organization_id.clone().map_or(Value::Null, Value::String);
            values.insert(ORGANIZATION_ID.to_string(), organization);
        }
        for owner in &table.permissions.owner_fields {
            values.insert(owner.clone(), user_id.clone());
        }
        for column in table
            .columns_of_type(FieldType::CreatedBy)
            .chain(table.columns_of_type(FieldType::UpdatedBy))
        {
            values.insert(column.name.clone(), user_id.clone());
        }

        for field in &supplied {
            if !decision.can_write_field(field, Some(&values)) {
                return Err(field_denied(table, field));
            }
        }
        validate_required(table, &values)?;

        let lease = self.pool.lease().await?;
        self.check_links(session, &lease, table, &values).await?;
        let mut record = lease.insert(table, values).await?;
        drop(lease);

        info!(
            table = %table.name(),
            record_id = ?record.get(SpecialField::Id.name()),
            user_id = ?session.user_id,
            "record created"
        );
        PolicyEvaluator::evaluate(session, table, Operation::Read, None).redact(&mut record);
        Ok(record)
    }

    /// Update a visible record.
    pub async fn update(
        &self,
        session: &SessionContext,
        table_id: TableId,
        id: &str,
        input: Record,
    ) -> RecordResult<Record> {
        let table = self.table(table_id)?;
        let read = visibility(session, table)?;
        let lease = self.pool.lease().await?;
        let stored = find(&lease, table, &read, id, true)
            .await?
            .ok_or(RecordError::NotFound)?;
        let decision = authorize(session, table, Operation::Update, &stored)?;

        let mut values = input;
        strip_system_fields(session, table, &mut values);
        check_writable(table, &values)?;
        validate_values(table, &values)?;
        for field in values.keys() {
            if !decision.can_write_field(field, Some(&stored)) {
                return Err(field_denied(table, field));
            }
        }

        self.check_links(session, &lease, table, &values).await?;

        let now = timestamp();
        for column in table.columns_of_type(FieldType::UpdatedAt) {
            values.insert(column.name.clone(), now.clone());
        }
        for column in table.columns_of_type(FieldType::UpdatedBy) {
            values.insert(column.name.clone(), user_value(session));
        }

        let mut record = lease
            .update(table, id, values)
            .await?
            .ok_or(RecordError::NotFound)?;
        drop(lease);

        info!(table = %table.name(), record_id = %id, user_id = ?session.user_id, "record updated");
        read.redact(&mut record);
        Ok(record)
    }

    /// Delete a visible record: soft when the table has a `deleted-at`
    /// field and `permanent` is false, physical otherwise.
    pub async fn delete(
        &self,
        session: &SessionContext,
        table_id: TableId,
        id: &str,
        permanent: bool,
    ) -> RecordResult<()> {
        let table = self.table(table_id)?;
        let read = visibility(session, table)?;
        let lease = self.pool.lease().await?;
        let stored = find(&lease, table, &read, id, !permanent)
            .await?
            .ok_or(RecordError::NotFound)?;
        authorize(session, table, Operation::Delete, &stored)?;

        match (&table.soft_delete, permanent) {
            (Some(soft_delete), false) => {
                let mut values = Record::new();
                values.insert(soft_delete.deleted_at.clone(), timestamp());
                if let Some(deleted_by) = &soft_delete.deleted_by {
                    values.insert(deleted_by.clone(), user_value(session));
                }
                lease
                    .update(table, id, values)
                    .await?
                    .ok_or(RecordError::NotFound)?;
                info!(table = %table.name(), record_id = %id, user_id = ?session.user_id, "record soft-deleted");
            }
            _ => {
                if !lease.delete(table, id).await? {
                    return Err(RecordError::NotFound);
                }
                info!(table = %table.name(), record_id = %id, user_id = ?session.user_id, "record deleted");
            }
        }
        Ok(())
    }

    /// Undo a soft delete, clearing `deleted-at` and `deleted-by` together.
    pub async fn restore(
        &self,
        session: &SessionContext,
        table_id: TableId,
        id: &str,
    ) -> RecordResult<Record> {
        let table = self.table(table_id)?;
        let read = visibility(session, table)?;
        let lease = self.pool.lease().await?;
        let stored = find(&lease, table, &read, id, false)
            .await?
            .ok_or(RecordError::NotFound)?;
        authorize(session, table, Operation::Delete, &stored)?;

        let Some(soft_delete) = &table.soft_delete else {
            return Err(RecordError::BadRequest(format!(
                "Table {} does not support soft delete",
                table.name()
            )));
        };
        if stored.get(&soft_delete.deleted_at).map_or(true, Value::is_null) {
            return Err(RecordError::BadRequest("Record is not deleted".to_string()));
        }

        let mut values = Record::new();
        values.insert(soft_delete.deleted_at.clone(), Value::Null);
        if let Some(deleted_by) = &soft_delete.deleted_by {
            values.insert(deleted_by.clone(), Value::Null);
        }
        let mut record = lease
            .update(table, id, values)
            .await?
            .ok_or(RecordError::NotFound)?;
        drop(lease);

        info!(table = %table.name(), record_id = %id, user_id = ?session.user_id, "record restored");
        read.redact(&mut record);
        Ok(record)
    }

    /// Every relationship value must point at a live record the session can
    /// read in the related table.
    async fn check_links(
        &self,
        session: &SessionContext,
        lease: &StorageLease,
        table: &CompiledTable,
        values: &Record,
    ) -> RecordResult<()> {
        for (name, value) in values {
            let Some(target) = value.as_str() else {
                continue;
            };
            let Some(foreign_key) = table
                .column(name)
                .filter(|c| c.field_type == FieldType::Relationship)
                .and_then(|c| c.foreign_key.as_ref())
            else {
                continue;
            };
            let not_found = || {
                debug!(table = %table.name(), field = %name, "relationship target not visible");
                RecordError::BadRequest(format!("Related record not found for field {name}"))
            };
            let related = self
                .app
                .table_by_name(&foreign_key.references_table)
                .ok_or_else(not_found)?;
            let read = PolicyEvaluator::evaluate(session, related, Operation::Read, None);
            if !read.is_granted() {
                return Err(not_found());
            }
            if find(lease, related, &read, target, true).await?.is_none() {
                return Err(not_found());
            }
        }
        Ok(())
    }
}

fn require(decision: &PolicyDecision, table: &CompiledTable, operation: Operation) -> RecordResult<()> {
    match decision.access {
        Access::Granted => Ok(()),
        Access::Unauthenticated => Err(RecordError::Unauthenticated),
        Access::Forbidden => {
            debug!(table = %table.name(), operation = %operation, "operation denied");
            Err(RecordError::Forbidden(format!(
                "Cannot {operation} records of {}",
                table.name()
            )))
        }
    }
}

/// Read decision for single-record operations; a table the session can
/// never read looks empty.
fn visibility(session: &SessionContext, table: &CompiledTable) -> RecordResult<PolicyDecision> {
    let read = PolicyEvaluator::evaluate(session, table, Operation::Read, None);
    match read.access {
        Access::Granted => Ok(read),
        Access::Unauthenticated => Err(RecordError::Unauthenticated),
        Access::Forbidden => Err(RecordError::NotFound),
    }
}

/// Write decision for a record the session can see; the row rule of the
/// operation must hold on the stored record.
fn authorize(
    session: &SessionContext,
    table: &CompiledTable,
    operation: Operation,
    stored: &Record,
) -> RecordResult<PolicyDecision> {
    let decision = PolicyEvaluator::evaluate(session, table, operation, None);
    require(&decision, table, operation)?;
    if !decision.row_filter.matches(stored) {
        debug!(table = %table.name(), operation = %operation, "row rule not satisfied");
        return Err(RecordError::Forbidden(format!(
            "Cannot {operation} this record of {}",
            table.name()
        )));
    }
    Ok(decision)
}

/// Rows not soft-deleted.
fn live_rows(table: &CompiledTable) -> RowFilter {
    match &table.soft_delete {
        Some(soft_delete) => RowFilter::is_null(soft_delete.deleted_at.as_str()),
        None => RowFilter::True,
    }
}

async fn find(
    lease: &StorageLease,
    table: &CompiledTable,
    read: &PolicyDecision,
    id: &str,
    live_only: bool,
) -> RecordResult<Option<Record>> {
    let mut filter = read
        .row_filter
        .clone()
        .and(RowFilter::eq(SpecialField::Id.name(), id));
    if live_only {
        filter = filter.and(live_rows(table));
    }
    let mut rows = lease
        .select(table, &SelectQuery::filtered(filter).with_limit(1))
        .await?;
    Ok(rows.pop())
}

fn user_value(session: &SessionContext) -> Value {
    session.user_id.clone().map_or(Value::Null, Value::String)
}

/// Drop client values of fields the record layer owns: the tenant column
/// and the fields named by owner rules.
fn strip_system_fields(session: &SessionContext, table: &CompiledTable, values: &mut Record) {
    let mut system: Vec<&str> = table
        .permissions
        .owner_fields
        .iter()
        .map(String::as_str)
        .collect();
    if table.is_organization_scoped() {
        system.push(ORGANIZATION_ID);
    }
    for field in system {
        if values.remove(field).is_some() {
            warn!(
                table = %table.name(),
                field,
                user_id = ?session.user_id,
                "discarded client value for system-managed field"
            );
        }
    }
}

fn check_writable(table: &CompiledTable, values: &Record) -> RecordResult<()> {
    for name in values.keys() {
        match table.column(name) {
            Some(column) if column.read_only => {
                return Err(RecordError::BadRequest(format!("Field {name} is read-only")));
            }
            Some(_) => {}
            None if table.computed_field(name).is_some()
                || table.relationships.iter().any(|r| r.name == *name) =>
            {
                return Err(RecordError::BadRequest(format!("Field {name} is read-only")));
            }
            None => return Err(RecordError::BadRequest(format!("Unknown field: {name}"))),
        }
    }
    Ok(())
}

fn check_readable<'a>(
    table: &CompiledTable,
    decision: &PolicyDecision,
    fields: impl IntoIterator<Item = &'a str>,
) -> RecordResult<()> {
    let redacted = decision.field_redactions();
    for field in fields {
        if !table.is_readable_field(field) {
            return Err(RecordError::BadRequest(format!("Unknown field: {field}")));
        }
        if redacted.contains(field) {
            return Err(RecordError::Forbidden(format!("Field {field} is not readable")));
        }
    }
    Ok(())
}

fn field_denied(table: &CompiledTable, field: &str) -> RecordError {
    debug!(table = %table.name(), field, "field write denied");
    RecordError::Forbidden(format!("Cannot write field {field}"))
}
