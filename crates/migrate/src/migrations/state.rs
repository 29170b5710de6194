//! Execution records in the state collection.
//!
//! Running and Failure transitions are written without a session so they
//! survive an aborted transaction. Success is written through the migration's
//! session and commits together with the migration's own writes.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use super::definitions::{ExecutionRecord, ExecutionStatus, Migration};
use crate::backends::{
    Document, DocumentCollection, DocumentSession, DriverError, Filter, FindOptions, SortOrder,
    ID_FIELD,
};
use crate::error::MigrateResult;

const NAMESPACE_FIELD: &str = "module_namespace";
const MIGRATION_ID_FIELD: &str = "migration_id";
const STATUS_FIELD: &str = "status";
const ROLLBACK_FIELD: &str = "is_rollback";
const BATCH_FIELD: &str = "batch_id";

/// State collection view scoped to one namespace
#[derive(Clone)]
pub struct StateStore {
    collection: Arc<dyn DocumentCollection>,
    namespace: String,
}

impl StateStore {
    pub fn new(collection: Arc<dyn DocumentCollection>, namespace: impl Into<String>) -> Self {
        Self {
            collection,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn scope(&self) -> Filter {
        Filter::eq(NAMESPACE_FIELD, self.namespace.as_str())
    }

    fn blocking_filter() -> Filter {
        Filter::is_in(
            STATUS_FIELD,
            ExecutionStatus::blocking().map(|status| status.as_str()),
        )
    }

    async fn find(&self, filter: Filter, options: FindOptions) -> MigrateResult<Vec<ExecutionRecord>> {
        let documents = self
            .collection
            .find(None, &self.scope().and(filter), &options)
            .await?;
        documents.into_iter().map(parse_record).collect()
    }

    /// Records with status Running or Failure, ascending by migration id
    pub async fn blocking_records(&self) -> MigrateResult<Vec<ExecutionRecord>> {
        self.find(
            Self::blocking_filter(),
            FindOptions::new().sort_by(MIGRATION_ID_FIELD, SortOrder::Ascending),
        )
        .await
    }

    /// Highest migration id with a forward Success record
    pub async fn latest_applied_id(&self) -> MigrateResult<Option<i64>> {
        Ok(self
            .latest_applied()
            .await?
            .map(|record| record.migration_id))
    }

    pub async fn latest_applied(&self) -> MigrateResult<Option<ExecutionRecord>> {
        let mut records = self
            .find(
                Self::applied_filter(),
                FindOptions::new()
                    .sort_by(MIGRATION_ID_FIELD, SortOrder::Descending)
                    .limit(1),
            )
            .await?;
        Ok(records.pop())
    }

    fn applied_filter() -> Filter {
        Filter::eq(STATUS_FIELD, ExecutionStatus::Success.as_str()).and(Filter::eq(ROLLBACK_FIELD, false))
    }

    /// Forward Success records of one batch, descending by migration id
    pub async fn applied_in_batch(&self, batch_id: Uuid) -> MigrateResult<Vec<ExecutionRecord>> {
        self.find(
            Self::applied_filter().and(Filter::eq(BATCH_FIELD, batch_id.to_string())),
            FindOptions::new().sort_by(MIGRATION_ID_FIELD, SortOrder::Descending),
        )
        .await
    }

    /// Every record in the namespace, ascending by migration id
    pub async fn records(&self) -> MigrateResult<Vec<ExecutionRecord>> {
        self.find(
            Filter::All,
            FindOptions::new().sort_by(MIGRATION_ID_FIELD, SortOrder::Ascending),
        )
        .await
    }

    /// Most recent record per migration id
    pub async fn latest_by_migration(&self) -> MigrateResult<BTreeMap<i64, ExecutionRecord>> {
        let mut latest: BTreeMap<i64, ExecutionRecord> = BTreeMap::new();
        for record in self.records().await? {
            let newer = latest
                .get(&record.migration_id)
                .map_or(true, |current| record.executed_at >= current.executed_at);
            if newer {
                latest.insert(record.migration_id, record);
            }
        }
        Ok(latest)
    }

    /// Upsert a Running record for the migration's open attempt, returning its id
    pub async fn mark_running(&self, migration: &dyn Migration, batch_id: Uuid) -> MigrateResult<String> {
        let filter = self
            .scope()
            .and(Filter::eq(MIGRATION_ID_FIELD, migration.id()))
            .and(Self::blocking_filter());

        let outcome = self
            .collection
            .upsert(
                None,
                &filter,
                fields(json!({
                    "migration_name": migration.name(),
                    "batch_id": batch_id.to_string(),
                    "status": ExecutionStatus::Running.as_str(),
                    "executed_at": Utc::now(),
                    "error_detail": JsonValue::Null,
                    "is_rollback": false,
                })),
            )
            .await?;

        if let Some(id) = outcome.upserted_id {
            return Ok(id);
        }

        let running = self
            .find(
                Filter::eq(MIGRATION_ID_FIELD, migration.id())
                    .and(Filter::eq(STATUS_FIELD, ExecutionStatus::Running.as_str())),
                FindOptions::new().limit(1),
            )
            .await?;
        running
            .into_iter()
            .next()
            .map(|record| record.record_id)
            .ok_or_else(|| {
                DriverError::Query(format!(
                    "Running record for migration {} disappeared after upsert",
                    migration.id()
                ))
                .into()
            })
    }

    /// Flip an applied record to Running as a revert attempt
    pub async fn mark_rollback_running(&self, record_id: &str) -> MigrateResult<()> {
        self.transition(
            None,
            record_id,
            json!({
                "status": ExecutionStatus::Running.as_str(),
                "executed_at": Utc::now(),
                "is_rollback": true,
            }),
        )
        .await
    }

    /// Record success through the migration's session
    pub async fn mark_succeeded(
        &self,
        record_id: &str,
        session: Option<&mut dyn DocumentSession>,
    ) -> MigrateResult<()> {
        self.transition(
            session,
            record_id,
            json!({
                "status": ExecutionStatus::Success.as_str(),
                "executed_at": Utc::now(),
                "error_detail": JsonValue::Null,
            }),
        )
        .await
    }

    /// Record failure outside any transaction
    pub async fn mark_failed(&self, record_id: &str, detail: &str) -> MigrateResult<()> {
        self.transition(
            None,
            record_id,
            json!({
                "status": ExecutionStatus::Failure.as_str(),
                "executed_at": Utc::now(),
                "error_detail": detail,
            }),
        )
        .await
    }

    async fn transition(
        &self,
        session: Option<&mut dyn DocumentSession>,
        record_id: &str,
        update: JsonValue,
    ) -> MigrateResult<()> {
        let matched = self
            .collection
            .update_one(session, &Filter::eq(ID_FIELD, record_id), fields(update))
            .await?;
        if matched == 0 {
            return Err(DriverError::Query(format!("Execution record {} not found", record_id)).into());
        }
        Ok(())
    }

    /// Resolve the Running/Failure records of one migration.
    ///
    /// Forward attempts are deleted. An interrupted revert never completed, so
    /// its record goes back to a forward Success and the unit stays applied.
    pub async fn clear_blocking(&self, migration_id: i64) -> MigrateResult<u64> {
        let blocking = Filter::eq(MIGRATION_ID_FIELD, migration_id).and(Self::blocking_filter());

        let reverts = self
            .find(blocking.clone().and(Filter::eq(ROLLBACK_FIELD, true)), FindOptions::new())
            .await?;
        for record in &reverts {
            self.transition(
                None,
                &record.record_id,
                json!({
                    "status": ExecutionStatus::Success.as_str(),
                    "error_detail": JsonValue::Null,
                    "is_rollback": false,
                }),
            )
            .await?;
        }

        let forward = self.scope().and(blocking).and(Filter::eq(ROLLBACK_FIELD, false));
        let removed = self.collection.delete_many(None, &forward).await?;
        Ok(removed + reverts.len() as u64)
    }
}

fn fields(value: JsonValue) -> Document {
    match value {
        JsonValue::Object(map) => map,
        _ => Document::new(),
    }
}

fn parse_record(document: Document) -> MigrateResult<ExecutionRecord> {
    serde_json::from_value(JsonValue::Object(document)).map_err(|e| DriverError::from(e).into())
}
