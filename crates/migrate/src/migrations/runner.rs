//! Migration Runner - Executes migrations against the database
//!
//! A [`MigrationEngine`] applies one catalog against one state store. Every
//! pending migration runs in its own transactional session; the first
//! failure halts the batch.

use std::sync::Arc;
use std::time::Instant;

use tidemark_core::{TransactionMode, DEFAULT_STATE_COLLECTION};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::catalog::MigrationCatalog;
use super::context::MigrationContext;
use super::definitions::{
    Migration, MigrationRunResult, MigrationStatus, MigrationStatusEntry, UnitOutcome,
};
use super::state::StateStore;
use crate::backends::{DocumentClient, DocumentDatabase};
use crate::error::{MigrateError, MigrateResult};
use crate::transaction::TransactionalSession;

/// Runs one catalog of migrations against one database
pub struct MigrationEngine {
    pub(crate) client: Arc<dyn DocumentClient>,
    pub(crate) database: Arc<dyn DocumentDatabase>,
    pub(crate) catalog: MigrationCatalog,
    pub(crate) state: StateStore,
    pub(crate) mode: TransactionMode,
}

impl MigrationEngine {
    /// Create an engine that records state in the default collection
    pub fn new(client: Arc<dyn DocumentClient>, database: &str, catalog: MigrationCatalog) -> Self {
        let database = client.database(database);
        let state = StateStore::new(
            database.collection(DEFAULT_STATE_COLLECTION),
            catalog.namespace(),
        );

        Self {
            client,
            database,
            catalog,
            state,
            mode: TransactionMode::Enabled,
        }
    }

    pub fn with_state_collection(mut self, collection: &str) -> Self {
        self.state = StateStore::new(self.database.collection(collection), self.catalog.namespace());
        self
    }

    pub fn with_transactions(mut self, mode: TransactionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn namespace(&self) -> &str {
        self.catalog.namespace()
    }

    pub fn catalog(&self) -> &MigrationCatalog {
        &self.catalog
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Fail with [`MigrateError::Blocked`] if any attempt is Running or Failure
    pub(crate) async fn ensure_unblocked(&self) -> MigrateResult<()> {
        let blocking = self.state.blocking_records().await?;
        if blocking.is_empty() {
            return Ok(());
        }

        let err = MigrateError::blocked(
            self.namespace(),
            blocking
                .iter()
                .map(|record| (record.migration_id, record.migration_name.as_str())),
        );
        warn!(namespace = %self.namespace(), "{}", err);
        Err(err)
    }

    /// Run all pending migrations
    pub async fn run(&self) -> MigrateResult<MigrationRunResult> {
        let start_time = Instant::now();
        let namespace = self.namespace().to_string();

        self.ensure_unblocked().await?;

        let last_applied = self.state.latest_applied_id().await?;
        let pending = self.catalog.pending_after(last_applied);
        let skipped_count = self.catalog.len() - pending.len();

        if pending.is_empty() {
            info!(namespace = %namespace, "No pending migrations");
            return Ok(MigrationRunResult {
                namespace,
                batch_id: None,
                applied_count: 0,
                applied_migrations: Vec::new(),
                skipped_count,
                execution_time_ms: start_time.elapsed().as_millis(),
            });
        }

        let batch_id = Uuid::new_v4();
        info!(
            namespace = %namespace,
            batch_id = %batch_id,
            pending = pending.len(),
            "Starting migration batch"
        );

        let mut applied_migrations = Vec::new();
        for migration in &pending {
            match self.apply_migration(migration.as_ref(), batch_id).await? {
                UnitOutcome::Applied => applied_migrations.push(migration.id()),
                UnitOutcome::Failed { detail } => {
                    return Err(MigrateError::MigrationFailed {
                        namespace,
                        id: migration.id(),
                        name: migration.name().to_string(),
                        detail,
                    });
                }
            }
        }

        info!(
            namespace = %namespace,
            batch_id = %batch_id,
            applied = applied_migrations.len(),
            "Migration batch complete"
        );

        Ok(MigrationRunResult {
            namespace,
            batch_id: Some(batch_id),
            applied_count: applied_migrations.len(),
            applied_migrations,
            skipped_count,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Apply a single migration in its own transactional session
    async fn apply_migration(&self, migration: &dyn Migration, batch_id: Uuid) -> MigrateResult<UnitOutcome> {
        info!(
            namespace = %self.namespace(),
            migration_id = migration.id(),
            batch_id = %batch_id,
            "Applying migration: {}",
            migration.name()
        );

        let mut session = TransactionalSession::new(self.client.clone(), self.mode);
        session.start().await?;
        session.begin().await?;

        let record_id = self.state.mark_running(migration, batch_id).await?;

        let result = {
            let mut ctx = MigrationContext::new(
                &self.client,
                self.database.clone(),
                self.namespace(),
                batch_id,
                &mut session,
            );
            migration.up(&mut ctx).await
        };

        if let Err(err) = result {
            let detail = format!("{:#}", err);
            error!(
                namespace = %self.namespace(),
                migration_id = migration.id(),
                batch_id = %batch_id,
                "Migration failed: {}",
                detail
            );
            if let Err(abort_err) = session.abort().await {
                warn!(migration_id = migration.id(), "Failed to abort transaction: {}", abort_err);
            }
            self.state.mark_failed(&record_id, &detail).await?;
            return Ok(UnitOutcome::Failed { detail });
        }

        if let Err(err) = self.state.mark_succeeded(&record_id, session.session()).await {
            if let Err(abort_err) = session.abort().await {
                warn!(migration_id = migration.id(), "Failed to abort transaction: {}", abort_err);
            }
            self.record_driver_failure(migration, &record_id, &err).await;
            return Err(err);
        }

        if let Err(err) = session.commit().await {
            let err = MigrateError::from(err);
            self.record_driver_failure(migration, &record_id, &err).await;
            return Err(err);
        }

        info!(
            namespace = %self.namespace(),
            migration_id = migration.id(),
            batch_id = %batch_id,
            "Applied migration: {}",
            migration.name()
        );
        Ok(UnitOutcome::Applied)
    }

    /// Best-effort Failure mark after a driver error; the original error wins
    async fn record_driver_failure(&self, migration: &dyn Migration, record_id: &str, err: &MigrateError) {
        error!(
            namespace = %self.namespace(),
            migration_id = migration.id(),
            "Driver error while applying migration: {}",
            err
        );
        if let Err(mark_err) = self.state.mark_failed(record_id, &err.to_string()).await {
            warn!(
                migration_id = migration.id(),
                "Could not record failure: {}",
                mark_err
            );
        }
    }

    /// Status of every catalog migration, ascending by id
    pub async fn status(&self) -> MigrateResult<Vec<MigrationStatusEntry>> {
        let latest = self.state.latest_by_migration().await?;

        Ok(self
            .catalog
            .iter()
            .map(|migration| MigrationStatusEntry {
                id: migration.id(),
                name: migration.name().to_string(),
                status: MigrationStatus::from_record(latest.get(&migration.id())),
            })
            .collect())
    }

    /// Resolve the blocking record(s) of one migration so runs can proceed.
    /// A failed forward attempt is forgotten; a failed revert leaves the
    /// migration applied.
    ///
    /// This is an operator action; the engine never calls it on its own.
    pub async fn resolve_blocked(&self, migration_id: i64) -> MigrateResult<u64> {
        let resolved = self.state.clear_blocking(migration_id).await?;
        warn!(
            namespace = %self.namespace(),
            migration_id,
            resolved,
            "Resolved blocking migration records"
        );
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{FailPoint, Filter, MemoryClient};
    use crate::migrations::catalog::MigrationRegistry;
    use crate::migrations::definitions::ExecutionStatus;
    use anyhow::bail;
    use async_trait::async_trait;
    use serde_json::json;

    struct Step {
        id: i64,
        fail: bool,
    }

    #[async_trait]
    impl Migration for Step {
        fn id(&self) -> i64 {
            self.id
        }

        fn name(&self) -> &str {
            "Step"
        }

        async fn up(&self, ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
            let document = json!({"step": self.id}).as_object().cloned().unwrap_or_default();
            ctx.insert_one("steps", document).await?;
            if self.fail {
                bail!("step {} failed", self.id);
            }
            Ok(())
        }
    }

    fn engine(memory: &MemoryClient, steps: &[(i64, bool)]) -> MigrationEngine {
        let registry = steps.iter().fold(MigrationRegistry::new(), |registry, &(id, fail)| {
            registry.with(Step { id, fail })
        });
        let client: Arc<dyn DocumentClient> = Arc::new(memory.clone());
        MigrationEngine::new(client, "app", registry.catalog("").unwrap())
    }

    #[tokio::test]
    async fn test_run_applies_in_order() {
        let memory = MemoryClient::new();
        let engine = engine(&memory, &[(2, false), (1, false)]);

        let result = engine.run().await.unwrap();
        assert_eq!(result.applied_migrations, vec![1, 2]);
        assert_eq!(result.skipped_count, 0);
        assert!(result.batch_id.is_some());

        let steps: Vec<_> = memory.documents("app", "steps").iter().map(|d| d["step"].clone()).collect();
        assert_eq!(steps, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_second_run_writes_nothing() {
        let memory = MemoryClient::new();
        let engine = engine(&memory, &[(1, false)]);
        engine.run().await.unwrap();
        let writes = memory.write_count();

        let result = engine.run().await.unwrap();
        assert_eq!(result.applied_count, 0);
        assert_eq!(result.skipped_count, 1);
        assert!(result.batch_id.is_none());
        assert_eq!(memory.write_count(), writes);
    }

    #[tokio::test]
    async fn test_failure_recorded_and_halts() {
        let memory = MemoryClient::new();
        let engine = engine(&memory, &[(1, false), (2, true), (3, false)]);

        let err = engine.run().await.unwrap_err();
        match err {
            MigrateError::MigrationFailed { id, detail, .. } => {
                assert_eq!(id, 2);
                assert!(detail.contains("step 2 failed"));
            }
            other => panic!("unexpected error: {}", other),
        }

        let records = engine.state().records().await.unwrap();
        let summary: Vec<_> = records.iter().map(|r| (r.migration_id, r.status)).collect();
        assert_eq!(
            summary,
            vec![(1, ExecutionStatus::Success), (2, ExecutionStatus::Failure)]
        );
        // The failed step's insert was rolled back with its transaction.
        assert_eq!(memory.documents("app", "steps").len(), 1);

        assert!(engine.run().await.unwrap_err().is_blocked());
    }

    #[tokio::test]
    async fn test_commit_failure_marks_record_failed() {
        let memory = MemoryClient::new();
        let engine = engine(&memory, &[(1, false)]);
        memory.fail_once(FailPoint::CommitTransaction);

        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, MigrateError::Driver(_)));

        let records = engine.state().blocking_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ExecutionStatus::Failure);
        assert!(memory.documents("app", "steps").is_empty());
    }

    #[tokio::test]
    async fn test_start_session_failure_writes_no_record() {
        let memory = MemoryClient::new();
        let engine = engine(&memory, &[(1, false)]);
        memory.fail_once(FailPoint::StartSession);

        assert!(matches!(engine.run().await, Err(MigrateError::Driver(_))));
        assert!(engine.state().records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_and_resolve_blocked() {
        let memory = MemoryClient::new();
        let engine = engine(&memory, &[(1, false), (2, true)]);
        let _ = engine.run().await;

        let status = engine.status().await.unwrap();
        assert!(matches!(status[0].status, MigrationStatus::Applied { .. }));
        assert!(matches!(status[1].status, MigrationStatus::Failed { .. }));

        assert_eq!(engine.resolve_blocked(2).await.unwrap(), 1);
        let status = engine.status().await.unwrap();
        assert_eq!(status[1].status, MigrationStatus::Pending);

        // Unblocked, so the next run attempts migration 2 again.
        assert!(matches!(
            engine.run().await,
            Err(MigrateError::MigrationFailed { id: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_custom_state_collection() {
        let memory = MemoryClient::new();
        let engine = engine(&memory, &[(1, false)]).with_state_collection("MongrationState");
        engine.run().await.unwrap();

        assert_eq!(memory.documents("app", "MongrationState").len(), 1);
        assert!(memory.documents("app", DEFAULT_STATE_COLLECTION).is_empty());

        let applied = memory.documents("app", "MongrationState");
        assert!(Filter::eq("status", "Success").matches(&applied[0]));
    }
}
