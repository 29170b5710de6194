//! Migration Rollback - Reverts the most recent batch
//!
//! Each migration of the batch is reverted with its `down` in its own
//! transactional session, highest id first. The execution record is reused:
//! it is flagged `is_rollback` and walks through Running to Success or
//! Failure, so a reverted migration no longer counts as applied.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::context::MigrationContext;
use super::definitions::{ExecutionRecord, Migration, RollbackResult, UnitOutcome};
use super::runner::MigrationEngine;
use crate::error::{CatalogError, MigrateError, MigrateResult};
use crate::transaction::TransactionalSession;

/// Extension trait for MigrationEngine to add rollback functionality
#[async_trait]
pub trait MigrationRollback {
    /// Revert every migration applied by the latest batch
    async fn rollback_last_batch(&self) -> MigrateResult<RollbackResult>;
}

#[async_trait]
impl MigrationRollback for MigrationEngine {
    async fn rollback_last_batch(&self) -> MigrateResult<RollbackResult> {
        let start_time = Instant::now();
        let namespace = self.namespace().to_string();

        self.ensure_unblocked().await?;

        let Some(latest) = self.state.latest_applied().await? else {
            info!(namespace = %namespace, "Nothing to roll back");
            return Ok(RollbackResult {
                namespace,
                batch_id: None,
                rolled_back_count: 0,
                rolled_back_migrations: Vec::new(),
                execution_time_ms: start_time.elapsed().as_millis(),
            });
        };

        let batch_id = latest.batch_id;
        let records = self.state.applied_in_batch(batch_id).await?;

        // Resolve every unit up front so a missing one aborts before any revert.
        let mut plan = Vec::with_capacity(records.len());
        for record in records {
            let migration = self.catalog.get(record.migration_id).cloned().ok_or_else(|| {
                CatalogError::Missing {
                    namespace: namespace.clone(),
                    id: record.migration_id,
                }
            })?;
            plan.push((record, migration));
        }

        info!(
            namespace = %namespace,
            batch_id = %batch_id,
            migrations = plan.len(),
            "Rolling back migration batch"
        );

        let mut rolled_back_migrations = Vec::new();
        for (record, migration) in &plan {
            match self.revert_migration(migration.as_ref(), record).await? {
                UnitOutcome::Applied => rolled_back_migrations.push(migration.id()),
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

        Ok(RollbackResult {
            namespace,
            batch_id: Some(batch_id),
            rolled_back_count: rolled_back_migrations.len(),
            rolled_back_migrations,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }
}

impl MigrationEngine {
    async fn revert_migration(
        &self,
        migration: &dyn Migration,
        record: &ExecutionRecord,
    ) -> MigrateResult<UnitOutcome> {
        info!(
            namespace = %self.namespace(),
            migration_id = migration.id(),
            batch_id = %record.batch_id,
            "Rolling back migration: {}",
            migration.name()
        );

        let mut session = TransactionalSession::new(self.client.clone(), self.mode);
        session.start().await?;
        session.begin().await?;

        self.state.mark_rollback_running(&record.record_id).await?;

        let result = {
            let mut ctx = MigrationContext::new(
                &self.client,
                self.database.clone(),
                self.namespace(),
                record.batch_id,
                &mut session,
            );
            migration.down(&mut ctx).await
        };

        if let Err(err) = result {
            let detail = format!("{:#}", err);
            error!(
                namespace = %self.namespace(),
                migration_id = migration.id(),
                "Rollback failed: {}",
                detail
            );
            if let Err(abort_err) = session.abort().await {
                warn!(migration_id = migration.id(), "Failed to abort transaction: {}", abort_err);
            }
            self.state.mark_failed(&record.record_id, &detail).await?;
            return Ok(UnitOutcome::Failed { detail });
        }

        let finished = match self
            .state
            .mark_succeeded(&record.record_id, session.session())
            .await
        {
            Ok(()) => session.commit().await.map_err(MigrateError::from),
            Err(err) => Err(err),
        };

        if let Err(err) = finished {
            if session.is_active() {
                if let Err(abort_err) = session.abort().await {
                    warn!(migration_id = migration.id(), "Failed to abort transaction: {}", abort_err);
                }
            }
            if let Err(mark_err) = self.state.mark_failed(&record.record_id, &err.to_string()).await {
                warn!(migration_id = migration.id(), "Could not record failure: {}", mark_err);
            }
            return Err(err);
        }

        info!(
            namespace = %self.namespace(),
            migration_id = migration.id(),
            "Rolled back migration: {}",
            migration.name()
        );
        Ok(UnitOutcome::Applied)
    }
}
