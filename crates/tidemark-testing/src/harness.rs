//! In-memory test harness.

use std::sync::Arc;

use tidemark_core::{MigratorConfig, TransactionMode};
use tidemark_migrate::{
    Document, DocumentClient, ExecutionRecord, MemoryClient, MigrateResult, Migration,
    MigrationEngine, MigrationOrchestrator, MigrationRegistry, OrchestratorReport,
};

use crate::{TestError, TestResult};

/// Default database used by the harness
pub const TEST_DATABASE: &str = "tidemark_test";

/// Memory backend, registered migrations and configuration for one test
pub struct TestHarness {
    memory: MemoryClient,
    registry: MigrationRegistry,
    config: MigratorConfig,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_client(MemoryClient::new())
    }

    /// Harness whose backend rejects transactions, with transactions disabled
    pub fn standalone() -> Self {
        let mut harness = Self::with_client(MemoryClient::without_transaction_support());
        harness.config.transactions = TransactionMode::Disabled;
        harness
    }

    pub fn with_client(memory: MemoryClient) -> Self {
        Self {
            memory,
            registry: MigrationRegistry::new(),
            config: MigratorConfig::new(TEST_DATABASE),
        }
    }

    pub fn with_migration<M: Migration + 'static>(mut self, migration: M) -> Self {
        self.registry = self.registry.with(migration);
        self
    }

    pub fn with_config(mut self, configure: impl FnOnce(MigratorConfig) -> MigratorConfig) -> Self {
        self.config = configure(self.config);
        self
    }

    pub fn memory(&self) -> &MemoryClient {
        &self.memory
    }

    pub fn client(&self) -> Arc<dyn DocumentClient> {
        Arc::new(self.memory.clone())
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> MigrateResult<MigrationOrchestrator> {
        MigrationOrchestrator::new(self.client(), &self.registry, &self.config)
    }

    /// Build a fresh orchestrator and run it
    pub async fn run(&self) -> MigrateResult<OrchestratorReport> {
        self.orchestrator()?.run().await
    }

    /// Engine over the migrations whose namespace starts with `prefix`
    pub fn engine(&self, prefix: &str) -> TestResult<MigrationEngine> {
        let catalog = self
            .registry
            .catalog(prefix)
            .map_err(|e| TestError::Setup(e.to_string()))?;

        Ok(MigrationEngine::new(self.client(), &self.config.database, catalog)
            .with_state_collection(&self.config.state_collection)
            .with_transactions(self.config.transactions))
    }

    /// Committed contents of a collection in the default database
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.memory.documents(&self.config.database, collection)
    }

    /// Execution records in the default database
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records_in(&self.config.database)
    }

    /// Execution records in the given database, ascending by migration id.
    /// Documents that do not parse as records are skipped.
    pub fn records_in(&self, database: &str) -> Vec<ExecutionRecord> {
        let mut records: Vec<ExecutionRecord> = self
            .memory
            .documents(database, &self.config.state_collection)
            .into_iter()
            .filter_map(|document| serde_json::from_value(serde_json::Value::Object(document)).ok())
            .collect();
        records.sort_by_key(|record| record.migration_id);
        records
    }

    pub fn write_count(&self) -> u64 {
        self.memory.write_count()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptedMigration;
    use tidemark_migrate::ExecutionStatus;

    #[tokio::test]
    async fn test_harness_runs_registered_migrations() {
        let harness = TestHarness::new()
            .with_migration(ScriptedMigration::new(1, "Seed").inserts("users", serde_json::json!({"name": "Alice"})));

        let report = harness.run().await.unwrap();
        assert_eq!(report.applied_count(), 1);
        assert_eq!(harness.documents("users").len(), 1);

        let records = harness.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ExecutionStatus::Success);
    }

    #[test]
    fn test_standalone_disables_transactions() {
        let harness = TestHarness::standalone();
        assert_eq!(harness.config().transactions, TransactionMode::Disabled);
    }
}
