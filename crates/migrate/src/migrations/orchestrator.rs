//! Runs one engine per configured module.

use std::sync::Arc;

use tidemark_core::MigratorConfig;
use tracing::{error, info};

use super::catalog::MigrationRegistry;
use super::definitions::{MigrationRunResult, MigrationStatusEntry};
use super::runner::MigrationEngine;
use crate::backends::DocumentClient;
use crate::error::MigrateResult;

/// Name reported for the single engine of a non-modular configuration
pub const DEFAULT_MODULE: &str = "default";

/// Per-module results of an orchestrated run, in configuration order
#[derive(Debug, Clone, Default)]
pub struct OrchestratorReport {
    pub modules: Vec<(String, MigrationRunResult)>,
}

impl OrchestratorReport {
    pub fn applied_count(&self) -> usize {
        self.modules.iter().map(|(_, result)| result.applied_count).sum()
    }

    pub fn module(&self, name: &str) -> Option<&MigrationRunResult> {
        self.modules
            .iter()
            .find(|(module, _)| module == name)
            .map(|(_, result)| result)
    }
}

/// Status of one module's catalog
#[derive(Debug, Clone)]
pub struct ModuleStatus {
    pub module: String,
    pub namespace: String,
    pub migrations: Vec<MigrationStatusEntry>,
}

/// Entry point for hosts: one engine per module, run sequentially
pub struct MigrationOrchestrator {
    engines: Vec<(String, MigrationEngine)>,
}

impl MigrationOrchestrator {
    /// Validate configuration and catalogs before touching the database
    pub fn new(
        client: Arc<dyn DocumentClient>,
        registry: &MigrationRegistry,
        config: &MigratorConfig,
    ) -> MigrateResult<Self> {
        config.validate()?;
        registry.validate()?;

        let mut engines = Vec::new();
        if config.is_modular() {
            for module in &config.modules {
                let catalog = registry.catalog(&module.namespace)?;
                let engine = MigrationEngine::new(client.clone(), config.module_database(module), catalog)
                    .with_state_collection(&config.state_collection)
                    .with_transactions(config.transactions);
                engines.push((module.name.clone(), engine));
            }
        } else {
            let catalog = registry.catalog(config.namespace.as_deref().unwrap_or(""))?;
            let engine = MigrationEngine::new(client, &config.database, catalog)
                .with_state_collection(&config.state_collection)
                .with_transactions(config.transactions);
            engines.push((DEFAULT_MODULE.to_string(), engine));
        }

        Ok(Self { engines })
    }

    pub fn engines(&self) -> impl Iterator<Item = (&str, &MigrationEngine)> {
        self.engines.iter().map(|(name, engine)| (name.as_str(), engine))
    }

    pub fn engine(&self, module: &str) -> Option<&MigrationEngine> {
        self.engines()
            .find(|(name, _)| *name == module)
            .map(|(_, engine)| engine)
    }

    /// Run every module in order, stopping at the first error
    pub async fn run(&self) -> MigrateResult<OrchestratorReport> {
        let mut report = OrchestratorReport::default();

        for (module, engine) in &self.engines {
            info!(module = %module, namespace = %engine.namespace(), "Running module migrations");
            match engine.run().await {
                Ok(result) => report.modules.push((module.clone(), result)),
                Err(err) => {
                    error!(module = %module, "Module migrations failed: {}", err);
                    return Err(err);
                }
            }
        }

        info!(
            modules = report.modules.len(),
            applied = report.applied_count(),
            "Migrations complete"
        );
        Ok(report)
    }

    pub async fn status(&self) -> MigrateResult<Vec<ModuleStatus>> {
        let mut statuses = Vec::with_capacity(self.engines.len());
        for (module, engine) in &self.engines {
            statuses.push(ModuleStatus {
                module: module.clone(),
                namespace: engine.namespace().to_string(),
                migrations: engine.status().await?,
            });
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryClient;
    use crate::error::{CatalogError, MigrateError};
    use crate::migrations::context::MigrationContext;
    use crate::migrations::definitions::{Migration, MigrationStatus};
    use async_trait::async_trait;
    use tidemark_core::ModuleConfig;

    struct Noop {
        id: i64,
        namespace: &'static str,
    }

    #[async_trait]
    impl Migration for Noop {
        fn id(&self) -> i64 {
            self.id
        }

        fn name(&self) -> &str {
            "Noop"
        }

        fn namespace(&self) -> &str {
            self.namespace
        }

        async fn up(&self, _ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn client() -> (MemoryClient, Arc<dyn DocumentClient>) {
        let memory = MemoryClient::new();
        let client: Arc<dyn DocumentClient> = Arc::new(memory.clone());
        (memory, client)
    }

    #[tokio::test]
    async fn test_single_engine_without_modules() {
        let (memory, client) = client();
        let registry = MigrationRegistry::new()
            .with(Noop { id: 1, namespace: "" })
            .with(Noop { id: 2, namespace: "" });

        let orchestrator =
            MigrationOrchestrator::new(client, &registry, &MigratorConfig::new("app")).unwrap();
        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.modules.len(), 1);
        assert_eq!(report.module(DEFAULT_MODULE).unwrap().applied_migrations, vec![1, 2]);
        assert_eq!(memory.documents("app", "migration_state").len(), 2);
    }

    #[tokio::test]
    async fn test_module_database_and_namespace() {
        let (memory, client) = client();
        let registry = MigrationRegistry::new()
            .with(Noop { id: 1, namespace: "billing" })
            .with(Noop { id: 1, namespace: "tenants" });
        let config = MigratorConfig::new("app")
            .with_module(ModuleConfig::new("billing", "billing").with_database("billing_db"))
            .with_module(ModuleConfig::new("tenants", "tenants"));

        let orchestrator = MigrationOrchestrator::new(client, &registry, &config).unwrap();
        orchestrator.run().await.unwrap();

        assert_eq!(memory.documents("billing_db", "migration_state").len(), 1);
        let shared = memory.documents("app", "migration_state");
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0]["module_namespace"], "tenants");

        let statuses = orchestrator.status().await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(statuses
            .iter()
            .all(|module| matches!(module.migrations[0].status, MigrationStatus::Applied { .. })));
    }

    #[test]
    fn test_invalid_inputs_fail_before_running() {
        let (memory, client) = client();

        let bad_config = MigratorConfig::new("");
        let err = MigrationOrchestrator::new(client.clone(), &MigrationRegistry::new(), &bad_config)
            .err()
            .unwrap();
        assert!(matches!(err, MigrateError::Config(_)));

        let duplicate = MigrationRegistry::new()
            .with(Noop { id: 1, namespace: "" })
            .with(Noop { id: 1, namespace: "" });
        let err = MigrationOrchestrator::new(client, &duplicate, &MigratorConfig::new("app"))
            .err()
            .unwrap();
        assert!(matches!(err, MigrateError::Catalog(CatalogError::DuplicateId { .. })));

        assert_eq!(memory.write_count(), 0);
    }
}
