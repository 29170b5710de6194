//! # tidemark
//!
//! Forward-only migrations for document databases. Register migration units,
//! describe the modules in a [`MigratorConfig`], and run them:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidemark::prelude::*;
//!
//! struct CreateCollections;
//!
//! #[async_trait]
//! impl Migration for CreateCollections {
//!     fn id(&self) -> i64 { 1 }
//!     fn name(&self) -> &str { "CreateCollections" }
//!
//!     async fn up(&self, ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
//!         ctx.insert_one("settings", Document::new()).await?;
//!         Ok(())
//!     }
//! }
//!
//! # async fn demo() -> MigrateResult<()> {
//! let registry = MigrationRegistry::new().with(CreateCollections);
//! let client: Arc<dyn DocumentClient> = Arc::new(MemoryClient::new());
//! tidemark::run_migrations(client, &registry, &MigratorConfig::new("app")).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

// Re-export all sub-packages as modules
pub use tidemark_core as core;
pub use tidemark_migrate as migrate;

pub use tidemark_core::{
    init_logging, ConfigError, LoggingConfig, MigratorConfig, ModuleConfig, TransactionMode,
};
pub use tidemark_migrate::{
    CatalogError, DocumentClient, MigrateError, MigrateResult, Migration, MigrationContext,
    MigrationEngine, MigrationOrchestrator, MigrationRegistry, OrchestratorReport,
};

// Prelude module for convenient imports
pub mod prelude;

/// Current version of tidemark
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build an orchestrator for `config` and run every module
pub async fn run_migrations(
    client: Arc<dyn DocumentClient>,
    registry: &MigrationRegistry,
    config: &MigratorConfig,
) -> MigrateResult<OrchestratorReport> {
    tracing::info!(
        database = %config.database,
        modules = config.modules.len(),
        "tidemark {} starting migrations",
        VERSION
    );
    for (setting, source) in config.config_sources() {
        tracing::debug!(setting = %setting, source = %source, "Configuration source");
    }
    MigrationOrchestrator::new(client, registry, config)?.run().await
}

/// Connect to MongoDB using the configured connection string
#[cfg(feature = "mongodb")]
pub async fn connect(config: &MigratorConfig) -> MigrateResult<Arc<dyn DocumentClient>> {
    let uri = config.connection_uri.as_deref().ok_or_else(|| {
        ConfigError::missing_required(
            "connection_uri",
            "set it in the configuration file or the TIDEMARK_URI environment variable",
        )
    })?;
    let client = tidemark_migrate::MongoClient::connect(uri).await?;
    Ok(Arc::new(client))
}
