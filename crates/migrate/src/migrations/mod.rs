//! Migration System
//!
//! Catalog construction, execution state, the per-namespace engine and the
//! module orchestrator.

pub mod catalog;
pub mod context;
pub mod definitions;
pub mod orchestrator;
pub mod rollback;
pub mod runner;
pub mod state;

pub use catalog::{MigrationCatalog, MigrationRegistry};
pub use context::MigrationContext;
pub use definitions::{
    ExecutionRecord, ExecutionStatus, Migration, MigrationRunResult, MigrationStatus,
    MigrationStatusEntry, RollbackResult, UnitOutcome,
};
pub use orchestrator::{MigrationOrchestrator, ModuleStatus, OrchestratorReport, DEFAULT_MODULE};
pub use rollback::MigrationRollback;
pub use runner::MigrationEngine;
pub use state::StateStore;
