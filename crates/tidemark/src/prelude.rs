//! # Prelude
//!
//! ```rust
//! use tidemark::prelude::*;
//! ```

pub use crate::{MigrateError, MigrateResult, MigratorConfig, ModuleConfig, TransactionMode};

pub use tidemark_migrate::{
    Document, DocumentClient, Filter, FindOptions, MemoryClient, Migration, MigrationContext,
    MigrationEngine, MigrationOrchestrator, MigrationRegistry, MigrationRollback, MigrationStatus,
    SortOrder,
};

// JSON helper
pub use serde_json::json;

// Async traits
pub use async_trait::async_trait;
