//! # tidemark-testing - Migration Testing Utilities
//!
//! Helpers for exercising migrations against the in-memory backend:
//!
//! - **Harness**: a memory client, a registry and a configuration in one place
//! - **Scripted migrations**: units whose behavior is described as data
//! - **State assertions**: checks over the records in the state collection
//!
//! ```rust,no_run
//! use tidemark_testing::prelude::*;
//!
//! # async fn demo() -> TestResult<()> {
//! let harness = TestHarness::new()
//!     .with_migration(ScriptedMigration::new(1, "CreateCollections"))
//!     .with_migration(ScriptedMigration::new(2, "CreateIndexes").fails_with("index build failed"));
//!
//! assert!(harness.run().await.is_err());
//! let records = harness.records();
//! assert_record_status(&records, "", 1, ExecutionStatus::Success)?;
//! assert_record_status(&records, "", 2, ExecutionStatus::Failure)?;
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod harness;
pub mod migrations;

pub use assertions::{assert_no_record, assert_record_status, record_count};
pub use harness::TestHarness;
pub use migrations::{ExecutionLog, RecordingMigration, ScriptedMigration, Step};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        assert_no_record, assert_record_status, record_count, utils, ExecutionLog,
        RecordingMigration, ScriptedMigration, Step, TestError, TestHarness, TestResult,
    };

    pub use serde_json::{json, Value as JsonValue};
    pub use tidemark_core::{MigratorConfig, ModuleConfig, TransactionMode};
    pub use tidemark_migrate::{
        ExecutionRecord, ExecutionStatus, FailPoint, Filter, MemoryClient, MigrateError,
        MigrationRollback, MigrationStatus,
    };
    pub use uuid::Uuid;
}

#[derive(thiserror::Error, Debug)]
pub enum TestError {
    #[error("Migration error: {0}")]
    Migrate(#[from] tidemark_migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Assertion failed: {message}")]
    Assertion { message: String },

    #[error("Test setup error: {0}")]
    Setup(String),
}

pub type TestResult<T> = Result<T, TestError>;

/// Test utilities and helper functions
pub mod utils {
    use tidemark_migrate::Document;

    /// Unique name with the given prefix, for databases and collections
    pub fn unique_name(prefix: &str) -> String {
        format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
    }

    /// Convert a `json!` object literal into a document
    pub fn document(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Document::new(),
        }
    }
}
