//! Error types for the migration engine

use thiserror::Error;

use crate::backends::DriverError;
use tidemark_core::ConfigError;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Errors raised while building or running migrations
#[derive(Debug, Error)]
pub enum MigrateError {
    /// An unresolved Running/Failure record prevents new attempts
    #[error("Namespace '{namespace}' is blocked by unresolved migrations: {}", .migrations.join(", "))]
    Blocked {
        namespace: String,
        migrations: Vec<String>,
    },

    /// A migration body returned an error
    #[error("Migration {id} ({name}) in namespace '{namespace}' failed: {detail}")]
    MigrationFailed {
        namespace: String,
        id: i64,
        name: String,
        detail: String,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl MigrateError {
    /// Whether operator action is needed before migrations can run again
    pub fn is_blocked(&self) -> bool {
        matches!(self, MigrateError::Blocked { .. })
    }

    /// Build the blocked error from `(id, name)` pairs
    pub fn blocked<'a>(
        namespace: impl Into<String>,
        offenders: impl IntoIterator<Item = (i64, &'a str)>,
    ) -> Self {
        MigrateError::Blocked {
            namespace: namespace.into(),
            migrations: offenders
                .into_iter()
                .map(|(id, name)| format!("{} ({})", id, name))
                .collect(),
        }
    }
}

/// Problems with the registered set of migrations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Duplicate migration id {id} in namespace '{namespace}': '{first}' and '{second}'")]
    DuplicateId {
        namespace: String,
        id: i64,
        first: String,
        second: String,
    },

    #[error("Migration '{name}' has non-positive id {id}")]
    InvalidId { name: String, id: i64 },

    #[error("Migration {id} has an empty name")]
    EmptyName { id: i64 },

    #[error("Migration {id} recorded in namespace '{namespace}' is not registered")]
    Missing { namespace: String, id: i64 },
}
