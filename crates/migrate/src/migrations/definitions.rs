//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the [`Migration`] trait implemented by host code, the execution
//! records persisted in the state collection, and the reports returned to
//! callers.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::MigrationContext;

/// A single forward migration step
#[async_trait]
pub trait Migration: Send + Sync {
    /// Unique, positive id within its catalog; defines execution order
    fn id(&self) -> i64;

    /// Stable human-readable name
    fn name(&self) -> &str;

    /// Declaring namespace, matched against module prefixes
    fn namespace(&self) -> &str {
        ""
    }

    /// Apply the migration using the session bound into `ctx`
    async fn up(&self, ctx: &mut MigrationContext<'_>) -> anyhow::Result<()>;

    /// Revert the migration. Does nothing unless overridden.
    async fn down(&self, _ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Status of one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Running,
    Success,
    Failure,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Success => "Success",
            ExecutionStatus::Failure => "Failure",
        }
    }

    /// Statuses that block further attempts in a namespace
    pub fn blocking() -> [ExecutionStatus; 2] {
        [ExecutionStatus::Running, ExecutionStatus::Failure]
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution record stored in the state collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    #[serde(rename = "_id")]
    pub record_id: String,
    pub migration_id: i64,
    pub migration_name: String,
    #[serde(default)]
    pub module_namespace: String,
    pub batch_id: Uuid,
    pub status: ExecutionStatus,
    /// Time of the last status transition
    pub executed_at: DateTime<Utc>,
    #[serde(default)]
    pub error_detail: Option<String>,
    #[serde(default)]
    pub is_rollback: bool,
}

impl ExecutionRecord {
    /// Whether this record counts the migration as applied
    pub fn is_applied(&self) -> bool {
        self.status == ExecutionStatus::Success && !self.is_rollback
    }

    pub fn is_blocking(&self) -> bool {
        self.status != ExecutionStatus::Success
    }
}

/// Reported state of one catalog migration
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationStatus {
    Pending,
    Applied {
        executed_at: DateTime<Utc>,
        batch_id: Uuid,
    },
    Running,
    Failed { detail: String },
    RolledBack,
}

impl MigrationStatus {
    /// Derive the status from the migration's most recent record
    pub fn from_record(record: Option<&ExecutionRecord>) -> Self {
        let Some(record) = record else {
            return MigrationStatus::Pending;
        };

        match record.status {
            ExecutionStatus::Running => MigrationStatus::Running,
            ExecutionStatus::Failure => MigrationStatus::Failed {
                detail: record.error_detail.clone().unwrap_or_default(),
            },
            ExecutionStatus::Success if record.is_rollback => MigrationStatus::RolledBack,
            ExecutionStatus::Success => MigrationStatus::Applied {
                executed_at: record.executed_at,
                batch_id: record.batch_id,
            },
        }
    }
}

/// One line of a status report
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationStatusEntry {
    pub id: i64,
    pub name: String,
    pub status: MigrationStatus,
}

/// Outcome of applying a single migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Applied,
    Failed { detail: String },
}

/// Result of running migrations
#[derive(Debug, Clone)]
pub struct MigrationRunResult {
    /// Namespace the run was scoped to
    pub namespace: String,
    /// Batch allocated for the run; `None` when nothing was pending
    pub batch_id: Option<Uuid>,
    /// Number of migrations that were applied
    pub applied_count: usize,
    /// IDs of migrations that were applied
    pub applied_migrations: Vec<i64>,
    /// Number of migrations that were skipped (already applied)
    pub skipped_count: usize,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Result of rolling back migrations
#[derive(Debug, Clone)]
pub struct RollbackResult {
    pub namespace: String,
    /// Batch that was reverted; `None` when nothing had been applied
    pub batch_id: Option<Uuid>,
    /// Number of migrations that were rolled back
    pub rolled_back_count: usize,
    /// IDs of migrations that were rolled back, in revert order
    pub rolled_back_migrations: Vec<i64>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(status: ExecutionStatus, is_rollback: bool) -> ExecutionRecord {
        ExecutionRecord {
            record_id: "r1".to_string(),
            migration_id: 1,
            migration_name: "CreateCollections".to_string(),
            module_namespace: String::new(),
            batch_id: Uuid::nil(),
            status,
            executed_at: Utc::now(),
            error_detail: None,
            is_rollback,
        }
    }

    #[test]
    fn test_record_serializes_with_store_id() {
        let value = serde_json::to_value(record(ExecutionStatus::Running, false)).unwrap();

        assert_eq!(value["_id"], json!("r1"));
        assert_eq!(value["status"], json!("Running"));
        assert_eq!(value["batch_id"], json!(Uuid::nil().to_string()));
        assert!(value.get("record_id").is_none());
    }

    #[test]
    fn test_record_tolerates_missing_optional_fields() {
        let parsed: ExecutionRecord = serde_json::from_value(json!({
            "_id": "abc",
            "migration_id": 2,
            "migration_name": "CreateIndexes",
            "batch_id": Uuid::nil(),
            "status": "Failure",
            "executed_at": "2024-01-01T00:00:00Z",
        }))
        .unwrap();

        assert_eq!(parsed.module_namespace, "");
        assert!(!parsed.is_rollback);
        assert!(parsed.is_blocking());
    }

    #[test]
    fn test_status_from_record() {
        assert_eq!(MigrationStatus::from_record(None), MigrationStatus::Pending);
        assert_eq!(
            MigrationStatus::from_record(Some(&record(ExecutionStatus::Running, false))),
            MigrationStatus::Running
        );
        assert_eq!(
            MigrationStatus::from_record(Some(&record(ExecutionStatus::Success, true))),
            MigrationStatus::RolledBack
        );
        assert!(matches!(
            MigrationStatus::from_record(Some(&record(ExecutionStatus::Success, false))),
            MigrationStatus::Applied { .. }
        ));

        let mut failed = record(ExecutionStatus::Failure, false);
        failed.error_detail = Some("index build failed".to_string());
        assert_eq!(
            MigrationStatus::from_record(Some(&failed)),
            MigrationStatus::Failed {
                detail: "index build failed".to_string()
            }
        );
    }

    #[test]
    fn test_applied_excludes_rollbacks() {
        assert!(record(ExecutionStatus::Success, false).is_applied());
        assert!(!record(ExecutionStatus::Success, true).is_applied());
        assert!(!record(ExecutionStatus::Failure, false).is_applied());
    }
}
