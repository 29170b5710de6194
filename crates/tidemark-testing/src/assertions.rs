//! Assertions over execution records.

use tidemark_migrate::{ExecutionRecord, ExecutionStatus};

use crate::{TestError, TestResult};

fn matching<'a>(
    records: &'a [ExecutionRecord],
    namespace: &'a str,
    migration_id: i64,
) -> impl Iterator<Item = &'a ExecutionRecord> {
    records
        .iter()
        .filter(move |record| record.module_namespace == namespace && record.migration_id == migration_id)
}

/// Number of records for one migration in one namespace
pub fn record_count(records: &[ExecutionRecord], namespace: &str, migration_id: i64) -> usize {
    matching(records, namespace, migration_id).count()
}

/// Assert that exactly one record exists for the migration and it has `expected` status
pub fn assert_record_status(
    records: &[ExecutionRecord],
    namespace: &str,
    migration_id: i64,
    expected: ExecutionStatus,
) -> TestResult<()> {
    let found: Vec<_> = matching(records, namespace, migration_id).collect();

    match found.as_slice() {
        [record] if record.status == expected => Ok(()),
        [record] => Err(TestError::Assertion {
            message: format!(
                "Migration {} in '{}' has status {}, expected {} (detail: {})",
                migration_id,
                namespace,
                record.status,
                expected,
                record.error_detail.as_deref().unwrap_or("none")
            ),
        }),
        [] => Err(TestError::Assertion {
            message: format!("No record for migration {} in '{}'", migration_id, namespace),
        }),
        many => Err(TestError::Assertion {
            message: format!(
                "Expected one record for migration {} in '{}', found {}",
                migration_id,
                namespace,
                many.len()
            ),
        }),
    }
}

pub fn assert_no_record(records: &[ExecutionRecord], namespace: &str, migration_id: i64) -> TestResult<()> {
    let count = record_count(records, namespace, migration_id);
    if count > 0 {
        return Err(TestError::Assertion {
            message: format!(
                "Expected no record for migration {} in '{}', found {}",
                migration_id, namespace, count
            ),
        });
    }
    Ok(())
}
