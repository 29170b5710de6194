use serde_json::json;
use tidemark_migrate::{ExecutionStatus, MigrateError};
use tidemark_testing::prelude::*;

fn create_collections() -> ScriptedMigration {
    ScriptedMigration::new(1, "CreateCollections").inserts("collections", json!({"name": "users"}))
}

fn create_indexes() -> ScriptedMigration {
    ScriptedMigration::new(2, "CreateIndexes")
        .inserts("indexes", json!({"field": "email"}))
        .fails_with("index build failed: duplicate values for email")
}

#[tokio::test]
async fn test_second_run_performs_no_writes() {
    let harness = TestHarness::new()
        .with_migration(create_collections())
        .with_migration(ScriptedMigration::new(2, "SeedSettings").inserts("settings", json!({"k": 1})));

    let first = harness.run().await.unwrap();
    assert_eq!(first.applied_count(), 2);
    let writes = harness.write_count();

    let second = harness.run().await.unwrap();
    assert_eq!(second.applied_count(), 0);
    assert_eq!(second.module("default").unwrap().skipped_count, 2);
    assert_eq!(harness.write_count(), writes);
}

#[tokio::test]
async fn test_failure_halts_remaining_units() {
    let log = ExecutionLog::new();
    let harness = TestHarness::new()
        .with_migration(RecordingMigration::new(1, "First", &log))
        .with_migration(ScriptedMigration::new(2, "Second").fails_with("second failed"))
        .with_migration(RecordingMigration::new(3, "Third", &log));

    let err = harness.run().await.unwrap_err();
    assert!(matches!(err, MigrateError::MigrationFailed { id: 2, .. }));

    let records = harness.records();
    assert_record_status(&records, "", 1, ExecutionStatus::Success).unwrap();
    assert_record_status(&records, "", 2, ExecutionStatus::Failure).unwrap();
    assert_no_record(&records, "", 3).unwrap();
    assert_eq!(log.entries(), vec!["up:1".to_string()]);

    assert!(harness.run().await.unwrap_err().is_blocked());
}

#[tokio::test]
async fn test_existing_failure_blocks_without_writes() {
    let harness = TestHarness::new().with_migration(ScriptedMigration::new(1, "Broken").fails_with("boom"));
    let _ = harness.run().await;
    let writes = harness.write_count();
    let records_before = harness.records();

    let err = harness.run().await.unwrap_err();
    match &err {
        MigrateError::Blocked { namespace, migrations } => {
            assert_eq!(namespace, "");
            assert_eq!(migrations, &vec!["1 (Broken)".to_string()]);
        }
        other => panic!("expected blocked error, got {}", other),
    }

    assert_eq!(harness.write_count(), writes);
    assert_eq!(harness.records(), records_before);
}

#[tokio::test]
async fn test_create_collections_then_failing_indexes() {
    let harness = TestHarness::new()
        .with_migration(create_indexes())
        .with_migration(create_collections());

    let err = harness.run().await.unwrap_err();
    assert!(err.to_string().contains("index build failed"));

    let records = harness.records();
    assert_record_status(&records, "", 1, ExecutionStatus::Success).unwrap();
    assert_record_status(&records, "", 2, ExecutionStatus::Failure).unwrap();
    let failed = records.iter().find(|record| record.migration_id == 2).unwrap();
    assert!(failed
        .error_detail
        .as_deref()
        .unwrap()
        .contains("duplicate values for email"));
    assert_eq!(failed.migration_name, "CreateIndexes");
    assert_eq!(failed.batch_id, records[0].batch_id);

    // The failed unit's insert went away with its transaction.
    assert_eq!(harness.documents("collections").len(), 1);
    assert!(harness.documents("indexes").is_empty());

    let second = harness.run().await.unwrap_err();
    assert!(second.is_blocked());
    assert_eq!(harness.documents("collections").len(), 1);
    assert_eq!(record_count(&harness.records(), "", 1), 1);
}

#[tokio::test]
async fn test_operator_resolution_allows_retry() {
    let harness = TestHarness::new()
        .with_migration(create_collections())
        .with_migration(ScriptedMigration::new(2, "Flaky").fails_with("transient"));
    let _ = harness.run().await;

    let engine = harness.engine("").unwrap();
    assert_eq!(engine.resolve_blocked(2).await.unwrap(), 1);
    assert_no_record(&harness.records(), "", 2).unwrap();

    // Still failing, but the run got past the guard and did not repeat unit 1.
    let err = harness.run().await.unwrap_err();
    assert!(matches!(err, MigrateError::MigrationFailed { id: 2, .. }));
    assert_eq!(harness.documents("collections").len(), 1);
}

#[tokio::test]
async fn test_new_units_run_in_fresh_batch() {
    let harness = TestHarness::new().with_migration(create_collections());
    let first = harness.run().await.unwrap();

    let harness = TestHarness::with_client(harness.memory().clone())
        .with_migration(create_collections())
        .with_migration(ScriptedMigration::new(2, "AddSettings").inserts("settings", json!({})));
    let second = harness.run().await.unwrap();

    let first_batch = first.module("default").unwrap().batch_id.unwrap();
    let second_batch = second.module("default").unwrap().batch_id.unwrap();
    assert_ne!(first_batch, second_batch);
    assert_eq!(second.module("default").unwrap().applied_migrations, vec![2]);

    let records = harness.records();
    assert_eq!(records[0].batch_id, first_batch);
    assert_eq!(records[1].batch_id, second_batch);
}
