use std::time::Duration;

use serde_json::json;
use tidemark_testing::prelude::*;

fn partial_then_fail() -> ScriptedMigration {
    ScriptedMigration::new(1, "PartialWrite")
        .inserts("accounts", json!({"owner": "alice"}))
        .fails_with("validation failed after first write")
}

#[tokio::test]
async fn test_failed_unit_writes_vanish_with_transactions() {
    let harness = TestHarness::new().with_migration(partial_then_fail());

    assert!(harness.run().await.is_err());
    assert!(harness.documents("accounts").is_empty());
    assert_record_status(&harness.records(), "", 1, ExecutionStatus::Failure).unwrap();
}

#[tokio::test]
async fn test_failed_unit_writes_remain_without_transactions() {
    let harness = TestHarness::new()
        .with_migration(partial_then_fail())
        .with_config(|config| config.without_transactions());

    assert!(harness.run().await.is_err());
    assert_eq!(harness.documents("accounts").len(), 1);
    assert_record_status(&harness.records(), "", 1, ExecutionStatus::Failure).unwrap();
}

#[tokio::test]
async fn test_standalone_server_needs_transactions_disabled() {
    let seed = || ScriptedMigration::new(1, "Seed").inserts("settings", json!({"k": "v"}));

    // Transactions stay on unless configured off, even if the server rejects them.
    let misconfigured = TestHarness::with_client(MemoryClient::without_transaction_support()).with_migration(seed());
    let err = misconfigured.run().await.unwrap_err();
    assert!(matches!(err, MigrateError::Driver(_)));
    assert!(misconfigured.records().is_empty());

    let harness = TestHarness::standalone().with_migration(seed());
    harness.run().await.unwrap();
    assert_eq!(harness.documents("settings").len(), 1);
    assert_record_status(&harness.records(), "", 1, ExecutionStatus::Success).unwrap();
}

#[tokio::test]
async fn test_cancelled_run_leaves_running_record() {
    let harness = TestHarness::new()
        .with_migration(ScriptedMigration::new(1, "Quick").inserts("steps", json!({"n": 1})))
        .with_migration(
            ScriptedMigration::new(2, "Slow")
                .inserts("steps", json!({"n": 2}))
                .sleeps(Duration::from_secs(30)),
        );

    let outcome = tokio::time::timeout(Duration::from_millis(200), harness.run()).await;
    assert!(outcome.is_err());

    let records = harness.records();
    assert_record_status(&records, "", 1, ExecutionStatus::Success).unwrap();
    assert_record_status(&records, "", 2, ExecutionStatus::Running).unwrap();

    // Dropping the session discarded the in-flight insert.
    assert_eq!(harness.documents("steps").len(), 1);

    let err = harness.run().await.unwrap_err();
    assert!(err.is_blocked());
}

#[tokio::test]
async fn test_state_write_failure_is_driver_error() {
    let harness = TestHarness::new().with_migration(ScriptedMigration::new(1, "Seed"));
    harness.memory().fail_once(FailPoint::Upsert {
        collection: harness.config().state_collection.clone(),
    });

    let err = harness.run().await.unwrap_err();
    assert!(matches!(err, MigrateError::Driver(_)));
    assert!(harness.records().is_empty());

    // Nothing was recorded, so the next run proceeds normally.
    harness.run().await.unwrap();
    assert_record_status(&harness.records(), "", 1, ExecutionStatus::Success).unwrap();
}

#[tokio::test]
async fn test_success_mark_failure_records_failure() {
    let harness = TestHarness::new()
        .with_migration(ScriptedMigration::new(1, "Seed").inserts("settings", json!({"k": "v"})));
    harness.memory().fail_once(FailPoint::Update {
        collection: harness.config().state_collection.clone(),
    });

    let err = harness.run().await.unwrap_err();
    assert!(matches!(err, MigrateError::Driver(_)));
    assert!(harness.documents("settings").is_empty());

    let records = harness.records();
    assert_record_status(&records, "", 1, ExecutionStatus::Failure).unwrap();
    assert!(records[0].error_detail.as_deref().unwrap().contains("Injected failure"));
}
