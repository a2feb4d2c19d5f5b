//! Single-event scenarios through the processor.

use crate::common::*;
use reverse_core::{ModType, OverrideMap, ReplicationError};
use reverse_sync::{ProcessOutcome, ProcessingState};
use serde_json::json;
use watermark::WatermarkPosition;

#[tokio::test]
async fn test_shard_a_child11_insert_then_old_update_dropped() {
    let h = Harness::new();

    let insert = child_event(ModType::Insert, "2024-12-01T10:15:30Z", "fresh");
    let outcome = h.processor.process(&insert).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Applied {
            position: WatermarkPosition::new(ts("2024-12-01T10:15:30Z"), 0)
        }
    );

    let row = h.shard_a.row("child11", &child_keys(42, 42)).unwrap();
    assert_eq!(row.get("child_id"), Some(&json!("42")));
    assert_eq!(row.get("parent_id"), Some(&json!("42")));
    assert_eq!(row.get("note"), Some(&json!("fresh")));
    // Migration-only column never reaches the source.
    assert!(!row.contains("migration_shard_id"));
    assert_eq!(h.shard_b.attempts(), 0);
    assert_eq!(
        h.child_watermark(42, 42).await,
        Some(WatermarkPosition::new(ts("2024-12-01T10:15:30Z"), 0))
    );

    let stale = child_event(ModType::Update, "2020-01-01T00:00:00Z", "stale");
    let outcome = h.processor.process(&stale).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::StaleDropped { .. }));

    assert_eq!(note_of(&h.shard_a, 42, 42), Some(json!("fresh")));
    assert_eq!(h.shard_a.writes().len(), 1);
    assert_eq!(
        h.child_watermark(42, 42).await,
        Some(WatermarkPosition::new(ts("2024-12-01T10:15:30Z"), 0))
    );

    let snapshot = h.processor.metrics().snapshot();
    assert_eq!(snapshot.records_processed, 1);
    assert_eq!(snapshot.stale_dropped, 1);
    assert_eq!(snapshot.replication_lag_ms.count, 1);
}

#[tokio::test]
async fn test_replay_is_idempotent() {
    let h = Harness::new();
    let event = child_event(ModType::Insert, "2024-12-01T10:15:30Z", "once");

    for _ in 0..3 {
        tokio_test::assert_ok!(h.processor.process(&event).await);
    }

    assert_eq!(h.shard_a.writes().len(), 1);
    assert_eq!(h.shard_a.row_count("child11"), 1);
    assert_eq!(note_of(&h.shard_a, 42, 42), Some(json!("once")));
    assert_eq!(h.processor.metrics().snapshot().stale_dropped, 2);
}

#[tokio::test]
async fn test_delete_of_absent_row_succeeds() {
    let h = Harness::new();
    let delete = child_event(ModType::Delete, "2024-12-01T10:15:30Z", "");

    let outcome = h.processor.process(&delete).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Applied { .. }));
    assert_eq!(h.shard_a.row_count("child11"), 0);
    assert!(h.child_watermark(42, 42).await.is_some());
}

#[tokio::test]
async fn test_same_timestamp_later_sequence_applies() {
    let h = Harness::new();
    let mut first = child_event(ModType::Insert, "2024-12-01T10:15:30Z", "first");
    first.record_sequence = 1;
    let mut second = child_event(ModType::Update, "2024-12-01T10:15:30Z", "second");
    second.record_sequence = 2;

    h.processor.process(&first).await.unwrap();
    let outcome = h.processor.process(&second).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Applied { .. }));
    assert_eq!(note_of(&h.shard_a, 42, 42), Some(json!("second")));

    // And the earlier record of the transaction is now stale.
    let outcome = h.processor.process(&first).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::StaleDropped { .. }));
}

#[tokio::test]
async fn test_routes_by_shard_id() {
    let h = Harness::new();
    let mut event = child_event(ModType::Insert, "2024-12-01T10:15:30Z", "b-side");
    event.shard_id = "shardB".to_string();

    h.processor.process(&event).await.unwrap();
    assert_eq!(h.shard_a.attempts(), 0);
    assert_eq!(note_of(&h.shard_b, 42, 42), Some(json!("b-side")));
}

#[tokio::test]
async fn test_unknown_shard_is_surfaced() {
    let h = Harness::new();
    let mut event = child_event(ModType::Insert, "2024-12-01T10:15:30Z", "lost");
    event.shard_id = "shardZ".to_string();

    let failure = h.processor.process(&event).await.unwrap_err();
    assert_eq!(failure.state, ProcessingState::Checked);
    assert_eq!(failure.error, ReplicationError::UnknownShard("shardZ".into()));
    assert!(!failure.is_retryable());
    assert_eq!(failure.event.shard_id, "shardZ");

    assert_eq!(h.shard_a.attempts() + h.shard_b.attempts(), 0);
    assert!(h.store.is_empty().await);
    assert_eq!(h.processor.metrics().snapshot().failed, 1);
}

#[tokio::test]
async fn test_synthetic_key_written_from_row_uuid() {
    let h = Harness::new();
    let mut event = child_event(ModType::Insert, "2024-12-01T10:15:30Z", "");
    event.table_name = "events".to_string();
    event.keys = [("synth_id", json!("s-1"))].into_iter().collect();
    event.new_values = Some([("payload", json!({"k": 1}))].into_iter().collect());
    event.row_uuid = Some("5f0c6a3e-6f35-4a8b-9f5c-2f4a0c1d9e11".to_string());

    h.processor.process(&event).await.unwrap();

    let writes = h.shard_a.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].table, "events");
    assert_eq!(
        writes[0].keys.get("row_uuid"),
        Some(&json!("5f0c6a3e-6f35-4a8b-9f5c-2f4a0c1d9e11"))
    );
}

#[tokio::test]
async fn test_missing_synthetic_key_column_fails_fast() {
    let h = Harness::new();
    let mut event = child_event(ModType::Insert, "2024-12-01T10:15:30Z", "");
    event.table_name = "broken".to_string();
    event.keys = [("id", json!("1"))].into_iter().collect();
    event.new_values = None;

    let failure = h.processor.process(&event).await.unwrap_err();
    assert_eq!(failure.state, ProcessingState::Received);
    assert_eq!(
        failure.error,
        ReplicationError::MissingSyntheticKeyColumn {
            table_id: "t3".into(),
            column_id: "b9".into()
        }
    );
    assert_eq!(h.shard_a.attempts(), 0);
}

#[tokio::test]
async fn test_unknown_table_fails_without_side_effects() {
    let h = Harness::new();
    let mut event = child_event(ModType::Insert, "2024-12-01T10:15:30Z", "");
    event.table_name = "ghost".to_string();

    let failure = h.processor.process(&event).await.unwrap_err();
    assert_eq!(failure.error, ReplicationError::UnknownTable("ghost".into()));
    assert!(h.store.is_empty().await);
    assert_eq!(h.shard_a.attempts(), 0);
}

#[tokio::test]
async fn test_overrides_rename_table_and_column() {
    let overrides = OverrideMap::from_json_str(
        r#"{"renamedTables":{"child11":"kids"},"renamedColumns":{"child11":{"note":"remark"}}}"#,
    )
    .unwrap();
    let h = Harness::with(fast_settings(), Some(overrides));

    h.processor
        .process(&child_event(ModType::Insert, "2024-12-01T10:15:30Z", "hi"))
        .await
        .unwrap();

    assert_eq!(h.shard_a.row_count("child11"), 0);
    let row = h.shard_a.row("kids", &child_keys(42, 42)).unwrap();
    assert_eq!(row.get("remark"), Some(&json!("hi")));
    assert!(!row.contains("note"));
    // The watermark stays keyed by the migrated table.
    assert!(h.child_watermark(42, 42).await.is_some());
}

#[tokio::test]
async fn test_uncoercible_value_is_malformed() {
    let h = Harness::new();
    let mut event = child_event(ModType::Insert, "2024-12-01T10:15:30Z", "x");
    event.keys = [
        ("child_id", json!("forty-two")),
        ("parent_id", json!("42")),
    ]
    .into_iter()
    .collect();

    let failure = h.processor.process(&event).await.unwrap_err();
    assert!(matches!(failure.error, ReplicationError::MalformedData(_)));
    assert!(!failure.is_retryable());
    assert!(h.store.is_empty().await);
}
