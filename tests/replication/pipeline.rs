//! Worker pool, failure policies and shutdown.

use crate::common::*;
use reverse_core::{ChangeEvent, ModType};
use reverse_sync::pipeline::partition;
use reverse_sync::{
    FailurePolicy, JsonlDeadLetterSink, MemoryDeadLetterSink, Pipeline, ProcessingState,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn ghost_event() -> ChangeEvent {
    let mut event = child_event(ModType::Insert, "2024-12-01T10:15:30Z", "boo");
    event.table_name = "ghost".to_string();
    event
}

#[test]
fn test_same_key_same_worker() {
    let h = Harness::new();
    let a = child_event(ModType::Insert, "2024-12-01T10:00:00Z", "a");
    let b = child_event(ModType::Delete, "2024-12-02T10:00:00Z", "");
    for workers in 1..8 {
        let pipeline = Pipeline::new(h.processor.clone(), workers, FailurePolicy::Skip);
        assert_eq!(pipeline.partition(&a), pipeline.partition(&b));
        assert!(pipeline.partition(&a) < workers);
    }
}

/// INT64 keys arrive as JSON strings or numbers; both address one row.
fn numeric_keyed(mut event: ChangeEvent) -> ChangeEvent {
    event.keys = [("child_id", json!(42)), ("parent_id", json!(42))]
        .into_iter()
        .collect();
    event
}

#[test]
fn test_key_encodings_share_a_worker() {
    let h = Harness::new();
    let text = child_event(ModType::Insert, "2024-12-01T10:00:00Z", "a");
    let number = numeric_keyed(child_event(ModType::Update, "2024-12-02T10:00:00Z", "b"));
    assert_eq!(
        h.processor.row_identity(&text),
        h.processor.row_identity(&number)
    );
    for workers in 1..16 {
        let pipeline = Pipeline::new(h.processor.clone(), workers, FailurePolicy::Skip);
        assert_eq!(pipeline.partition(&text), pipeline.partition(&number));
    }
}

#[test]
fn test_partition_is_stable_per_identity() {
    for workers in 1..8 {
        assert_eq!(partition("a[x]", workers), partition("a[x]", workers));
        assert!(partition("a[x]", workers) < workers);
    }
}

#[tokio::test]
async fn test_mixed_key_encodings_converge() {
    let h = Harness::new();
    let mut events = Vec::new();
    for second in (0..6).rev() {
        let stamp = format!("2024-12-01T10:00:{second:02}Z");
        let event = child_event(ModType::Update, &stamp, &stamp);
        events.push(if second % 2 == 0 { numeric_keyed(event) } else { event });
    }

    let pipeline = Pipeline::new(h.processor.clone(), 5, FailurePolicy::FailFast);
    let report = pipeline
        .run(tokio_stream::iter(events), CancellationToken::new())
        .await;

    assert!(report.is_complete());
    assert_eq!(report.applied, 1);
    assert_eq!(report.stale_dropped, 5);
    assert_eq!(h.shard_a.row_count("child11"), 1);
    assert_eq!(note_of(&h.shard_a, 42, 42), Some(json!("2024-12-01T10:00:05Z")));
}

#[tokio::test]
async fn test_pipeline_converges_per_key() {
    let h = Harness::new();
    // Newest first for every key: only the first event per key applies.
    let mut events = Vec::new();
    for second in (0..5).rev() {
        for child in 0..20 {
            let stamp = format!("2024-12-01T10:00:{second:02}Z");
            events.push(child_event_for(child, 7, ModType::Update, &stamp, &stamp));
        }
    }

    let pipeline = Pipeline::new(h.processor.clone(), 4, FailurePolicy::FailFast);
    let report = pipeline
        .run(tokio_stream::iter(events), CancellationToken::new())
        .await;

    assert!(report.is_complete());
    assert_eq!(report.received, 100);
    assert_eq!(report.applied, 20);
    assert_eq!(report.stale_dropped, 80);
    for child in 0..20 {
        assert_eq!(
            note_of(&h.shard_a, child, 7),
            Some(json!("2024-12-01T10:00:04Z"))
        );
    }
    assert!(h.shard_a.is_shut_down());
    assert!(h.shard_b.is_shut_down());
}

#[tokio::test]
async fn test_skip_policy_counts_and_continues() {
    let h = Harness::new();
    let events = vec![
        ghost_event(),
        child_event(ModType::Insert, "2024-12-01T10:15:30Z", "kept"),
    ];

    let pipeline = Pipeline::new(h.processor.clone(), 2, FailurePolicy::Skip);
    let report = pipeline
        .run(tokio_stream::iter(events), CancellationToken::new())
        .await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.applied, 1);
    assert_eq!(report.dead_lettered, 0);
    assert!(report.is_complete());
    tokio_test::assert_ok!(report.into_result());
    assert_eq!(note_of(&h.shard_a, 42, 42), Some(json!("kept")));
}

#[tokio::test]
async fn test_dead_letter_policy_records_failure() {
    let h = Harness::new();
    let dead_letters = Arc::new(MemoryDeadLetterSink::new());
    let events = vec![
        ghost_event(),
        child_event(ModType::Insert, "2024-12-01T10:15:30Z", "kept"),
    ];

    let pipeline = Pipeline::new(h.processor.clone(), 2, FailurePolicy::DeadLetter)
        .with_dead_letter_sink(dead_letters.clone());
    let report = pipeline
        .run(tokio_stream::iter(events), CancellationToken::new())
        .await;

    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.applied, 1);
    let records = dead_letters.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state, ProcessingState::Received);
    assert_eq!(records[0].error_kind, "unknown_table");
    assert_eq!(records[0].event.table_name, "ghost");
    assert_eq!(h.processor.metrics().snapshot().dead_lettered, 1);
}

#[tokio::test]
async fn test_dead_letter_file_written() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new();
    let sink = Arc::new(JsonlDeadLetterSink::open(dir.path()).await.unwrap());

    let pipeline = Pipeline::new(h.processor.clone(), 1, FailurePolicy::DeadLetter)
        .with_dead_letter_sink(sink.clone());
    let report = pipeline
        .run(tokio_stream::iter(vec![ghost_event()]), CancellationToken::new())
        .await;
    assert_eq!(report.dead_lettered, 1);

    let content = std::fs::read_to_string(sink.path()).unwrap();
    let line: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
    assert_eq!(line["error_kind"], "unknown_table");
    assert_eq!(line["event"]["tableName"], "ghost");
}

#[tokio::test]
async fn test_dead_letter_without_sink_halts() {
    let h = Harness::new();
    let events = vec![
        ghost_event(),
        child_event(ModType::Insert, "2024-12-01T10:15:30Z", "late"),
    ];

    let pipeline = Pipeline::new(h.processor.clone(), 1, FailurePolicy::DeadLetter);
    let report = pipeline
        .run(tokio_stream::iter(events), CancellationToken::new())
        .await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.dead_lettered, 0);
    assert!(!report.is_complete());
    assert_eq!(
        report.halted_by.as_ref().map(|f| f.event.table_name.as_str()),
        Some("ghost")
    );
    tokio_test::assert_err!(report.into_result());
    assert!(h.shard_a.is_shut_down());
}

#[tokio::test]
async fn test_fail_fast_halts_and_reports() {
    let h = Harness::new();
    let mut events = vec![ghost_event()];
    for second in 0..10 {
        let stamp = format!("2024-12-01T10:00:{second:02}Z");
        events.push(child_event(ModType::Update, &stamp, &stamp));
    }

    // One worker, so everything after the failure is queued behind it.
    let pipeline = Pipeline::new(h.processor.clone(), 1, FailurePolicy::FailFast);
    let report = pipeline
        .run(tokio_stream::iter(events), CancellationToken::new())
        .await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.applied, 0);
    assert!(!report.is_complete());
    assert_eq!(report.unprocessed, report.received - 1);
    let halted_by = report.halted_by.clone().unwrap();
    assert_eq!(halted_by.event.table_name, "ghost");
    tokio_test::assert_err!(report.into_result());
    assert!(h.shard_a.is_shut_down());
}

#[tokio::test]
async fn test_cancelled_before_start_releases_connections() {
    let h = Harness::new();
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let pipeline = Pipeline::new(h.processor.clone(), 2, FailurePolicy::Skip);
    let report = pipeline
        .run(
            tokio_stream::iter(vec![child_event(
                ModType::Insert,
                "2024-12-01T10:15:30Z",
                "never",
            )]),
            shutdown,
        )
        .await;

    assert_eq!(report.received, 0);
    assert_eq!(h.shard_a.attempts(), 0);
    assert!(h.shard_a.is_shut_down());
    assert!(h.shard_b.is_shut_down());
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_event_finish() {
    let h = Harness::new();
    h.shard_a.set_delay(Some(Duration::from_millis(200)));
    let mut events = Vec::new();
    for second in 0..5 {
        let stamp = format!("2024-12-01T10:00:{second:02}Z");
        events.push(child_event(ModType::Update, &stamp, &stamp));
    }

    let shutdown = CancellationToken::new();
    let canceller = {
        let shutdown = shutdown.clone();
        let sink = h.shard_a.clone();
        tokio::spawn(async move {
            while sink.attempts() == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            shutdown.cancel();
        })
    };

    let pipeline = Pipeline::new(h.processor.clone(), 1, FailurePolicy::FailFast);
    let report = pipeline.run(tokio_stream::iter(events), shutdown).await;
    canceller.await.unwrap();

    // The event being written when the stop arrived still reached its watermark.
    assert_eq!(report.applied, 1);
    assert_eq!(
        h.child_watermark(42, 42).await.map(|p| p.commit_timestamp),
        Some(ts("2024-12-01T10:00:00Z"))
    );
    assert_eq!(report.unprocessed, report.received - 1);
    assert!(report.halted_by.is_none());
    assert!(h.shard_a.is_shut_down());
}
