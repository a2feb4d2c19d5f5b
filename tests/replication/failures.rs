//! Retry, timeout and failure-reporting behaviour of the processor.

use crate::common::*;
use reverse_core::{ModType, ReplicationError};
use reverse_sync::{ProcessOutcome, ProcessingState, ProcessorSettings, RetryPolicy};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_transient_write_failures_are_retried() {
    let h = Harness::new();
    h.shard_a
        .fail_next_n(2, ReplicationError::TransientConnectivity("reset".into()));

    let outcome = h
        .processor
        .process(&child_event(ModType::Insert, "2024-12-01T10:15:30Z", "ok"))
        .await
        .unwrap();

    assert!(matches!(outcome, ProcessOutcome::Applied { .. }));
    assert_eq!(h.shard_a.attempts(), 3);
    assert_eq!(h.processor.metrics().snapshot().retried, 2);
    assert_eq!(note_of(&h.shard_a, 42, 42), Some(json!("ok")));
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let h = Harness::new();
    h.shard_a
        .fail_next_n(10, ReplicationError::TransientConnectivity("down".into()));

    let failure = h
        .processor
        .process(&child_event(ModType::Insert, "2024-12-01T10:15:30Z", "x"))
        .await
        .unwrap_err();

    assert_eq!(failure.state, ProcessingState::Routed);
    assert!(matches!(
        failure.error,
        ReplicationError::TransientConnectivity(_)
    ));
    assert!(failure.is_retryable());
    // max_attempts is 3 in the fast settings.
    assert_eq!(h.shard_a.attempts(), 3);
    // Nothing was written, so the watermark must not move.
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_non_retryable_write_failure_is_not_retried() {
    let h = Harness::new();
    h.shard_a
        .fail_next(ReplicationError::SourceRejected("table is read only".into()));

    let failure = h
        .processor
        .process(&child_event(ModType::Insert, "2024-12-01T10:15:30Z", "x"))
        .await
        .unwrap_err();

    assert_eq!(failure.state, ProcessingState::Routed);
    assert!(matches!(failure.error, ReplicationError::SourceRejected(_)));
    assert_eq!(h.shard_a.attempts(), 1);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_watermark_advance_failure_is_not_acknowledged() {
    let h = Harness::new();
    let event = child_event(ModType::Insert, "2024-12-01T10:15:30Z", "written");
    h.store.fail_next_advances(3);

    let failure = h.processor.process(&event).await.unwrap_err();
    assert_eq!(failure.state, ProcessingState::Written);
    assert!(failure.is_retryable());
    // The row is on the source but the watermark did not move.
    assert_eq!(note_of(&h.shard_a, 42, 42), Some(json!("written")));
    assert_eq!(h.child_watermark(42, 42).await, None);

    // Redelivery repeats the idempotent write, then advances.
    let outcome = h.processor.process(&event).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Applied { .. }));
    assert_eq!(h.shard_a.writes().len(), 2);
    assert_eq!(h.shard_a.row_count("child11"), 1);
    assert!(h.child_watermark(42, 42).await.is_some());
}

#[tokio::test]
async fn test_watermark_read_failure_is_retried() {
    let h = Harness::new();
    h.store.fail_next_reads(2);

    let outcome = h
        .processor
        .process(&child_event(ModType::Insert, "2024-12-01T10:15:30Z", "x"))
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessOutcome::Applied { .. }));
    assert_eq!(h.processor.metrics().snapshot().retried, 2);
}

#[tokio::test]
async fn test_watermark_read_failure_reports_mapped_state() {
    let h = Harness::new();
    h.store.fail_next_reads(5);

    let failure = h
        .processor
        .process(&child_event(ModType::Insert, "2024-12-01T10:15:30Z", "x"))
        .await
        .unwrap_err();
    assert_eq!(failure.state, ProcessingState::Mapped);
    assert_eq!(h.shard_a.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_write_times_out() {
    let settings = ProcessorSettings {
        retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)),
        source_write_timeout: Duration::from_millis(50),
        ..fast_settings()
    };
    let h = Harness::with(settings, None);
    h.shard_a.set_delay(Some(Duration::from_secs(10)));

    let failure = h
        .processor
        .process(&child_event(ModType::Insert, "2024-12-01T10:15:30Z", "slow"))
        .await
        .unwrap_err();

    assert_eq!(failure.error, ReplicationError::Timeout(Duration::from_millis(50)));
    assert!(failure.is_retryable());
    assert_eq!(h.shard_a.attempts(), 2);
    assert!(h.store.is_empty().await);
}
