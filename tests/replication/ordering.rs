//! Delivery-order tolerance: the final source state depends only on the
//! newest event per key, never on the order events arrive in.

use crate::common::*;
use reverse_core::ModType;
use serde_json::json;
use watermark::WatermarkPosition;

#[tokio::test]
async fn test_every_delivery_order_converges_to_newest_update() {
    let events = vec![
        child_event(ModType::Insert, "2024-12-01T10:00:00Z", "a"),
        child_event(ModType::Update, "2024-12-01T10:00:01Z", "b"),
        child_event(ModType::Update, "2024-12-01T10:00:02Z", "c"),
        child_event(ModType::Update, "2024-12-01T10:00:03Z", "d"),
    ];

    for order in permutations(&events) {
        let h = Harness::new();
        for event in &order {
            h.processor.process(event).await.unwrap();
        }
        assert_eq!(note_of(&h.shard_a, 42, 42), Some(json!("d")), "{order:?}");
        assert_eq!(
            h.child_watermark(42, 42).await,
            Some(WatermarkPosition::new(ts("2024-12-01T10:00:03Z"), 0))
        );
    }
}

#[tokio::test]
async fn test_every_delivery_order_converges_to_delete() {
    let events = vec![
        child_event(ModType::Insert, "2024-12-01T10:00:00Z", "a"),
        child_event(ModType::Update, "2024-12-01T10:00:01Z", "b"),
        child_event(ModType::Delete, "2024-12-01T10:00:02Z", ""),
    ];

    for order in permutations(&events) {
        let h = Harness::new();
        for event in &order {
            h.processor.process(event).await.unwrap();
        }
        assert_eq!(h.shard_a.row_count("child11"), 0, "{order:?}");
    }
}

#[tokio::test]
async fn test_watermark_never_moves_backwards() {
    let h = Harness::new();
    let stamps = [
        "2024-12-01T10:00:05Z",
        "2024-12-01T10:00:01Z",
        "2024-12-01T10:00:09Z",
        "2024-12-01T10:00:03Z",
        "2024-12-01T10:00:07Z",
    ];

    let mut highest: Option<WatermarkPosition> = None;
    for stamp in stamps {
        h.processor
            .process(&child_event(ModType::Update, stamp, stamp))
            .await
            .unwrap();
        let current = h.child_watermark(42, 42).await;
        assert!(current >= highest);
        highest = current;
    }
    assert_eq!(highest, Some(WatermarkPosition::new(ts("2024-12-01T10:00:09Z"), 0)));
    assert_eq!(note_of(&h.shard_a, 42, 42), Some(json!("2024-12-01T10:00:09Z")));
}

#[tokio::test]
async fn test_concurrent_same_key_processing_keeps_newest_watermark() {
    let h = Harness::new();
    let mut handles = Vec::new();
    for second in (0..20).rev() {
        let processor = h.processor.clone();
        let stamp = format!("2024-12-01T10:00:{second:02}Z");
        handles.push(tokio::spawn(async move {
            processor
                .process(&child_event(ModType::Update, &stamp, &stamp))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(
        h.child_watermark(42, 42).await,
        Some(WatermarkPosition::new(ts("2024-12-01T10:00:19Z"), 0))
    );
}

#[tokio::test]
async fn test_keys_are_independent() {
    let h = Harness::new();
    h.processor
        .process(&child_event_for(1, 1, ModType::Insert, "2024-12-01T10:00:05Z", "one"))
        .await
        .unwrap();
    // Older than key (1, 1) but for a different row, so it must apply.
    h.processor
        .process(&child_event_for(2, 1, ModType::Insert, "2024-12-01T10:00:01Z", "two"))
        .await
        .unwrap();

    assert_eq!(note_of(&h.shard_a, 1, 1), Some(json!("one")));
    assert_eq!(note_of(&h.shard_a, 2, 1), Some(json!("two")));
}
