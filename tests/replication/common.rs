//! Shared fixtures for the replication tests.

use chrono::{DateTime, Utc};
use reverse_core::{ChangeEvent, ColumnValues, ModType, OverrideMap, SchemaCatalog};
use reverse_sync::{EventProcessor, ProcessorMetrics, ProcessorSettings, RetryPolicy};
use serde_json::json;
use source_writer::testing::MemorySink;
use source_writer::ShardRouter;
use std::sync::Arc;
use std::time::Duration;
use watermark::{MemoryWatermarkStore, ShadowKey, WatermarkPosition};

pub const CATALOG: &str = r#"
tables:
  - id: t1
    migrated:
      name: child11
      columns:
        - { id: c1, name: child_id, type: big_int }
        - { id: c2, name: parent_id, type: big_int }
        - { id: c3, name: note, type: text }
        - { id: c4, name: migration_shard_id, type: text }
      primary_key: [c1, c2]
    source:
      name: child11
      columns:
        - { id: c1, name: child_id, type: big_int }
        - { id: c2, name: parent_id, type: big_int }
        - { id: c3, name: note, type: text }
      primary_key: [c1, c2]
  - id: t2
    migrated:
      name: events
      columns:
        - { id: e1, name: synth_id, type: text }
        - { id: e2, name: payload, type: json }
      primary_key: [e1]
    source:
      name: events
      columns:
        - { id: e1, name: row_uuid, type: uuid }
        - { id: e2, name: payload, type: json }
    synthetic_key: { column_id: e1 }
  - id: t3
    migrated:
      name: broken
      columns:
        - { id: b1, name: id, type: big_int }
      primary_key: [b1]
    source:
      name: broken
      columns:
        - { id: b1, name: id, type: big_int }
      primary_key: [b1]
    synthetic_key: { column_id: b9 }
"#;

pub type TestProcessor = EventProcessor<MemoryWatermarkStore, MemorySink>;

pub struct Harness {
    pub processor: Arc<TestProcessor>,
    pub store: MemoryWatermarkStore,
    pub shard_a: MemorySink,
    pub shard_b: MemorySink,
    pub catalog: Arc<SchemaCatalog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(fast_settings(), None)
    }

    pub fn with(settings: ProcessorSettings, overrides: Option<OverrideMap>) -> Self {
        let catalog = Arc::new(SchemaCatalog::from_yaml_str(CATALOG).unwrap());
        let store = MemoryWatermarkStore::new();
        let shard_a = MemorySink::new();
        let shard_b = MemorySink::new();
        let router = ShardRouter::new([
            ("shardA".to_string(), shard_a.clone()),
            ("shardB".to_string(), shard_b.clone()),
        ]);
        let processor = Arc::new(EventProcessor::new(
            catalog.clone(),
            overrides.map(Arc::new),
            Arc::new(store.clone()),
            Arc::new(router),
            settings,
            ProcessorMetrics::new(),
        ));
        Self {
            processor,
            store,
            shard_a,
            shard_b,
            catalog,
        }
    }

    /// Stored watermark of the child11 row `(child_id, parent_id)`.
    pub async fn child_watermark(&self, child_id: i64, parent_id: i64) -> Option<WatermarkPosition> {
        let table = self.catalog.table_by_migrated_name("child11").unwrap();
        let key = ShadowKey::build("shadow_", table, &child_keys(child_id, parent_id)).unwrap();
        self.store.position(&key).await
    }
}

/// Millisecond backoff so retry tests stay fast.
pub fn fast_settings() -> ProcessorSettings {
    ProcessorSettings {
        shadow_table_prefix: "shadow_".to_string(),
        retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4)),
        watermark_timeout: Duration::from_secs(5),
        source_write_timeout: Duration::from_secs(5),
    }
}

pub fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

pub fn child_keys(child_id: i64, parent_id: i64) -> ColumnValues {
    [
        ("child_id", json!(child_id.to_string())),
        ("parent_id", json!(parent_id.to_string())),
    ]
    .into_iter()
    .collect()
}

/// A child11 change owned by `shardA`.
pub fn child_event(mod_type: ModType, commit_ts: &str, note: &str) -> ChangeEvent {
    child_event_for(42, 42, mod_type, commit_ts, note)
}

pub fn child_event_for(
    child_id: i64,
    parent_id: i64,
    mod_type: ModType,
    commit_ts: &str,
    note: &str,
) -> ChangeEvent {
    let new_values = match mod_type {
        ModType::Delete => None,
        ModType::Insert | ModType::Update => Some(
            [
                ("note", json!(note)),
                ("migration_shard_id", json!("shardA")),
            ]
            .into_iter()
            .collect(),
        ),
    };
    ChangeEvent {
        commit_timestamp: ts(commit_ts),
        server_transaction_id: format!("tx-{commit_ts}"),
        record_sequence: 0,
        table_name: "child11".to_string(),
        mod_type,
        keys: child_keys(child_id, parent_id),
        old_values: None,
        new_values,
        shard_id: "shardA".to_string(),
        row_uuid: None,
        number_of_records_in_transaction: 1,
        transaction_tag: String::new(),
    }
}

pub fn note_of(sink: &MemorySink, child_id: i64, parent_id: i64) -> Option<serde_json::Value> {
    sink.row("child11", &child_keys(child_id, parent_id))
        .and_then(|row| row.get("note").cloned())
}

/// Every ordering of `items`.
pub fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut all = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let first = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, first.clone());
            all.push(tail);
        }
    }
    all
}
