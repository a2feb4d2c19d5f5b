//! ReverseSync Library
//!
//! Replays change events captured from a migrated database back onto the
//! original sharded source databases, so the source stays usable as a
//! rollback target.
//!
//! # Features
//!
//! - Schema mapping: migrated table and column names back to source names,
//!   with user overrides and synthetic primary keys
//! - Idempotent writes: upserts and deletes by primary key
//! - Ordering tolerance: a per-key watermark in a shadow table drops replays
//!   and out-of-order deliveries
//! - Sharding: events are routed to the source shard that owns the row
//!
//! # Engine Crates
//!
//! - `reverse_core` - change events, schema catalog, overrides, errors
//! - `schema_mapper` - migrated → source translation
//! - `watermark` - shadow-table watermark stores
//! - `source_writer` - shard routing and MySQL writes
//!
//! # CLI Usage
//!
//! ```bash
//! # Create shadow tables in the migrated database
//! reverse-sync shadow-tables --config reverse-sync.toml
//!
//! # Replay a JSONL file of change records
//! reverse-sync apply --config reverse-sync.toml --events changes.jsonl
//!
//! # Same, against in-memory stores (nothing is written anywhere)
//! reverse-sync apply --config reverse-sync.toml --events changes.jsonl --dry-run
//! ```

pub mod config;
pub mod dead_letter;
pub mod events;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod retry;

pub use config::ReverseSyncConfig;
pub use dead_letter::{DeadLetterRecord, DeadLetterSink, JsonlDeadLetterSink, MemoryDeadLetterSink};
pub use metrics::{MetricsSnapshot, ProcessorMetrics};
pub use pipeline::{FailurePolicy, Pipeline, PipelineReport};
pub use processor::{
    EventProcessor, ProcessOutcome, ProcessingFailure, ProcessingState, ProcessorSettings,
};
pub use retry::RetryPolicy;
