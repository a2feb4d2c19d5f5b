//! Reverse replication tests
//!
//! Exercise the event processor and the pipeline end to end against the
//! in-memory watermark store and source sinks. No database is required.

mod common;
mod failures;
mod ordering;
mod pipeline;
mod scenarios;
