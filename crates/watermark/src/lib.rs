//! Watermark ledger for reverse replication
//!
//! Every source row that has received a change carries a watermark: the
//! position (commit timestamp, record sequence) of the last change applied
//! to it. Watermarks live in shadow tables inside the migrated database,
//! one shadow table per data table, keyed by the data table's primary key.
//!
//! # Architecture
//!
//! - `ShadowKey` identifies one watermark row
//! - `WatermarkStore` is the storage trait; its advance operation is a
//!   monotonic compare-and-set and is the only guard against out-of-order
//!   and duplicate delivery
//!
//! ## Storage Backends
//!
//! - `PostgresWatermarkStore` - shadow tables reached over the PostgreSQL protocol
//! - `MemoryWatermarkStore` - process-local map, used by tests and dry runs

mod key;
mod memory;
mod postgres;
pub mod store;


pub use key::{KeyColumn, ShadowKey};
pub use memory::MemoryWatermarkStore;
pub use postgres::{shadow_table_ddl, PostgresWatermarkStore};
pub use store::{AdvanceOutcome, WatermarkPosition, WatermarkStore};
