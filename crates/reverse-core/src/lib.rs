//! Core types for the reverse-sync framework.
//!
//! This crate provides the foundational types shared by every stage of
//! reverse replication (migrated database change stream → source database):
//!
//! - [`ChangeEvent`] - One captured mutation from the change stream
//! - [`ColumnValues`] - Column name → value mapping carried by an event
//! - [`ColumnType`] - Column type universe used by the schema catalog
//! - [`TypedValue`] - A change-stream value decoded against its column type
//! - [`SchemaCatalog`] - Table/column mapping between the two schemas
//! - [`OverrideMap`] - User-declared table/column renames
//! - [`ShardDescriptor`] - Connection parameters of one physical source shard
//! - [`ReplicationError`] - Error taxonomy shared by all stages
//!
//! # Architecture
//!
//! ```text
//! reverse-core (this crate)
//!    │
//!    ├─── schema-mapper   (maps events into the source schema)
//!    ├─── watermark       (per-row shadow-table watermarks)
//!    ├─── mysql-types     (TypedValue → MySQL values)
//!    └─── source-writer   (shard routing and source writes)
//! ```

pub mod error;
pub mod event;
pub mod overrides;
pub mod schema;
pub mod shard;
pub mod types;
pub mod values;

pub use error::{ReplicationError, Result};
pub use event::{ChangeEvent, ColumnValues, ModType};
pub use overrides::OverrideMap;
pub use schema::{ColumnDef, SchemaCatalog, SchemaError, SyntheticKey, TableMapping, TableSide};
pub use shard::ShardDescriptor;
pub use types::ColumnType;
pub use values::TypedValue;
