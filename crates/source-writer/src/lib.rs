//! Source-side writes for reverse replication
//!
//! A translated change event is routed to the source database that owns its
//! shard and applied there as an idempotent statement:
//!
//! - INSERT/UPDATE become an upsert by primary key, so replaying after a
//!   partial failure never trips over a duplicate key
//! - DELETE becomes a delete by primary key, a no-op when the row is gone
//!
//! Values are always bound as statement parameters.

mod classify;
mod mysql;
mod router;
mod statement;
pub mod testing;
mod traits;

pub use classify::classify_mysql_error;
pub use mysql::MySqlSink;
pub use router::ShardRouter;
pub use statement::SourceStatement;
pub use traits::SourceSink;
