//! Error taxonomy for reverse replication.
//!
//! Every stage of the engine reports failures through [`ReplicationError`].
//! The orchestrator only ever asks one question of an error: may the
//! operation that produced it be retried?

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while replicating a change event back to a source.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReplicationError {
    /// The event's table is absent from the schema catalog.
    #[error("Table '{0}' is not present in the schema catalog")]
    UnknownTable(String),

    /// A synthetic primary key is declared but its column has no definition.
    #[error(
        "Missing entry for synthetic key column '{column_id}' in table '{table_id}', provide a valid schema catalog"
    )]
    MissingSyntheticKeyColumn { table_id: String, column_id: String },

    /// The event carries a shard id with no configured connection.
    #[error("No source connection configured for shard '{0}'")]
    UnknownShard(String),

    /// Connection dropped, refused, or a lock/deadlock the server asks us to retry.
    #[error("Transient connectivity error: {0}")]
    TransientConnectivity(String),

    /// A bounded call exceeded its deadline.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The event payload cannot be coerced into the target schema.
    #[error("Malformed data: {0}")]
    MalformedData(String),

    /// The source refused the statement for a reason retrying will not fix.
    #[error("Source rejected statement: {0}")]
    SourceRejected(String),

    /// The watermark backend failed.
    #[error("Watermark store error: {message}")]
    WatermarkStore { message: String, retryable: bool },
}

impl ReplicationError {
    /// Whether the failed operation may be attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientConnectivity(_) | Self::Timeout(_) => true,
            Self::WatermarkStore { retryable, .. } => *retryable,
            Self::UnknownTable(_)
            | Self::MissingSyntheticKeyColumn { .. }
            | Self::UnknownShard(_)
            | Self::MalformedData(_)
            | Self::SourceRejected(_) => false,
        }
    }

    /// Short stable label, used in dead-letter records and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTable(_) => "unknown_table",
            Self::MissingSyntheticKeyColumn { .. } => "missing_synthetic_key_column",
            Self::UnknownShard(_) => "unknown_shard",
            Self::TransientConnectivity(_) => "transient_connectivity",
            Self::Timeout(_) => "timeout",
            Self::MalformedData(_) => "malformed_data",
            Self::SourceRejected(_) => "source_rejected",
            Self::WatermarkStore { .. } => "watermark_store",
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedData(message.into())
    }
}

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;
