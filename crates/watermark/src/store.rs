//! Watermark storage trait and types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reverse_core::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::key::ShadowKey;

/// Position of a change in the change stream.
///
/// Ordered by commit timestamp, then by record sequence, so that two
/// mutations of the same row inside one transaction are still ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WatermarkPosition {
    pub commit_timestamp: DateTime<Utc>,
    pub record_sequence: u64,
}

impl WatermarkPosition {
    pub fn new(commit_timestamp: DateTime<Utc>, record_sequence: u64) -> Self {
        Self {
            commit_timestamp,
            record_sequence,
        }
    }
}

impl fmt::Display for WatermarkPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}",
            self.commit_timestamp.to_rfc3339(),
            self.record_sequence
        )
    }
}

/// Result of a guarded watermark advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The stored position was absent or older and now equals the new one.
    Advanced,
    /// The stored position was already equal or newer; nothing changed.
    RaceLost,
}

/// Trait for watermark storage operations.
///
/// Implementations must make `advance_watermark` atomic: the position is
/// written only when no row exists or the stored position is strictly
/// lower. Callers rely on that guard alone; no external locking is assumed.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Read the watermark for a row.
    ///
    /// Returns None if no change has ever been applied to the row.
    async fn get_watermark(&self, key: &ShadowKey) -> Result<Option<WatermarkPosition>>;

    /// Move the watermark forward to `position` if it is ahead of the stored one.
    async fn advance_watermark(
        &self,
        key: &ShadowKey,
        position: WatermarkPosition,
    ) -> Result<AdvanceOutcome>;
}
