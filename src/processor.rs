//! The per-event state machine.
//!
//! ```text
//! RECEIVED -> MAPPED -> CHECKED -> STALE_DROPPED
//!                               -> ROUTED -> WRITTEN -> WATERMARKED -> DONE
//! ```
//!
//! Any step may end in FAILED. The watermark check is what makes replays and
//! out-of-order deliveries safe: an event whose position is not newer than
//! the stored watermark for its key never touches the source.

use reverse_core::{ChangeEvent, OverrideMap, ReplicationError, SchemaCatalog};
use schema_mapper::{apply_overrides, map_event, TranslatedEvent};
use serde::{Deserialize, Serialize};
use source_writer::{ShardRouter, SourceSink};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};
use watermark::{AdvanceOutcome, ShadowKey, WatermarkPosition, WatermarkStore};

use crate::metrics::ProcessorMetrics;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingState {
    Received,
    Mapped,
    Checked,
    StaleDropped,
    Routed,
    Written,
    Watermarked,
    Done,
    Failed,
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "RECEIVED",
            Self::Mapped => "MAPPED",
            Self::Checked => "CHECKED",
            Self::StaleDropped => "STALE_DROPPED",
            Self::Routed => "ROUTED",
            Self::Written => "WRITTEN",
            Self::Watermarked => "WATERMARKED",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// How an event left the state machine without failing.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Written to the source and the watermark moved to `position`
    /// (or was already moved there by a concurrent attempt).
    Applied { position: WatermarkPosition },
    /// The stored watermark was already at or past the event.
    StaleDropped { watermark: WatermarkPosition },
}

/// An event that ended in FAILED, with the state it was leaving.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} failed while {state}: {error}", event.describe())]
pub struct ProcessingFailure {
    pub state: ProcessingState,
    pub error: ReplicationError,
    pub event: Box<ChangeEvent>,
}

impl ProcessingFailure {
    fn new(state: ProcessingState, error: ReplicationError, event: &ChangeEvent) -> Self {
        Self {
            state,
            error,
            event: Box::new(event.clone()),
        }
    }

    /// Whether a later redelivery could succeed without a config or data fix.
    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub shadow_table_prefix: String,
    pub retry: RetryPolicy,
    pub watermark_timeout: Duration,
    pub source_write_timeout: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            shadow_table_prefix: "shadow_".to_string(),
            retry: RetryPolicy::default(),
            watermark_timeout: Duration::from_secs(10),
            source_write_timeout: Duration::from_secs(30),
        }
    }
}

/// Drives one change event from RECEIVED to DONE.
///
/// The catalog and override map are read-only after construction; the
/// processor can be shared behind an `Arc` by any number of workers.
pub struct EventProcessor<W, S> {
    catalog: Arc<SchemaCatalog>,
    overrides: Option<Arc<OverrideMap>>,
    watermarks: Arc<W>,
    router: Arc<ShardRouter<S>>,
    settings: ProcessorSettings,
    metrics: ProcessorMetrics,
}

impl<W, S> EventProcessor<W, S>
where
    W: WatermarkStore,
    S: SourceSink,
{
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        overrides: Option<Arc<OverrideMap>>,
        watermarks: Arc<W>,
        router: Arc<ShardRouter<S>>,
        settings: ProcessorSettings,
        metrics: ProcessorMetrics,
    ) -> Self {
        Self {
            catalog,
            overrides,
            watermarks,
            router,
            settings,
            metrics,
        }
    }

    pub fn metrics(&self) -> &ProcessorMetrics {
        &self.metrics
    }

    pub fn router(&self) -> &Arc<ShardRouter<S>> {
        &self.router
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Typed identity of the row `event` addresses.
    ///
    /// Keys are decoded against the catalog, so `"42"` and `42` for an INT64
    /// key give the same identity. Events that cannot be keyed fall back to
    /// their raw key JSON; they fail in mapping regardless.
    pub fn row_identity(&self, event: &ChangeEvent) -> String {
        self.catalog
            .table_by_migrated_name(&event.table_name)
            .and_then(|table| {
                ShadowKey::build(&self.settings.shadow_table_prefix, table, &event.keys).ok()
            })
            .map(|key| key.identity())
            .unwrap_or_else(|| {
                format!(
                    "{}{}",
                    event.table_name,
                    serde_json::to_string(&event.keys).unwrap_or_default()
                )
            })
    }

    /// Run the state machine for `event`.
    ///
    /// Only `Ok` results may be acknowledged upstream. A failure in WRITTEN
    /// means the row was written but the watermark did not move; redelivery
    /// repeats the idempotent write and then advances.
    pub async fn process(
        &self,
        event: &ChangeEvent,
    ) -> Result<ProcessOutcome, ProcessingFailure> {
        let fail = |state: ProcessingState, error: ReplicationError| {
            self.metrics.record_failure();
            warn!(
                table = %event.table_name,
                shard = %event.shard_id,
                commit_ts = %event.commit_timestamp,
                state = %state,
                "Event failed: {error}"
            );
            ProcessingFailure::new(state, error, event)
        };

        trace!(state = %ProcessingState::Received, "{}", event.describe());
        let (translated, shadow_key) =
            self.map(event).map_err(|e| fail(ProcessingState::Received, e))?;
        let position = WatermarkPosition::new(event.commit_timestamp, event.record_sequence);
        trace!(state = %ProcessingState::Mapped, key = %shadow_key, "{position}");

        let current = self
            .settings
            .retry
            .run(
                "watermark read",
                self.settings.watermark_timeout,
                &self.metrics,
                || self.watermarks.get_watermark(&shadow_key),
            )
            .await
            .map_err(|e| fail(ProcessingState::Mapped, e))?;
        trace!(state = %ProcessingState::Checked, key = %shadow_key, ?current);

        if let Some(watermark) = current {
            if watermark >= position {
                self.metrics.record_stale_dropped();
                debug!(
                    table = %event.table_name,
                    shard = %event.shard_id,
                    commit_ts = %event.commit_timestamp,
                    state = %ProcessingState::StaleDropped,
                    "Dropping stale event for {shadow_key}: watermark {watermark} >= {position}"
                );
                return Ok(ProcessOutcome::StaleDropped { watermark });
            }
        }

        let sink = self
            .router
            .resolve(&translated.shard_id)
            .map_err(|e| fail(ProcessingState::Checked, e))?;
        trace!(state = %ProcessingState::Routed, shard = %translated.shard_id);

        self.settings
            .retry
            .run(
                "source write",
                self.settings.source_write_timeout,
                &self.metrics,
                || sink.apply(&translated),
            )
            .await
            .map_err(|e| fail(ProcessingState::Routed, e))?;
        trace!(state = %ProcessingState::Written, table = %translated.source_table);

        let outcome = self
            .settings
            .retry
            .run(
                "watermark advance",
                self.settings.watermark_timeout,
                &self.metrics,
                || self.watermarks.advance_watermark(&shadow_key, position),
            )
            .await
            .map_err(|e| fail(ProcessingState::Written, e))?;
        if outcome == AdvanceOutcome::RaceLost {
            debug!("Watermark for {shadow_key} already at or past {position}");
        }
        trace!(state = %ProcessingState::Watermarked, key = %shadow_key, "{position}");

        self.metrics.record_processed(event.commit_timestamp);
        debug!(
            table = %event.table_name,
            shard = %event.shard_id,
            commit_ts = %event.commit_timestamp,
            state = %ProcessingState::Done,
            "Applied {} to {}",
            event.mod_type,
            translated.source_table
        );
        Ok(ProcessOutcome::Applied { position })
    }

    /// RECEIVED -> MAPPED: translate to source names and build the shadow key.
    fn map(&self, event: &ChangeEvent) -> reverse_core::Result<(TranslatedEvent, ShadowKey)> {
        let translated = map_event(event, &self.catalog)?;
        let translated = apply_overrides(translated, self.overrides.as_deref());
        let table = self
            .catalog
            .table_by_migrated_name(&event.table_name)
            .ok_or_else(|| ReplicationError::UnknownTable(event.table_name.clone()))?;
        let shadow_key = ShadowKey::build(&self.settings.shadow_table_prefix, table, &event.keys)?;
        Ok((translated, shadow_key))
    }
}
