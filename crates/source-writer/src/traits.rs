//! SourceSink trait definition.

use reverse_core::Result;
use schema_mapper::TranslatedEvent;

/// Trait for writing translated change events to one source database.
///
/// The shard router holds one sink per logical shard. Implementations must
/// make `apply` idempotent: applying the same event twice leaves the source
/// in the same state as applying it once.
#[async_trait::async_trait]
pub trait SourceSink: Send + Sync {
    /// Apply one translated event.
    ///
    /// Errors are classified: retryable ones (connectivity, timeouts) may be
    /// attempted again; everything else is permanent for this event.
    async fn apply(&self, event: &TranslatedEvent) -> Result<()>;

    /// Release the underlying connection(s).
    async fn shutdown(&self) -> Result<()>;
}
