//! In-process watermark storage implementation.

use async_trait::async_trait;
use reverse_core::{ReplicationError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::key::ShadowKey;
use crate::store::{AdvanceOutcome, WatermarkPosition, WatermarkStore};

/// Memory implementation of WatermarkStore trait.
///
/// Compare-and-set happens under one lock, which gives the same guarantee
/// as the guarded upsert of the database-backed store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryWatermarkStore {
    rows: Arc<Mutex<HashMap<String, WatermarkPosition>>>,
    failing_reads: Arc<AtomicUsize>,
    failing_advances: Arc<AtomicUsize>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` reads fail with a transient error.
    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` advances fail with a transient error.
    pub fn fail_next_advances(&self, n: usize) {
        self.failing_advances.store(n, Ordering::SeqCst);
    }

    /// Stored position for `key`, without any injected failure.
    pub async fn position(&self, key: &ShadowKey) -> Option<WatermarkPosition> {
        self.rows.lock().await.get(&key.identity()).copied()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn get_watermark(&self, key: &ShadowKey) -> Result<Option<WatermarkPosition>> {
        if Self::take_failure(&self.failing_reads) {
            return Err(ReplicationError::WatermarkStore {
                message: format!("injected read failure for {key}"),
                retryable: true,
            });
        }
        Ok(self.rows.lock().await.get(&key.identity()).copied())
    }

    async fn advance_watermark(
        &self,
        key: &ShadowKey,
        position: WatermarkPosition,
    ) -> Result<AdvanceOutcome> {
        if Self::take_failure(&self.failing_advances) {
            return Err(ReplicationError::WatermarkStore {
                message: format!("injected advance failure for {key}"),
                retryable: true,
            });
        }
        let mut rows = self.rows.lock().await;
        match rows.get(&key.identity()) {
            Some(stored) if *stored >= position => Ok(AdvanceOutcome::RaceLost),
            _ => {
                rows.insert(key.identity(), position);
                Ok(AdvanceOutcome::Advanced)
            }
        }
    }
}
