//! Counters and replication-lag distribution for the event processor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct Counters {
    records_processed: AtomicU64,
    stale_dropped: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    lag_count: AtomicU64,
    lag_sum_ms: AtomicU64,
    lag_min_ms: AtomicU64,
    lag_max_ms: AtomicU64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            records_processed: AtomicU64::new(0),
            stale_dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            lag_count: AtomicU64::new(0),
            lag_sum_ms: AtomicU64::new(0),
            lag_min_ms: AtomicU64::new(u64::MAX),
            lag_max_ms: AtomicU64::new(0),
        }
    }
}

/// Metrics shared by every worker. Clones share the same counters.
#[derive(Clone)]
pub struct ProcessorMetrics {
    counters: Arc<Counters>,
    start_time: Instant,
}

impl Default for ProcessorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters (one JSON object).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub records_processed: u64,
    pub stale_dropped: u64,
    pub failed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub replication_lag_ms: LagDistribution,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LagDistribution {
    pub count: u64,
    pub sum: u64,
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl LagDistribution {
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / self.count as f64)
    }
}

impl ProcessorMetrics {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            start_time: Instant::now(),
        }
    }

    /// An event reached DONE through a write; records its replication lag.
    pub fn record_processed(&self, commit_timestamp: DateTime<Utc>) {
        self.counters
            .records_processed
            .fetch_add(1, Ordering::Relaxed);
        let lag_ms = (Utc::now() - commit_timestamp)
            .num_milliseconds()
            .max(0) as u64;
        self.record_lag(Duration::from_millis(lag_ms));
    }

    pub fn record_lag(&self, lag: Duration) {
        let lag_ms = lag.as_millis() as u64;
        let c = &self.counters;
        c.lag_count.fetch_add(1, Ordering::Relaxed);
        c.lag_sum_ms.fetch_add(lag_ms, Ordering::Relaxed);
        c.lag_min_ms.fetch_min(lag_ms, Ordering::Relaxed);
        c.lag_max_ms.fetch_max(lag_ms, Ordering::Relaxed);
    }

    pub fn record_stale_dropped(&self) {
        self.counters.stale_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.counters.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        let count = c.lag_count.load(Ordering::Relaxed);
        MetricsSnapshot {
            records_processed: c.records_processed.load(Ordering::Relaxed),
            stale_dropped: c.stale_dropped.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            dead_lettered: c.dead_lettered.load(Ordering::Relaxed),
            replication_lag_ms: LagDistribution {
                count,
                sum: c.lag_sum_ms.load(Ordering::Relaxed),
                min: (count > 0).then(|| c.lag_min_ms.load(Ordering::Relaxed)),
                max: (count > 0).then(|| c.lag_max_ms.load(Ordering::Relaxed)),
            },
            elapsed_secs: self.start_time.elapsed().as_secs_f64(),
        }
    }

    /// Start background emission: log a snapshot every `interval` until cancelled.
    pub fn start_emission_task(
        &self,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let metrics = self.clone();

        tokio::spawn(async move {
            if interval.is_zero() {
                warn!("Metrics emission disabled: interval must be greater than zero");
                return;
            }
            let mut interval_timer = tokio::time::interval(interval);
            // The first tick completes immediately.
            interval_timer.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval_timer.tick() => {
                        let snapshot = metrics.snapshot();
                        match serde_json::to_string(&snapshot) {
                            Ok(json) => info!(target: "reverse_sync::metrics", "{json}"),
                            Err(e) => warn!("Failed to serialise metrics snapshot: {e}"),
                        }
                    }
                }
            }
        })
    }
}
