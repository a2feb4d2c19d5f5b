//! Key-partitioned worker pool around [`EventProcessor`].
//!
//! Events are spread over N workers by hashing the typed row key, so all
//! events for one row run sequentially on one worker while different rows
//! proceed concurrently. The watermark guard still protects rows that are
//! processed by more than one process.

use futures::future::join_all;
use reverse_core::ChangeEvent;
use serde::{Deserialize, Serialize};
use source_writer::SourceSink;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use watermark::WatermarkStore;

use crate::dead_letter::{DeadLetterRecord, DeadLetterSink};
use crate::processor::{EventProcessor, ProcessOutcome, ProcessingFailure};

const WORKER_QUEUE_CAPACITY: usize = 256;

/// What happens to an event that ends in FAILED.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log and count, then move on.
    Skip,
    /// Append the event and its error to the dead-letter sink. Without a
    /// sink, or when the sink fails, the run halts as under `FailFast`.
    #[default]
    DeadLetter,
    /// Stop intake, let in-flight events finish, and report the failure.
    FailFast,
}

/// Outcome counts for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineReport {
    pub received: u64,
    pub applied: u64,
    pub stale_dropped: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    /// Accepted from the stream but never processed because of a stop.
    pub unprocessed: u64,
    /// The failure that halted the run, if any.
    #[serde(skip)]
    pub halted_by: Option<ProcessingFailure>,
}

impl PipelineReport {
    fn merge(&mut self, other: WorkerReport) {
        self.applied += other.applied;
        self.stale_dropped += other.stale_dropped;
        self.failed += other.failed;
        self.dead_lettered += other.dead_lettered;
    }

    fn handled(&self) -> u64 {
        self.applied + self.stale_dropped + self.failed
    }

    /// Every received event reached a terminal outcome and nothing halted the run.
    pub fn is_complete(&self) -> bool {
        self.halted_by.is_none() && self.unprocessed == 0
    }

    /// Turn a halted run into an error.
    pub fn into_result(self) -> anyhow::Result<Self> {
        match self.halted_by {
            Some(failure) => Err(anyhow::Error::new(failure).context("Pipeline halted")),
            None => Ok(self),
        }
    }
}

#[derive(Debug, Default)]
struct WorkerReport {
    applied: u64,
    stale_dropped: u64,
    failed: u64,
    dead_lettered: u64,
}

pub struct Pipeline<W, S> {
    processor: Arc<EventProcessor<W, S>>,
    workers: usize,
    policy: FailurePolicy,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
}

impl<W, S> Pipeline<W, S>
where
    W: WatermarkStore + 'static,
    S: SourceSink + 'static,
{
    pub fn new(processor: Arc<EventProcessor<W, S>>, workers: usize, policy: FailurePolicy) -> Self {
        Self {
            processor,
            workers: workers.max(1),
            policy,
            dead_letters: None,
        }
    }

    pub fn with_dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    pub fn processor(&self) -> &Arc<EventProcessor<W, S>> {
        &self.processor
    }

    /// Worker that owns the row `event` addresses.
    pub fn partition(&self, event: &ChangeEvent) -> usize {
        partition(&self.processor.row_identity(event), self.workers)
    }

    /// Feed `events` through the workers until the stream ends, `shutdown`
    /// is cancelled, or a fail-fast failure halts the run.
    ///
    /// Every shard connection is released before this returns, whatever the
    /// exit path.
    pub async fn run<St>(&self, events: St, shutdown: CancellationToken) -> PipelineReport
    where
        St: Stream<Item = ChangeEvent> + Send,
    {
        if self.policy == FailurePolicy::DeadLetter && self.dead_letters.is_none() {
            warn!("Dead-letter policy configured without a sink, the first failure will halt the run");
        }

        let halt = shutdown.child_token();
        let halted_by: Arc<Mutex<Option<ProcessingFailure>>> = Arc::new(Mutex::new(None));

        let mut senders = Vec::with_capacity(self.workers);
        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let (tx, rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
            senders.push(tx);
            let worker = Worker {
                id: worker_id,
                processor: self.processor.clone(),
                policy: self.policy,
                dead_letters: self.dead_letters.clone(),
                halt: halt.clone(),
                halted_by: halted_by.clone(),
            };
            handles.push(tokio::spawn(worker.run(rx)));
        }

        let mut report = PipelineReport::default();
        let mut events = std::pin::pin!(events);
        loop {
            tokio::select! {
                biased;
                _ = halt.cancelled() => {
                    info!("Stopping intake");
                    break;
                }
                next = events.next() => {
                    let Some(event) = next else { break };
                    report.received += 1;
                    let index = self.partition(&event);
                    if senders[index].send(event).await.is_err() {
                        error!("Worker {index} stopped unexpectedly");
                        halt.cancel();
                        break;
                    }
                }
            }
        }
        // Closing the queues lets idle workers exit once drained.
        drop(senders);

        for joined in join_all(handles).await {
            match joined {
                Ok(worker_report) => report.merge(worker_report),
                Err(e) => error!("Worker task failed: {e}"),
            }
        }

        if let Err(e) = self.processor.router().shutdown().await {
            warn!("Failed to release shard connections: {e}");
        }

        report.unprocessed = report.received.saturating_sub(report.handled());
        report.halted_by = match Arc::try_unwrap(halted_by) {
            Ok(slot) => slot.into_inner().unwrap_or_else(|p| p.into_inner()),
            Err(shared) => shared.lock().unwrap_or_else(|p| p.into_inner()).take(),
        };
        info!(
            "Pipeline finished: received={} applied={} stale_dropped={} failed={} dead_lettered={} unprocessed={}",
            report.received,
            report.applied,
            report.stale_dropped,
            report.failed,
            report.dead_lettered,
            report.unprocessed
        );
        report
    }
}

/// Worker index for a row identity; equal identities always map to the same worker.
pub fn partition(row_identity: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    row_identity.hash(&mut hasher);
    (hasher.finish() % workers.max(1) as u64) as usize
}

struct Worker<W, S> {
    id: usize,
    processor: Arc<EventProcessor<W, S>>,
    policy: FailurePolicy,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    halt: CancellationToken,
    halted_by: Arc<Mutex<Option<ProcessingFailure>>>,
}

impl<W, S> Worker<W, S>
where
    W: WatermarkStore + 'static,
    S: SourceSink + 'static,
{
    async fn run(self, mut rx: mpsc::Receiver<ChangeEvent>) -> WorkerReport {
        let mut report = WorkerReport::default();
        loop {
            // An event already picked up always runs to completion.
            let event = tokio::select! {
                biased;
                _ = self.halt.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match self.processor.process(&event).await {
                Ok(ProcessOutcome::Applied { .. }) => report.applied += 1,
                Ok(ProcessOutcome::StaleDropped { .. }) => report.stale_dropped += 1,
                Err(failure) => {
                    report.failed += 1;
                    self.handle_failure(failure, &mut report).await;
                }
            }
        }
        report
    }

    async fn handle_failure(&self, failure: ProcessingFailure, report: &mut WorkerReport) {
        match self.policy {
            FailurePolicy::Skip => {
                warn!("Worker {} skipping event: {failure}", self.id);
            }
            FailurePolicy::DeadLetter => {
                let Some(sink) = &self.dead_letters else {
                    error!("Worker {} has no dead-letter sink for: {failure}", self.id);
                    self.halt_with(failure);
                    return;
                };
                match sink.write(&DeadLetterRecord::from_failure(&failure)).await {
                    Ok(()) => {
                        report.dead_lettered += 1;
                        self.processor.metrics().record_dead_lettered();
                    }
                    Err(e) => {
                        // The event cannot be parked anywhere; stop rather than lose it.
                        error!("Worker {} failed to dead-letter event: {e:#}", self.id);
                        self.halt_with(failure);
                    }
                }
            }
            FailurePolicy::FailFast => {
                error!("Worker {} halting pipeline: {failure}", self.id);
                self.halt_with(failure);
            }
        }
    }

    fn halt_with(&self, failure: ProcessingFailure) {
        let mut slot = self.halted_by.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(failure);
        }
        drop(slot);
        self.halt.cancel();
    }
}
