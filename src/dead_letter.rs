//! Dead-letter sinks for events that cannot be applied.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reverse_core::ChangeEvent;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::processor::{ProcessingFailure, ProcessingState};

/// One dead-lettered event (one JSON line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub failed_at: DateTime<Utc>,
    pub state: ProcessingState,
    pub error_kind: String,
    pub error: String,
    pub retryable: bool,
    pub event: ChangeEvent,
}

impl DeadLetterRecord {
    pub fn from_failure(failure: &ProcessingFailure) -> Self {
        Self {
            failed_at: Utc::now(),
            state: failure.state,
            error_kind: failure.error.kind().to_string(),
            error: failure.error.to_string(),
            retryable: failure.error.is_retryable(),
            event: (*failure.event).clone(),
        }
    }
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn write(&self, record: &DeadLetterRecord) -> anyhow::Result<()>;
}

/// Appends records to `<dir>/dead_letter.jsonl`.
pub struct JsonlDeadLetterSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonlDeadLetterSink {
    pub const FILE_NAME: &'static str = "dead_letter.jsonl";

    pub async fn open<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await.with_context(|| {
            format!("Failed to create dead-letter directory: {}", dir.display())
        })?;
        let path = dir.join(Self::FILE_NAME);
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open dead-letter file: {}", path.display()))?;
        info!("Dead-lettering failed events to {}", path.display());
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeadLetterSink for JsonlDeadLetterSink {
    async fn write(&self, record: &DeadLetterRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps records in memory; used by tests and dry runs.
#[derive(Default)]
pub struct MemoryDeadLetterSink {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn write(&self, record: &DeadLetterRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("dead-letter buffer poisoned"))?
            .push(record.clone());
        Ok(())
    }
}
