//! Reading change events from JSONL files.
//!
//! Each line is either a change record as emitted by the change-stream
//! reader (payloads under `mod` as JSON-encoded strings) or an already
//! decoded change event. Blank lines are ignored.

use anyhow::Context;
use reverse_core::{ChangeEvent, ReplicationError, Result};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::{Stream, StreamExt};
use tracing::error;

/// Parse one JSONL line into a change event.
pub fn parse_event_line(line: &str) -> Result<ChangeEvent> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| ReplicationError::malformed(format!("Invalid JSON: {e}")))?;
    if value.get("mod").is_some() {
        ChangeEvent::from_change_record(line)
    } else {
        serde_json::from_value(value)
            .map_err(|e| ReplicationError::malformed(format!("Invalid change event: {e}")))
    }
}

/// Open `path` as a stream of events.
///
/// Lines that cannot be parsed are logged and counted in the returned
/// counter; they never reach the processor.
pub async fn open_event_stream<P: AsRef<Path>>(
    path: P,
) -> anyhow::Result<(impl Stream<Item = ChangeEvent> + Send, Arc<AtomicU64>)> {
    let path = path.as_ref();
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open events file: {}", path.display()))?;
    let rejected = Arc::new(AtomicU64::new(0));
    let counter = rejected.clone();
    let source = path.display().to_string();
    let mut line_number = 0u64;

    let stream = LinesStream::new(BufReader::new(file).lines()).filter_map(move |line| {
        line_number += 1;
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to read {source} line {line_number}: {e}");
                counter.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        if line.trim().is_empty() {
            return None;
        }
        match parse_event_line(&line) {
            Ok(event) => Some(event),
            Err(e) => {
                error!("Skipping {source} line {line_number}: {e}");
                counter.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    });
    Ok((stream, rejected))
}
