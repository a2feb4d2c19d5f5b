//! In-memory source database for tests and dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Offset, Utc};
use reverse_core::{ColumnType, ColumnValues, ModType, ReplicationError, Result};
use schema_mapper::TranslatedEvent;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::statement::{row_identity, SourceStatement};
use crate::traits::SourceSink;

/// One write that reached the in-memory source.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedWrite {
    pub table: String,
    pub mod_type: ModType,
    pub keys: ColumnValues,
    pub commit_timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct Table {
    key_types: BTreeMap<String, ColumnType>,
    rows: BTreeMap<String, ColumnValues>,
}

#[derive(Default)]
struct State {
    tables: Mutex<HashMap<String, Table>>,
    log: Mutex<Vec<AppliedWrite>>,
    failures: Mutex<VecDeque<ReplicationError>>,
    shutdown_failure: Mutex<Option<ReplicationError>>,
    delay: Mutex<Option<Duration>>,
    attempts: AtomicUsize,
    shut_down: AtomicBool,
}

/// A source database held in memory with upsert/delete-by-key semantics.
///
/// Statements are still built (and values coerced) exactly as for MySQL,
/// so malformed data fails here the same way. Clones share state.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<State>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next apply with `error` (queued in order).
    pub fn fail_next(&self, error: ReplicationError) {
        lock(&self.state.failures).push_back(error);
    }

    /// Fail the next `n` applies with copies of `error`.
    pub fn fail_next_n(&self, n: usize, error: ReplicationError) {
        let mut failures = lock(&self.state.failures);
        failures.extend(std::iter::repeat(error).take(n));
    }

    /// Report `error` from the next shutdown; the sink is still released.
    pub fn fail_shutdown(&self, error: ReplicationError) {
        *lock(&self.state.shutdown_failure) = Some(error);
    }

    /// Sleep for `delay` at the start of every apply.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.state.delay) = delay;
    }

    /// Current row stored under `keys` (source column names).
    ///
    /// Keys are matched by typed value, using the column types of the
    /// writes seen so far for `table`.
    pub fn row(&self, table: &str, keys: &ColumnValues) -> Option<ColumnValues> {
        lock(&self.state.tables)
            .get(table)
            .and_then(|t| t.rows.get(&row_identity(keys, &t.key_types)))
            .cloned()
    }

    pub fn row_count(&self, table: &str) -> usize {
        lock(&self.state.tables)
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    /// Writes applied so far, in order.
    pub fn writes(&self) -> Vec<AppliedWrite> {
        lock(&self.state.log).clone()
    }

    /// Number of apply calls, failed ones included.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.shut_down.load(Ordering::SeqCst)
    }

    pub fn shares_state_with(&self, other: &MemorySink) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

#[async_trait]
impl SourceSink for MemorySink {
    async fn apply(&self, event: &TranslatedEvent) -> Result<()> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.state.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = lock(&self.state.failures).pop_front() {
            return Err(error);
        }
        if self.is_shut_down() {
            return Err(ReplicationError::TransientConnectivity(
                "source connection released".to_string(),
            ));
        }

        SourceStatement::for_event(event, Utc.fix())?;

        {
            let mut tables = lock(&self.state.tables);
            let table = tables.entry(event.source_table.clone()).or_default();
            for column in event.keys.columns() {
                if let Some(ty) = event.column_types.get(column) {
                    table.key_types.insert(column.to_string(), ty.clone());
                }
            }
            let identity = row_identity(&event.keys, &table.key_types);
            let rows = &mut table.rows;
            match event.mod_type {
                ModType::Insert | ModType::Update => {
                    let row = rows.entry(identity).or_default();
                    for (column, value) in event.keys.iter().chain(event.values.iter()) {
                        row.insert(column, value.clone());
                    }
                }
                ModType::Delete => {
                    rows.remove(&identity);
                }
            }
        }

        lock(&self.state.log).push(AppliedWrite {
            table: event.source_table.clone(),
            mod_type: event.mod_type,
            keys: event.keys.clone(),
            commit_timestamp: event.commit_timestamp,
        });
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.state.shut_down.store(true, Ordering::SeqCst);
        match lock(&self.state.shutdown_failure).take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
