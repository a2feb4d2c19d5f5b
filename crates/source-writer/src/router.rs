//! Shard routing.

use chrono::FixedOffset;
use reverse_core::{ReplicationError, Result, ShardDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::mysql::MySqlSink;
use crate::traits::SourceSink;

/// Immutable map from logical shard id to the sink that owns it.
pub struct ShardRouter<S> {
    sinks: HashMap<String, Arc<S>>,
}

impl<S: SourceSink> ShardRouter<S> {
    /// Build a router; the first sink registered for a shard id wins.
    pub fn new(sinks: impl IntoIterator<Item = (String, S)>) -> Self {
        let mut map = HashMap::new();
        for (shard_id, sink) in sinks {
            if map.contains_key(&shard_id) {
                warn!("Duplicate shard id '{shard_id}' in shard configuration, keeping the first");
                continue;
            }
            map.insert(shard_id, Arc::new(sink));
        }
        Self { sinks: map }
    }

    /// Resolve the sink that owns `shard_id`.
    ///
    /// An empty shard id resolves to the only configured shard, which is how
    /// un-sharded deployments are expressed. Any other unknown id is an error.
    pub fn resolve(&self, shard_id: &str) -> Result<&Arc<S>> {
        if let Some(sink) = self.sinks.get(shard_id) {
            return Ok(sink);
        }
        if shard_id.is_empty() && self.sinks.len() == 1 {
            if let Some(sink) = self.sinks.values().next() {
                return Ok(sink);
            }
        }
        Err(ReplicationError::UnknownShard(shard_id.to_string()))
    }

    pub fn shard_ids(&self) -> impl Iterator<Item = &str> {
        self.sinks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Release every sink, continuing past individual failures.
    ///
    /// Returns the first failure, if any.
    pub async fn shutdown(&self) -> Result<()> {
        let mut first_error = None;
        for (shard_id, sink) in &self.sinks {
            if let Err(e) = sink.shutdown().await {
                warn!("Failed to release shard '{shard_id}': {e}");
                first_error.get_or_insert(e);
            }
        }
        info!("Released {} shard connection(s)", self.sinks.len());
        first_error.map_or(Ok(()), Err)
    }
}

impl ShardRouter<MySqlSink> {
    /// Connect one MySQL sink per descriptor.
    pub async fn connect_mysql(shards: &[ShardDescriptor], offset: FixedOffset) -> Result<Self> {
        let mut sinks = Vec::with_capacity(shards.len());
        for descriptor in shards {
            match MySqlSink::connect(descriptor, offset).await {
                Ok(sink) => sinks.push((descriptor.logical_shard_id.clone(), sink)),
                Err(e) => {
                    // Release what was already acquired before surfacing the error.
                    if let Err(release) = Self::new(sinks).shutdown().await {
                        warn!("Failed to release shards after connect error: {release}");
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self::new(sinks))
    }
}
