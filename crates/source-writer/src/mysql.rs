//! MySQL source sink.

use async_trait::async_trait;
use chrono::FixedOffset;
use mysql_async::prelude::Queryable;
use mysql_async::{OptsBuilder, Pool};
use reverse_core::{Result, ShardDescriptor};
use schema_mapper::TranslatedEvent;
use tracing::{debug, info};

use crate::classify::classify_mysql_error;
use crate::statement::SourceStatement;
use crate::traits::SourceSink;

/// Writes translated events to one MySQL shard through a connection pool.
pub struct MySqlSink {
    shard_id: String,
    pool: Pool,
    offset: FixedOffset,
}

impl MySqlSink {
    /// Build the pool for `descriptor` without connecting.
    ///
    /// Every pooled session runs with `time_zone` set to `offset`, matching
    /// the offset timestamps are shifted into.
    pub fn new(descriptor: &ShardDescriptor, offset: FixedOffset) -> Self {
        let opts = OptsBuilder::default()
            .ip_or_hostname(descriptor.host.clone())
            .tcp_port(descriptor.port)
            .user(Some(descriptor.user.clone()))
            .pass(Some(descriptor.password.clone()))
            .db_name(Some(descriptor.db_name.clone()))
            .init(vec![format!("SET time_zone = '{offset}'")]);

        Self {
            shard_id: descriptor.logical_shard_id.clone(),
            pool: Pool::new(opts),
            offset,
        }
    }

    /// Build the pool and check that the shard answers.
    pub async fn connect(descriptor: &ShardDescriptor, offset: FixedOffset) -> Result<Self> {
        let sink = Self::new(descriptor, offset);
        let mut conn = sink.pool.get_conn().await.map_err(classify_mysql_error)?;
        conn.ping().await.map_err(classify_mysql_error)?;
        info!(
            "Connected to shard '{}' at {}:{}/{}",
            descriptor.logical_shard_id, descriptor.host, descriptor.port, descriptor.db_name
        );
        Ok(sink)
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }
}

#[async_trait]
impl SourceSink for MySqlSink {
    async fn apply(&self, event: &TranslatedEvent) -> Result<()> {
        let statement = SourceStatement::for_event(event, self.offset)?;
        debug!(shard = %self.shard_id, "Executing: {}", statement.sql);

        let sql = statement.sql.clone();
        let params = statement.params_into_values();
        let mut conn = self.pool.get_conn().await.map_err(classify_mysql_error)?;
        conn.exec_drop(sql, params)
            .await
            .map_err(classify_mysql_error)?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.pool
            .clone()
            .disconnect()
            .await
            .map_err(classify_mysql_error)?;
        info!("Disconnected from shard '{}'", self.shard_id);
        Ok(())
    }
}
