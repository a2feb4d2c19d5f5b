//! Deployment configuration, read from a TOML file.
//!
//! ```toml
//! shadow_table_prefix = "shadow_"
//! source_db_timezone_offset = "+05:30"
//! workers = 8
//! failure_policy = "dead_letter"
//! catalog_path = "catalog.yaml"
//! overrides_path = "overrides.json"
//! shards_path = "shards.json"
//! dead_letter_dir = "/var/lib/reverse-sync/dead-letters"
//!
//! [retry]
//! max_attempts = 5
//! base_delay = "100ms"
//! max_delay = "5s"
//!
//! [timeouts]
//! watermark = "10s"
//! source_write = "30s"
//!
//! [watermark_store]
//! connection_string = "host=localhost user=postgres dbname=migrated"
//! ```

mod duration;

pub use duration::parse_duration;

use anyhow::Context;
use chrono::FixedOffset;
use reverse_core::{OverrideMap, SchemaCatalog, ShardDescriptor};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::FailurePolicy;
use crate::processor::ProcessorSettings;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct ReverseSyncConfig {
    #[serde(default = "default_shadow_table_prefix")]
    pub shadow_table_prefix: String,

    /// Fixed offset DATETIME values are shifted into before being written.
    #[serde(default = "default_timezone_offset")]
    pub source_db_timezone_offset: String,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub timeouts: TimeoutSettings,

    pub watermark_store: Option<WatermarkStoreSettings>,

    pub catalog_path: PathBuf,

    pub overrides_path: Option<PathBuf>,

    pub shards_path: PathBuf,

    #[serde(default = "default_dead_letter_dir")]
    pub dead_letter_dir: PathBuf,

    /// How often a metrics snapshot is logged.
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay: String,
    #[serde(default = "default_max_delay")]
    pub max_delay: String,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_watermark_timeout")]
    pub watermark: String,
    #[serde(default = "default_source_write_timeout")]
    pub source_write: String,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            watermark: default_watermark_timeout(),
            source_write: default_source_write_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatermarkStoreSettings {
    /// tokio-postgres connection string of the migrated database.
    pub connection_string: String,
}

fn default_shadow_table_prefix() -> String {
    "shadow_".to_string()
}

fn default_timezone_offset() -> String {
    "+00:00".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_dead_letter_dir() -> PathBuf {
    PathBuf::from(".reverse-sync-dead-letters")
}

fn default_metrics_interval() -> String {
    "30s".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> String {
    "100ms".to_string()
}

fn default_max_delay() -> String {
    "5s".to_string()
}

fn default_watermark_timeout() -> String {
    "10s".to_string()
}

fn default_source_write_timeout() -> String {
    "30s".to_string()
}

impl ReverseSyncConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Check every derived value up front so a bad config fails at startup.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        self.timezone_offset()?;
        self.retry_policy()?;
        self.watermark_timeout()?;
        self.source_write_timeout()?;
        self.metrics_interval()?;
        Ok(())
    }

    pub fn timezone_offset(&self) -> anyhow::Result<FixedOffset> {
        mysql_types::parse_timezone_offset(&self.source_db_timezone_offset)
            .context("Invalid source_db_timezone_offset")
    }

    pub fn retry_policy(&self) -> anyhow::Result<RetryPolicy> {
        let base_delay =
            parse_duration(&self.retry.base_delay).context("Invalid retry.base_delay")?;
        let max_delay = parse_duration(&self.retry.max_delay).context("Invalid retry.max_delay")?;
        if max_delay < base_delay {
            anyhow::bail!("retry.max_delay must not be shorter than retry.base_delay");
        }
        Ok(RetryPolicy::new(self.retry.max_attempts, base_delay, max_delay))
    }

    pub fn watermark_timeout(&self) -> anyhow::Result<Duration> {
        non_zero(&self.timeouts.watermark, "timeouts.watermark")
    }

    pub fn source_write_timeout(&self) -> anyhow::Result<Duration> {
        non_zero(&self.timeouts.source_write, "timeouts.source_write")
    }

    pub fn metrics_interval(&self) -> anyhow::Result<Duration> {
        non_zero(&self.metrics_interval, "metrics_interval")
    }

    pub fn processor_settings(&self) -> anyhow::Result<ProcessorSettings> {
        Ok(ProcessorSettings {
            shadow_table_prefix: self.shadow_table_prefix.clone(),
            retry: self.retry_policy()?,
            watermark_timeout: self.watermark_timeout()?,
            source_write_timeout: self.source_write_timeout()?,
        })
    }

    pub fn load_catalog(&self) -> anyhow::Result<SchemaCatalog> {
        SchemaCatalog::from_file(&self.catalog_path).with_context(|| {
            format!(
                "Failed to load schema catalog: {}",
                self.catalog_path.display()
            )
        })
    }

    pub fn load_overrides(&self) -> anyhow::Result<Option<OverrideMap>> {
        let Some(path) = &self.overrides_path else {
            return Ok(None);
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read overrides file: {}", path.display()))?;
        let overrides = OverrideMap::from_json_str(&content)
            .with_context(|| format!("Invalid overrides file: {}", path.display()))?;
        Ok(Some(overrides))
    }

    pub fn load_shards(&self) -> anyhow::Result<Vec<ShardDescriptor>> {
        let content = std::fs::read_to_string(&self.shards_path).with_context(|| {
            format!("Failed to read shards file: {}", self.shards_path.display())
        })?;
        let shards = ShardDescriptor::list_from_json_str(&content)
            .with_context(|| format!("Invalid shards file: {}", self.shards_path.display()))?;
        if shards.is_empty() {
            anyhow::bail!("No shards configured in {}", self.shards_path.display());
        }
        Ok(shards)
    }
}

fn non_zero(value: &str, field: &str) -> anyhow::Result<Duration> {
    let duration = parse_duration(value).with_context(|| format!("Invalid {field}"))?;
    if duration.is_zero() {
        anyhow::bail!("{field} must be greater than zero");
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
catalog_path = "catalog.yaml"
shards_path = "shards.json"
"#;

    #[test]
    fn test_defaults() {
        let config = ReverseSyncConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.shadow_table_prefix, "shadow_");
        assert_eq!(config.workers, 4);
        assert_eq!(config.failure_policy, FailurePolicy::DeadLetter);
        assert!(config.watermark_store.is_none());
        assert!(config.overrides_path.is_none());

        let retry = config.retry_policy().unwrap();
        assert_eq!(retry.max_attempts(), 5);
        assert_eq!(retry.base_delay(), Duration::from_millis(100));
        assert_eq!(retry.max_delay(), Duration::from_secs(5));
        assert_eq!(config.watermark_timeout().unwrap(), Duration::from_secs(10));
        assert_eq!(
            config.source_write_timeout().unwrap(),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.timezone_offset().unwrap(),
            FixedOffset::east_opt(0).unwrap()
        );
    }

    #[test]
    fn test_full_config() {
        let config = ReverseSyncConfig::from_toml_str(
            r#"
shadow_table_prefix = "rev_"
source_db_timezone_offset = "+05:30"
workers = 8
failure_policy = "fail_fast"
catalog_path = "catalog.json"
overrides_path = "overrides.json"
shards_path = "shards.json"
dead_letter_dir = "/tmp/dl"

[retry]
max_attempts = 3
base_delay = "50ms"
max_delay = "1s"

[timeouts]
watermark = "2s"
source_write = "1m"

[watermark_store]
connection_string = "host=localhost user=postgres"
"#,
        )
        .unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.workers, 8);
        assert_eq!(
            config.timezone_offset().unwrap(),
            FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap()
        );
        let settings = config.processor_settings().unwrap();
        assert_eq!(settings.shadow_table_prefix, "rev_");
        assert_eq!(settings.retry.max_attempts(), 3);
        assert_eq!(settings.source_write_timeout, Duration::from_secs(60));
        assert_eq!(
            config.watermark_store.unwrap().connection_string,
            "host=localhost user=postgres"
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_offset = format!("{MINIMAL}\nsource_db_timezone_offset = \"+25:00\"");
        assert!(ReverseSyncConfig::from_toml_str(&bad_offset).is_err());

        let zero_workers = format!("{MINIMAL}\nworkers = 0");
        assert!(ReverseSyncConfig::from_toml_str(&zero_workers).is_err());

        let bad_retry = format!("{MINIMAL}\n[retry]\nbase_delay = \"10s\"\nmax_delay = \"1s\"");
        assert!(ReverseSyncConfig::from_toml_str(&bad_retry).is_err());

        let bad_policy = format!("failure_policy = \"retry_forever\"\n{MINIMAL}");
        assert!(ReverseSyncConfig::from_toml_str(&bad_policy).is_err());
    }

    #[test]
    fn test_zero_durations_rejected() {
        for zero in ["0", "0s", "0ms"] {
            let interval = format!("{MINIMAL}\nmetrics_interval = \"{zero}\"");
            let err = ReverseSyncConfig::from_toml_str(&interval).unwrap_err();
            assert!(format!("{err:#}").contains("metrics_interval"));

            let watermark = format!("{MINIMAL}\n[timeouts]\nwatermark = \"{zero}\"");
            assert!(ReverseSyncConfig::from_toml_str(&watermark).is_err());

            let write = format!("{MINIMAL}\n[timeouts]\nsource_write = \"{zero}\"");
            assert!(ReverseSyncConfig::from_toml_str(&write).is_err());
        }

        let zero_backoff = format!("{MINIMAL}\n[retry]\nbase_delay = \"0ms\"");
        assert!(ReverseSyncConfig::from_toml_str(&zero_backoff).is_ok());
    }

    #[test]
    fn test_from_file_and_loaders() {
        let dir = tempfile::tempdir().unwrap();
        let shards = dir.path().join("shards.json");
        std::fs::write(
            &shards,
            r#"[{"logicalShardId":"shardA","host":"db-a","port":3306,"user":"root","dbName":"app"}]"#,
        )
        .unwrap();
        let overrides = dir.path().join("overrides.json");
        std::fs::write(&overrides, r#"{"renamedTables":{"Users":"people"}}"#).unwrap();

        let config_path = dir.path().join("reverse-sync.toml");
        std::fs::write(
            &config_path,
            format!(
                "catalog_path = \"catalog.yaml\"\nshards_path = {:?}\noverrides_path = {:?}\n",
                shards.display().to_string(),
                overrides.display().to_string()
            ),
        )
        .unwrap();

        let config = ReverseSyncConfig::from_file(&config_path).unwrap();
        let loaded = config.load_shards().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].logical_shard_id, "shardA");
        let overrides = config.load_overrides().unwrap().unwrap();
        assert_eq!(overrides.table_override_or_default("Users"), "people");
        assert!(config.load_catalog().is_err());
    }
}
