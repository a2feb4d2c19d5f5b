//! Command-line interface for reverse-sync
//!
//! # Usage Examples
//!
//! ```bash
//! # Create the watermark shadow tables in the migrated database
//! reverse-sync shadow-tables --config reverse-sync.toml
//!
//! # Replay change records onto the source shards
//! reverse-sync apply --config reverse-sync.toml --events changes.jsonl
//!
//! # Replay against in-memory stores to check mapping and routing
//! reverse-sync apply --config reverse-sync.toml --events changes.jsonl --dry-run
//! ```
//!
//! Logging is controlled with `RUST_LOG` (default `reverse_sync=info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use reverse_core::{ChangeEvent, OverrideMap, SchemaCatalog};
use reverse_sync::events::open_event_stream;
use reverse_sync::{
    DeadLetterSink, EventProcessor, FailurePolicy, JsonlDeadLetterSink, MemoryDeadLetterSink,
    Pipeline, ProcessorMetrics, ProcessorSettings, ReverseSyncConfig,
};
use source_writer::testing::MemorySink;
use source_writer::{ShardRouter, SourceSink};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use watermark::{MemoryWatermarkStore, PostgresWatermarkStore, WatermarkStore};

#[derive(Parser)]
#[command(name = "reverse-sync")]
#[command(about = "Replicate migrated-database change streams back to sharded source databases")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSONL file of change events onto the source shards
    Apply {
        /// Path to the TOML configuration file
        #[arg(long, env = "REVERSE_SYNC_CONFIG")]
        config: PathBuf,

        /// JSONL file of change records (one per line)
        #[arg(long)]
        events: PathBuf,

        /// Use in-memory watermark and source stores instead of real databases
        #[arg(long, default_value = "false")]
        dry_run: bool,

        /// Override the configured number of workers
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Create the shadow tables used for watermarks, if missing
    ShadowTables {
        /// Path to the TOML configuration file
        #[arg(long, env = "REVERSE_SYNC_CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("reverse_sync=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Apply {
            config,
            events,
            dry_run,
            workers,
        } => {
            let mut config = ReverseSyncConfig::from_file(&config)?;
            if let Some(workers) = workers {
                config.workers = workers.max(1);
            }
            run_apply(config, &events, dry_run).await?;
        }
        Commands::ShadowTables { config } => {
            let config = ReverseSyncConfig::from_file(&config)?;
            run_shadow_tables(config).await?;
        }
    }

    Ok(())
}

async fn run_shadow_tables(config: ReverseSyncConfig) -> anyhow::Result<()> {
    let catalog = config.load_catalog()?;
    let store = connect_watermark_store(&config).await?;
    store
        .ensure_shadow_tables(&config.shadow_table_prefix, catalog.tables())
        .await
        .context("Failed to create shadow tables")?;
    info!(
        "Shadow tables ready for {} table(s)",
        catalog.tables().len()
    );
    Ok(())
}

async fn connect_watermark_store(config: &ReverseSyncConfig) -> anyhow::Result<PostgresWatermarkStore> {
    let settings = config
        .watermark_store
        .as_ref()
        .context("[watermark_store] connection_string is required")?;
    PostgresWatermarkStore::connect(&settings.connection_string)
        .await
        .context("Failed to connect to the watermark store")
}

async fn run_apply(config: ReverseSyncConfig, events: &Path, dry_run: bool) -> anyhow::Result<()> {
    let shards = config.load_shards()?;
    let shutdown = CancellationToken::new();
    install_shutdown_handler(shutdown.clone());

    if dry_run {
        info!("Dry run: using in-memory watermark and source stores");
        let router = ShardRouter::new(
            shards
                .iter()
                .map(|shard| (shard.logical_shard_id.clone(), MemorySink::new())),
        );
        let dead_letters = (config.failure_policy == FailurePolicy::DeadLetter)
            .then(|| Arc::new(MemoryDeadLetterSink::new()) as Arc<dyn DeadLetterSink>);
        return replay(
            &config,
            events,
            MemoryWatermarkStore::new(),
            router,
            dead_letters,
            shutdown,
        )
        .await;
    }

    let offset = config.timezone_offset()?;
    let dead_letters: Option<Arc<dyn DeadLetterSink>> =
        if config.failure_policy == FailurePolicy::DeadLetter {
            Some(Arc::new(
                JsonlDeadLetterSink::open(&config.dead_letter_dir).await?,
            ))
        } else {
            None
        };
    let store = connect_watermark_store(&config).await?;
    let router = ShardRouter::connect_mysql(&shards, offset)
        .await
        .context("Failed to connect to source shards")?;
    replay(&config, events, store, router, dead_letters, shutdown).await
}

async fn replay<W, S>(
    config: &ReverseSyncConfig,
    events: &Path,
    store: W,
    router: ShardRouter<S>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    W: WatermarkStore + 'static,
    S: SourceSink + 'static,
{
    let router = Arc::new(router);
    // Any setup failure from here on must still release the shard connections.
    let prepared = match prepare(config, events).await {
        Ok(prepared) => prepared,
        Err(e) => {
            if let Err(release) = router.shutdown().await {
                warn!("Failed to release shard connections: {release}");
            }
            return Err(e);
        }
    };

    let metrics = ProcessorMetrics::new();
    let processor = Arc::new(EventProcessor::new(
        Arc::new(prepared.catalog),
        prepared.overrides.map(Arc::new),
        Arc::new(store),
        router,
        prepared.settings,
        metrics.clone(),
    ));

    let mut pipeline = Pipeline::new(processor, config.workers, config.failure_policy);
    if let Some(sink) = dead_letters {
        pipeline = pipeline.with_dead_letter_sink(sink);
    }

    let emission_stop = shutdown.child_token();
    let emission = metrics.start_emission_task(prepared.metrics_interval, emission_stop.clone());

    info!(
        "Replaying {} with {} worker(s), failure policy {:?}",
        events.display(),
        config.workers,
        config.failure_policy
    );
    let report = pipeline.run(prepared.stream, shutdown.clone()).await;

    emission_stop.cancel();
    let _ = emission.await;

    let rejected = prepared.rejected.load(Ordering::Relaxed);
    if rejected > 0 {
        warn!("{rejected} line(s) of {} could not be parsed", events.display());
    }
    info!(
        "Metrics: {}",
        serde_json::to_string(&metrics.snapshot()).unwrap_or_default()
    );
    if shutdown.is_cancelled() && report.unprocessed > 0 {
        warn!(
            "Interrupted with {} event(s) not processed; they were not acknowledged",
            report.unprocessed
        );
    }
    report.into_result()?;
    Ok(())
}

/// Everything loaded from disk before the pipeline starts.
struct Prepared<St> {
    catalog: SchemaCatalog,
    overrides: Option<OverrideMap>,
    settings: ProcessorSettings,
    metrics_interval: Duration,
    stream: St,
    rejected: Arc<AtomicU64>,
}

async fn prepare<'a>(
    config: &ReverseSyncConfig,
    events: &'a Path,
) -> anyhow::Result<Prepared<impl Stream<Item = ChangeEvent> + Send + use<'a>>> {
    let catalog = config.load_catalog()?;
    let overrides = config.load_overrides()?;
    let settings = config.processor_settings()?;
    let metrics_interval = config.metrics_interval()?;
    let (stream, rejected) = open_event_stream(events).await?;
    Ok(Prepared {
        catalog,
        overrides,
        settings,
        metrics_interval,
        stream,
        rejected,
    })
}

/// Cancel `shutdown` on Ctrl+C.
fn install_shutdown_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt signal (Ctrl+C), finishing in-flight events");
                shutdown.cancel();
            }
            Err(e) => warn!("Failed to install Ctrl+C handler: {e}"),
        }
    });
}
