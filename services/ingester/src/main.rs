//! Hydrologic time-series ingester.
//!
//! Loads PI-XML forecast or observation files into the WRES PostgreSQL
//! schema, partitioning forecast values by lead time, and prints one JSON
//! outcome per file.

mod config;
mod inputs;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use config::IngesterConfig;
use ingestion::{DataKind, FileOutcome, IngestContext, Ingester};
use storage::{Database, Store};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Forecast,
    Observation,
}

impl From<KindArg> for DataKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Forecast => DataKind::Forecast,
            KindArg::Observation => DataKind::Observation,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ingester")]
#[command(about = "Bulk loader for PI-XML hydrologic time series")]
struct Args {
    /// Configuration file path (environment variables are used when absent)
    #[arg(short, long, env = "INGESTER_CONFIG")]
    config: Option<PathBuf>,

    /// What the input files hold
    #[arg(short, long, value_enum, default_value = "forecast")]
    kind: KindArg,

    /// Files or directories to ingest
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Files ingested at once (overrides the configured value)
    #[arg(short, long)]
    parallelism: Option<usize>,

    /// Skip warming the identifier caches
    #[arg(long)]
    no_preload: bool,

    /// Log level
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let run_id = Uuid::new_v4();
    info!(run_id = %run_id, "Starting PI-XML ingester");

    let config = IngesterConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let kind = DataKind::from(args.kind);
    let parallelism = args.parallelism.unwrap_or(config.ingest.file_parallelism);

    let files = inputs::collect_inputs(&args.inputs)?;
    anyhow::ensure!(!files.is_empty(), "No PI-XML files found in the given inputs");
    info!(files = files.len(), kind = ?kind, parallelism = parallelism, "Collected input files");

    let database = Arc::new(
        Database::connect(&config.database.to_database_config())
            .await
            .context("Failed to connect to database")?,
    );
    if config.database.migrate {
        database.migrate().await.context("Failed to apply schema")?;
    }

    let store: Arc<dyn Store> = database.clone();
    let ctx = IngestContext::new(store, config.ingest.clone())?;

    if config.preload_caches && !args.no_preload {
        let loaded = ctx.preload().await?;
        info!(entries = loaded, "Preloaded identifier caches");
    }

    let ingester = Ingester::new(Arc::clone(&ctx), config.filters.clone());
    let outcomes = ingester.ingest_files(&files, kind, parallelism).await;

    for outcome in &outcomes {
        println!("{}", serde_json::to_string(outcome)?);
    }

    for (cache, stats) in ctx.caches.stats().await {
        info!(
            cache = cache,
            entries = stats.entries,
            hits = stats.hits,
            misses = stats.misses,
            evictions = stats.evictions,
            hit_rate = stats.hit_rate(),
            "Cache statistics"
        );
    }

    let rows: u64 = outcomes
        .iter()
        .map(|o| match o {
            FileOutcome::Ingested(result) => result.rows_written,
            _ => 0,
        })
        .sum();
    let failed = outcomes.iter().filter(|o| !o.is_success()).count();

    database.close().await;

    info!(
        run_id = %run_id,
        files = outcomes.len(),
        failed = failed,
        rows = rows,
        partitions = ?ctx.partitions.known_buckets().await,
        "Ingest run complete"
    );

    if failed > 0 {
        error!(failed = failed, "Some files were not ingested");
        anyhow::bail!("{} of {} files were not ingested", failed, outcomes.len());
    }

    Ok(())
}
