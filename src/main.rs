//! chatlake: land chat-bot updates, build the daily enriched partition and
//! query it through a remote SQL engine.
//!
//! Each stage of the daily schedule is its own subcommand so an external
//! scheduler can chain them; `run` chains them in-process.

use bytes::Bytes;
use clap::{Parser, Subcommand};
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use chatlake::error::{
    AddressParseSnafu, ConfigSnafu, MetricsSnafu, PayloadJsonSnafu,
    PayloadReadSnafu, PipelineError, PipelineStorageSnafu, QueriesFailedSnafu, QuerySnafu,
};
use chatlake::source::UpdatesFile;
use chatlake::storage::PartitionScheme;
use chatlake::{
    Config, EtlOutcome, EtlPipeline, IngestOutcome, QueryClient, QueryOutcome, QueryRunner,
    RawLanding, StorageProvider, TableDefinition, TableManager, shutdown_token, until_shutdown,
};

/// Chat-bot updates to Parquet lake tool.
#[derive(Parser, Debug)]
#[command(name = "chatlake")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without touching any store or engine.
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Land an updates payload in today's raw partition.
    Ingest {
        /// Payload file, or "-" for stdin.
        payload: PathBuf,
    },
    /// Normalize the due raw partition into one enriched Parquet file.
    Etl,
    /// Create the analytical table if the catalog lacks it.
    EnsureTable,
    /// Run the configured analytical queries.
    Query,
    /// Optionally ingest, then etl, ensure-table and query in order.
    Run {
        /// Payload to ingest before the ETL.
        #[arg(long)]
        payload: Option<PathBuf>,
    },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("chatlake starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Raw store: {}", config.storage.raw.url);
        info!("Enriched store: {}", config.storage.enriched.url);
        info!(
            "Partitions: {}/context_date=<date> at UTC{:+}, {} day(s) back",
            config.partition.root, config.partition.utc_offset_hours, config.partition.lookback_days
        );
        info!("Query engine: {}", config.query_engine.endpoint);
        info!("Table: {} at {}", config.table.name, config.table_location());
        info!("Queries: {}", config.queries.len());
        info!("Configuration is valid");
        return Ok(());
    }

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        chatlake::metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    let shutdown = shutdown_token();

    match args.command {
        Command::Ingest { payload } => ingest(&config, &payload, &shutdown).await,
        Command::Etl => etl(&config, &shutdown).await,
        Command::EnsureTable => ensure_table(&config, &shutdown).await,
        Command::Query => query(&config, &shutdown).await,
        Command::Run { payload } => {
            if let Some(payload) = payload {
                ingest(&config, &payload, &shutdown).await?;
            }
            etl(&config, &shutdown).await?;
            ensure_table(&config, &shutdown).await?;
            query(&config, &shutdown).await
        }
    }
}

async fn ingest(
    config: &Config,
    payload: &Path,
    shutdown: &CancellationToken,
) -> Result<(), PipelineError> {
    let body = read_payload(payload).await?;
    let updates: UpdatesFile = serde_json::from_slice(&body).context(PayloadJsonSnafu)?;

    let raw = StorageProvider::for_url_with_options(
        &config.storage.raw.url,
        config.storage.raw.storage_options.clone(),
    )
    .await
    .context(PipelineStorageSnafu)?;
    let landing = RawLanding::new(
        Arc::new(raw),
        PartitionScheme::from_config(&config.partition),
    );

    match until_shutdown("ingest", shutdown, landing.ingest(&updates)).await? {
        IngestOutcome::Written { key } => info!("Landed payload at {}", key),
        IngestOutcome::NoData => info!("Payload held no updates"),
    }
    Ok(())
}

async fn read_payload(path: &Path) -> Result<Bytes, PipelineError> {
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context(PayloadReadSnafu)?;
        return Ok(Bytes::from(buf));
    }
    let buf = tokio::fs::read(path).await.context(PayloadReadSnafu)?;
    Ok(Bytes::from(buf))
}

async fn etl(config: &Config, shutdown: &CancellationToken) -> Result<(), PipelineError> {
    let pipeline = EtlPipeline::from_config(config).await?;
    let run = until_shutdown("etl", shutdown, pipeline.run()).await?;

    match &run.outcome {
        EtlOutcome::NoInput => info!("No raw files under {}", run.partition),
        EtlOutcome::NoData => warn!("Raw files under {} held no records", run.partition),
        EtlOutcome::Written(file) => {
            info!("ETL completed successfully");
            info!("  Enriched file: {}", file.key);
            info!("  Records written: {}", file.record_count);
            info!("  Bytes written: {}", file.size);
        }
    }
    info!("  Files listed: {}", run.stats.files_listed);
    info!("  Files skipped: {}", run.stats.files_skipped);
    info!("  Records skipped: {}", run.stats.records_skipped);
    Ok(())
}

async fn ensure_table(config: &Config, shutdown: &CancellationToken) -> Result<(), PipelineError> {
    let client = QueryClient::from_config(&config.query_engine).context(QuerySnafu)?;
    let definition = TableDefinition::chat(&config.table.name, config.table_location());
    let status = TableManager::new(client, definition)
        .ensure_table_exists(shutdown)
        .await
        .context(QuerySnafu)?;
    info!("Table {}: {:?}", config.table.name, status);
    Ok(())
}

async fn query(config: &Config, shutdown: &CancellationToken) -> Result<(), PipelineError> {
    if config.queries.is_empty() {
        warn!("No queries configured");
        return Ok(());
    }

    let client = QueryClient::from_config(&config.query_engine).context(QuerySnafu)?;
    let outcomes = QueryRunner::new(client)
        .run_queries(&config.queries, shutdown)
        .await;

    for (index, outcome) in outcomes.iter().enumerate() {
        println!("-- query {}: {}", index + 1, outcome.query().trim());
        match outcome {
            QueryOutcome::Succeeded { rows, .. } => {
                for row in rows {
                    println!("{}", row.join("\t"));
                }
            }
            QueryOutcome::Failed { reason, .. } => println!("FAILED: {reason}"),
        }
    }

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    ensure!(
        failed == 0,
        QueriesFailedSnafu {
            failed,
            total: outcomes.len()
        }
    );
    Ok(())
}
