// SPDX-License-Identifier: Apache-2.0

//! Bestcrow escrow indexer
//!
//! ```text
//! chain logs ─► IngestionPipeline (one per chain/contract) ─► EscrowStore
//!                                                                │
//!                          HTTP API ◄── QueryService ◄───────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bestcrow_indexer::api::{create_api_router, ApiState};
use bestcrow_indexer::config::{Config, IndexerConfig};
use bestcrow_indexer::feed::UpdateFeed;
use bestcrow_indexer::metrics::IndexerMetrics;
use bestcrow_indexer::pipeline::{run_pipelines, EthLogSource, IngestionPipeline};
use bestcrow_indexer::query::QueryService;
use bestcrow_indexer::reconcile::{ContractEscrowReader, Reconciler};
use bestcrow_indexer::store::{rebuild, EscrowStore, InMemoryEscrowStore, PgEscrowStore};
use bestcrow_indexer::types::ChainScope;
use bestcrow_pg_db::{reset_database, Db, DbArgs};
use bestcrow_schema::MIGRATIONS;
use clap::{Parser, Subcommand};
use ethers::providers::{Http, Provider};
use ethers::types::Address;
use prometheus::Registry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[clap(rename_all = "kebab-case", author, version)]
struct Args {
    #[clap(env, long, default_value = "indexer.yaml")]
    config_path: PathBuf,
    #[command(flatten)]
    db_args: DbArgs,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Command {
    /// Ingest every configured pipeline and serve the API (default)
    Run,
    /// Re-derive one deployment's projection from its event log
    Rebuild {
        #[clap(long)]
        chain_id: u64,
        #[clap(long)]
        contract: Address,
    },
    /// Compare one deployment's projection with contract state and repair it
    Reconcile {
        #[clap(long)]
        chain_id: u64,
        #[clap(long)]
        contract: Address,
    },
    /// Apply database migrations
    Migrate {
        /// Drop all tables first
        #[clap(long)]
        reset: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = IndexerConfig::load(&args.config_path)
        .with_context(|| format!("Failed to load config {}", args.config_path.display()))?;
    config.validate().context("Invalid config")?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config, args.db_args).await,
        Command::Rebuild { chain_id, contract } => {
            let store = open_store(&config, &args.db_args).await?;
            let report = rebuild(store.as_ref(), ChainScope::new(chain_id, contract)).await?;
            info!(
                "[Main] Rebuild done: {} events, {} records, {} skipped",
                report.events, report.records, report.skipped
            );
            Ok(())
        }
        Command::Reconcile { chain_id, contract } => {
            let scope = ChainScope::new(chain_id, contract);
            let pipeline = config
                .pipeline(scope)
                .with_context(|| format!("No pipeline configured for {}", scope))?;
            let store = open_store(&config, &args.db_args).await?;
            let provider = Provider::<Http>::try_from(pipeline.rpc_url.as_str())
                .context("Invalid rpc url")?;
            let reader = ContractEscrowReader::new(contract, Arc::new(provider));
            let metrics = Arc::new(IndexerMetrics::new(&Registry::new()));
            let report = Reconciler::new(Arc::new(reader), store, metrics)
                .with_max_retry_duration(pipeline.max_retry_duration())
                .run(scope)
                .await?;
            info!("[Main] Reconcile done: {:?}", report);
            Ok(())
        }
        Command::Migrate { reset } => {
            let url = database_url(&config)?.context("database-url is not configured")?;
            if reset {
                reset_database(url, args.db_args, Some(&MIGRATIONS)).await?;
            } else {
                init_database(url, args.db_args).await?;
            }
            Ok(())
        }
    }
}

async fn run(config: IndexerConfig, db_args: DbArgs) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let registry = Registry::new();
    let metrics = Arc::new(IndexerMetrics::new(&registry));
    let store = open_store(&config, &db_args).await?;
    let feed = UpdateFeed::default();

    let query = Arc::new(QueryService::new(
        store.clone(),
        config.fees,
        feed.clone(),
        metrics.clone(),
    ));
    let mut handles = vec![
        start_api_server(
            config.api_address,
            ApiState::new(query, registry),
            cancel.clone(),
        )
        .await?,
    ];

    let mut pipelines = Vec::with_capacity(config.pipelines.len());
    for pipeline in &config.pipelines {
        let source = EthLogSource::new(&pipeline.rpc_url)
            .with_context(|| format!("Invalid rpc url for pipeline {}", pipeline.name()))?;
        if let Some(secs) = config.reconcile_interval_secs {
            let reader = ContractEscrowReader::new(pipeline.contract_address, source.provider());
            let reconciler = Reconciler::new(Arc::new(reader), store.clone(), metrics.clone())
                .with_max_retry_duration(pipeline.max_retry_duration());
            handles.push(tokio::spawn(reconciler.run_periodically(
                pipeline.scope(),
                Duration::from_secs(secs),
                cancel.clone(),
            )));
        }
        pipelines.push(IngestionPipeline::new(
            pipeline.clone(),
            Arc::new(source),
            store.clone(),
            metrics.clone(),
            feed.clone(),
        ));
    }
    handles.extend(run_pipelines(pipelines, cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("[Main] Shutting down, waiting for in-flight entries");
    cancel.cancel();
    futures::future::join_all(handles).await;
    Ok(())
}

fn database_url(config: &IndexerConfig) -> anyhow::Result<Option<Url>> {
    config
        .database_url
        .as_deref()
        .map(|url| Url::parse(url).context("Invalid database-url"))
        .transpose()
}

async fn init_database(database_url: Url, db_args: DbArgs) -> anyhow::Result<Db> {
    let db = Db::for_write(database_url, db_args).await?;
    db.run_migrations(&MIGRATIONS)
        .await
        .context("Failed to run database migrations")?;
    info!("[Main] Database migrations completed");
    Ok(db)
}

async fn open_store(
    config: &IndexerConfig,
    db_args: &DbArgs,
) -> anyhow::Result<Arc<dyn EscrowStore>> {
    match database_url(config)? {
        Some(url) => {
            let db = init_database(url, db_args.clone()).await?;
            Ok(Arc::new(PgEscrowStore::new(db)))
        }
        None => {
            warn!("[Main] No database-url configured, projection is kept in memory only");
            Ok(Arc::new(InMemoryEscrowStore::new()))
        }
    }
}

async fn start_api_server(
    addr: SocketAddr,
    state: Arc<ApiState>,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let app = create_api_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API address {}", addr))?;
    info!("[Main] API server listening on {}", addr);

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
        {
            tracing::error!("API server error: {:?}", e);
        }
    }))
}
