//! YouTube Gateway
//!
//! Command line entry point: runs the service or single maintenance steps.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use youtube_gateway::config::Config;
use youtube_gateway::harvester::{Harvester, IngestionJob, SearchSettings};
use youtube_gateway::http_client::{HttpClientConfig, ResilientHttpClient};
use youtube_gateway::keys::{self, KeyRotator, KeyValidator};
use youtube_gateway::query::VideoQueryService;
use youtube_gateway::scheduler::PeriodicTask;
use youtube_gateway::server::{self, AppState};
use youtube_gateway::sources::{VideoSource, YouTubeSource};
use youtube_gateway::storage::Stores;

/// YouTube Gateway - video ingestion and search
#[derive(Parser, Debug)]
#[command(name = "youtube-gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Polls YouTube for new videos and serves browse/search over them")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the ingestion loop, the key rotation loop and the HTTP API
    Serve,

    /// Run a single ingestion tick
    Fetch,

    /// Run a single key rotation pass
    Rotate,

    /// Validate an API key and store it
    AddKey {
        /// The API key
        key: String,
    },

    /// Show key counts and catalog size
    Status,
}

/// Sets up structured logging with tracing
fn setup_logging(log_level: &str, json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

/// Resolves on SIGTERM/SIGINT
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

/// Everything the commands share
struct Components {
    config: Config,
    stores: Stores,
    source: Arc<dyn VideoSource>,
    validator: KeyValidator,
}

impl Components {
    async fn build(config: Config) -> Result<Self> {
        let http_config = HttpClientConfig {
            max_concurrent_requests: config.max_concurrent_requests,
            request_timeout: config.call_timeout(),
            max_retries: config.upstream_max_retries,
            ..Default::default()
        };
        let http_client = Arc::new(ResilientHttpClient::new(http_config)?);

        let source: Arc<dyn VideoSource> = Arc::new(YouTubeSource::new(
            http_client,
            &config.youtube_api_url,
            config.upstream_rate_limit_rpm,
        )?);

        let stores = Stores::connect(&config)
            .await
            .context("failed to connect to storage")?;

        Ok(Self {
            validator: KeyValidator::new(source.clone()),
            config,
            stores,
            source,
        })
    }

    fn harvester(&self) -> Harvester {
        Harvester::new(
            self.source.clone(),
            self.stores.clone(),
            SearchSettings::from_config(&self.config),
            self.config.call_timeout(),
        )
    }

    fn rotator(&self) -> KeyRotator {
        KeyRotator::new(
            self.stores.keys.clone(),
            self.validator.clone(),
            self.config.call_timeout(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs);

    let correlation_id = uuid::Uuid::new_v4().to_string();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        correlation_id = %correlation_id,
        "Starting YouTube Gateway"
    );

    let mut config = Config::load()?;
    config.validate()?;

    info!(
        query = %config.search_query(),
        storage_type = %config.storage_type,
        max_videos_fetched = config.max_videos_fetched,
        fetch_interval_secs = config.fetch_latest_videos_seconds,
        rotation_interval_mins = config.update_api_keys_expiration_minutes,
        "Configuration loaded"
    );

    let components = Components::build(config).await?;

    match cli.command {
        Commands::Serve => run_service(components).await?,
        Commands::Fetch => fetch_once(components).await?,
        Commands::Rotate => rotate_once(components).await?,
        Commands::AddKey { key } => add_key(components, &key).await?,
        Commands::Status => show_status(components).await?,
    }

    Ok(())
}

/// Runs both background loops and the HTTP API until a shutdown signal
async fn run_service(components: Components) -> Result<()> {
    let config = &components.config;
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let ingestion = PeriodicTask::new(IngestionJob::new(components.harvester()), config.fetch_interval());
    let rotation = PeriodicTask::new(components.rotator(), config.rotation_interval());
    info!(
        ingestion_every = ?ingestion.period(),
        rotation_every = ?rotation.period(),
        "Starting background loops"
    );
    let ingestion = ingestion.spawn(shutdown_tx.subscribe());
    let rotation = rotation.spawn(shutdown_tx.subscribe());

    let state = AppState {
        query: VideoQueryService::new(
            components.stores.videos.clone(),
            config.page_size(),
            config.call_timeout(),
        ),
        keys: components.stores.keys.clone(),
        validator: components.validator.clone(),
        call_timeout: config.call_timeout(),
        metrics_enabled: config.metrics_enabled,
    };
    let mut api = tokio::spawn(server::serve(config.bind_addr(), state, shutdown_tx.subscribe()));

    info!("YouTube Gateway running");

    let finished_early = tokio::select! {
        _ = shutdown_signal() => None,
        result = &mut api => Some(result),
    };

    let _ = shutdown_tx.send(());

    let api_result = match finished_early {
        Some(result) => {
            error!("HTTP server stopped unexpectedly");
            result
        }
        None => api.await,
    };

    let job = ingestion.await?;
    rotation.await?;
    info!(
        total_inserted = job.cursor().total_inserted,
        "YouTube Gateway stopped"
    );

    api_result??;
    Ok(())
}

/// Runs one ingestion tick with a fresh cursor
async fn fetch_once(components: Components) -> Result<()> {
    let mut task = PeriodicTask::new(
        IngestionJob::new(components.harvester()),
        components.config.fetch_interval(),
    );
    let outcome = task.step().await;

    println!("\nIngestion Tick");
    println!("==============");
    println!("Outcome: {}", outcome);
    let cursor = task.job().cursor();
    if let Some(key) = cursor.masked_key() {
        println!("Active key: {}", key);
    }
    if let Some(etag) = &cursor.etag {
        println!("Change token: {}", etag);
    }

    Ok(())
}

async fn rotate_once(components: Components) -> Result<()> {
    let report = components.rotator().rotate().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn add_key(components: Components, key: &str) -> Result<()> {
    keys::register_key(
        components.stores.keys.as_ref(),
        &components.validator,
        key,
        components.config.call_timeout(),
    )
    .await
    .context("failed to add API key")?;

    println!("API key added");
    Ok(())
}

async fn show_status(components: Components) -> Result<()> {
    let counts = components.stores.keys.key_counts().await?;
    let videos = components.stores.videos.video_count().await?;

    println!("\nYouTube Gateway Status");
    println!("======================\n");
    println!("Query:   {}", components.config.search_query());
    println!("Storage: {}", components.config.storage_type);
    println!("\nAPI keys:");
    println!("  valid:     {}", counts.valid);
    println!("  exhausted: {}", counts.exhausted);
    println!("\nVideos stored: {}", videos);

    Ok(())
}
