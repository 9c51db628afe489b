//! pokemon-sync - Resilient periodic synchronization of PokeAPI records
//!
//! This is the main entry point for the pokemon-sync application.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pokemon_sync::cache::{CacheStore, MemoryCache, RedisCache};
use pokemon_sync::config::{CacheBackend, Config};
use pokemon_sync::database::{PokemonStore, SqliteDatabase};
use pokemon_sync::server::{AppState, Server};
use pokemon_sync::service::PokemonService;
use pokemon_sync::sync::{
    CircuitBreaker, JobScheduler, PokeApiClient, RefreshJob, RetryManager, RetryPolicy,
    SyncOrchestrator,
};
use pokemon_sync::telemetry::init_tracing;

/// pokemon-sync - Resilient periodic synchronization of PokeAPI records
#[derive(Parser, Debug)]
#[command(name = "pokemon-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "POKEMON_SYNC_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;

    // Initialize tracing/logging
    init_tracing(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting pokemon-sync");

    // Initialize database
    let store: Arc<dyn PokemonStore> = Arc::new(SqliteDatabase::new(&config.database.path).await?);
    info!(path = %config.database.path, "Database initialized");

    // Initialize cache
    let cache: Arc<dyn CacheStore> = match (config.cache.backend, &config.cache.redis) {
        (CacheBackend::Redis, Some(redis_config)) => {
            let cache = RedisCache::connect(redis_config).await?;
            info!(prefix = %cache.prefix(), "Redis cache initialized");
            Arc::new(cache)
        }
        _ => {
            info!("In-memory cache initialized");
            Arc::new(MemoryCache::new())
        }
    };

    let shutdown = CancellationToken::new();

    // Sync pipeline
    let source = Arc::new(PokeApiClient::new(&config.source)?);
    info!(base_url = %source.base_url(), "Source client initialized");

    let orchestrator = Arc::new(SyncOrchestrator::new(
        source,
        Arc::clone(&store),
        Arc::clone(&cache),
        &config.sync,
    ));
    let breaker = Arc::new(CircuitBreaker::from_config(&config.circuit_breaker));
    let retry = RetryManager::new(RetryPolicy::from(&config.retry));
    let refresh_job = Arc::new(RefreshJob::new(
        Arc::clone(&orchestrator),
        breaker,
        retry,
        config.sync.overlap,
        shutdown.clone(),
    ));

    // Scheduler
    let scheduler = JobScheduler::new();
    scheduler
        .add_job(&config.sync.job_name, &config.sync.cadence, refresh_job.handler())
        .await?;
    scheduler.start().await;

    if config.sync.run_on_startup {
        let job = Arc::clone(&refresh_job);
        tokio::spawn(async move {
            job.execute().await;
        });
    }

    // Create application state
    let service = Arc::new(PokemonService::new(
        store,
        Arc::clone(&cache),
        orchestrator,
        refresh_job,
        config.cache.ttl(),
        shutdown.clone(),
    ));
    let state = AppState {
        service,
        scheduler: scheduler.clone(),
        cache,
    };

    // Create and start the HTTP server
    let server = Server::new(config.server.clone(), state).with_cancellation(shutdown.clone());

    info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting HTTP server"
    );

    // Run the server
    let result = server.run(shutdown_signal()).await;
    if let Err(e) = &result {
        error!(error = %e, "HTTP server failed");
    }

    // The token is already cancelled on a signal; a server error needs it too
    shutdown.cancel();
    scheduler.stop().await;

    info!("pokemon-sync shutdown complete");

    result.map_err(Into::into)
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
