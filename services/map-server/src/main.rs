//! Map server binary.
//!
//! Loads configuration, opens the geometry store and serves the HTTP API.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use map_server::{build_router, AppState, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "map-server")]
#[command(about = "Vector map rendering server")]
struct Args {
    /// YAML or JSON configuration file
    #[arg(short, long, env = "MAP_SERVER_CONFIG")]
    config: Option<PathBuf>,

    /// Listen host (overrides server.host)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database path (overrides database.path)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log level or filter directive (overrides log.level)
    #[arg(long)]
    log_level: Option<String>,

    /// Human-readable logs instead of JSON
    #[arg(long)]
    plain_logs: bool,

    /// Number of tokio worker threads (overrides server.worker_threads)
    #[arg(long)]
    worker_threads: Option<usize>,

    /// Create the schema and load the demo dataset before serving
    #[arg(long)]
    seed_demo: bool,
}

impl Args {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(path) = &self.database {
            config.database.path = path.clone();
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        if self.plain_logs {
            config.log.json = false;
        }
        if let Some(threads) = self.worker_threads {
            config.server.worker_threads = threads;
        }
    }
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.worker_threads)
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(async_main(config, args.seed_demo))
}

fn init_tracing(config: &ServerConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.level))
        .context("Invalid log level")?;

    if config.log.json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

async fn async_main(config: ServerConfig, seed_demo: bool) -> Result<()> {
    init_tracing(&config)?;

    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    info!("Prometheus metrics exporter initialized");

    let addr = config.bind_addr()?;
    let ttl = config.cache_ttl();
    info!(
        database = %config.database.path.display(),
        pool_size = config.database.connection_pool_size,
        cache_items = config.cache.memory_max_items,
        worker_threads = config.server.worker_threads,
        "Starting map server"
    );

    let state = Arc::new(
        AppState::new(config, seed_demo)
            .await?
            .with_prometheus(prometheus_handle),
    );

    // Expired entries are otherwise only dropped when looked up again.
    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ttl.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            let purged = engine.purge_expired();
            if purged > 0 {
                info!(purged = purged, "Purged expired render cache entries");
            }
        }
    });

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(address = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
