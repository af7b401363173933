//! Application state and shared resources.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tracing::{info, warn};

use renderer::StyleResolver;
use storage::{DiskCache, GeometryStore, OutputSink, RenderCache, SqliteGeometryStore};

use crate::config::ServerConfig;
use crate::engine::{RenderEngine, RenderSettings};
use crate::metrics::MetricsCollector;

/// Shared application state.
pub struct AppState {
    pub engine: Arc<RenderEngine>,
    pub store: Arc<dyn GeometryStore>,
    pub metrics: Arc<MetricsCollector>,
    pub config: Arc<ServerConfig>,
    pub prometheus: Option<PrometheusHandle>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Open the database pool and caches described by `config`.
    ///
    /// An unreachable database does not fail startup; the server comes up
    /// degraded and reports it through `/health`.
    pub async fn new(config: ServerConfig, seed_demo: bool) -> Result<Self> {
        let sqlite = SqliteGeometryStore::open(&config.pool_config()).await;
        if let Err(e) = sqlite.migrate().await {
            warn!(error = %e, "Could not create the geometry schema");
        }
        if seed_demo {
            let count = storage::seed_demo(&sqlite)
                .await
                .context("Failed to seed the demo dataset")?;
            info!(features = count, "Demo dataset ready");
        }
        let store: Arc<dyn GeometryStore> = Arc::new(sqlite);

        let styles = match &config.styles_path {
            Some(path) => {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read style sheet {}", path.display()))?;
                StyleResolver::default()
                    .with_json(&raw)
                    .with_context(|| format!("Invalid style sheet {}", path.display()))?
            }
            None => StyleResolver::default(),
        };

        let mut engine = Self::build_engine(Arc::clone(&store), &config).with_styles(styles);
        if let Some(dir) = &config.cache.disk_cache_dir {
            match DiskCache::open(dir, config.cache_ttl()).await {
                Ok(disk) => engine = engine.with_disk_cache(disk),
                Err(e) => warn!(dir = %dir.display(), error = %e, "Disk cache disabled"),
            }
        }
        if let Some(dir) = &config.output_dir {
            engine = engine.with_output(OutputSink::new(dir));
        }

        Ok(Self::from_parts(engine, store, config))
    }

    /// Engine over `store` with the memory cache, limits and encoder from `config`.
    pub fn build_engine(store: Arc<dyn GeometryStore>, config: &ServerConfig) -> RenderEngine {
        let cache = Arc::new(RenderCache::new(
            config.cache.memory_max_items,
            config.cache_ttl(),
        ));
        let settings = RenderSettings {
            limits: config.render_limits(),
            png: config.png_options(),
            render_timeout: config.render_timeout(),
        };
        RenderEngine::new(store, cache, settings)
    }

    pub fn from_parts(
        engine: RenderEngine,
        store: Arc<dyn GeometryStore>,
        config: ServerConfig,
    ) -> Self {
        Self {
            metrics: Arc::clone(engine.metrics()),
            engine: Arc::new(engine),
            store,
            config: Arc::new(config),
            prometheus: None,
            started_at: Utc::now(),
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}
