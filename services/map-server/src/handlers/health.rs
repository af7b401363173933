//! Health and capabilities descriptors.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use map_common::request::MAX_LAYERS_PER_REQUEST;
use map_common::tile::MAX_ZOOM;
use map_common::{ImageFormat, TILE_SIZE};
use storage::{PoolStats, RenderCacheStats};

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Healthy needs a reachable store, a real catalog and a full pool.
pub fn classify(store_healthy: bool, catalog_degraded: bool, pool: &PoolStats) -> HealthStatus {
    if !store_healthy {
        HealthStatus::Unhealthy
    } else if catalog_degraded || pool.live < pool.capacity {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

#[derive(Debug, Serialize)]
struct HealthDetails {
    database: &'static str,
    catalog_source: &'static str,
    layers: usize,
    pool: PoolStats,
    cache: RenderCacheStats,
    queries: u64,
    fallback_responses: u64,
    skipped_rows: u64,
}

/// GET /health
pub async fn health_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let store_healthy = state.store.is_healthy().await;
    let catalog = state.store.list_layers().await;
    let store_stats = state.store.stats();
    let status = classify(store_healthy, catalog.is_degraded(), &store_stats.pool);

    let details = HealthDetails {
        database: if store_healthy { "connected" } else { "unreachable" },
        catalog_source: catalog.source.as_str(),
        layers: catalog.layers.len(),
        pool: store_stats.pool,
        cache: state.engine.cache().stats(),
        queries: store_stats.queries,
        fallback_responses: store_stats.fallback_responses,
        skipped_rows: store_stats.skipped_rows,
    };
    let body = json!({
        "status": status,
        "details": details,
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
        "version": env!("CARGO_PKG_VERSION"),
    });

    let code = if status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(body)).into_response()
}

/// GET /capabilities
pub async fn capabilities_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let catalog = state.store.list_layers().await;
    let limits = state.engine.settings().limits;
    let config = &state.config;

    let layers: Vec<Value> = catalog
        .layers
        .iter()
        .map(|layer| {
            json!({
                "id": layer.id,
                "name": layer.name,
                "type": layer.geometry_type.as_str(),
                "bounds": layer.bounds.to_array(),
            })
        })
        .collect();
    let formats: Vec<&str> = ImageFormat::ALL.iter().map(|f| f.mime_type()).collect();

    Json(json!({
        "service": {
            "name": "map-server",
            "title": "Vector Map Rendering Service",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "limits": {
            "max_width": limits.max_width,
            "max_height": limits.max_height,
            "max_features": limits.max_features,
            "max_layers": MAX_LAYERS_PER_REQUEST,
            "render_timeout_ms": config.limits.render_timeout_ms,
        },
        "formats": formats,
        "projections": ["EPSG:4326"],
        "tiles": {
            "size": TILE_SIZE,
            "max_zoom": MAX_ZOOM,
            "url_template": "/tile/{z}/{x}/{y}.png",
        },
        "cache": {
            "memory_max_items": config.cache.memory_max_items,
            "ttl_seconds": config.cache.ttl_seconds,
            "disk": config.cache.disk_cache_dir.is_some(),
        },
        "catalog_source": catalog.source.as_str(),
        "layers": layers,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(live: usize) -> PoolStats {
        PoolStats {
            capacity: 5,
            live,
            ..PoolStats::default()
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(true, false, &pool(5)), HealthStatus::Healthy);
        assert_eq!(classify(true, true, &pool(5)), HealthStatus::Degraded);
        assert_eq!(classify(true, false, &pool(3)), HealthStatus::Degraded);
        assert_eq!(classify(false, false, &pool(0)), HealthStatus::Unhealthy);
    }
}
