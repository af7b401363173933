//! Vector map rendering service.
//!
//! Serves rendered map images and XYZ tiles from a SQLite geometry store,
//! with a coalescing in-memory render cache in front of the renderer.

pub mod config;
pub mod engine;
pub mod handlers;
pub mod metrics;
pub mod state;

use axum::{
    extract::{DefaultBodyLimit, Extension},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub use config::ServerConfig;
pub use engine::{RenderEngine, RenderResult, RenderSettings};
pub use state::AppState;

/// Build the HTTP router over shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.server.max_request_size;

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/capabilities", get(handlers::capabilities_handler))
        .route("/layers", get(handlers::list_layers_handler))
        .route("/layers/:id", get(handlers::get_layer_handler))
        .route("/generate", post(handlers::generate_handler))
        .route("/tile/:z/:x/:y", get(handlers::tile_handler))
        .route(
            "/metrics",
            get(handlers::prometheus_handler).post(handlers::client_metrics_handler),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive()),
        )
        // Enforced by the `Bytes` extractor, outside the compression layer's body type.
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(Extension(state))
}
