//! HTTP request handlers.
//!
//! - [`map`]: POST /generate and XYZ tiles
//! - [`layers`]: layer catalog
//! - [`health`]: health and capabilities
//! - [`metrics`]: Prometheus export and client metric intake

pub mod common;
pub mod health;
pub mod layers;
pub mod map;
pub mod metrics;

pub use common::{image_response, ApiError};
pub use health::{capabilities_handler, health_handler};
pub use layers::{get_layer_handler, list_layers_handler};
pub use map::{generate_handler, tile_handler};
pub use metrics::{client_metrics_handler, prometheus_handler};
