//! Map generation and XYZ tiles.

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

use map_common::{MapError, MapRequestBody, TileCoord};

use super::common::{image_response, ApiError};
use crate::state::AppState;

/// POST /generate
///
/// An empty body renders the default request: world extent, 1024x768 on white.
#[instrument(skip(state, body), fields(body_len = body.len()))]
pub async fn generate_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> Response {
    state.metrics.record_map_request();
    match generate(&state, &body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn generate(state: &AppState, body: &[u8]) -> Result<Response, ApiError> {
    let parsed: MapRequestBody = if body.iter().all(u8::is_ascii_whitespace) {
        MapRequestBody::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|e| MapError::invalid_param("body", format!("malformed JSON: {}", e)))?
    };
    let request = parsed.into_request()?;
    let bbox = request.bbox;
    let result = state.engine.render(request).await?;
    Ok(image_response(&result, &bbox))
}

#[derive(Debug, Default, Deserialize)]
pub struct TileQuery {
    /// Comma-separated layer ids; the whole catalog when absent.
    pub layers: Option<String>,
}

/// GET /tile/:z/:x/:y.png
pub async fn tile_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((z, x, y)): Path<(String, String, String)>,
    Query(query): Query<TileQuery>,
) -> Response {
    state.metrics.record_tile_request();
    match tile(&state, &z, &x, &y, query).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn tile(
    state: &AppState,
    z: &str,
    x: &str,
    y: &str,
    query: TileQuery,
) -> Result<Response, ApiError> {
    let coord = parse_tile_path(z, x, y)?;
    let layers = query.layers.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect::<Vec<_>>()
    });
    let result = state.engine.render_tile(coord, layers).await?;
    Ok(image_response(&result, &coord.bbox_wgs84()))
}

/// Parse `z`, `x` and `y` path segments; `y` may carry a `.png` suffix.
pub fn parse_tile_path(z: &str, x: &str, y: &str) -> Result<TileCoord, MapError> {
    let y = y.strip_suffix(".png").unwrap_or(y);
    let number = |name: &str, raw: &str| -> Result<u32, MapError> {
        raw.parse::<u32>()
            .map_err(|_| MapError::InvalidTile(format!("{} must be a non-negative integer, got {:?}", name, raw)))
    };
    let coord = TileCoord::new(number("z", z)?, number("x", x)?, number("y", y)?);
    coord.validate()?;
    Ok(coord)
}
