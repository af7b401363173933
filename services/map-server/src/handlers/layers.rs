//! Layer catalog endpoints.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::instrument;

use map_common::validate_layer_id;

use super::common::{ApiError, X_CATALOG_SOURCE};
use crate::state::AppState;

/// GET /layers
///
/// A catalog served from the built-in fallback carries `x-catalog-source: fallback`.
#[instrument(skip(state))]
pub async fn list_layers_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let catalog = state.store.list_layers().await;
    let mut headers = HeaderMap::new();
    headers.insert(
        X_CATALOG_SOURCE,
        HeaderValue::from_static(catalog.source.as_str()),
    );
    (StatusCode::OK, headers, Json(catalog.layers)).into_response()
}

/// GET /layers/:id
#[instrument(skip(state))]
pub async fn get_layer_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    validate_layer_id(&id)?;
    let layer = state.store.get_layer(&id).await?;
    Ok(Json(layer).into_response())
}
