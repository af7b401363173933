//! Error bodies and image responses shared by every handler.

use axum::{
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use map_common::{BoundingBox, MapError};

use crate::engine::RenderResult;

pub const X_RENDER_TIME: HeaderName = HeaderName::from_static("x-render-time");
pub const X_FEATURES_COUNT: HeaderName = HeaderName::from_static("x-features-count");
pub const X_CACHE_HIT: HeaderName = HeaderName::from_static("x-cache-hit");
pub const X_TIMESTAMP: HeaderName = HeaderName::from_static("x-timestamp");
pub const X_BBOX: HeaderName = HeaderName::from_static("x-bbox");
pub const X_FINGERPRINT: HeaderName = HeaderName::from_static("x-fingerprint");
pub const X_CATALOG_SOURCE: HeaderName = HeaderName::from_static("x-catalog-source");

/// JSON error response: `{"error": {"code", "message", "details"?}}`.
#[derive(Debug)]
pub struct ApiError(pub MapError);

impl From<MapError> for ApiError {
    fn from(err: MapError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn body(&self) -> Value {
        let mut error = json!({
            "code": self.0.error_code(),
            "message": self.0.to_string(),
        });
        if let Some(details) = error_details(&self.0) {
            error["details"] = details;
        }
        json!({ "error": error })
    }
}

fn error_details(err: &MapError) -> Option<Value> {
    match err {
        MapError::InvalidParameter { param, .. } => Some(json!({ "parameter": param })),
        MapError::ImageTooLarge {
            width,
            height,
            max_width,
            max_height,
        } => Some(json!({
            "requested": { "width": width, "height": height },
            "max": { "width": max_width, "height": max_height },
        })),
        MapError::LayerNotFound(id) => Some(json!({ "layer": id })),
        MapError::Timeout(ms) => Some(json!({ "budget_ms": ms })),
        MapError::StoreUnavailable(_) | MapError::Database(_) => {
            Some(json!({ "retryable": err.is_retryable() }))
        }
        _ => None,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

/// Encoded image with the render headers.
pub fn image_response(result: &RenderResult, bbox: &BoundingBox) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(result.format.mime_type()),
    );
    headers.insert(X_RENDER_TIME, HeaderValue::from(result.render_time_ms));
    headers.insert(X_FEATURES_COUNT, HeaderValue::from(result.feature_count));
    headers.insert(
        X_CACHE_HIT,
        HeaderValue::from_static(if result.cache_hit { "true" } else { "false" }),
    );
    if let Ok(value) = HeaderValue::from_str(&Utc::now().to_rfc3339()) {
        headers.insert(X_TIMESTAMP, value);
    }
    let bbox = format!(
        "{},{},{},{}",
        bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y
    );
    if let Ok(value) = HeaderValue::from_str(&bbox) {
        headers.insert(X_BBOX, value);
    }
    if let Ok(value) = HeaderValue::from_str(result.fingerprint.as_str()) {
        headers.insert(X_FINGERPRINT, value);
    }
    (StatusCode::OK, headers, result.bytes.clone()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_body() {
        let err = ApiError(MapError::LayerNotFound("nope".to_string()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let body = err.body();
        assert_eq!(body["error"]["code"], "LAYER_NOT_FOUND");
        assert_eq!(body["error"]["details"]["layer"], "nope");
        assert!(body["error"]["message"].as_str().unwrap().contains("nope"));
    }

    #[test]
    fn test_statuses() {
        assert_eq!(
            ApiError(MapError::invalid_param("width", "bad")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(MapError::StoreUnavailable("down".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(MapError::Timeout(50)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert!(ApiError(MapError::Internal("x".into())).body()["error"]
            .get("details")
            .is_none());
    }
}
