//! Prometheus export and client metric intake.

use axum::{
    body::Bytes,
    extract::Extension,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

use map_common::MapError;

use super::common::ApiError;
use crate::state::AppState;

/// GET /metrics - Prometheus text exposition
pub async fn prometheus_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    state.engine.purge_expired();
    match &state.prometheus {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            String::new(),
        )
            .into_response(),
    }
}

/// One client-reported measurement.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMetric {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub tags: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MetricBatch {
    Wrapped { metrics: Vec<ClientMetric> },
    List(Vec<ClientMetric>),
    Single(ClientMetric),
}

impl MetricBatch {
    fn into_vec(self) -> Vec<ClientMetric> {
        match self {
            MetricBatch::Wrapped { metrics } => metrics,
            MetricBatch::List(metrics) => metrics,
            MetricBatch::Single(metric) => vec![metric],
        }
    }
}

/// Accepts `{"metrics": [...]}`, a bare array, or a single metric object.
pub fn parse_batch(body: &[u8]) -> Result<Vec<ClientMetric>, MapError> {
    serde_json::from_slice::<MetricBatch>(body)
        .map(MetricBatch::into_vec)
        .map_err(|e| MapError::invalid_param("metrics", format!("malformed metric batch: {}", e)))
}

/// POST /metrics - log a batch of client metrics
pub async fn client_metrics_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let batch = parse_batch(&body)?;
    for metric in &batch {
        let tags = Value::Object(metric.tags.clone());
        info!(
            name = %metric.name,
            value = metric.value,
            timestamp = ?metric.timestamp,
            tags = %tags,
            "Client metric"
        );
    }
    state.metrics.record_client_metrics(batch.len());

    Ok(Json(json!({
        "status": "ok",
        "message": format!("Received {} metrics", batch.len()),
        "count": batch.len(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch_shapes() {
        let wrapped = parse_batch(
            br#"{"metrics": [{"name": "fps", "value": 59.5, "tags": {"page": "map"}}, {"name": "zoom", "value": 3}]}"#,
        )
        .unwrap();
        assert_eq!(wrapped.len(), 2);
        assert_eq!(wrapped[0].tags["page"], "map");

        let list = parse_batch(br#"[{"name": "a", "value": 1, "timestamp": 1700000000}]"#).unwrap();
        assert_eq!(list.len(), 1);
        assert!(list[0].timestamp.is_some());

        let single = parse_batch(br#"{"name": "tiles_loaded", "value": 12}"#).unwrap();
        assert_eq!(single[0].name, "tiles_loaded");
        assert_eq!(single[0].value, 12.0);
    }

    #[test]
    fn test_parse_batch_rejects_garbage() {
        assert!(parse_batch(b"not json").is_err());
        assert!(parse_batch(br#"{"metrics": [{"value": 1}]}"#).is_err());
    }
}
