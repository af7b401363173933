//! Error types shared by the store, renderer and server.

use serde::Serialize;
use thiserror::Error;

/// Result type alias using MapError.
pub type MapResult<T> = Result<T, MapError>;

/// Broad class of a failure, used for retry and reporting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    StoreUnavailable,
    NotFound,
    Encode,
    Timeout,
    Internal,
}

/// Primary error type for map rendering operations.
///
/// Cloneable so that a single render failure can be handed to every caller
/// waiting on the same in-flight request.
#[derive(Debug, Clone, Error)]
pub enum MapError {
    // === Validation Errors ===
    #[error("Invalid bbox: {0}")]
    InvalidBbox(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Requested image {width}x{height} exceeds the configured maximum of {max_width}x{max_height}")]
    ImageTooLarge {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    #[error("Requested format not supported: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid tile coordinates: {0}")]
    InvalidTile(String),

    // === Store Errors ===
    #[error("Geometry store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    // === Rendering Errors ===
    #[error("Image encoding failed: {0}")]
    Encode(String),

    #[error("Render exceeded its time budget of {0} ms")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MapError {
    pub fn invalid_param(param: impl Into<String>, message: impl Into<String>) -> Self {
        MapError::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MapError::InvalidBbox(_)
            | MapError::InvalidParameter { .. }
            | MapError::ImageTooLarge { .. }
            | MapError::UnsupportedFormat(_)
            | MapError::InvalidTile(_) => ErrorKind::Validation,
            MapError::StoreUnavailable(_) | MapError::Database(_) => ErrorKind::StoreUnavailable,
            MapError::LayerNotFound(_) => ErrorKind::NotFound,
            MapError::Encode(_) => ErrorKind::Encode,
            MapError::Timeout(_) => ErrorKind::Timeout,
            MapError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code reported in error bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            MapError::InvalidBbox(_) => "INVALID_BBOX",
            MapError::InvalidParameter { .. } => "INVALID_REQUEST",
            MapError::ImageTooLarge { .. } => "IMAGE_TOO_LARGE",
            MapError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            MapError::InvalidTile(_) => "INVALID_TILE_PARAMS",
            MapError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            MapError::Database(_) => "DATABASE_ERROR",
            MapError::LayerNotFound(_) => "LAYER_NOT_FOUND",
            MapError::Encode(_) => "ENCODE_FAILED",
            MapError::Timeout(_) => "RENDER_TIMEOUT",
            MapError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::StoreUnavailable => 503,
            ErrorKind::Timeout => 504,
            ErrorKind::Encode | ErrorKind::Internal => 500,
        }
    }

    /// Whether the same request may succeed if retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::StoreUnavailable | ErrorKind::Timeout
        )
    }
}

impl From<std::io::Error> for MapError {
    fn from(err: std::io::Error) -> Self {
        MapError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for MapError {
    fn from(err: serde_json::Error) -> Self {
        MapError::Internal(format!("JSON error: {}", err))
    }
}
