//! Common types shared by the geometry store, renderer and map server.

pub mod bbox;
pub mod error;
pub mod feature;
pub mod layer;
pub mod request;
pub mod style;
pub mod tile;

pub use bbox::{BoundingBox, WORLD_BOUNDS};
pub use error::{ErrorKind, MapError, MapResult};
pub use feature::{Feature, FeatureFilter, FilterOp, Geometry, LayerFeatures, Position};
pub use layer::{fallback_layers, validate_layer_id, CatalogSource, GeometryType, LayerCatalog, LayerInfo};
pub use request::{Fingerprint, ImageFormat, MapRequest, MapRequestBody, RenderLimits};
pub use style::{Color, LayerStyle, StyleOverride};
pub use tile::{TileCoord, TILE_SIZE};
