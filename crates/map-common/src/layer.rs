//! Layer catalog types.

use serde::{Deserialize, Serialize};

use crate::bbox::{BoundingBox, WORLD_BOUNDS};
use crate::error::{MapError, MapResult};

/// Longest accepted layer identifier.
pub const MAX_LAYER_ID_LEN: usize = 64;

/// Geometry class a layer stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryType {
    Point,
    Line,
    Polygon,
    MultiPoint,
    MultiLine,
    MultiPolygon,
}

impl GeometryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryType::Point => "point",
            GeometryType::Line => "line",
            GeometryType::Polygon => "polygon",
            GeometryType::MultiPoint => "multi_point",
            GeometryType::MultiLine => "multi_line",
            GeometryType::MultiPolygon => "multi_polygon",
        }
    }

    /// Parse the stored type name. Accepts a few common spellings.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "point" => Some(GeometryType::Point),
            "line" | "linestring" => Some(GeometryType::Line),
            "polygon" => Some(GeometryType::Polygon),
            "multi_point" | "multipoint" => Some(GeometryType::MultiPoint),
            "multi_line" | "multilinestring" => Some(GeometryType::MultiLine),
            "multi_polygon" | "multipolygon" => Some(GeometryType::MultiPolygon),
            _ => None,
        }
    }
}

impl std::fmt::Display for GeometryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog metadata for one layer. A snapshot; renderers never mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerInfo {
    pub id: String,
    pub name: String,
    pub geometry_type: GeometryType,
    #[serde(default)]
    pub description: String,
    pub bounds: BoundingBox,
    #[serde(default)]
    pub attribute_names: Vec<String>,
}

impl LayerInfo {
    pub fn new(id: impl Into<String>, geometry_type: GeometryType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            geometry_type,
            description: String::new(),
            bounds: WORLD_BOUNDS,
            attribute_names: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_bounds(mut self, bounds: BoundingBox) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attribute_names = names.into_iter().map(Into::into).collect();
        self
    }
}

/// Where a catalog listing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSource {
    Database,
    /// Built-in placeholder layers returned when the schema is missing.
    Fallback,
}

impl CatalogSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogSource::Database => "database",
            CatalogSource::Fallback => "fallback",
        }
    }
}

/// Result of a catalog listing, flagged when it is degraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerCatalog {
    pub layers: Vec<LayerInfo>,
    pub source: CatalogSource,
}

impl LayerCatalog {
    pub fn from_database(mut layers: Vec<LayerInfo>) -> Self {
        layers.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            layers,
            source: CatalogSource::Database,
        }
    }

    pub fn fallback() -> Self {
        Self {
            layers: fallback_layers(),
            source: CatalogSource::Fallback,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.source == CatalogSource::Fallback
    }

    pub fn get(&self, id: &str) -> Option<&LayerInfo> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.id.clone()).collect()
    }
}

/// Placeholder catalog served while no schema exists, ordered by name.
pub fn fallback_layers() -> Vec<LayerInfo> {
    vec![
        LayerInfo::new("buildings", GeometryType::Polygon)
            .with_name("Buildings")
            .with_description("Building footprints")
            .with_attributes(["name", "height", "area", "type"]),
        LayerInfo::new("points", GeometryType::Point)
            .with_name("Points of Interest")
            .with_description("Points of interest")
            .with_attributes(["name", "category", "rating", "address"]),
        LayerInfo::new("roads", GeometryType::Line)
            .with_name("Roads")
            .with_description("Road network")
            .with_attributes(["name", "type", "length", "width"]),
    ]
}

/// Layer ids are 1..=64 characters from `[A-Za-z0-9_-]`.
pub fn validate_layer_id(id: &str) -> MapResult<()> {
    if id.is_empty() || id.len() > MAX_LAYER_ID_LEN {
        return Err(MapError::invalid_param(
            "layers",
            format!("layer id must be 1 to {} characters", MAX_LAYER_ID_LEN),
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(MapError::invalid_param(
            "layers",
            format!("layer id '{}' contains invalid characters", id),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_catalog_is_degraded_and_sorted() {
        let catalog = LayerCatalog::fallback();
        assert!(catalog.is_degraded());
        let names: Vec<_> = catalog.layers.iter().map(|l| l.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(catalog.get("roads").is_some());
        assert_eq!(catalog.get("roads").unwrap().bounds, WORLD_BOUNDS);
    }

    #[test]
    fn test_database_catalog_sorts_by_name() {
        let catalog = LayerCatalog::from_database(vec![
            LayerInfo::new("w", GeometryType::Polygon).with_name("Water"),
            LayerInfo::new("l", GeometryType::Polygon).with_name("Landuse"),
        ]);
        assert!(!catalog.is_degraded());
        assert_eq!(catalog.ids(), vec!["l", "w"]);
    }

    #[test]
    fn test_layer_id_validation() {
        assert!(validate_layer_id("roads_2024-v1").is_ok());
        assert!(validate_layer_id("").is_err());
        assert!(validate_layer_id("roads;drop").is_err());
        assert!(validate_layer_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_geometry_type_parse() {
        assert_eq!(GeometryType::parse("LineString"), Some(GeometryType::Line));
        assert_eq!(GeometryType::parse("multipolygon"), Some(GeometryType::MultiPolygon));
        assert_eq!(GeometryType::parse("raster"), None);
    }

    #[test]
    fn test_layer_info_json_shape() {
        let layer = LayerInfo::new("roads", GeometryType::Line).with_attributes(["name"]);
        let json = serde_json::to_value(&layer).unwrap();
        assert_eq!(json["geometryType"], "line");
        assert_eq!(json["attributeNames"][0], "name");
        assert_eq!(json["bounds"][2], 180.0);
    }
}
