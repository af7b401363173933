//! Common test fixtures for map rendering tests.
//!
//! Values are plain tuples and JSON so this crate stays independent of the
//! workspace's domain crates.

use serde_json::{json, Value};

/// Common bounding box definitions for testing, as (minx, miny, maxx, maxy).
pub mod bbox {
    /// Global bounding box (-180 to 180, -90 to 90)
    pub const GLOBAL: (f64, f64, f64, f64) = (-180.0, -90.0, 180.0, 90.0);

    /// The extent covered by [`super::sample_features`].
    pub const CITY: (f64, f64, f64, f64) = (0.0, 0.0, 10.0, 10.0);

    /// North-east quarter of the city extent
    pub const CITY_NE: (f64, f64, f64, f64) = (5.0, 5.0, 10.0, 10.0);

    /// Far away from every sample feature
    pub const EMPTY_OCEAN: (f64, f64, f64, f64) = (-150.0, -60.0, -140.0, -50.0);

    /// Degenerate bbox (zero area)
    pub const POINT: (f64, f64, f64, f64) = (0.0, 0.0, 0.0, 0.0);

    /// Invalid bbox (min > max)
    pub const INVALID: (f64, f64, f64, f64) = (10.0, 10.0, 5.0, 5.0);
}

/// Layer identifiers used by the sample dataset.
pub mod layers {
    pub const ROADS: &str = "roads";
    pub const BUILDINGS: &str = "buildings";
    pub const WATER: &str = "water";
    pub const POINTS: &str = "points";

    /// Never present in any fixture catalog
    pub const MISSING: &str = "does_not_exist";
}

/// Sample layers as (id, name, geometry_type, attribute names).
pub fn sample_layers() -> Vec<(&'static str, &'static str, &'static str, Vec<&'static str>)> {
    vec![
        (layers::BUILDINGS, "Buildings", "polygon", vec!["name", "height", "type"]),
        (layers::POINTS, "Points of Interest", "point", vec!["name", "category"]),
        (layers::ROADS, "Roads", "line", vec!["name", "type", "lanes"]),
        (layers::WATER, "Water", "polygon", vec!["name"]),
    ]
}

/// Sample features as (layer id, GeoJSON geometry, properties), all inside [`bbox::CITY`].
pub fn sample_features() -> Vec<(&'static str, Value, Value)> {
    vec![
        (
            layers::WATER,
            json!({"type": "Polygon", "coordinates": [[[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0], [0.0, 0.0]]]}),
            json!({"name": "Lake"}),
        ),
        (
            layers::BUILDINGS,
            json!({"type": "Polygon", "coordinates": [[[6.0, 6.0], [9.0, 6.0], [9.0, 9.0], [6.0, 9.0], [6.0, 6.0]]]}),
            json!({"name": "Town Hall", "height": 30, "type": "civic"}),
        ),
        (
            layers::BUILDINGS,
            json!({"type": "Polygon", "coordinates": [[[1.0, 6.0], [2.0, 6.0], [2.0, 7.0], [1.0, 7.0], [1.0, 6.0]]]}),
            json!({"name": "Shed", "height": 3, "type": "residential"}),
        ),
        (
            layers::ROADS,
            json!({"type": "LineString", "coordinates": [[0.0, 5.0], [10.0, 5.0]]}),
            json!({"name": "Main Street", "type": "primary", "lanes": 4}),
        ),
        (
            layers::ROADS,
            json!({"type": "LineString", "coordinates": [[5.0, 0.0], [5.0, 10.0]]}),
            json!({"name": "Cross Street", "type": "secondary", "lanes": 2}),
        ),
        (
            layers::POINTS,
            json!({"type": "Point", "coordinates": [7.5, 2.5]}),
            json!({"name": "Cafe", "category": "food"}),
        ),
    ]
}

/// Common hex colors.
pub mod colors {
    pub const WHITE: &str = "#ffffff";
    pub const BLACK: &str = "#000000";
    pub const HALF_RED: &str = "#ff000080";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_features_reference_sample_layers() {
        let ids: Vec<_> = sample_layers().iter().map(|l| l.0).collect();
        for (layer, geometry, _) in sample_features() {
            assert!(ids.contains(&layer));
            assert!(geometry["type"].is_string());
        }
    }
}
