//! Small synthetic city used by `--seed-demo`.

use serde_json::{json, Value};
use tracing::info;

use map_common::{BoundingBox, Geometry, GeometryType, LayerInfo, MapResult};

use crate::geometry_store::SqliteGeometryStore;

/// Extent of the demo dataset in degrees.
pub const DEMO_BOUNDS: BoundingBox = BoundingBox {
    min_x: -0.05,
    min_y: 51.48,
    max_x: 0.05,
    max_y: 51.53,
};

fn demo_layers() -> Vec<LayerInfo> {
    vec![
        LayerInfo::new("water", GeometryType::Polygon)
            .with_name("Water")
            .with_description("Rivers and ponds")
            .with_bounds(DEMO_BOUNDS)
            .with_attributes(["name"]),
        LayerInfo::new("landuse", GeometryType::Polygon)
            .with_name("Land Use")
            .with_description("Parks and green space")
            .with_bounds(DEMO_BOUNDS)
            .with_attributes(["name", "class"]),
        LayerInfo::new("buildings", GeometryType::Polygon)
            .with_name("Buildings")
            .with_description("Building footprints")
            .with_bounds(DEMO_BOUNDS)
            .with_attributes(["name", "height", "type"]),
        LayerInfo::new("roads", GeometryType::Line)
            .with_name("Roads")
            .with_description("Street centerlines")
            .with_bounds(DEMO_BOUNDS)
            .with_attributes(["name", "type", "lanes"]),
        LayerInfo::new("points", GeometryType::Point)
            .with_name("Points of Interest")
            .with_description("Shops and landmarks")
            .with_bounds(DEMO_BOUNDS)
            .with_attributes(["name", "category"]),
    ]
}

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry {
    Geometry::Polygon(vec![vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]]])
}

fn demo_features(layer: &str) -> Vec<(Geometry, Value)> {
    let b = DEMO_BOUNDS;
    let step = 0.01;
    match layer {
        "water" => vec![(
            Geometry::Polygon(vec![vec![
                [b.min_x, 51.495],
                [b.max_x, 51.490],
                [b.max_x, 51.497],
                [b.min_x, 51.502],
                [b.min_x, 51.495],
            ]]),
            json!({"name": "River"}),
        )],
        "landuse" => vec![
            (rect(-0.04, 51.51, -0.02, 51.525), json!({"name": "North Park", "class": "park"})),
            (rect(0.02, 51.505, 0.04, 51.515), json!({"name": "Common", "class": "grass"})),
        ],
        "buildings" => {
            let mut out = Vec::new();
            for col in 0..9 {
                let x = b.min_x + 0.002 + col as f64 * step;
                for row in 0..2 {
                    let y = 51.505 + row as f64 * step;
                    let i = col * 2 + row + 1;
                    out.push((
                        rect(x, y, x + 0.006, y + 0.004),
                        json!({"name": format!("Block {}", i), "height": 10 + (i % 7) * 5, "type": "residential"}),
                    ));
                }
            }
            out
        }
        "roads" => {
            let mut out = Vec::new();
            // Index-based so the last avenue sits exactly on the east edge.
            for i in 0..=10 {
                let x = (b.min_x + i as f64 * step).min(b.max_x);
                out.push((
                    Geometry::LineString(vec![[x, b.min_y], [x, b.max_y]]),
                    json!({"name": format!("{:.2} Avenue", x), "type": "secondary", "lanes": 2}),
                ));
            }
            out.push((
                Geometry::LineString(vec![[b.min_x, 51.51], [0.0, 51.512], [b.max_x, 51.51]]),
                json!({"name": "High Street", "type": "primary", "lanes": 4}),
            ));
            out
        }
        "points" => vec![
            (Geometry::Point([-0.012, 51.513]), json!({"name": "Cafe", "category": "food"})),
            (Geometry::Point([0.018, 51.521]), json!({"name": "Library", "category": "civic"})),
            (Geometry::Point([0.031, 51.508]), json!({"name": "Market", "category": "shop"})),
        ],
        _ => Vec::new(),
    }
}

/// Create the schema and load the demo layers. Returns the feature count.
pub async fn seed_demo(store: &SqliteGeometryStore) -> MapResult<usize> {
    store.migrate().await?;
    let mut total = 0;
    for layer in demo_layers() {
        store.upsert_layer(&layer).await?;
        total += store
            .insert_features(&layer.id, &demo_features(&layer.id))
            .await?;
    }
    info!(features = total, "Seeded demo dataset");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_features_stay_inside_bounds() {
        for layer in demo_layers() {
            for (geometry, _) in demo_features(&layer.id) {
                let env = geometry.bounds().unwrap();
                assert!(
                    DEMO_BOUNDS.contains_point(env.min_x, env.min_y)
                        && DEMO_BOUNDS.contains_point(env.max_x, env.max_y),
                    "{} feature {:?} leaves the demo extent",
                    layer.id,
                    env
                );
            }
        }
        assert_eq!(demo_features("roads").len(), 12);
        assert_eq!(demo_features("buildings").len(), 18);
    }
}
