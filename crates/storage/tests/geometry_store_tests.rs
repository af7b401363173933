//! Geometry store tests against real SQLite files.

use std::sync::Arc;
use std::time::Duration;

use map_common::{
    BoundingBox, FeatureFilter, FilterOp, Geometry, GeometryType, LayerInfo, MapError,
};
use serde_json::Value;
use storage::{
    seed_demo, ConnectionPool, FeatureQuery, GeometryStore, PoolConfig, SqliteGeometryStore,
    DEMO_BOUNDS,
};
use tempfile::TempDir;
use test_utils::{bbox, layers, sample_features, sample_layers, temp_database};

// ============================================================================
// Helper functions
// ============================================================================

fn to_bbox(b: (f64, f64, f64, f64)) -> BoundingBox {
    BoundingBox::new(b.0, b.1, b.2, b.3)
}

async fn seeded_store() -> (TempDir, SqliteGeometryStore) {
    let (dir, path) = temp_database();
    let store = SqliteGeometryStore::open(&PoolConfig::new(&path).with_size(3)).await;
    store.migrate().await.unwrap();

    for (id, name, kind, attributes) in sample_layers() {
        let layer = LayerInfo::new(id, GeometryType::parse(kind).unwrap())
            .with_name(name)
            .with_bounds(to_bbox(bbox::CITY))
            .with_attributes(attributes);
        store.upsert_layer(&layer).await.unwrap();
    }
    for (layer, geometry, properties) in sample_features() {
        let geometry: Geometry = serde_json::from_value(geometry).unwrap();
        store
            .insert_features(layer, &[(geometry, properties)])
            .await
            .unwrap();
    }
    (dir, store)
}

fn query(layers: &[&str], b: (f64, f64, f64, f64)) -> FeatureQuery {
    FeatureQuery::new(layers.iter().map(|s| s.to_string()).collect(), to_bbox(b))
}

fn names(features: &[map_common::Feature]) -> Vec<String> {
    features
        .iter()
        .map(|f| f.properties["name"].as_str().unwrap_or_default().to_string())
        .collect()
}

// ============================================================================
// Catalog
// ============================================================================

#[tokio::test]
async fn test_list_layers_ordered_by_name() {
    let (_dir, store) = seeded_store().await;
    let catalog = store.list_layers().await;

    assert!(!catalog.is_degraded());
    let names: Vec<_> = catalog.layers.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["Buildings", "Points of Interest", "Roads", "Water"]);

    let roads = catalog.get(layers::ROADS).unwrap();
    assert_eq!(roads.geometry_type, GeometryType::Line);
    assert_eq!(roads.attribute_names, vec!["name", "type", "lanes"]);
    assert_eq!(roads.bounds, to_bbox(bbox::CITY));
}

#[tokio::test]
async fn test_get_layer_found_and_not_found() {
    let (_dir, store) = seeded_store().await;

    let water = store.get_layer(layers::WATER).await.unwrap();
    assert_eq!(water.name, "Water");

    let err = store.get_layer(layers::MISSING).await.unwrap_err();
    assert!(matches!(err, MapError::LayerNotFound(ref id) if id == layers::MISSING));
    assert_eq!(err.http_status_code(), 404);
}

#[tokio::test]
async fn test_missing_schema_serves_fallback_catalog() {
    let (_dir, path) = temp_database();
    let store = SqliteGeometryStore::open(&PoolConfig::new(&path).with_size(1)).await;

    let catalog = store.list_layers().await;
    assert!(catalog.is_degraded());
    assert_eq!(catalog.ids(), vec!["buildings", "points", "roads"]);

    // Lookups degrade the same way
    assert_eq!(store.get_layer("roads").await.unwrap().id, "roads");
    assert!(matches!(
        store.get_layer(layers::MISSING).await,
        Err(MapError::LayerNotFound(_))
    ));

    // Rendering against a missing schema draws nothing rather than failing
    let fetched = store
        .fetch_features(&query(&["roads"], bbox::GLOBAL))
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert!(fetched[0].features.is_empty());
    assert!(store.stats().fallback_responses >= 3);
}

// ============================================================================
// Feature reads
// ============================================================================

#[tokio::test]
async fn test_bbox_prefilter() {
    let (_dir, store) = seeded_store().await;
    let fetched = store
        .fetch_features(&query(
            &[layers::WATER, layers::ROADS, layers::BUILDINGS],
            bbox::CITY_NE,
        ))
        .await
        .unwrap();

    let ids: Vec<_> = fetched.iter().map(|l| l.layer_id.as_str()).collect();
    assert_eq!(ids, vec![layers::WATER, layers::ROADS, layers::BUILDINGS]);

    assert!(fetched[0].features.is_empty());
    assert_eq!(names(&fetched[1].features), vec!["Main Street", "Cross Street"]);
    assert_eq!(names(&fetched[2].features), vec!["Town Hall"]);
    assert_eq!(fetched[2].geometry_type, Some(GeometryType::Polygon));
}

#[tokio::test]
async fn test_nothing_in_empty_extent() {
    let (_dir, store) = seeded_store().await;
    let fetched = store
        .fetch_features(&query(&[layers::ROADS, layers::POINTS], bbox::EMPTY_OCEAN))
        .await
        .unwrap();
    assert!(fetched.iter().all(|l| l.features.is_empty()));
}

#[tokio::test]
async fn test_unknown_layer_is_empty() {
    let (_dir, store) = seeded_store().await;
    let fetched = store
        .fetch_features(&query(&[layers::MISSING], bbox::CITY))
        .await
        .unwrap();
    assert_eq!(fetched[0].layer_id, layers::MISSING);
    assert_eq!(fetched[0].geometry_type, None);
    assert!(fetched[0].features.is_empty());
}

#[tokio::test]
async fn test_attribute_filters() {
    let (_dir, store) = seeded_store().await;
    let city = to_bbox(bbox::CITY);

    let tall = FeatureFilter::new("height", FilterOp::Gt, 10);
    let found = store
        .get_features(layers::BUILDINGS, &city, Some(&tall))
        .await
        .unwrap();
    assert_eq!(names(&found), vec!["Town Hall"]);

    let streets = FeatureFilter::new("name", FilterOp::Like, "%STREET");
    let found = store
        .get_features(layers::ROADS, &city, Some(&streets))
        .await
        .unwrap();
    assert_eq!(found.len(), 2);

    let residential = FeatureFilter::new("type", FilterOp::Eq, "residential");
    let found = store
        .get_features(layers::BUILDINGS, &city, Some(&residential))
        .await
        .unwrap();
    assert_eq!(names(&found), vec!["Shed"]);

    let narrow = FeatureFilter::new("lanes", FilterOp::Le, 2.5);
    let found = store
        .get_features(layers::ROADS, &city, Some(&narrow))
        .await
        .unwrap();
    assert_eq!(names(&found), vec!["Cross Street"]);
}

#[tokio::test]
async fn test_filter_agrees_with_in_memory_match() {
    let (_dir, store) = seeded_store().await;
    let city = to_bbox(bbox::CITY);
    let filter = FeatureFilter::new("height", FilterOp::Ne, 30);

    let all = store
        .get_features(layers::BUILDINGS, &city, None)
        .await
        .unwrap();
    let expected: Vec<_> = all
        .iter()
        .filter(|f| filter.matches(&f.properties))
        .map(|f| f.id)
        .collect();
    let found: Vec<_> = store
        .get_features(layers::BUILDINGS, &city, Some(&filter))
        .await
        .unwrap()
        .iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(found, expected);
}

#[tokio::test]
async fn test_feature_limit_spans_layers() {
    let (_dir, store) = seeded_store().await;
    let q = query(&[layers::BUILDINGS, layers::ROADS, layers::POINTS], bbox::CITY)
        .with_max_features(3);
    let fetched = store.fetch_features(&q).await.unwrap();

    let counts: Vec<_> = fetched.iter().map(|l| l.features.len()).collect();
    assert_eq!(counts, vec![2, 1, 0]);
}

#[tokio::test]
async fn test_geometry_round_trips_through_store() {
    let (_dir, store) = seeded_store().await;
    let found = store
        .get_features(layers::POINTS, &to_bbox(bbox::CITY), None)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].geometry, Geometry::Point([7.5, 2.5]));
    assert_eq!(found[0].layer_id, layers::POINTS);
    assert_eq!(found[0].properties["category"], Value::from("food"));
}

#[tokio::test]
async fn test_corrupt_rows_are_skipped() {
    let (_dir, store) = seeded_store().await;
    {
        let mut conn = store.pool().acquire().await.unwrap();
        sqlx::query(
            "INSERT INTO features (layer_id, geometry, properties, minx, miny, maxx, maxy) \
             VALUES ('points', 'not json', '{}', 1, 1, 1, 1)",
        )
        .execute(&mut *conn)
        .await
        .unwrap();
        conn.release().await;
    }

    let found = store
        .get_features(layers::POINTS, &to_bbox(bbox::CITY), None)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(store.stats().skipped_rows, 1);
}

#[tokio::test]
async fn test_non_finite_geometry_is_not_inserted() {
    let (_dir, store) = seeded_store().await;
    let inserted = store
        .insert_features(
            layers::POINTS,
            &[(Geometry::Point([f64::NAN, 1.0]), Value::Null)],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 0);
}

// ============================================================================
// Pool behavior through the store
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_share_small_pool() {
    let (_dir, path) = temp_database();
    let config = PoolConfig::new(&path)
        .with_size(2)
        .with_acquire_timeout(Duration::from_secs(10));
    let store = SqliteGeometryStore::open(&config).await;
    store.migrate().await.unwrap();
    store
        .upsert_layer(&LayerInfo::new("roads", GeometryType::Line))
        .await
        .unwrap();
    store
        .insert_features(
            "roads",
            &[(Geometry::LineString(vec![[0.0, 0.0], [1.0, 1.0]]), Value::Null)],
        )
        .await
        .unwrap();

    let store = Arc::new(store);
    let mut tasks = Vec::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store
                .fetch_features(&query(&["roads"], bbox::GLOBAL))
                .await
                .map(|l| l[0].features.len())
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 1);
    }

    let stats = store.stats().pool;
    assert_eq!(stats.live, 2);
    assert_eq!(stats.idle, 2);
    assert_eq!(stats.timeouts, 0);
}

#[tokio::test]
async fn test_unavailable_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("no").join("such").join("dir.db");
    let store = SqliteGeometryStore::from_pool(
        ConnectionPool::open(&PoolConfig::new(&path).with_size(2)).await,
    );

    assert!(!store.is_healthy().await);
    assert!(store.list_layers().await.is_degraded());
    let err = store
        .fetch_features(&query(&["roads"], bbox::GLOBAL))
        .await
        .unwrap_err();
    assert!(matches!(err, MapError::StoreUnavailable(_)));
    assert_eq!(err.http_status_code(), 503);
}

#[tokio::test]
async fn test_healthy_store() {
    let (_dir, store) = seeded_store().await;
    assert!(store.is_healthy().await);
}

#[tokio::test]
async fn test_seed_demo() {
    let (_dir, path) = temp_database();
    let store = SqliteGeometryStore::open(&PoolConfig::new(&path).with_size(2)).await;
    let count = seed_demo(&store).await.unwrap();
    assert!(count > 20);

    let catalog = store.list_layers().await;
    assert_eq!(catalog.layers.len(), 5);
    let fetched = store
        .fetch_features(&FeatureQuery::new(catalog.ids(), DEMO_BOUNDS))
        .await
        .unwrap();
    let total: usize = fetched.iter().map(|l| l.features.len()).sum();
    assert_eq!(total, count);
}
