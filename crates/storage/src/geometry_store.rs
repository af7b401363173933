//! Layer catalog and feature geometry reads over the pooled SQLite database.
//!
//! Every feature row carries its envelope (`minx/miny/maxx/maxy`), and the
//! composite index on `(layer_id, minx, maxx, miny, maxy)` serves as the
//! bounding-box pre-filter. Attribute filters run server-side through
//! `json_extract` on the JSON properties column.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Connection, Row};
use tracing::{debug, info, instrument, warn};

use map_common::{
    BoundingBox, Feature, FeatureFilter, FilterOp, Geometry, GeometryType, LayerCatalog,
    LayerFeatures, LayerInfo, MapError, MapResult,
};

use crate::pool::{db_error, ConnectionPool, PoolConfig, PoolStats};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS layers (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    geometry_type TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    minx REAL NOT NULL,
    miny REAL NOT NULL,
    maxx REAL NOT NULL,
    maxy REAL NOT NULL,
    attributes TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS features (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    layer_id TEXT NOT NULL REFERENCES layers(id) ON DELETE CASCADE,
    geometry TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    minx REAL NOT NULL,
    miny REAL NOT NULL,
    maxx REAL NOT NULL,
    maxy REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_features_layer_bbox
    ON features(layer_id, minx, maxx, miny, maxy);
"#;

const SELECT_LAYERS: &str = "SELECT id, name, geometry_type, description, \
     minx, miny, maxx, maxy, attributes FROM layers ORDER BY name, id";

const SELECT_LAYER_BY_ID: &str = "SELECT id, name, geometry_type, description, \
     minx, miny, maxx, maxy, attributes FROM layers WHERE id = ?1";

/// Feature read for a render: layers in paint order, one bbox, optional filter.
#[derive(Debug, Clone)]
pub struct FeatureQuery {
    pub layers: Vec<String>,
    pub bbox: BoundingBox,
    pub filter: Option<FeatureFilter>,
    /// Cap across all layers; later layers get whatever budget remains.
    pub max_features: usize,
}

impl FeatureQuery {
    pub fn new(layers: Vec<String>, bbox: BoundingBox) -> Self {
        Self {
            layers,
            bbox,
            filter: None,
            max_features: 10_000,
        }
    }

    pub fn with_filter(mut self, filter: Option<FeatureFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_max_features(mut self, max: usize) -> Self {
        self.max_features = max;
        self
    }
}

/// Counters reported through `/health`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StoreStats {
    pub pool: PoolStats,
    pub queries: u64,
    pub features_fetched: u64,
    pub fallback_responses: u64,
    pub skipped_rows: u64,
}

/// Read side of the geometry store, as seen by the render engine.
#[async_trait]
pub trait GeometryStore: Send + Sync {
    /// All layers ordered by name. Falls back to the placeholder catalog,
    /// flagged as degraded, when the database cannot be queried.
    async fn list_layers(&self) -> LayerCatalog;

    /// Point lookup; `LayerNotFound` for an unknown id.
    async fn get_layer(&self, id: &str) -> MapResult<LayerInfo>;

    /// Features intersecting `query.bbox` for each requested layer, in
    /// request order. Holds one pooled connection for the whole read.
    async fn fetch_features(&self, query: &FeatureQuery) -> MapResult<Vec<LayerFeatures>>;

    async fn is_healthy(&self) -> bool;

    fn stats(&self) -> StoreStats {
        StoreStats::default()
    }
}

#[derive(Default)]
struct StoreCounters {
    queries: AtomicU64,
    features_fetched: AtomicU64,
    fallback_responses: AtomicU64,
    skipped_rows: AtomicU64,
}

/// SQLite-backed geometry store.
pub struct SqliteGeometryStore {
    pool: Arc<ConnectionPool>,
    counters: StoreCounters,
}

impl SqliteGeometryStore {
    /// Open the pool. Never fails; an unusable database yields a store whose
    /// queries report `StoreUnavailable`.
    pub async fn open(config: &PoolConfig) -> Self {
        Self::from_pool(ConnectionPool::open(config).await)
    }

    pub fn from_pool(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            counters: StoreCounters::default(),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> MapResult<()> {
        let mut conn = self.pool.acquire().await?;
        let mut result = Ok(());
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Err(e) = sqlx::query(trimmed).execute(&mut *conn).await {
                result = Err(MapError::Database(format!("Migration failed: {}", e)));
                break;
            }
        }
        conn.release().await;
        if result.is_ok() {
            info!("Geometry schema ready");
        }
        result
    }

    /// Insert or replace a layer's catalog row.
    pub async fn upsert_layer(&self, layer: &LayerInfo) -> MapResult<()> {
        let attributes = serde_json::to_string(&layer.attribute_names)?;
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO layers (id, name, geometry_type, description, minx, miny, maxx, maxy, attributes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                geometry_type = excluded.geometry_type,
                description = excluded.description,
                minx = excluded.minx,
                miny = excluded.miny,
                maxx = excluded.maxx,
                maxy = excluded.maxy,
                attributes = excluded.attributes
            "#,
        )
        .bind(&layer.id)
        .bind(&layer.name)
        .bind(layer.geometry_type.as_str())
        .bind(&layer.description)
        .bind(layer.bounds.min_x)
        .bind(layer.bounds.min_y)
        .bind(layer.bounds.max_x)
        .bind(layer.bounds.max_y)
        .bind(attributes)
        .execute(&mut *conn)
        .await;
        conn.release().await;
        result.map(|_| ()).map_err(db_error)
    }

    /// Insert features for one layer in a single transaction. Geometries
    /// without a single finite vertex are skipped. Returns the number inserted.
    pub async fn insert_features(
        &self,
        layer_id: &str,
        features: &[(Geometry, Value)],
    ) -> MapResult<usize> {
        let mut conn = self.pool.acquire().await?;
        let result = insert_in_transaction(&mut conn, layer_id, features).await;
        conn.release().await;
        let inserted = result.map_err(db_error)?;
        debug!(layer = layer_id, inserted = inserted, "Inserted features");
        Ok(inserted)
    }

    /// Lazy feature rows for one layer on a caller-held connection.
    ///
    /// Rows whose geometry cannot be decoded are logged and skipped.
    pub fn stream_features<'c>(
        &'c self,
        conn: &'c mut SqliteConnection,
        layer_id: &str,
        bbox: &BoundingBox,
        filter: Option<&FeatureFilter>,
        limit: usize,
    ) -> BoxStream<'c, MapResult<Feature>> {
        let mut query = sqlx::query(feature_sql(filter.map(|f| f.op)))
            .bind(layer_id.to_string())
            .bind(bbox.min_x)
            .bind(bbox.max_x)
            .bind(bbox.min_y)
            .bind(bbox.max_y)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX));
        if let Some(filter) = filter {
            query = query.bind(filter.json_path());
            query = match &filter.value {
                Value::String(s) => query.bind(s.clone()),
                Value::Bool(b) => query.bind(i64::from(*b)),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64()),
                },
                _ => query.bind(None::<String>),
            };
        }

        let skipped = &self.counters.skipped_rows;
        query
            .fetch(conn)
            .filter_map(move |row| {
                let item = match row {
                    Err(e) => Some(Err(db_error(e))),
                    Ok(row) => match feature_from_row(&row) {
                        Ok(feature) => Some(Ok(feature)),
                        Err(e) => {
                            warn!(error = %e, "Skipping undecodable feature row");
                            skipped.fetch_add(1, Ordering::Relaxed);
                            None
                        }
                    },
                };
                futures::future::ready(item)
            })
            .boxed()
    }

    /// Features for one layer, collected.
    pub async fn get_features(
        &self,
        layer_id: &str,
        bbox: &BoundingBox,
        filter: Option<&FeatureFilter>,
    ) -> MapResult<Vec<Feature>> {
        let mut conn = self.pool.acquire().await?;
        let mut features = Vec::new();
        let mut result = Ok(());
        {
            let mut rows = self.stream_features(&mut conn, layer_id, bbox, filter, usize::MAX);
            while let Some(item) = rows.next().await {
                match item {
                    Ok(feature) => features.push(feature),
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
        }
        conn.release().await;
        result.map(|_| features)
    }

    async fn collect_layers(
        &self,
        conn: &mut SqliteConnection,
        query: &FeatureQuery,
    ) -> MapResult<Vec<LayerFeatures>> {
        let mut out = Vec::with_capacity(query.layers.len());
        let mut remaining = query.max_features;

        for layer_id in &query.layers {
            let geometry_type = match lookup_geometry_type(conn, layer_id).await {
                Ok(t) => t,
                Err(e) if is_missing_schema(&e) => {
                    debug!(layer = %layer_id, "No geometry schema; layer renders empty");
                    self.counters.fallback_responses.fetch_add(1, Ordering::Relaxed);
                    out.push(LayerFeatures::empty(layer_id.clone()));
                    continue;
                }
                Err(e) => return Err(db_error(e)),
            };

            let mut features = Vec::new();
            if remaining > 0 {
                let mut rows = self.stream_features(
                    conn,
                    layer_id,
                    &query.bbox,
                    query.filter.as_ref(),
                    remaining,
                );
                while let Some(item) = rows.next().await {
                    features.push(item?);
                }
            }

            if features.len() >= remaining && remaining > 0 {
                warn!(
                    layer = %layer_id,
                    max_features = query.max_features,
                    "Feature limit reached; remaining features are not drawn"
                );
            }
            remaining = remaining.saturating_sub(features.len());
            self.counters
                .features_fetched
                .fetch_add(features.len() as u64, Ordering::Relaxed);

            out.push(LayerFeatures {
                layer_id: layer_id.clone(),
                geometry_type,
                features,
            });
        }
        Ok(out)
    }

    fn fallback_lookup(&self, id: &str, cause: MapError) -> MapResult<LayerInfo> {
        warn!(layer = id, error = %cause, "Layer lookup failed; consulting fallback catalog");
        self.counters.fallback_responses.fetch_add(1, Ordering::Relaxed);
        LayerCatalog::fallback()
            .get(id)
            .cloned()
            .ok_or_else(|| MapError::LayerNotFound(id.to_string()))
    }
}

#[async_trait]
impl GeometryStore for SqliteGeometryStore {
    async fn list_layers(&self) -> LayerCatalog {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        let result = match self.pool.acquire().await {
            Ok(mut conn) => {
                let rows = sqlx::query(SELECT_LAYERS).fetch_all(&mut *conn).await;
                conn.release().await;
                rows.map_err(db_error)
                    .and_then(|rows| rows.iter().map(layer_from_row).collect::<MapResult<Vec<_>>>())
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(layers) => LayerCatalog::from_database(layers),
            Err(e) => {
                warn!(error = %e, "Catalog query failed; serving fallback layers");
                self.counters.fallback_responses.fetch_add(1, Ordering::Relaxed);
                LayerCatalog::fallback()
            }
        }
    }

    async fn get_layer(&self, id: &str) -> MapResult<LayerInfo> {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => return self.fallback_lookup(id, e),
        };
        let result = sqlx::query(SELECT_LAYER_BY_ID)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await;
        conn.release().await;

        match result {
            Ok(Some(row)) => layer_from_row(&row),
            Ok(None) => Err(MapError::LayerNotFound(id.to_string())),
            Err(e) => self.fallback_lookup(id, db_error(e)),
        }
    }

    #[instrument(skip(self, query), fields(layers = query.layers.len()))]
    async fn fetch_features(&self, query: &FeatureQuery) -> MapResult<Vec<LayerFeatures>> {
        if query.layers.is_empty() {
            return Ok(Vec::new());
        }
        self.counters.queries.fetch_add(1, Ordering::Relaxed);

        let mut conn = self.pool.acquire().await?;
        let result = self.collect_layers(&mut conn, query).await;
        conn.release().await;
        result
    }

    async fn is_healthy(&self) -> bool {
        self.pool.ping().await.is_ok()
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            pool: self.pool.stats(),
            queries: self.counters.queries.load(Ordering::Relaxed),
            features_fetched: self.counters.features_fetched.load(Ordering::Relaxed),
            fallback_responses: self.counters.fallback_responses.load(Ordering::Relaxed),
            skipped_rows: self.counters.skipped_rows.load(Ordering::Relaxed),
        }
    }
}

/// Feature select with the bbox pre-filter and an optional attribute predicate.
fn feature_sql(op: Option<FilterOp>) -> &'static str {
    macro_rules! select_features {
        ($($predicate:literal)?) => {
            concat!(
                "SELECT id, layer_id, geometry, properties FROM features ",
                "WHERE layer_id = ?1 AND maxx >= ?2 AND minx <= ?3 AND maxy >= ?4 AND miny <= ?5",
                $(" AND json_extract(properties, ?7) ", $predicate, " ?8",)?
                " ORDER BY id LIMIT ?6"
            )
        };
    }

    match op {
        None => select_features!(),
        Some(FilterOp::Eq) => select_features!("="),
        Some(FilterOp::Ne) => select_features!("<>"),
        Some(FilterOp::Lt) => select_features!("<"),
        Some(FilterOp::Le) => select_features!("<="),
        Some(FilterOp::Gt) => select_features!(">"),
        Some(FilterOp::Ge) => select_features!(">="),
        Some(FilterOp::Like) => select_features!("LIKE"),
    }
}

async fn insert_in_transaction(
    conn: &mut SqliteConnection,
    layer_id: &str,
    features: &[(Geometry, Value)],
) -> Result<usize, sqlx::Error> {
    let mut tx = conn.begin().await?;
    let mut inserted = 0;
    for (geometry, properties) in features {
        let Some(bounds) = geometry.bounds() else {
            warn!(layer = layer_id, "Skipping geometry without finite coordinates");
            continue;
        };
        let geometry_json = serde_json::to_string(geometry)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        let properties_json = match properties {
            Value::Object(_) => properties.to_string(),
            _ => "{}".to_string(),
        };
        sqlx::query(
            "INSERT INTO features (layer_id, geometry, properties, minx, miny, maxx, maxy) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(layer_id)
        .bind(geometry_json)
        .bind(properties_json)
        .bind(bounds.min_x)
        .bind(bounds.min_y)
        .bind(bounds.max_x)
        .bind(bounds.max_y)
        .execute(&mut *tx)
        .await?;
        inserted += 1;
    }
    tx.commit().await?;
    Ok(inserted)
}

async fn lookup_geometry_type(
    conn: &mut SqliteConnection,
    layer_id: &str,
) -> Result<Option<GeometryType>, sqlx::Error> {
    let kind: Option<String> =
        sqlx::query_scalar("SELECT geometry_type FROM layers WHERE id = ?1")
            .bind(layer_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(kind.as_deref().and_then(GeometryType::parse))
}

fn is_missing_schema(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.message().contains("no such table"))
}

fn layer_from_row(row: &SqliteRow) -> MapResult<LayerInfo> {
    let kind: String = row.try_get("geometry_type").map_err(db_error)?;
    let geometry_type = GeometryType::parse(&kind)
        .ok_or_else(|| MapError::Database(format!("unknown geometry type '{}'", kind)))?;
    let attributes: String = row.try_get("attributes").map_err(db_error)?;

    Ok(LayerInfo {
        id: row.try_get("id").map_err(db_error)?,
        name: row.try_get("name").map_err(db_error)?,
        geometry_type,
        description: row.try_get("description").map_err(db_error)?,
        bounds: BoundingBox::new(
            row.try_get("minx").map_err(db_error)?,
            row.try_get("miny").map_err(db_error)?,
            row.try_get("maxx").map_err(db_error)?,
            row.try_get("maxy").map_err(db_error)?,
        ),
        attribute_names: serde_json::from_str(&attributes)?,
    })
}

fn feature_from_row(row: &SqliteRow) -> MapResult<Feature> {
    let id: i64 = row.try_get("id").map_err(db_error)?;
    let geometry: String = row.try_get("geometry").map_err(db_error)?;
    let properties: String = row.try_get("properties").map_err(db_error)?;

    let geometry: Geometry = serde_json::from_str(&geometry)
        .map_err(|e| MapError::Database(format!("feature {}: invalid geometry: {}", id, e)))?;
    let properties = match serde_json::from_str::<Value>(&properties) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };

    Ok(Feature {
        id,
        layer_id: row.try_get("layer_id").map_err(db_error)?,
        geometry,
        properties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_sql_variants() {
        assert!(!feature_sql(None).contains("json_extract"));
        assert!(feature_sql(Some(FilterOp::Like)).contains("json_extract(properties, ?7) LIKE ?8"));
        assert!(feature_sql(Some(FilterOp::Ne)).contains("<> ?8"));
        assert!(feature_sql(Some(FilterOp::Ge)).ends_with("ORDER BY id LIMIT ?6"));
    }

    #[test]
    fn test_schema_statements_split() {
        let statements: Vec<&str> = SCHEMA_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(statements.len(), 3);
        assert!(statements[1].contains("REFERENCES layers(id)"));
    }
}
