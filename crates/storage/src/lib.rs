//! Storage layer for the map server.
//!
//! Provides:
//! - A fixed-size SQLite connection pool
//! - The geometry store: layer catalog and feature reads
//! - The in-memory render cache with single-flight coalescing
//! - An optional on-disk render cache and output sink

pub mod demo;
pub mod disk_cache;
pub mod geometry_store;
pub mod output;
pub mod pool;
pub mod render_cache;

pub use demo::{seed_demo, DEMO_BOUNDS};
pub use disk_cache::DiskCache;
pub use geometry_store::{FeatureQuery, GeometryStore, SqliteGeometryStore, StoreStats};
pub use output::OutputSink;
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use render_cache::{
    CachedRender, FlightGuard, FlightOutcome, FlightWaiter, Lookup, RenderCache,
    RenderCacheStats,
};
