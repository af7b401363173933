//! Application metrics collection and reporting.

use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use storage::{PoolStats, RenderCacheStats};

/// Metrics collector for the map server.
#[derive(Debug)]
pub struct MetricsCollector {
    /// Request counts
    pub map_requests: AtomicU64,
    pub tile_requests: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub coalesced: AtomicU64,
    pub disk_hits: AtomicU64,

    /// Render stats
    pub renders_total: AtomicU64,
    pub render_errors: AtomicU64,
    pub render_timeouts: AtomicU64,
    pub features_drawn: AtomicU64,

    /// Client-side metrics received on POST /metrics
    pub client_metrics: AtomicU64,

    /// Timing stats (stored as microseconds for atomic ops)
    render_times: RwLock<TimingStats>,
    fetch_times: RwLock<TimingStats>,
    encode_times: RwLock<TimingStats>,

    /// Start time for uptime calculation
    start_time: Instant,
}

#[derive(Debug, Default)]
struct TimingStats {
    count: u64,
    total_us: u64,
    min_us: u64,
    max_us: u64,
    last_us: u64,
}

impl TimingStats {
    fn record(&mut self, duration_us: u64) {
        self.count += 1;
        self.total_us += duration_us;
        self.last_us = duration_us;
        if self.min_us == 0 || duration_us < self.min_us {
            self.min_us = duration_us;
        }
        if duration_us > self.max_us {
            self.max_us = duration_us;
        }
    }

    fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.total_us as f64 / self.count as f64) / 1000.0
        }
    }

    fn summary(&self) -> TimingSummary {
        TimingSummary {
            count: self.count,
            avg_ms: self.avg_ms(),
            min_ms: self.min_us as f64 / 1000.0,
            max_ms: self.max_us as f64 / 1000.0,
            last_ms: self.last_us as f64 / 1000.0,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            map_requests: AtomicU64::new(0),
            tile_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            renders_total: AtomicU64::new(0),
            render_errors: AtomicU64::new(0),
            render_timeouts: AtomicU64::new(0),
            features_drawn: AtomicU64::new(0),
            client_metrics: AtomicU64::new(0),
            render_times: RwLock::new(TimingStats::default()),
            fetch_times: RwLock::new(TimingStats::default()),
            encode_times: RwLock::new(TimingStats::default()),
            start_time: Instant::now(),
        }
    }

    /// Record a POST /generate request
    pub fn record_map_request(&self) {
        self.map_requests.fetch_add(1, Ordering::Relaxed);
        counter!("map_requests_total", "endpoint" => "generate").increment(1);
    }

    /// Record a tile request
    pub fn record_tile_request(&self) {
        self.tile_requests.fetch_add(1, Ordering::Relaxed);
        counter!("map_requests_total", "endpoint" => "tile").increment(1);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        counter!("map_cache_hits_total").increment(1);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        counter!("map_cache_misses_total").increment(1);
    }

    /// A caller that waited on another caller's render.
    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
        counter!("map_render_coalesced_total").increment(1);
    }

    pub fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
        counter!("map_disk_cache_hits_total").increment(1);
    }

    /// Record a completed or failed render (fetch + rasterize + encode).
    pub async fn record_render(&self, duration: Duration, features: usize, success: bool) {
        self.renders_total.fetch_add(1, Ordering::Relaxed);
        counter!("map_renders_total").increment(1);
        if success {
            self.features_drawn
                .fetch_add(features as u64, Ordering::Relaxed);
            counter!("map_features_drawn_total").increment(features as u64);
        } else {
            self.render_errors.fetch_add(1, Ordering::Relaxed);
            counter!("map_render_errors_total").increment(1);
        }
        histogram!("map_render_duration_seconds").record(duration.as_secs_f64());

        let mut times = self.render_times.write().await;
        times.record(duration.as_micros() as u64);
    }

    pub fn record_timeout(&self) {
        self.render_timeouts.fetch_add(1, Ordering::Relaxed);
        counter!("map_render_timeouts_total").increment(1);
    }

    /// Record geometry store fetch time
    pub async fn record_fetch(&self, duration: Duration) {
        histogram!("map_fetch_duration_seconds").record(duration.as_secs_f64());
        let mut times = self.fetch_times.write().await;
        times.record(duration.as_micros() as u64);
    }

    /// Record image encoding time
    pub async fn record_encode(&self, duration: Duration) {
        histogram!("map_encode_duration_seconds").record(duration.as_secs_f64());
        let mut times = self.encode_times.write().await;
        times.record(duration.as_micros() as u64);
    }

    pub fn record_client_metrics(&self, count: usize) {
        self.client_metrics
            .fetch_add(count as u64, Ordering::Relaxed);
        counter!("map_client_metrics_total").increment(count as u64);
    }

    /// Mirror render cache statistics into gauges
    pub fn record_cache_stats(&self, stats: &RenderCacheStats) {
        gauge!("map_cache_entries").set(stats.entries as f64);
        gauge!("map_cache_capacity").set(stats.capacity as f64);
        gauge!("map_cache_in_flight").set(stats.in_flight as f64);
        gauge!("map_cache_evictions").set(stats.evictions as f64);
        gauge!("map_cache_expired").set(stats.expired as f64);
        gauge!("map_cache_hit_rate_percent").set(stats.hit_rate());
    }

    /// Mirror connection pool statistics into gauges
    pub fn record_pool_stats(&self, stats: &PoolStats) {
        gauge!("map_pool_capacity").set(stats.capacity as f64);
        gauge!("map_pool_live").set(stats.live as f64);
        gauge!("map_pool_idle").set(stats.idle as f64);
        gauge!("map_pool_in_use").set(stats.in_use as f64);
        gauge!("map_pool_timeouts").set(stats.timeouts as f64);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get current metrics snapshot
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let render_times = self.render_times.read().await;
        let fetch_times = self.fetch_times.read().await;
        let encode_times = self.encode_times.read().await;

        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let cache_total = cache_hits + cache_misses;
        let cache_hit_rate = if cache_total > 0 {
            (cache_hits as f64 / cache_total as f64) * 100.0
        } else {
            0.0
        };

        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            map_requests: self.map_requests.load(Ordering::Relaxed),
            tile_requests: self.tile_requests.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            cache_hit_rate,
            coalesced: self.coalesced.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            renders_total: self.renders_total.load(Ordering::Relaxed),
            render_errors: self.render_errors.load(Ordering::Relaxed),
            render_timeouts: self.render_timeouts.load(Ordering::Relaxed),
            features_drawn: self.features_drawn.load(Ordering::Relaxed),
            client_metrics: self.client_metrics.load(Ordering::Relaxed),
            render: render_times.summary(),
            fetch: fetch_times.summary(),
            encode: encode_times.summary(),
        }
    }
}

/// Timing summary for one pipeline stage
#[derive(Debug, Clone, Serialize)]
pub struct TimingSummary {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub last_ms: f64,
}

/// Snapshot of metrics for JSON reporting
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub map_requests: u64,
    pub tile_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub coalesced: u64,
    pub disk_hits: u64,
    pub renders_total: u64,
    pub render_errors: u64,
    pub render_timeouts: u64,
    pub features_drawn: u64,
    pub client_metrics: u64,
    pub render: TimingSummary,
    pub fetch: TimingSummary,
    pub encode: TimingSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_stats() {
        let mut stats = TimingStats::default();
        assert_eq!(stats.avg_ms(), 0.0);
        stats.record(2000);
        stats.record(4000);
        let summary = stats.summary();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.avg_ms, 3.0);
        assert_eq!(summary.min_ms, 2.0);
        assert_eq!(summary.max_ms, 4.0);
        assert_eq!(summary.last_ms, 4.0);
    }

    #[tokio::test]
    async fn test_snapshot_counts() {
        let metrics = MetricsCollector::new();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_cache_miss();
        metrics.record_render(Duration::from_millis(5), 3, true).await;
        metrics.record_render(Duration::from_millis(7), 0, false).await;

        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 2);
        assert!((snapshot.cache_hit_rate - 33.333).abs() < 0.01);
        assert_eq!(snapshot.renders_total, 2);
        assert_eq!(snapshot.render_errors, 1);
        assert_eq!(snapshot.features_drawn, 3);
        assert_eq!(snapshot.render.count, 2);
    }
}
