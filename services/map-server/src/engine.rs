//! Render orchestration.
//!
//! A request is validated before any shared resource is touched, then served
//! from the memory cache, coalesced onto an identical in-flight render, served
//! from the disk cache, or rendered. Rendering fetches features (the pooled
//! connection is returned before painting starts), then rasterizes and
//! encodes on the blocking pool. The leader's whole computation runs under
//! the configured wall-clock budget.

use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use map_common::request::MAX_LAYERS_PER_REQUEST;
use map_common::{
    Fingerprint, ImageFormat, MapError, MapRequest, MapResult, RenderLimits, TileCoord, TILE_SIZE,
};
use renderer::{encode_image, render_map, CancelFlag, PngOptions, StyleResolver};
use storage::{
    CachedRender, DiskCache, FeatureQuery, FlightGuard, FlightOutcome, GeometryStore, Lookup,
    OutputSink, RenderCache,
};

use crate::metrics::MetricsCollector;

/// Knobs the engine applies to every request.
#[derive(Debug, Clone, Copy)]
pub struct RenderSettings {
    pub limits: RenderLimits,
    pub png: PngOptions,
    pub render_timeout: Duration,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            limits: RenderLimits::default(),
            png: PngOptions::default(),
            render_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of one render call.
#[derive(Debug, Clone)]
pub struct RenderResult {
    /// Raw RGBA, only on the call that rasterized.
    pub pixels: Option<Vec<u8>>,
    pub bytes: Bytes,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub render_time_ms: u64,
    pub feature_count: usize,
    /// True when this caller did not render: memory hit, disk hit or coalesced.
    pub cache_hit: bool,
    /// True when this caller waited on another caller's render.
    pub coalesced: bool,
    pub fingerprint: Fingerprint,
}

impl RenderResult {
    fn from_cached(cached: CachedRender, fingerprint: Fingerprint, coalesced: bool) -> Self {
        Self {
            pixels: None,
            bytes: cached.bytes,
            format: cached.format,
            width: cached.width,
            height: cached.height,
            render_time_ms: cached.render_time_ms,
            feature_count: cached.feature_count,
            cache_hit: true,
            coalesced,
            fingerprint,
        }
    }
}

/// Cancels the blocking render if the leader's future goes away early.
struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

struct Computed {
    pixels: Vec<u8>,
    bytes: Vec<u8>,
    features_drawn: usize,
    encode_time: Duration,
}

pub struct RenderEngine {
    store: Arc<dyn GeometryStore>,
    cache: Arc<RenderCache>,
    disk_cache: Option<Arc<DiskCache>>,
    output: Option<OutputSink>,
    styles: Arc<StyleResolver>,
    settings: RenderSettings,
    metrics: Arc<MetricsCollector>,
}

impl RenderEngine {
    pub fn new(
        store: Arc<dyn GeometryStore>,
        cache: Arc<RenderCache>,
        settings: RenderSettings,
    ) -> Self {
        Self {
            store,
            cache,
            disk_cache: None,
            output: None,
            styles: Arc::new(StyleResolver::default()),
            settings,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    pub fn with_disk_cache(mut self, disk_cache: DiskCache) -> Self {
        self.disk_cache = Some(Arc::new(disk_cache));
        self
    }

    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_styles(mut self, styles: StyleResolver) -> Self {
        self.styles = Arc::new(styles);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &Arc<dyn GeometryStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<RenderCache> {
        &self.cache
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Render (or reuse) the image for `request`.
    #[instrument(skip(self, request), fields(
        width = request.width,
        height = request.height,
        layers = request.layers.len(),
    ))]
    pub async fn render(&self, request: MapRequest) -> MapResult<RenderResult> {
        let result = self.render_shared(request).await?;
        if !result.cache_hit {
            if let Some(sink) = &self.output {
                let sink = sink.clone();
                let bytes = result.bytes.clone();
                let format = result.format;
                tokio::spawn(async move {
                    sink.save_map(&bytes, format).await;
                });
            }
        }
        Ok(result)
    }

    /// Render one 256x256 PNG tile. Without explicit layers the whole
    /// catalog is drawn in catalog order.
    #[instrument(skip(self, layers), fields(tile = %coord))]
    pub async fn render_tile(
        &self,
        coord: TileCoord,
        layers: Option<Vec<String>>,
    ) -> MapResult<RenderResult> {
        coord.validate()?;
        let mut layers = match layers {
            Some(layers) if !layers.is_empty() => layers,
            _ => self.store.list_layers().await.ids(),
        };
        if layers.len() > MAX_LAYERS_PER_REQUEST {
            warn!(
                layers = layers.len(),
                max = MAX_LAYERS_PER_REQUEST,
                "Catalog has more layers than one tile may draw; truncating"
            );
            layers.truncate(MAX_LAYERS_PER_REQUEST);
        }

        let request = MapRequest::new(coord.bbox_wgs84(), TILE_SIZE, TILE_SIZE).with_layers(layers);
        let result = self.render_shared(request).await?;
        if !result.cache_hit {
            if let Some(sink) = &self.output {
                let sink = sink.clone();
                let bytes = result.bytes.clone();
                tokio::spawn(async move {
                    sink.save_tile(&coord, &bytes).await;
                });
            }
        }
        Ok(result)
    }

    /// Drop expired memory cache entries and refresh cache gauges.
    pub fn purge_expired(&self) -> usize {
        let purged = self.cache.purge_expired();
        self.metrics.record_cache_stats(&self.cache.stats());
        self.metrics.record_pool_stats(&self.store.stats().pool);
        purged
    }

    async fn render_shared(&self, request: MapRequest) -> MapResult<RenderResult> {
        request.validate(&self.settings.limits)?;
        let fingerprint = request.fingerprint();

        loop {
            match self.cache.lookup_or_begin(&fingerprint) {
                Lookup::Hit(cached) => {
                    self.metrics.record_cache_hit();
                    debug!(fingerprint = %fingerprint, "Render cache hit");
                    return Ok(RenderResult::from_cached(cached, fingerprint, false));
                }
                Lookup::Follower(waiter) => {
                    self.metrics.record_coalesced();
                    match waiter.wait().await {
                        FlightOutcome::Done(Ok(cached)) => {
                            return Ok(RenderResult::from_cached(cached, fingerprint, true));
                        }
                        FlightOutcome::Done(Err(e)) => return Err(e),
                        FlightOutcome::Abandoned => {
                            debug!(fingerprint = %fingerprint, "In-flight render abandoned; retrying");
                        }
                    }
                }
                Lookup::Leader(guard) => {
                    self.metrics.record_cache_miss();
                    return self.lead(request, guard).await;
                }
            }
        }
    }

    async fn lead(&self, request: MapRequest, guard: FlightGuard) -> MapResult<RenderResult> {
        let fingerprint = guard.fingerprint().clone();

        if let Some(disk) = &self.disk_cache {
            if let Some(cached) = disk.get(&fingerprint).await {
                self.metrics.record_disk_hit();
                debug!(fingerprint = %fingerprint, "Disk cache hit");
                guard.complete(Ok(cached.clone()));
                return Ok(RenderResult::from_cached(cached, fingerprint, false));
            }
        }

        let started = Instant::now();
        let cancel = CancelOnDrop(CancelFlag::new());
        let budget = self.settings.render_timeout;
        let outcome = match tokio::time::timeout(budget, self.compute(&request, &cancel.0)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                cancel.0.cancel();
                self.metrics.record_timeout();
                warn!(
                    fingerprint = %fingerprint,
                    budget_ms = budget.as_millis() as u64,
                    "Render exceeded its time budget"
                );
                Err(MapError::Timeout(budget.as_millis() as u64))
            }
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(computed) => {
                let cached = CachedRender {
                    bytes: Bytes::from(computed.bytes),
                    format: request.format,
                    width: request.width,
                    height: request.height,
                    feature_count: computed.features_drawn,
                    render_time_ms: elapsed.as_millis() as u64,
                };
                guard.complete(Ok(cached.clone()));
                self.metrics
                    .record_render(elapsed, computed.features_drawn, true)
                    .await;

                if let Some(disk) = &self.disk_cache {
                    let disk = Arc::clone(disk);
                    let fingerprint = fingerprint.clone();
                    let cached = cached.clone();
                    tokio::spawn(async move {
                        disk.put(&fingerprint, &cached).await;
                    });
                }

                info!(
                    fingerprint = %fingerprint,
                    features = computed.features_drawn,
                    bytes = cached.bytes.len(),
                    format = request.format.as_str(),
                    render_ms = cached.render_time_ms,
                    "Rendered map"
                );
                Ok(RenderResult {
                    pixels: Some(computed.pixels),
                    bytes: cached.bytes,
                    format: cached.format,
                    width: cached.width,
                    height: cached.height,
                    render_time_ms: cached.render_time_ms,
                    feature_count: cached.feature_count,
                    cache_hit: false,
                    coalesced: false,
                    fingerprint,
                })
            }
            Err(e) => {
                guard.complete(Err(e.clone()));
                self.metrics.record_render(elapsed, 0, false).await;
                warn!(fingerprint = %fingerprint, error = %e, "Render failed");
                Err(e)
            }
        }
    }

    async fn compute(&self, request: &MapRequest, cancel: &CancelFlag) -> MapResult<Computed> {
        let fetch_started = Instant::now();
        let query = FeatureQuery::new(request.layers.clone(), request.bbox)
            .with_filter(request.filter.clone())
            .with_max_features(self.settings.limits.max_features);
        let layers = self.store.fetch_features(&query).await?;
        self.metrics.record_fetch(fetch_started.elapsed()).await;

        let request = request.clone();
        let styles = Arc::clone(&self.styles);
        let png = self.settings.png;
        let cancel = cancel.clone();
        let computed = tokio::task::spawn_blocking(move || -> MapResult<Computed> {
            let rendered = render_map(&request, &layers, &styles, &cancel)?;
            if cancel.is_cancelled() {
                return Err(MapError::Internal("render cancelled".to_string()));
            }
            let encode_started = Instant::now();
            let bytes = encode_image(
                rendered.canvas.pixels(),
                request.width,
                request.height,
                request.format,
                request.quality,
                &png,
            )?;
            Ok(Computed {
                encode_time: encode_started.elapsed(),
                features_drawn: rendered.features_drawn,
                pixels: rendered.canvas.into_pixels(),
                bytes,
            })
        })
        .await
        .map_err(|e| MapError::Internal(format!("render task failed: {}", e)))??;

        self.metrics.record_encode(computed.encode_time).await;
        Ok(computed)
    }
}
