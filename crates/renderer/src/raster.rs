//! Geometry painting: projects features and composites them onto a canvas.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use map_common::{
    Color, Feature, Geometry, LayerFeatures, LayerStyle, MapError, MapRequest, MapResult, Position,
};

use crate::canvas::{Canvas, Coverage};
use crate::projection::Viewport;
use crate::scanline::{self, Point};
use crate::style::StyleResolver;

/// Shared flag polled between features so a timed-out render stops early.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of painting a full request.
#[derive(Debug)]
pub struct RenderedMap {
    pub canvas: Canvas,
    /// Features that painted at least one pixel.
    pub features_drawn: usize,
    pub vertices_skipped: usize,
}

/// Paints geometry into an owned canvas through a fixed viewport.
pub struct Rasterizer {
    viewport: Viewport,
    canvas: Canvas,
    features_drawn: usize,
    vertices_skipped: usize,
}

impl Rasterizer {
    pub fn new(viewport: Viewport, background: Color) -> Self {
        let canvas = Canvas::new(viewport.width(), viewport.height(), background);
        Self {
            viewport,
            canvas,
            features_drawn: 0,
            vertices_skipped: 0,
        }
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    /// Paint every feature in order. Fails only when cancelled.
    pub fn draw_layer(
        &mut self,
        features: &[Feature],
        style: &LayerStyle,
        cancel: &CancelFlag,
    ) -> MapResult<usize> {
        let mut drawn = 0;
        for feature in features {
            if cancel.is_cancelled() {
                return Err(MapError::Internal("render cancelled".to_string()));
            }
            if self.draw_geometry(&feature.geometry, style) {
                drawn += 1;
            }
        }
        Ok(drawn)
    }

    /// Paint one geometry. Returns whether any pixel changed coverage.
    pub fn draw_geometry(&mut self, geometry: &Geometry, style: &LayerStyle) -> bool {
        let drawn = match geometry {
            Geometry::Point(p) => self.draw_points(std::slice::from_ref(p), style),
            Geometry::MultiPoint(ps) => self.draw_points(ps, style),
            Geometry::LineString(line) => self.draw_lines(std::slice::from_ref(line), style),
            Geometry::MultiLineString(lines) => self.draw_lines(lines, style),
            Geometry::Polygon(rings) => self.draw_polygons(std::slice::from_ref(rings), style),
            Geometry::MultiPolygon(polys) => self.draw_polygons(polys, style),
        };
        if drawn {
            self.features_drawn += 1;
        }
        drawn
    }

    pub fn finish(self) -> RenderedMap {
        RenderedMap {
            canvas: self.canvas,
            features_drawn: self.features_drawn,
            vertices_skipped: self.vertices_skipped,
        }
    }

    /// Project a vertex list, dropping vertices that do not project to finite pixels.
    fn project_path(&mut self, positions: &[Position]) -> Vec<Point> {
        let projected: Vec<Point> = positions
            .iter()
            .filter_map(|p| self.viewport.project(p[0], p[1]))
            .collect();
        self.vertices_skipped += positions.len() - projected.len();
        projected
    }

    fn dims(&self) -> (u32, u32) {
        (self.canvas.width(), self.canvas.height())
    }

    fn draw_points(&mut self, points: &[Position], style: &LayerStyle) -> bool {
        let (w, h) = self.dims();
        let projected = self.project_path(points);
        let radius = style.point_radius as f64;

        let mut fill = Coverage::new();
        for &p in &projected {
            scanline::fill_circle(&mut fill, p, radius, w, h);
        }
        let mut touched = self.canvas.fill_coverage(&mut fill, style.effective_fill());

        if style.stroke_width > 0.0 {
            let half = style.stroke_width as f64 / 2.0;
            let mut outline = Coverage::new();
            for &p in &projected {
                scanline::fill_ring(&mut outline, p, (radius - half).max(0.0), radius + half, w, h);
            }
            touched += self.canvas.fill_coverage(&mut outline, style.effective_stroke());
        }
        touched > 0
    }

    fn draw_lines(&mut self, lines: &[Vec<Position>], style: &LayerStyle) -> bool {
        let (w, h) = self.dims();
        let mut cov = Coverage::new();
        for line in lines {
            let path = self.project_path(line);
            scanline::stroke_polyline(&mut cov, &path, false, style.stroke_width as f64, w, h);
        }
        self.canvas.fill_coverage(&mut cov, style.effective_stroke()) > 0
    }

    fn draw_polygons(&mut self, polygons: &[Vec<Vec<Position>>], style: &LayerStyle) -> bool {
        let (w, h) = self.dims();
        let mut rings: Vec<Vec<Vec<Point>>> = Vec::with_capacity(polygons.len());
        for poly in polygons {
            let mut projected = Vec::with_capacity(poly.len());
            for ring in poly {
                projected.push(self.project_path(ring));
            }
            rings.push(projected);
        }

        let mut fill = Coverage::new();
        for poly in &rings {
            scanline::fill_polygon(&mut fill, poly, w, h);
        }
        let mut touched = self.canvas.fill_coverage(&mut fill, style.effective_fill());

        if style.stroke_width > 0.0 {
            let mut outline = Coverage::new();
            for ring in rings.iter().flatten() {
                scanline::stroke_polyline(
                    &mut outline,
                    ring,
                    true,
                    style.stroke_width as f64,
                    w,
                    h,
                );
            }
            touched += self.canvas.fill_coverage(&mut outline, style.effective_stroke());
        }
        touched > 0
    }
}

/// Paint the requested layers in order onto a fresh background.
///
/// `layers` must already be in request order; the rasterizer never reorders.
pub fn render_map(
    request: &MapRequest,
    layers: &[LayerFeatures],
    resolver: &StyleResolver,
    cancel: &CancelFlag,
) -> MapResult<RenderedMap> {
    let viewport = Viewport::new(request.bbox, request.width, request.height)?;
    let mut rasterizer = Rasterizer::new(viewport, request.background());

    for layer in layers {
        let style = resolver.resolve_typed(
            &layer.layer_id,
            layer.geometry_type,
            request.styles.get(&layer.layer_id),
        );
        let drawn = rasterizer.draw_layer(&layer.features, &style, cancel)?;
        debug!(
            layer = %layer.layer_id,
            features = layer.features.len(),
            drawn = drawn,
            "Painted layer"
        );
    }

    let rendered = rasterizer.finish();
    if rendered.vertices_skipped > 0 {
        debug!(
            skipped = rendered.vertices_skipped,
            "Skipped vertices with non-finite projection"
        );
    }
    Ok(rendered)
}
