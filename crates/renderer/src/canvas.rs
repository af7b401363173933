//! RGBA pixel buffer with source-over compositing.

use std::collections::BTreeMap;

use map_common::Color;

/// Set of pixels touched by one primitive, stored as inclusive row spans.
///
/// Painting goes through a coverage set so overlapping parts of one shape
/// (stroke joins, self-intersections) blend exactly once.
#[derive(Debug, Default, Clone)]
pub struct Coverage {
    rows: BTreeMap<u32, Vec<(u32, u32)>>,
    normalized: bool,
}

impl Coverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add pixels `x0..=x1` on row `y`.
    pub fn add_span(&mut self, y: u32, x0: u32, x1: u32) {
        let (x0, x1) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
        self.rows.entry(y).or_default().push((x0, x1));
        self.normalized = false;
    }

    pub fn add_pixel(&mut self, x: u32, y: u32) {
        self.add_span(y, x, x);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sort and merge overlapping or adjacent spans on each row.
    pub fn normalize(&mut self) {
        if self.normalized {
            return;
        }
        for spans in self.rows.values_mut() {
            spans.sort_unstable();
            let mut merged: Vec<(u32, u32)> = Vec::with_capacity(spans.len());
            for &(a, b) in spans.iter() {
                match merged.last_mut() {
                    Some(last) if a <= last.1.saturating_add(1) => last.1 = last.1.max(b),
                    _ => merged.push((a, b)),
                }
            }
            *spans = merged;
        }
        self.normalized = true;
    }

    /// Iterate `(y, x0, x1)` spans. Call [`Coverage::normalize`] first for disjoint spans.
    pub fn spans(&self) -> impl Iterator<Item = (u32, u32, u32)> + '_ {
        self.rows
            .iter()
            .flat_map(|(&y, spans)| spans.iter().map(move |&(a, b)| (y, a, b)))
    }

    pub fn pixel_count(&mut self) -> usize {
        self.normalize();
        self.spans().map(|(_, a, b)| (b - a + 1) as usize).sum()
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        self.rows
            .get(&y)
            .map(|spans| spans.iter().any(|&(a, b)| a <= x && x <= b))
            .unwrap_or(false)
    }
}

/// Owned RGBA8 image, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    /// Allocate a buffer filled with `background`.
    pub fn new(width: u32, height: u32, background: Color) -> Self {
        let len = width as usize * height as usize;
        let pixels = background.to_array().repeat(len);
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ])
    }

    /// Blend `color` over every covered pixel once. Returns pixels touched.
    pub fn fill_coverage(&mut self, coverage: &mut Coverage, color: Color) -> usize {
        if color.a == 0 || coverage.is_empty() {
            return 0;
        }
        coverage.normalize();
        let mut touched = 0;
        for (y, x0, x1) in coverage.spans() {
            if y >= self.height || x0 >= self.width {
                continue;
            }
            let x1 = x1.min(self.width - 1);
            let row = y as usize * self.width as usize;
            for x in x0..=x1 {
                let i = (row + x as usize) * 4;
                blend_over(&mut self.pixels[i..i + 4], color);
            }
            touched += (x1 - x0 + 1) as usize;
        }
        touched
    }
}

/// Source-over compositing of a straight-alpha color onto a straight-alpha pixel.
#[inline]
fn blend_over(dst: &mut [u8], src: Color) {
    if src.a == 255 {
        dst.copy_from_slice(&src.to_array());
        return;
    }

    let src_a = src.a as f32 / 255.0;
    let dst_a = dst[3] as f32 / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return;
    }

    let channel = |s: u8, d: u8| -> u8 {
        ((s as f32 * src_a + d as f32 * dst_a * (1.0 - src_a)) / out_a)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    dst[0] = channel(src.r, dst[0]);
    dst[1] = channel(src.g, dst[1]);
    dst[2] = channel(src.b, dst[2]);
    dst[3] = (out_a * 255.0).round() as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_fills_background() {
        let canvas = Canvas::new(3, 2, Color::rgba(1, 2, 3, 4));
        assert_eq!(canvas.pixels().len(), 3 * 2 * 4);
        assert!(canvas.pixels().chunks_exact(4).all(|p| p == [1, 2, 3, 4]));
    }

    #[test]
    fn test_opaque_fill_replaces() {
        let mut canvas = Canvas::new(4, 4, Color::WHITE);
        let mut cov = Coverage::new();
        cov.add_span(1, 1, 2);
        let touched = canvas.fill_coverage(&mut cov, Color::rgb(255, 0, 0));
        assert_eq!(touched, 2);
        assert_eq!(canvas.pixel(1, 1), Some([255, 0, 0, 255]));
        assert_eq!(canvas.pixel(0, 1), Some([255, 255, 255, 255]));
    }

    #[test]
    fn test_half_alpha_blends_over_white() {
        let mut canvas = Canvas::new(1, 1, Color::WHITE);
        let mut cov = Coverage::new();
        cov.add_pixel(0, 0);
        canvas.fill_coverage(&mut cov, Color::rgba(0, 0, 0, 128));
        let [r, g, b, a] = canvas.pixel(0, 0).unwrap();
        assert_eq!(a, 255);
        assert!((r as i32 - 127).abs() <= 1);
        assert_eq!(r, g);
        assert_eq!(g, b);
    }

    #[test]
    fn test_blend_onto_transparent_keeps_source_color() {
        let mut canvas = Canvas::new(1, 1, Color::TRANSPARENT);
        let mut cov = Coverage::new();
        cov.add_pixel(0, 0);
        canvas.fill_coverage(&mut cov, Color::rgba(200, 100, 50, 128));
        assert_eq!(canvas.pixel(0, 0), Some([200, 100, 50, 128]));
    }

    #[test]
    fn test_overlapping_spans_blend_once() {
        let mut canvas = Canvas::new(8, 1, Color::WHITE);
        let mut cov = Coverage::new();
        cov.add_span(0, 0, 4);
        cov.add_span(0, 2, 6);
        cov.add_span(0, 7, 7);
        assert_eq!(cov.pixel_count(), 8);
        canvas.fill_coverage(&mut cov, Color::rgba(0, 0, 0, 128));
        let first = canvas.pixel(0, 0).unwrap();
        for x in 1..8 {
            assert_eq!(canvas.pixel(x, 0).unwrap(), first);
        }
    }

    #[test]
    fn test_spans_outside_canvas_are_ignored() {
        let mut canvas = Canvas::new(2, 2, Color::WHITE);
        let mut cov = Coverage::new();
        cov.add_span(5, 0, 1);
        cov.add_span(0, 1, 100);
        assert_eq!(canvas.fill_coverage(&mut cov, Color::BLACK), 1);
    }
}
