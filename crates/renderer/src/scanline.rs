//! Scan conversion of polygons, strokes and markers into [`Coverage`].
//!
//! Inputs are continuous pixel coordinates; a pixel is covered when its
//! center `(x + 0.5, y + 0.5)` lies inside the shape. Everything is clipped
//! to the `width`x`height` image, so shapes far outside cost nothing.

use crate::canvas::Coverage;

pub type Point = (f64, f64);

/// Even-odd fill over all rings. Rings need not be closed explicitly.
pub fn fill_polygon(cov: &mut Coverage, rings: &[Vec<Point>], width: u32, height: u32) {
    let mut edges: Vec<(Point, Point)> = Vec::new();
    for ring in rings.iter().filter(|r| r.len() >= 3) {
        for (i, &a) in ring.iter().enumerate() {
            let b = ring[(i + 1) % ring.len()];
            if a.1 != b.1 {
                edges.push((a, b));
            }
        }
    }
    if edges.is_empty() || width == 0 || height == 0 {
        return;
    }

    let (y_min, y_max) = edges.iter().fold((f64::MAX, f64::MIN), |(lo, hi), (a, b)| {
        (lo.min(a.1).min(b.1), hi.max(a.1).max(b.1))
    });
    let first_row = (y_min - 0.5).ceil().max(0.0);
    let last_row = (y_max - 0.5).floor().min((height - 1) as f64);
    if first_row > last_row {
        return;
    }

    let max_x = (width - 1) as f64;
    let mut crossings: Vec<f64> = Vec::new();
    for y in first_row as u32..=last_row as u32 {
        let yc = y as f64 + 0.5;
        crossings.clear();
        for &((x0, y0), (x1, y1)) in &edges {
            if (y0 <= yc && yc < y1) || (y1 <= yc && yc < y0) {
                crossings.push(x0 + (yc - y0) * (x1 - x0) / (y1 - y0));
            }
        }
        crossings.sort_by(f64::total_cmp);
        for pair in crossings.chunks_exact(2) {
            let start = (pair[0] - 0.5).ceil().max(0.0);
            let end = ((pair[1] - 0.5).ceil() - 1.0).min(max_x);
            if start <= end {
                cov.add_span(y, start as u32, end as u32);
            }
        }
    }
}

/// Filled disc of radius `r`. A disc too small to cover any pixel center
/// still marks the pixel holding its center.
pub fn fill_circle(cov: &mut Coverage, center: Point, r: f64, width: u32, height: u32) {
    fill_ring(cov, center, 0.0, r, width, height);
}

/// Annulus between `inner` and `outer` radii.
pub fn fill_ring(
    cov: &mut Coverage,
    (cx, cy): Point,
    inner: f64,
    outer: f64,
    width: u32,
    height: u32,
) {
    if width == 0 || height == 0 {
        return;
    }
    let max_x = (width - 1) as f64;
    let first_row = (cy - outer - 0.5).ceil().max(0.0);
    let last_row = (cy + outer - 0.5).floor().min((height - 1) as f64);

    let mut any = false;
    if outer > 0.0 && inner < outer && first_row <= last_row {
        for y in first_row as u32..=last_row as u32 {
            let dy = y as f64 + 0.5 - cy;
            let ho = (outer * outer - dy * dy).max(0.0).sqrt();
            let (o_start, o_end) = ((cx - ho - 0.5).ceil(), (cx + ho - 0.5).floor());
            let mut push = |a: f64, b: f64| {
                let (a, b) = (a.max(0.0), b.min(max_x));
                if a <= b {
                    cov.add_span(y, a as u32, b as u32);
                    any = true;
                }
            };
            if inner > 0.0 && dy.abs() < inner {
                let hi = (inner * inner - dy * dy).sqrt();
                let (i_start, i_end) = ((cx - hi - 0.5).ceil(), (cx + hi - 0.5).floor());
                push(o_start, i_start - 1.0);
                push(i_end + 1.0, o_end);
            } else {
                push(o_start, o_end);
            }
        }
    }

    if !any && inner <= 0.0 && cx >= 0.0 && cy >= 0.0 && cx < width as f64 && cy < height as f64 {
        cov.add_pixel(cx as u32, cy as u32);
    }
}

/// Stroke a polyline with round joins and caps.
///
/// Widths of one pixel or less use single-pixel Bresenham lines.
pub fn stroke_polyline(
    cov: &mut Coverage,
    points: &[Point],
    closed: bool,
    stroke_width: f64,
    width: u32,
    height: u32,
) {
    if points.is_empty() || stroke_width <= 0.0 || !stroke_width.is_finite() {
        return;
    }

    let segments = points
        .windows(2)
        .map(|w| (w[0], w[1]))
        .chain(closed.then(|| (points[points.len() - 1], points[0])));

    if stroke_width <= 1.0 {
        if points.len() == 1 {
            fill_circle(cov, points[0], 0.0, width, height);
        }
        for (a, b) in segments {
            draw_line(cov, a, b, width, height);
        }
        return;
    }

    let hw = stroke_width / 2.0;
    for (a, b) in segments {
        let (dx, dy) = (b.0 - a.0, b.1 - a.1);
        let len = (dx * dx + dy * dy).sqrt();
        if len < 1e-12 {
            continue;
        }
        let (nx, ny) = (-dy / len * hw, dx / len * hw);
        let quad = vec![
            (a.0 + nx, a.1 + ny),
            (b.0 + nx, b.1 + ny),
            (b.0 - nx, b.1 - ny),
            (a.0 - nx, a.1 - ny),
        ];
        fill_polygon(cov, &[quad], width, height);
    }
    for &p in points {
        fill_circle(cov, p, hw, width, height);
    }
}

/// Single-pixel line, clipped to the image first.
pub fn draw_line(cov: &mut Coverage, a: Point, b: Point, width: u32, height: u32) {
    if width == 0 || height == 0 {
        return;
    }
    let Some((a, b)) = clip_segment(a, b, 0.0, 0.0, width as f64, height as f64) else {
        return;
    };
    let clamp = |v: f64, max: u32| (v.floor() as i64).clamp(0, max as i64 - 1);
    let (mut x0, mut y0) = (clamp(a.0, width), clamp(a.1, height));
    let (x1, y1) = (clamp(b.0, width), clamp(b.1, height));

    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        cov.add_pixel(x0 as u32, y0 as u32);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

/// Liang-Barsky clipping against an axis-aligned rectangle.
fn clip_segment(
    a: Point,
    b: Point,
    x_min: f64,
    y_min: f64,
    x_max: f64,
    y_max: f64,
) -> Option<(Point, Point)> {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [
        (-dx, a.0 - x_min),
        (dx, x_max - a.0),
        (-dy, a.1 - y_min),
        (dy, y_max - a.1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return None;
                }
                t1 = t1.min(r);
            }
        }
    }
    Some((
        (a.0 + t0 * dx, a.1 + t0 * dy),
        (a.0 + t1 * dx, a.1 + t1 * dy),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Point> {
        vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1)]
    }

    #[test]
    fn test_fill_axis_aligned_square() {
        let mut cov = Coverage::new();
        fill_polygon(&mut cov, &[square(2.0, 2.0, 6.0, 5.0)], 10, 10);
        assert_eq!(cov.pixel_count(), 4 * 3);
        assert!(cov.contains(2, 2));
        assert!(cov.contains(5, 4));
        assert!(!cov.contains(6, 4));
        assert!(!cov.contains(5, 5));
    }

    #[test]
    fn test_hole_is_left_empty() {
        let mut cov = Coverage::new();
        let rings = vec![square(0.0, 0.0, 10.0, 10.0), square(3.0, 3.0, 7.0, 7.0)];
        fill_polygon(&mut cov, &rings, 10, 10);
        assert_eq!(cov.pixel_count(), 100 - 16);
        assert!(!cov.contains(5, 5));
        assert!(cov.contains(1, 1));
    }

    #[test]
    fn test_polygon_outside_contributes_nothing() {
        let mut cov = Coverage::new();
        fill_polygon(&mut cov, &[square(20.0, 20.0, 30.0, 30.0)], 10, 10);
        fill_polygon(&mut cov, &[square(-30.0, 2.0, -20.0, 5.0)], 10, 10);
        assert!(cov.is_empty());
    }

    #[test]
    fn test_polygon_partially_outside_is_clipped() {
        let mut cov = Coverage::new();
        fill_polygon(&mut cov, &[square(-1.0e9, -1.0e9, 5.0, 1.0e9)], 10, 10);
        assert_eq!(cov.pixel_count(), 5 * 10);
    }

    #[test]
    fn test_circle() {
        let mut cov = Coverage::new();
        fill_circle(&mut cov, (5.0, 5.0), 2.0, 10, 10);
        assert!(cov.contains(4, 4));
        assert!(cov.contains(5, 5));
        assert!(!cov.contains(2, 5));
        let n = cov.pixel_count();
        assert!((9..=16).contains(&n), "{}", n);
    }

    #[test]
    fn test_tiny_circle_marks_center_pixel() {
        let mut cov = Coverage::new();
        fill_circle(&mut cov, (3.2, 7.9), 0.1, 10, 10);
        assert_eq!(cov.pixel_count(), 1);
        assert!(cov.contains(3, 7));
    }

    #[test]
    fn test_zero_radius_circle_marks_center_pixel() {
        let mut cov = Coverage::new();
        fill_circle(&mut cov, (4.5, 2.5), 0.0, 10, 10);
        assert_eq!(cov.pixel_count(), 1);
        assert!(cov.contains(4, 2));

        let mut degenerate = Coverage::new();
        fill_ring(&mut degenerate, (4.5, 2.5), 3.0, 3.0, 10, 10);
        assert!(degenerate.is_empty());
    }

    #[test]
    fn test_ring_excludes_inner_disc() {
        let mut cov = Coverage::new();
        fill_ring(&mut cov, (10.0, 10.0), 3.0, 5.0, 20, 20);
        assert!(!cov.contains(10, 10));
        assert!(cov.contains(10, 6));
    }

    #[test]
    fn test_thin_line_is_contiguous() {
        let mut cov = Coverage::new();
        draw_line(&mut cov, (0.5, 0.5), (9.5, 3.5), 10, 10);
        for x in 0..10 {
            assert!((0..10).any(|y| cov.contains(x, y)), "column {} empty", x);
        }
    }

    #[test]
    fn test_thin_line_far_outside_is_clipped() {
        let mut cov = Coverage::new();
        draw_line(&mut cov, (-1.0e12, 5.5), (1.0e12, 5.5), 10, 10);
        assert_eq!(cov.pixel_count(), 10);
        let mut none = Coverage::new();
        draw_line(&mut none, (-5.0, -5.0), (-1.0, -1.0), 10, 10);
        assert!(none.is_empty());
    }

    #[test]
    fn test_wide_stroke_covers_band() {
        let mut cov = Coverage::new();
        stroke_polyline(&mut cov, &[(0.0, 5.0), (20.0, 5.0)], false, 4.0, 20, 10);
        for x in 0..20 {
            assert!(cov.contains(x, 3) && cov.contains(x, 6));
            assert!(!cov.contains(x, 8));
        }
    }

    #[test]
    fn test_closed_stroke_draws_closing_segment() {
        let mut cov = Coverage::new();
        let tri = vec![(1.0, 1.0), (8.0, 1.0), (1.0, 8.0)];
        stroke_polyline(&mut cov, &tri, true, 1.0, 10, 10);
        assert!(cov.contains(4, 4) || cov.contains(4, 5) || cov.contains(5, 4));
    }
}
