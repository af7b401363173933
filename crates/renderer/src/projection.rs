//! Linear geographic-to-pixel mapping.

use map_common::{BoundingBox, MapError, MapResult};

/// Maps world coordinates inside `bbox` onto a `width`x`height` pixel grid.
///
/// Pixel rows run top to bottom, so the Y axis is flipped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    bbox: BoundingBox,
    width: u32,
    height: u32,
    scale_x: f64,
    scale_y: f64,
}

impl Viewport {
    pub fn new(bbox: BoundingBox, width: u32, height: u32) -> MapResult<Self> {
        bbox.validate()?;
        if width == 0 || height == 0 {
            return Err(MapError::invalid_param(
                "width/height",
                "viewport dimensions must be positive",
            ));
        }
        Ok(Self {
            bbox,
            width,
            height,
            scale_x: width as f64 / bbox.width(),
            scale_y: height as f64 / bbox.height(),
        })
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Continuous pixel position, unclamped. `None` for non-finite results.
    pub fn project(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let px = (x - self.bbox.min_x) * self.scale_x;
        let py = (self.bbox.max_y - y) * self.scale_y;
        (px.is_finite() && py.is_finite()).then_some((px, py))
    }

    /// Rounded pixel position clamped to the image.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Option<(u32, u32)> {
        let px = ((x - self.bbox.min_x) / self.bbox.width() * self.width as f64).round();
        let py = ((1.0 - (y - self.bbox.min_y) / self.bbox.height()) * self.height as f64).round();
        if !px.is_finite() || !py.is_finite() {
            return None;
        }
        let px = px.clamp(0.0, (self.width - 1) as f64) as u32;
        let py = py.clamp(0.0, (self.height - 1) as f64) as u32;
        Some((px, py))
    }

    /// World coordinates of a pixel's center.
    pub fn pixel_to_world(&self, px: u32, py: u32) -> (f64, f64) {
        (
            self.bbox.min_x + (px as f64 + 0.5) / self.scale_x,
            self.bbox.max_y - (py as f64 + 0.5) / self.scale_y,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_corners_map_inside_image() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let min_x = rng.gen_range(-1.0e6..1.0e6);
            let min_y = rng.gen_range(-1.0e6..1.0e6);
            let bbox = BoundingBox::new(
                min_x,
                min_y,
                min_x + rng.gen_range(1.0e-6..1.0e6),
                min_y + rng.gen_range(1.0e-6..1.0e6),
            );
            let w = rng.gen_range(1..4096);
            let h = rng.gen_range(1..4096);
            let vp = Viewport::new(bbox, w, h).unwrap();
            for (x, y) in [
                (bbox.min_x, bbox.min_y),
                (bbox.min_x, bbox.max_y),
                (bbox.max_x, bbox.min_y),
                (bbox.max_x, bbox.max_y),
            ] {
                let (px, py) = vp.world_to_pixel(x, y).unwrap();
                assert!(px < w && py < h, "{:?} -> {},{} in {}x{}", bbox, px, py, w, h);
            }
        }
    }

    #[test]
    fn test_y_axis_is_flipped() {
        let vp = Viewport::new(BoundingBox::new(0.0, 0.0, 100.0, 100.0), 100, 100).unwrap();
        assert_eq!(vp.world_to_pixel(0.0, 100.0), Some((0, 0)));
        assert_eq!(vp.world_to_pixel(0.0, 0.0), Some((0, 99)));
        assert_eq!(vp.world_to_pixel(50.0, 25.0), Some((50, 75)));
    }

    #[test]
    fn test_out_of_bounds_is_clamped() {
        let vp = Viewport::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 10, 10).unwrap();
        assert_eq!(vp.world_to_pixel(-50.0, 500.0), Some((0, 0)));
        assert_eq!(vp.world_to_pixel(50.0, -500.0), Some((9, 9)));
    }

    #[test]
    fn test_non_finite_rejected() {
        let vp = Viewport::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 10, 10).unwrap();
        assert_eq!(vp.world_to_pixel(f64::NAN, 1.0), None);
        assert_eq!(vp.project(1.0, f64::INFINITY), None);

        let zoomed = Viewport::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 10, 10).unwrap();
        assert_eq!(zoomed.project(f64::MAX, 0.5), None);
    }

    #[test]
    fn test_invalid_viewport() {
        assert!(Viewport::new(BoundingBox::new(0.0, 0.0, 0.0, 1.0), 10, 10).is_err());
        assert!(Viewport::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 0, 10).is_err());
    }

    #[test]
    fn test_pixel_to_world_center() {
        let vp = Viewport::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 10, 10).unwrap();
        let (x, y) = vp.pixel_to_world(0, 0);
        test_utils::assert_coords_approx_eq!((x, y), (0.5, 9.5), 1e-9);
    }
}
