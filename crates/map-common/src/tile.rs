//! XYZ tile addressing on the Web Mercator grid.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::bbox::BoundingBox;
use crate::error::{MapError, MapResult};

/// Tile edge length in pixels.
pub const TILE_SIZE: u32 = 256;

/// Deepest supported zoom level.
pub const MAX_ZOOM: u32 = 20;

/// A tile coordinate (z/x/y), row 0 at the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u32, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Number of tiles along one axis at this zoom.
    pub fn tiles_per_axis(&self) -> u32 {
        1u32 << self.z.min(MAX_ZOOM)
    }

    pub fn validate(&self) -> MapResult<()> {
        if self.z > MAX_ZOOM {
            return Err(MapError::InvalidTile(format!(
                "zoom {} exceeds maximum {}",
                self.z, MAX_ZOOM
            )));
        }
        let n = self.tiles_per_axis();
        if self.x >= n || self.y >= n {
            return Err(MapError::InvalidTile(format!(
                "x and y must be below {} at zoom {}, got {}/{}",
                n, self.z, self.x, self.y
            )));
        }
        Ok(())
    }

    /// Tile extent in WGS84 degrees.
    pub fn bbox_wgs84(&self) -> BoundingBox {
        let n = self.tiles_per_axis() as f64;
        let lon = |x: f64| x / n * 360.0 - 180.0;
        let lat = |y: f64| (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees();
        BoundingBox::new(
            lon(self.x as f64),
            lat(self.y as f64 + 1.0),
            lon(self.x as f64 + 1.0),
            lat(self.y as f64),
        )
    }

    /// Generate a cache key string.
    pub fn cache_key(&self) -> String {
        format!("{}/{}/{}", self.z, self.x, self.y)
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zoom_zero_covers_mercator_world() {
        let bbox = TileCoord::new(0, 0, 0).bbox_wgs84();
        assert!((bbox.min_x + 180.0).abs() < 1e-9);
        assert!((bbox.max_x - 180.0).abs() < 1e-9);
        assert!((bbox.max_y - 85.0511287798).abs() < 1e-6);
        assert!((bbox.min_y + 85.0511287798).abs() < 1e-6);
    }

    #[test]
    fn test_quadrants_at_zoom_one() {
        let nw = TileCoord::new(1, 0, 0).bbox_wgs84();
        assert_eq!(nw.max_x, 0.0);
        assert!(nw.min_y.abs() < 1e-9);
        let se = TileCoord::new(1, 1, 1).bbox_wgs84();
        assert_eq!(se.min_x, 0.0);
        assert!(se.max_y.abs() < 1e-9);
    }

    #[test]
    fn test_validation_bounds() {
        assert!(TileCoord::new(0, 0, 0).validate().is_ok());
        assert!(TileCoord::new(3, 7, 7).validate().is_ok());
        assert!(TileCoord::new(3, 8, 0).validate().is_err());
        assert!(TileCoord::new(21, 0, 0).validate().is_err());
        assert_eq!(
            TileCoord::new(2, 0, 4).validate().unwrap_err().error_code(),
            "INVALID_TILE_PARAMS"
        );
    }
}
