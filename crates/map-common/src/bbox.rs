//! Bounding box types and operations.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MapError, MapResult};

/// Full WGS84 extent, used when a layer carries no stored bounds.
pub const WORLD_BOUNDS: BoundingBox = BoundingBox {
    min_x: -180.0,
    min_y: -90.0,
    max_x: 180.0,
    max_y: 90.0,
};

/// An axis-aligned bounding box in geographic or projected units.
///
/// Serializes as `[minx, miny, maxx, maxy]`. Deserialization also accepts
/// an object with `minx`/`miny`/`maxx`/`maxy` keys (either case).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Parse a comma separated "minx,miny,maxx,maxy" string.
    pub fn from_csv(s: &str) -> Result<Self, BboxParseError> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BboxParseError::InvalidFormat(s.to_string()));
        }

        let mut values = [0.0f64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| BboxParseError::InvalidNumber(part.to_string()))?;
        }
        Ok(Self::from(values))
    }

    /// Width of the bounding box in coordinate units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the bounding box in coordinate units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// True when every edge is finite and the box has positive area.
    pub fn is_valid(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
            && self.min_x < self.max_x
            && self.min_y < self.max_y
    }

    /// Reject a degenerate or non-finite box.
    pub fn validate(&self) -> MapResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(MapError::InvalidBbox(format!(
                "expected minx < maxx and miny < maxy with finite values, got {}",
                self
            )))
        }
    }

    /// True when the box lies within longitude [-180, 180] and latitude [-90, 90].
    pub fn is_geographic(&self) -> bool {
        self.min_x >= -180.0 && self.max_x <= 180.0 && self.min_y >= -90.0 && self.max_y <= 90.0
    }

    /// Check if this bbox intersects another. Touching edges count.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Check if a point is contained within this bbox.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Generate a cache key fragment for this bbox (quantized to avoid floating point issues).
    pub fn cache_key(&self) -> String {
        // Quantize to 6 decimal places for cache key stability
        format!(
            "{:.6}_{:.6}_{:.6}_{:.6}",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

impl Serialize for BoundingBox {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_array().serialize(serializer)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BboxRepr {
    Array([f64; 4]),
    Object {
        #[serde(alias = "minX")]
        minx: f64,
        #[serde(alias = "minY")]
        miny: f64,
        #[serde(alias = "maxX")]
        maxx: f64,
        #[serde(alias = "maxY")]
        maxy: f64,
    },
}

impl<'de> Deserialize<'de> for BoundingBox {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match BboxRepr::deserialize(deserializer)? {
            BboxRepr::Array(v) => BoundingBox::from(v),
            BboxRepr::Object {
                minx,
                miny,
                maxx,
                maxy,
            } => BoundingBox::new(minx, miny, maxx, maxy),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BboxParseError {
    #[error("Invalid bbox format: {0}. Expected 'minx,miny,maxx,maxy'")]
    InvalidFormat(String),

    #[error("Invalid number in bbox: {0}")]
    InvalidNumber(String),
}
