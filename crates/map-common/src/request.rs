//! Render requests, limits and cache fingerprints.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::bbox::{BoundingBox, WORLD_BOUNDS};
use crate::error::{MapError, MapResult};
use crate::feature::FeatureFilter;
use crate::layer::validate_layer_id;
use crate::style::{Color, StyleOverride};

pub const DEFAULT_WIDTH: u32 = 1024;
pub const DEFAULT_HEIGHT: u32 = 768;
pub const DEFAULT_QUALITY: u8 = 90;
pub const DEFAULT_BACKGROUND: &str = "#ffffff";

/// Most layers a single request may name.
pub const MAX_LAYERS_PER_REQUEST: usize = 32;

/// Output image encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 3] = [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Webp];

    /// Accepts short names and MIME types.
    pub fn parse(s: &str) -> MapResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" | "image/png" => Ok(ImageFormat::Png),
            "jpg" | "jpeg" | "image/jpeg" => Ok(ImageFormat::Jpeg),
            "webp" | "image/webp" => Ok(ImageFormat::Webp),
            other => Err(MapError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Webp => "webp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
        }
    }
}

/// Size and workload ceilings applied before any rendering work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderLimits {
    pub max_width: u32,
    pub max_height: u32,
    pub max_features: usize,
    /// Reject boxes outside lon [-180, 180] / lat [-90, 90]. Off by
    /// default, so projected coordinates are accepted.
    pub geographic_bbox_only: bool,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            max_width: 4096,
            max_height: 4096,
            max_features: 10_000,
            geographic_bbox_only: false,
        }
    }
}

impl RenderLimits {
    pub fn max_area(&self) -> u64 {
        self.max_width as u64 * self.max_height as u64
    }
}

/// Deterministic digest identifying logically equivalent render requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an already computed hex digest.
    pub fn from_hex(hex: impl Into<String>) -> Option<Self> {
        let hex = hex.into();
        (hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()))
            .then(|| Fingerprint(hex.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated-on-demand request to render a map image.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapRequest {
    pub bbox: BoundingBox,
    pub width: u32,
    pub height: u32,
    /// Paint order: later layers draw over earlier ones.
    pub layers: Vec<String>,
    pub styles: BTreeMap<String, StyleOverride>,
    pub background_color: String,
    pub format: ImageFormat,
    pub quality: u8,
    pub filter: Option<FeatureFilter>,
}

impl MapRequest {
    pub fn new(bbox: BoundingBox, width: u32, height: u32) -> Self {
        Self {
            bbox,
            width,
            height,
            layers: Vec::new(),
            styles: BTreeMap::new(),
            background_color: DEFAULT_BACKGROUND.to_string(),
            format: ImageFormat::Png,
            quality: DEFAULT_QUALITY,
            filter: None,
        }
    }

    pub fn with_layers<I, S>(mut self, layers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.layers = layers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_style(mut self, layer: impl Into<String>, style: StyleOverride) -> Self {
        self.styles.insert(layer.into(), style);
        self
    }

    pub fn with_background(mut self, color: impl Into<String>) -> Self {
        self.background_color = color.into();
        self
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_filter(mut self, filter: FeatureFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Background color, white when the string does not parse.
    pub fn background(&self) -> Color {
        Color::parse_or(&self.background_color, Color::WHITE)
    }

    /// Check every limit. Runs before any buffer is allocated.
    pub fn validate(&self, limits: &RenderLimits) -> MapResult<()> {
        if self.width == 0 {
            return Err(MapError::invalid_param("width", "must be at least 1"));
        }
        if self.height == 0 {
            return Err(MapError::invalid_param("height", "must be at least 1"));
        }
        let area = self.width as u64 * self.height as u64;
        if self.width > limits.max_width
            || self.height > limits.max_height
            || area > limits.max_area()
        {
            return Err(MapError::ImageTooLarge {
                width: self.width,
                height: self.height,
                max_width: limits.max_width,
                max_height: limits.max_height,
            });
        }

        self.bbox.validate()?;
        if limits.geographic_bbox_only && !self.bbox.is_geographic() {
            return Err(MapError::InvalidBbox(format!(
                "{} lies outside longitude [-180, 180] / latitude [-90, 90]",
                self.bbox
            )));
        }

        if self.layers.len() > MAX_LAYERS_PER_REQUEST {
            return Err(MapError::invalid_param(
                "layers",
                format!("at most {} layers per request", MAX_LAYERS_PER_REQUEST),
            ));
        }
        for id in &self.layers {
            validate_layer_id(id)?;
        }
        for (layer, style) in &self.styles {
            style.validate(layer)?;
        }
        if !(1..=100).contains(&self.quality) {
            return Err(MapError::invalid_param("quality", "must be between 1 and 100"));
        }
        if let Some(filter) = &self.filter {
            filter.validate()?;
        }
        Ok(())
    }

    /// SHA-256 over the canonical form of everything that affects the output.
    ///
    /// Layer ids keep request order since paint order changes the image.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(b"map-v1\n");
        hasher.update(format!("bbox={}\n", self.bbox.cache_key()).as_bytes());
        hasher.update(format!("size={}x{}\n", self.width, self.height).as_bytes());
        hasher.update(format!("layers={}\n", self.layers.join(",")).as_bytes());
        let styles = serde_json::to_string(&self.styles).unwrap_or_default();
        hasher.update(format!("styles={}\n", styles).as_bytes());
        hasher.update(format!("bg={}\n", self.background().to_hex()).as_bytes());
        hasher.update(format!("format={}\n", self.format.as_str()).as_bytes());
        if self.format != ImageFormat::Png {
            hasher.update(format!("quality={}\n", self.quality).as_bytes());
        }
        if let Some(filter) = &self.filter {
            let filter = serde_json::to_string(filter).unwrap_or_default();
            hasher.update(format!("filter={}\n", filter).as_bytes());
        }
        Fingerprint(format!("{:x}", hasher.finalize()))
    }
}

/// JSON body accepted by the map generation endpoint.
///
/// `bbox` may be an array or separate `minx`/`miny`/`maxx`/`maxy` fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapRequestBody {
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    #[serde(default)]
    pub minx: Option<f64>,
    #[serde(default)]
    pub miny: Option<f64>,
    #[serde(default)]
    pub maxx: Option<f64>,
    #[serde(default)]
    pub maxy: Option<f64>,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub height: Option<i64>,
    #[serde(default)]
    pub layers: Vec<String>,
    #[serde(default)]
    pub styles: BTreeMap<String, StyleOverride>,
    #[serde(default, alias = "background_color", alias = "background")]
    pub background_color: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub quality: Option<i64>,
    #[serde(default)]
    pub filter: Option<FeatureFilter>,
}

impl MapRequestBody {
    /// Build the request. Missing fields take the documented defaults.
    pub fn into_request(self) -> MapResult<MapRequest> {
        let bbox = match (self.bbox, self.minx, self.miny, self.maxx, self.maxy) {
            (Some(bbox), ..) => bbox,
            (None, Some(minx), Some(miny), Some(maxx), Some(maxy)) => {
                BoundingBox::new(minx, miny, maxx, maxy)
            }
            (None, None, None, None, None) => WORLD_BOUNDS,
            _ => {
                return Err(MapError::InvalidBbox(
                    "provide bbox or all of minx, miny, maxx, maxy".to_string(),
                ))
            }
        };

        let dimension = |name: &str, v: Option<i64>, default: u32| -> MapResult<u32> {
            match v {
                None => Ok(default),
                Some(v) => u32::try_from(v)
                    .map_err(|_| MapError::invalid_param(name, format!("{} is out of range", v))),
            }
        };
        let width = dimension("width", self.width, DEFAULT_WIDTH)?;
        let height = dimension("height", self.height, DEFAULT_HEIGHT)?;

        let quality = match self.quality {
            None => DEFAULT_QUALITY,
            Some(q) if (1..=100).contains(&q) => q as u8,
            Some(q) => {
                return Err(MapError::invalid_param(
                    "quality",
                    format!("{} is not between 1 and 100", q),
                ))
            }
        };

        let format = match self.format.as_deref() {
            None | Some("") => ImageFormat::Png,
            Some(f) => ImageFormat::parse(f)?,
        };

        Ok(MapRequest {
            bbox,
            width,
            height,
            layers: self.layers,
            styles: self.styles,
            background_color: self
                .background_color
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| DEFAULT_BACKGROUND.to_string()),
            format,
            quality,
            filter: self.filter,
        })
    }
}
