//! Paint styles and colors.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MapError, MapResult};

/// Largest accepted stroke width or marker radius, in pixels.
pub const MAX_STYLE_PIXELS: f32 = 64.0;

/// 8-bit RGBA color. Serialized as `#RRGGBB`, or `#RRGGBBAA` when not opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parse `#RGB`, `#RRGGBB` or `#RRGGBBAA` (the `#` is optional).
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_prefix('#').unwrap_or(s);
        if !s.is_ascii() {
            return None;
        }
        let byte = |i: usize| u8::from_str_radix(&s[i..i + 2], 16).ok();
        match s.len() {
            3 => {
                let mut out = [0u8; 3];
                for (slot, c) in out.iter_mut().zip(s.chars()) {
                    let v = c.to_digit(16)? as u8;
                    *slot = v * 17;
                }
                Some(Color::rgb(out[0], out[1], out[2]))
            }
            6 => Some(Color::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Some(Color::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        }
    }

    /// Parse a hex color, falling back to `default` on any parse failure.
    pub fn parse_or(s: &str, default: Color) -> Color {
        Color::from_hex(s).unwrap_or(default)
    }

    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }

    pub fn to_array(&self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Scale alpha by an additional 0-255 opacity.
    pub fn with_opacity(&self, opacity: u8) -> Color {
        let a = (self.a as u16 * opacity as u16 + 127) / 255;
        Color { a: a as u8, ..*self }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Color::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid hex color '{}'", s)))
    }
}

/// Concrete paint style for one layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerStyle {
    pub fill_color: Color,
    pub stroke_color: Color,
    pub stroke_width: f32,
    /// Layer opacity applied on top of the colors' own alpha.
    pub opacity: u8,
    pub point_radius: f32,
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            fill_color: Color::rgb(0xcc, 0xcc, 0xcc),
            stroke_color: Color::BLACK,
            stroke_width: 1.0,
            opacity: 255,
            point_radius: 3.0,
        }
    }
}

impl LayerStyle {
    /// Field-wise merge: every field set in `overrides` wins.
    pub fn apply(&self, overrides: &StyleOverride) -> LayerStyle {
        LayerStyle {
            fill_color: overrides.fill_color.unwrap_or(self.fill_color),
            stroke_color: overrides.stroke_color.unwrap_or(self.stroke_color),
            stroke_width: overrides.stroke_width.unwrap_or(self.stroke_width),
            opacity: overrides.opacity.unwrap_or(self.opacity),
            point_radius: overrides.point_radius.unwrap_or(self.point_radius),
        }
    }

    pub fn effective_fill(&self) -> Color {
        self.fill_color.with_opacity(self.opacity)
    }

    pub fn effective_stroke(&self) -> Color {
        self.stroke_color.with_opacity(self.opacity)
    }
}

/// Client supplied partial style. Unset fields fall through to defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_radius: Option<f32>,
}

impl StyleOverride {
    pub fn validate(&self, layer: &str) -> MapResult<()> {
        let check = |name: &str, v: Option<f32>| -> MapResult<()> {
            match v {
                Some(v) if !v.is_finite() || !(0.0..=MAX_STYLE_PIXELS).contains(&v) => {
                    Err(MapError::invalid_param(
                        format!("styles.{}.{}", layer, name),
                        format!("must be between 0 and {}", MAX_STYLE_PIXELS),
                    ))
                }
                _ => Ok(()),
            }
        };
        check("strokeWidth", self.stroke_width)?;
        check("pointRadius", self.point_radius)
    }

    pub fn is_empty(&self) -> bool {
        *self == StyleOverride::default()
    }
}

impl From<LayerStyle> for StyleOverride {
    fn from(s: LayerStyle) -> Self {
        Self {
            fill_color: Some(s.fill_color),
            stroke_color: Some(s.stroke_color),
            stroke_width: Some(s.stroke_width),
            opacity: Some(s.opacity),
            point_radius: Some(s.point_radius),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_forms() {
        assert_eq!(Color::from_hex("#fff"), Some(Color::WHITE));
        assert_eq!(Color::from_hex("#336699"), Some(Color::rgb(0x33, 0x66, 0x99)));
        assert_eq!(
            Color::from_hex("#33669980"),
            Some(Color::rgba(0x33, 0x66, 0x99, 0x80))
        );
        assert_eq!(Color::from_hex("336699"), Some(Color::rgb(0x33, 0x66, 0x99)));
        assert_eq!(Color::from_hex("#12345"), None);
        assert_eq!(Color::from_hex("#gg0000"), None);
        assert_eq!(Color::from_hex("#ééé"), None);
    }

    #[test]
    fn test_parse_or_defaults_to_white() {
        assert_eq!(Color::parse_or("not a color", Color::WHITE), Color::WHITE);
    }

    #[test]
    fn test_hex_round_trip_format() {
        assert_eq!(Color::rgb(1, 2, 3).to_hex(), "#010203");
        assert_eq!(Color::rgba(1, 2, 3, 4).to_hex(), "#01020304");
    }

    #[test]
    fn test_with_opacity() {
        assert_eq!(Color::rgb(10, 20, 30).with_opacity(255).a, 255);
        assert_eq!(Color::rgb(10, 20, 30).with_opacity(0).a, 0);
        assert_eq!(Color::rgba(10, 20, 30, 128).with_opacity(128).a, 64);
    }

    #[test]
    fn test_apply_override_is_field_wise() {
        let base = LayerStyle::default();
        let over = StyleOverride {
            stroke_width: Some(4.0),
            ..Default::default()
        };
        let merged = base.apply(&over);
        assert_eq!(merged.stroke_width, 4.0);
        assert_eq!(merged.fill_color, base.fill_color);
    }

    #[test]
    fn test_override_validation() {
        let bad = StyleOverride {
            stroke_width: Some(-1.0),
            ..Default::default()
        };
        assert!(bad.validate("roads").is_err());
        assert!(StyleOverride::default().validate("roads").is_ok());
    }

    #[test]
    fn test_override_deserializes_from_json() {
        let o: StyleOverride =
            serde_json::from_str(r##"{"fillColor":"#ff0000","opacity":128}"##).unwrap();
        assert_eq!(o.fill_color, Some(Color::rgb(255, 0, 0)));
        assert_eq!(o.opacity, Some(128));
        assert!(o.stroke_color.is_none());
    }
}
