//! Style resolution: client override, then per-layer default, then global default.

use std::collections::HashMap;

use map_common::{Color, GeometryType, LayerStyle, StyleOverride};

/// Resolves the effective paint style for a layer. Pure and infallible.
#[derive(Debug, Clone)]
pub struct StyleResolver {
    layer_defaults: HashMap<String, LayerStyle>,
    geometry_defaults: HashMap<GeometryType, LayerStyle>,
    global: LayerStyle,
}

impl Default for StyleResolver {
    fn default() -> Self {
        let roads = LayerStyle {
            stroke_color: Color::rgb(0, 0, 255),
            stroke_width: 2.0,
            ..LayerStyle::default()
        };
        let buildings = LayerStyle::default();
        let water = LayerStyle {
            fill_color: Color::rgb(0xa0, 0xc8, 0xf0),
            stroke_color: Color::rgb(0x66, 0x99, 0xcc),
            ..LayerStyle::default()
        };
        let landuse = LayerStyle {
            fill_color: Color::rgb(0xc8, 0xe6, 0xc0),
            stroke_width: 0.0,
            opacity: 200,
            ..LayerStyle::default()
        };
        let points = LayerStyle {
            fill_color: Color::rgb(255, 0, 0),
            ..LayerStyle::default()
        };

        let layer_defaults = HashMap::from([
            ("roads".to_string(), roads),
            ("buildings".to_string(), buildings),
            ("water".to_string(), water),
            ("landuse".to_string(), landuse),
            ("points".to_string(), points),
        ]);
        let geometry_defaults = HashMap::from([
            (GeometryType::Point, points),
            (GeometryType::MultiPoint, points),
            (GeometryType::Line, roads),
            (GeometryType::MultiLine, roads),
        ]);

        Self {
            layer_defaults,
            geometry_defaults,
            global: LayerStyle::default(),
        }
    }
}

impl StyleResolver {
    /// Resolver with only a global default and no per-layer entries.
    pub fn empty(global: LayerStyle) -> Self {
        Self {
            layer_defaults: HashMap::new(),
            geometry_defaults: HashMap::new(),
            global,
        }
    }

    /// Layer the given partial styles over the current per-layer defaults.
    pub fn with_layer_overrides<'a, I>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a StyleOverride)>,
    {
        for (layer, o) in overrides {
            let base = self.layer_defaults.get(layer).copied().unwrap_or(self.global);
            self.layer_defaults.insert(layer.clone(), base.apply(o));
        }
        self
    }

    /// Parse a JSON object of layer id to partial style and merge it in.
    pub fn with_json(self, json: &str) -> Result<Self, serde_json::Error> {
        let sheet: HashMap<String, StyleOverride> = serde_json::from_str(json)?;
        Ok(self.with_layer_overrides(&sheet))
    }

    pub fn global(&self) -> &LayerStyle {
        &self.global
    }

    /// `(layerId, overrides) -> LayerStyle`.
    pub fn resolve(&self, layer_id: &str, overrides: Option<&StyleOverride>) -> LayerStyle {
        self.resolve_typed(layer_id, None, overrides)
    }

    /// Like [`StyleResolver::resolve`], using the layer's geometry type when
    /// it has no named default.
    pub fn resolve_typed(
        &self,
        layer_id: &str,
        geometry_type: Option<GeometryType>,
        overrides: Option<&StyleOverride>,
    ) -> LayerStyle {
        let base = self
            .layer_defaults
            .get(layer_id)
            .or_else(|| geometry_type.and_then(|t| self.geometry_defaults.get(&t)))
            .copied()
            .unwrap_or(self.global);
        match overrides {
            Some(o) => base.apply(o),
            None => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_layer_gets_global_default() {
        let resolver = StyleResolver::default();
        assert_eq!(resolver.resolve("mystery", None), LayerStyle::default());
    }

    #[test]
    fn test_named_layer_default() {
        let resolver = StyleResolver::default();
        let roads = resolver.resolve("roads", None);
        assert_eq!(roads.stroke_color, Color::rgb(0, 0, 255));
        assert_eq!(roads.stroke_width, 2.0);
    }

    #[test]
    fn test_geometry_type_default() {
        let resolver = StyleResolver::default();
        let style = resolver.resolve_typed("poi_2024", Some(GeometryType::Point), None);
        assert_eq!(style.fill_color, Color::rgb(255, 0, 0));
        let poly = resolver.resolve_typed("parcels", Some(GeometryType::Polygon), None);
        assert_eq!(poly, LayerStyle::default());
    }

    #[test]
    fn test_override_wins_field_by_field() {
        let resolver = StyleResolver::default();
        let o = StyleOverride {
            stroke_width: Some(5.0),
            ..Default::default()
        };
        let style = resolver.resolve("roads", Some(&o));
        assert_eq!(style.stroke_width, 5.0);
        assert_eq!(style.stroke_color, Color::rgb(0, 0, 255));
    }

    #[test]
    fn test_json_sheet_merges_onto_defaults() {
        let resolver = StyleResolver::default()
            .with_json(r##"{"roads": {"strokeColor": "#00ff00"}, "rail": {"strokeWidth": 3}}"##)
            .unwrap();
        let roads = resolver.resolve("roads", None);
        assert_eq!(roads.stroke_color, Color::rgb(0, 255, 0));
        assert_eq!(roads.stroke_width, 2.0);
        assert_eq!(resolver.resolve("rail", None).stroke_width, 3.0);
    }

    #[test]
    fn test_bad_json_sheet_is_an_error() {
        assert!(StyleResolver::default().with_json("{\"roads\": 5}").is_err());
    }
}
