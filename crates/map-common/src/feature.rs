//! Feature geometry model and attribute filters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bbox::BoundingBox;
use crate::error::{MapError, MapResult};
use crate::layer::GeometryType;

/// A coordinate pair `[x, y]`.
pub type Position = [f64; 2];

/// Tagged geometry in GeoJSON geometry form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    LineString(Vec<Position>),
    /// Outer ring first, holes after.
    Polygon(Vec<Vec<Position>>),
    MultiPoint(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl Geometry {
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::LineString(_) => GeometryType::Line,
            Geometry::Polygon(_) => GeometryType::Polygon,
            Geometry::MultiPoint(_) => GeometryType::MultiPoint,
            Geometry::MultiLineString(_) => GeometryType::MultiLine,
            Geometry::MultiPolygon(_) => GeometryType::MultiPolygon,
        }
    }

    /// Iterate every vertex regardless of nesting.
    pub fn positions(&self) -> Box<dyn Iterator<Item = &Position> + '_> {
        match self {
            Geometry::Point(p) => Box::new(std::iter::once(p)),
            Geometry::LineString(ps) | Geometry::MultiPoint(ps) => Box::new(ps.iter()),
            Geometry::Polygon(rings) | Geometry::MultiLineString(rings) => {
                Box::new(rings.iter().flatten())
            }
            Geometry::MultiPolygon(polys) => Box::new(polys.iter().flatten().flatten()),
        }
    }

    /// Envelope of the finite vertices, `None` if there are none.
    pub fn bounds(&self) -> Option<BoundingBox> {
        self.positions()
            .filter(|p| p[0].is_finite() && p[1].is_finite())
            .fold(None, |acc: Option<BoundingBox>, p| {
                let b = BoundingBox::new(p[0], p[1], p[0], p[1]);
                Some(match acc {
                    Some(acc) => acc.union(&b),
                    None => b,
                })
            })
    }

    pub fn vertex_count(&self) -> usize {
        self.positions().count()
    }
}

/// One geometric record belonging to a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: i64,
    pub layer_id: String,
    pub geometry: Geometry,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Features fetched for one requested layer, in paint order.
#[derive(Debug, Clone, Default)]
pub struct LayerFeatures {
    pub layer_id: String,
    pub geometry_type: Option<GeometryType>,
    pub features: Vec<Feature>,
}

impl LayerFeatures {
    pub fn empty(layer_id: impl Into<String>) -> Self {
        Self {
            layer_id: layer_id.into(),
            ..Default::default()
        }
    }
}

/// Comparison applied by a [`FeatureFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// SQL `LIKE` pattern match (`%` and `_` wildcards).
    Like,
}

/// Attribute predicate evaluated by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFilter {
    pub attribute: String,
    pub op: FilterOp,
    pub value: Value,
}

impl FeatureFilter {
    pub fn new(attribute: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    pub fn validate(&self) -> MapResult<()> {
        if self.attribute.is_empty()
            || !self
                .attribute
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(MapError::invalid_param(
                "filter.attribute",
                format!("'{}' is not a valid attribute name", self.attribute),
            ));
        }
        match (&self.op, &self.value) {
            (FilterOp::Like, Value::String(_)) => Ok(()),
            (FilterOp::Like, _) => Err(MapError::invalid_param(
                "filter.value",
                "like requires a string pattern",
            )),
            (_, Value::String(_) | Value::Number(_) | Value::Bool(_)) => Ok(()),
            _ => Err(MapError::invalid_param(
                "filter.value",
                "value must be a string, number or boolean",
            )),
        }
    }

    /// JSON path used with `json_extract`.
    pub fn json_path(&self) -> String {
        format!("$.{}", self.attribute)
    }

    /// Evaluate against in-memory properties. Missing attributes never match.
    pub fn matches(&self, properties: &Map<String, Value>) -> bool {
        let Some(actual) = properties.get(&self.attribute) else {
            return false;
        };
        match self.op {
            FilterOp::Like => match (actual, &self.value) {
                (Value::String(s), Value::String(pattern)) => like_match(s, pattern),
                _ => false,
            },
            op => match compare(actual, &self.value) {
                Some(ord) => match op {
                    FilterOp::Eq => ord.is_eq(),
                    FilterOp::Ne => ord.is_ne(),
                    FilterOp::Lt => ord.is_lt(),
                    FilterOp::Le => ord.is_le(),
                    FilterOp::Gt => ord.is_gt(),
                    FilterOp::Ge => ord.is_ge(),
                    FilterOp::Like => false,
                },
                None => false,
            },
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Case-insensitive ASCII `LIKE`, matching SQLite's default behaviour.
fn like_match(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.to_ascii_lowercase().chars().collect();
    let p: Vec<char> = pattern.to_ascii_lowercase().chars().collect();
    let (mut ti, mut pi) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '_' || p[pi] == t[ti]) {
            ti += 1;
            pi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '%')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_geojson_shape() {
        let g: Geometry =
            serde_json::from_value(json!({"type": "LineString", "coordinates": [[0, 0], [1, 2]]}))
                .unwrap();
        assert_eq!(g, Geometry::LineString(vec![[0.0, 0.0], [1.0, 2.0]]));
        assert_eq!(g.geometry_type(), GeometryType::Line);
        let back = serde_json::to_value(&g).unwrap();
        assert_eq!(back["type"], "LineString");
    }

    #[test]
    fn test_bounds_cover_all_parts() {
        let g = Geometry::MultiPolygon(vec![
            vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]],
            vec![vec![[5.0, -3.0], [6.0, -3.0], [6.0, 2.0], [5.0, -3.0]]],
        ]);
        assert_eq!(g.bounds(), Some(BoundingBox::new(0.0, -3.0, 6.0, 2.0)));
        assert_eq!(Geometry::LineString(vec![]).bounds(), None);
    }

    #[test]
    fn test_bounds_skip_non_finite() {
        let g = Geometry::MultiPoint(vec![[f64::NAN, 1.0], [2.0, 3.0]]);
        assert_eq!(g.bounds(), Some(BoundingBox::new(2.0, 3.0, 2.0, 3.0)));
    }

    #[test]
    fn test_filter_numeric_and_string() {
        let props = json!({"height": 12.5, "type": "residential"});
        let props = props.as_object().unwrap();
        assert!(FeatureFilter::new("height", FilterOp::Gt, 10).matches(props));
        assert!(!FeatureFilter::new("height", FilterOp::Lt, 10).matches(props));
        assert!(FeatureFilter::new("type", FilterOp::Eq, "residential").matches(props));
        assert!(FeatureFilter::new("type", FilterOp::Like, "RES%").matches(props));
        assert!(FeatureFilter::new("type", FilterOp::Like, "%dent_al").matches(props));
        assert!(!FeatureFilter::new("missing", FilterOp::Ne, 1).matches(props));
    }

    #[test]
    fn test_filter_validation() {
        assert!(FeatureFilter::new("height", FilterOp::Ge, 3).validate().is_ok());
        assert!(FeatureFilter::new("a.b", FilterOp::Eq, 3).validate().is_err());
        assert!(FeatureFilter::new("name", FilterOp::Like, 3).validate().is_err());
        assert!(FeatureFilter::new("name", FilterOp::Eq, json!([1])).validate().is_err());
    }
}
