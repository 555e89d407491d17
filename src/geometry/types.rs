//! Geometry model
//!
//! Plain 2D coordinates grouped into the six simple-feature types a layer
//! can declare. Geometries compare structurally, coordinate by coordinate,
//! which is what the no-op write suppression relies on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::errors::{GeometryError, GeometryResult};

/// A single 2D coordinate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    /// Creates a coordinate.
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A ring or line string as an ordered list of coordinates.
pub type Ring = Vec<Coord>;

/// Geometry type a layer declares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GeometryType {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

impl GeometryType {
    /// All types in WKB code order.
    pub const ALL: [GeometryType; 6] = [
        GeometryType::Point,
        GeometryType::LineString,
        GeometryType::Polygon,
        GeometryType::MultiPoint,
        GeometryType::MultiLineString,
        GeometryType::MultiPolygon,
    ];

    /// Returns the canonical upper-case name used in WKT.
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryType::Point => "POINT",
            GeometryType::LineString => "LINESTRING",
            GeometryType::Polygon => "POLYGON",
            GeometryType::MultiPoint => "MULTIPOINT",
            GeometryType::MultiLineString => "MULTILINESTRING",
            GeometryType::MultiPolygon => "MULTIPOLYGON",
        }
    }

    /// Returns the ISO WKB type code.
    pub fn wkb_code(&self) -> u32 {
        match self {
            GeometryType::Point => 1,
            GeometryType::LineString => 2,
            GeometryType::Polygon => 3,
            GeometryType::MultiPoint => 4,
            GeometryType::MultiLineString => 5,
            GeometryType::MultiPolygon => 6,
        }
    }

    /// Looks up a type by WKB code.
    pub fn from_wkb_code(code: u32) -> GeometryResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.wkb_code() == code)
            .ok_or_else(|| GeometryError::UnknownType(format!("WKB code {}", code)))
    }

    /// Returns true for the Multi* types.
    pub fn is_multi(&self) -> bool {
        matches!(
            self,
            GeometryType::MultiPoint | GeometryType::MultiLineString | GeometryType::MultiPolygon
        )
    }

    /// Returns the Multi* counterpart of a single type (identity for multi types).
    pub fn to_multi(&self) -> GeometryType {
        match self {
            GeometryType::Point | GeometryType::MultiPoint => GeometryType::MultiPoint,
            GeometryType::LineString | GeometryType::MultiLineString => {
                GeometryType::MultiLineString
            }
            GeometryType::Polygon | GeometryType::MultiPolygon => GeometryType::MultiPolygon,
        }
    }

    /// Returns the single counterpart of a multi type (identity for single types).
    pub fn to_single(&self) -> GeometryType {
        match self {
            GeometryType::Point | GeometryType::MultiPoint => GeometryType::Point,
            GeometryType::LineString | GeometryType::MultiLineString => GeometryType::LineString,
            GeometryType::Polygon | GeometryType::MultiPolygon => GeometryType::Polygon,
        }
    }

    /// Returns true if both types belong to the same point/line/polygon family.
    pub fn same_family(&self, other: GeometryType) -> bool {
        self.to_single() == other.to_single()
    }
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeometryType {
    type Err = GeometryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| GeometryError::UnknownType(s.to_string()))
    }
}

/// A validated 2D geometry.
#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    Point(Coord),
    LineString(Ring),
    Polygon(Vec<Ring>),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
}

impl Geometry {
    /// Returns the type of this geometry.
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::LineString(_) => GeometryType::LineString,
            Geometry::Polygon(_) => GeometryType::Polygon,
            Geometry::MultiPoint(_) => GeometryType::MultiPoint,
            Geometry::MultiLineString(_) => GeometryType::MultiLineString,
            Geometry::MultiPolygon(_) => GeometryType::MultiPolygon,
        }
    }

    /// Number of parts: 1 for single geometries, member count for multi.
    pub fn part_count(&self) -> usize {
        match self {
            Geometry::Point(_) | Geometry::LineString(_) | Geometry::Polygon(_) => 1,
            Geometry::MultiPoint(points) => points.len(),
            Geometry::MultiLineString(lines) => lines.len(),
            Geometry::MultiPolygon(polygons) => polygons.len(),
        }
    }

    /// Checks structural rules: finite coordinates, at least two points per
    /// line, closed rings of at least four points, non-empty collections.
    pub fn validate(&self) -> GeometryResult<()> {
        match self {
            Geometry::Point(c) => check_coord(c),
            Geometry::LineString(line) => check_line(line),
            Geometry::Polygon(rings) => check_polygon(rings),
            Geometry::MultiPoint(points) => {
                non_empty(points.len(), "MULTIPOINT")?;
                points.iter().try_for_each(check_coord)
            }
            Geometry::MultiLineString(lines) => {
                non_empty(lines.len(), "MULTILINESTRING")?;
                lines.iter().try_for_each(|l| check_line(l))
            }
            Geometry::MultiPolygon(polygons) => {
                non_empty(polygons.len(), "MULTIPOLYGON")?;
                polygons.iter().try_for_each(|p| check_polygon(p))
            }
        }
    }

    /// Converts this geometry into `target`, which must be in the same family.
    ///
    /// Single to multi always succeeds. Multi to single succeeds only for
    /// collections with exactly one member.
    pub fn convert(&self, target: GeometryType) -> GeometryResult<Geometry> {
        let source = self.geometry_type();
        if source == target {
            return Ok(self.clone());
        }
        if !source.same_family(target) {
            return Err(GeometryError::Conversion {
                from: source.to_string(),
                to: target.to_string(),
                reason: "different geometry families".to_string(),
            });
        }

        let single_only = |count: usize| -> GeometryResult<()> {
            if count == 1 {
                Ok(())
            } else {
                Err(GeometryError::Conversion {
                    from: source.to_string(),
                    to: target.to_string(),
                    reason: format!("geometry has {} parts", count),
                })
            }
        };

        let converted = match self {
            Geometry::Point(c) => Geometry::MultiPoint(vec![*c]),
            Geometry::LineString(line) => Geometry::MultiLineString(vec![line.clone()]),
            Geometry::Polygon(rings) => Geometry::MultiPolygon(vec![rings.clone()]),
            Geometry::MultiPoint(points) => {
                single_only(points.len())?;
                Geometry::Point(points[0])
            }
            Geometry::MultiLineString(lines) => {
                single_only(lines.len())?;
                Geometry::LineString(lines[0].clone())
            }
            Geometry::MultiPolygon(polygons) => {
                single_only(polygons.len())?;
                Geometry::Polygon(polygons[0].clone())
            }
        };
        Ok(converted)
    }

    /// Parses either WKT text or hex-encoded WKB.
    ///
    /// Text starting with a letter is treated as WKT, anything else as WKB hex.
    pub fn parse_any(input: &str) -> GeometryResult<Geometry> {
        let trimmed = input.trim();
        match trimmed.chars().next() {
            Some(c) if c.is_ascii_alphabetic() && !is_hex_only(trimmed) => {
                Geometry::from_wkt(trimmed)
            }
            Some(_) => Geometry::from_wkb_hex(trimmed),
            None => Err(GeometryError::Invalid("empty geometry string".to_string())),
        }
    }
}

fn is_hex_only(s: &str) -> bool {
    s.len() % 2 == 0 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn non_empty(len: usize, what: &str) -> GeometryResult<()> {
    if len == 0 {
        return Err(GeometryError::Invalid(format!("{} has no members", what)));
    }
    Ok(())
}

fn check_coord(c: &Coord) -> GeometryResult<()> {
    if c.x.is_finite() && c.y.is_finite() {
        Ok(())
    } else {
        Err(GeometryError::Invalid("non-finite coordinate".to_string()))
    }
}

fn check_line(line: &[Coord]) -> GeometryResult<()> {
    if line.len() < 2 {
        return Err(GeometryError::Invalid(format!(
            "line string needs at least 2 points, got {}",
            line.len()
        )));
    }
    line.iter().try_for_each(check_coord)
}

fn check_polygon(rings: &[Ring]) -> GeometryResult<()> {
    non_empty(rings.len(), "POLYGON")?;
    for ring in rings {
        if ring.len() < 4 {
            return Err(GeometryError::Invalid(format!(
                "polygon ring needs at least 4 points, got {}",
                ring.len()
            )));
        }
        if ring.first() != ring.last() {
            return Err(GeometryError::Invalid("polygon ring is not closed".to_string()));
        }
        ring.iter().try_for_each(check_coord)?;
    }
    Ok(())
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wkt())
    }
}

impl Serialize for Geometry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wkt())
    }
}

impl<'de> Deserialize<'de> for Geometry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Geometry::from_wkt(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Ring {
        vec![
            Coord::new(0.0, 0.0),
            Coord::new(1.0, 0.0),
            Coord::new(1.0, 1.0),
            Coord::new(0.0, 0.0),
        ]
    }

    #[test]
    fn test_type_names_round_trip() {
        for t in GeometryType::ALL {
            assert_eq!(t.as_str().parse::<GeometryType>().unwrap(), t);
        }
        assert_eq!("multipolygon".parse::<GeometryType>().unwrap(), GeometryType::MultiPolygon);
        assert!("CURVE".parse::<GeometryType>().is_err());
    }

    #[test]
    fn test_family_helpers() {
        assert!(GeometryType::Point.same_family(GeometryType::MultiPoint));
        assert!(!GeometryType::Point.same_family(GeometryType::Polygon));
        assert_eq!(GeometryType::LineString.to_multi(), GeometryType::MultiLineString);
        assert_eq!(GeometryType::MultiPolygon.to_single(), GeometryType::Polygon);
    }

    #[test]
    fn test_validate_rejects_open_ring() {
        let mut ring = square();
        ring.pop();
        ring.push(Coord::new(0.5, 0.5));
        let poly = Geometry::Polygon(vec![ring]);
        assert!(matches!(poly.validate(), Err(GeometryError::Invalid(_))));
        assert!(Geometry::Polygon(vec![square()]).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_line() {
        let line = Geometry::LineString(vec![Coord::new(0.0, 0.0)]);
        assert!(line.validate().is_err());
    }

    #[test]
    fn test_convert_single_to_multi_and_back() {
        let point = Geometry::Point(Coord::new(3.0, 4.0));
        let multi = point.convert(GeometryType::MultiPoint).unwrap();
        assert_eq!(multi, Geometry::MultiPoint(vec![Coord::new(3.0, 4.0)]));
        assert_eq!(multi.convert(GeometryType::Point).unwrap(), point);
    }

    #[test]
    fn test_convert_multi_with_many_parts_fails() {
        let multi = Geometry::MultiPoint(vec![Coord::new(0.0, 0.0), Coord::new(1.0, 1.0)]);
        assert!(matches!(
            multi.convert(GeometryType::Point),
            Err(GeometryError::Conversion { .. })
        ));
    }

    #[test]
    fn test_convert_across_families_fails() {
        let point = Geometry::Point(Coord::new(0.0, 0.0));
        assert!(point.convert(GeometryType::Polygon).is_err());
    }

    #[test]
    fn test_serde_uses_wkt() {
        let point = Geometry::Point(Coord::new(1.5, -2.0));
        let json = serde_json::to_string(&point).unwrap();
        assert_eq!(json, "\"POINT (1.5 -2)\"");
        let back: Geometry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, point);
    }
}
