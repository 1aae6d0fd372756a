use std::fmt;

use compact_str::CompactString;
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ModelError {
    #[error("non-finite coordinate: {0}")]
    NonFiniteCoordinate(String),
    #[error("invalid coordinate format: {0}")]
    InvalidCoordinateFormat(String),
    #[error("stop at position {0} has an empty stop_id")]
    EmptyStopId(usize),
}

/// A planar (x, y) pair. Geographic input uses (lon, lat) order, like GeoJSON.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn try_new(x: f64, y: f64) -> Result<Self, ModelError> {
        let coordinate = Self { x, y };
        if !coordinate.is_finite() {
            return Err(ModelError::NonFiniteCoordinate(coordinate.to_string()));
        }
        Ok(coordinate)
    }

    /// Parses `"x,y"`, the form used on the command line.
    pub fn parse(value: &str) -> Result<Self, ModelError> {
        let mut parts = value.trim().split(',');
        let (Some(x), Some(y), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ModelError::InvalidCoordinateFormat(value.to_string()));
        };
        let x: f64 = x
            .trim()
            .parse()
            .map_err(|_| ModelError::InvalidCoordinateFormat(value.to_string()))?;
        let y: f64 = y
            .trim()
            .parse()
            .map_err(|_| ModelError::InvalidCoordinateFormat(value.to_string()))?;
        Self::try_new(x, y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl Serialize for Coordinate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.x)?;
        tuple.serialize_element(&self.y)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for Coordinate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CoordinateVisitor;

        impl<'de> Visitor<'de> for CoordinateVisitor {
            type Value = Coordinate;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("an [x, y] pair or an \"x,y\" string")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Coordinate, A::Error> {
                let x: f64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let y: f64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                if seq.next_element::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::invalid_length(3, &self));
                }
                Coordinate::try_new(x, y).map_err(de::Error::custom)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Coordinate, E> {
                Coordinate::parse(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(CoordinateVisitor)
    }
}

/// A stop reduced to its identity and representative centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub stop_id: CompactString,
    pub location: Coordinate,
}

impl Stop {
    pub fn new(stop_id: impl Into<CompactString>, location: Coordinate) -> Self {
        Self {
            stop_id: stop_id.into(),
            location,
        }
    }
}

/// Externally supplied along-shape distances, in the feed's own unit.
///
/// `stop_time_distances` has one entry per stop of the pattern and
/// `shape_point_distances` one entry per point of the route line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrustedShapeDistances {
    pub stop_time_distances: Vec<Option<f64>>,
    pub shape_point_distances: Vec<Option<f64>>,
}

impl TrustedShapeDistances {
    pub fn new(stop_time_distances: Vec<f64>, shape_point_distances: Vec<f64>) -> Self {
        Self {
            stop_time_distances: stop_time_distances.into_iter().map(Some).collect(),
            shape_point_distances: shape_point_distances.into_iter().map(Some).collect(),
        }
    }

    /// True when every stop time and every shape point carries a value.
    pub fn is_complete(&self) -> bool {
        !self.stop_time_distances.is_empty()
            && !self.shape_point_distances.is_empty()
            && self.stop_time_distances.iter().all(Option::is_some)
            && self.shape_point_distances.iter().all(Option::is_some)
    }
}

/// One route stop pattern: the ordered stops a trip serves and the line it follows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutePattern {
    pub pattern_id: CompactString,
    pub line: Vec<Coordinate>,
    pub stops: Vec<Stop>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape_distances: Option<TrustedShapeDistances>,
}

impl RoutePattern {
    pub fn new(
        pattern_id: impl Into<CompactString>,
        line: Vec<Coordinate>,
        stops: Vec<Stop>,
    ) -> Self {
        Self {
            pattern_id: pattern_id.into(),
            line,
            stops,
            shape_distances: None,
        }
    }

    pub fn with_shape_distances(mut self, shape_distances: TrustedShapeDistances) -> Self {
        self.shape_distances = Some(shape_distances);
        self
    }

    /// Checks field-level consistency. Geometric sufficiency (point and stop
    /// counts) and shape distance consistency are left to the distance engine,
    /// which falls back to geometry instead of failing the pattern.
    pub fn validate(&self) -> Result<(), ModelError> {
        for coordinate in self
            .line
            .iter()
            .chain(self.stops.iter().map(|stop| &stop.location))
        {
            if !coordinate.is_finite() {
                return Err(ModelError::NonFiniteCoordinate(coordinate.to_string()));
            }
        }
        if let Some(position) = self
            .stops
            .iter()
            .position(|stop| stop.stop_id.trim().is_empty())
        {
            return Err(ModelError::EmptyStopId(position));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_coordinate_string() {
        let coordinate = Coordinate::parse(" -122.4194, 37.7749 ").unwrap();
        assert_eq!(coordinate, Coordinate::new(-122.4194, 37.7749));
        assert!(matches!(
            Coordinate::parse("1,2,3"),
            Err(ModelError::InvalidCoordinateFormat(_))
        ));
        assert!(matches!(
            Coordinate::parse("abc,2"),
            Err(ModelError::InvalidCoordinateFormat(_))
        ));
    }

    #[test]
    fn deserializes_pattern_from_json() {
        let json = r#"{
            "pattern_id": "r-9q9-1",
            "line": [[0.0, 0.0], "10,0"],
            "stops": [
                {"stop_id": "s-a", "location": [0.0, 1.0]},
                {"stop_id": "s-b", "location": [10.0, 1.0]}
            ]
        }"#;
        let pattern: RoutePattern = serde_json::from_str(json).unwrap();
        assert_eq!(pattern.pattern_id, "r-9q9-1");
        assert_eq!(pattern.line[1], Coordinate::new(10.0, 0.0));
        assert_eq!(pattern.stops[0].stop_id, "s-a");
        assert!(pattern.shape_distances.is_none());
        assert!(pattern.validate().is_ok());
    }

    #[test]
    fn rejects_short_coordinate_array() {
        let result: Result<Coordinate, _> = serde_json::from_str("[1.0]");
        assert!(result.is_err());
    }

    #[test]
    fn validate_leaves_shape_distance_counts_to_engine() {
        let pattern = RoutePattern::new(
            "p",
            vec![Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0)],
            vec![
                Stop::new("a", Coordinate::new(0.0, 0.0)),
                Stop::new(" ", Coordinate::new(1.0, 0.0)),
            ],
        )
        .with_shape_distances(TrustedShapeDistances::new(vec![0.0], vec![0.0, 1.0]));
        assert_eq!(pattern.validate(), Err(ModelError::EmptyStopId(1)));
    }

    #[test]
    fn incomplete_shape_distances() {
        let mut distances = TrustedShapeDistances::new(vec![0.0, 5.0], vec![0.0, 10.0]);
        assert!(distances.is_complete());
        distances.stop_time_distances[1] = None;
        assert!(!distances.is_complete());
    }
}
