//! Polyline primitives: segment projection, distance along a line,
//! subdivision and the directional before/after tests.
//!
//! Projection is always computed in the (x, y) coordinate plane. Lengths are
//! measured with a [`Metric`], so geographic input projects in degree space but
//! reports metres.

use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use stop_distance_model::Coordinate;

use crate::error::{DistanceError, Result};

const EARTH_RADIUS_METERS: f64 = 6_371_010.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Great-circle metres between (lon, lat) degree coordinates.
    #[default]
    Haversine,
    /// Euclidean distance in coordinate units.
    Planar,
}

impl Metric {
    pub fn distance(self, a: Coordinate, b: Coordinate) -> f64 {
        match self {
            Metric::Haversine => haversine_meters(a, b),
            Metric::Planar => planar_distance(a, b),
        }
    }
}

fn planar_distance(a: Coordinate, b: Coordinate) -> f64 {
    (b.x - a.x).hypot(b.y - a.y)
}

fn haversine_meters(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.y.to_radians();
    let lat2 = b.y.to_radians();
    let dlat = (b.y - a.y).to_radians();
    let dlon = (b.x - a.x).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: Coordinate,
    pub end: Coordinate,
}

impl Segment {
    pub fn new(start: Coordinate, end: Coordinate) -> Self {
        Self { start, end }
    }

    fn dx(&self) -> f64 {
        self.end.x - self.start.x
    }

    fn dy(&self) -> f64 {
        self.end.y - self.start.y
    }

    /// Length in coordinate units.
    pub fn planar_length(&self) -> f64 {
        self.dx().hypot(self.dy())
    }

    pub fn is_degenerate(&self) -> bool {
        self.planar_length() == 0.0
    }

    /// Parameter of the point's projection onto the supporting line; `0` at
    /// `start`, `1` at `end`. Zero-length segments report `0`.
    pub fn tproj(&self, point: Coordinate) -> f64 {
        let length_sq = self.dx() * self.dx() + self.dy() * self.dy();
        if length_sq == 0.0 {
            return 0.0;
        }
        ((point.x - self.start.x) * self.dx() + (point.y - self.start.y) * self.dy()) / length_sq
    }

    /// Point at `fraction` of the way from `start` to `end`.
    pub fn interpolate(&self, fraction: f64) -> Coordinate {
        Coordinate::new(
            self.start.x + fraction * self.dx(),
            self.start.y + fraction * self.dy(),
        )
    }
}

/// Projection of a point onto one segment of a polyline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Locator {
    pub segment_index: usize,
    /// Planar distance between the point and its closest point on the segment.
    pub distance_from_segment: f64,
    /// Signed planar offset of the projection from the segment start, not
    /// clamped to the segment.
    pub distance_on_segment: f64,
    /// Clamped position of `point` along the segment, in `[0, 1]`.
    pub fraction: f64,
    pub point: Coordinate,
}

/// Closest point on `segment` to `point`.
pub fn project(point: Coordinate, segment: &Segment, segment_index: usize) -> Locator {
    let t = segment.tproj(point);
    let fraction = t.clamp(0.0, 1.0);
    let closest = segment.interpolate(fraction);
    Locator {
        segment_index,
        distance_from_segment: planar_distance(point, closest),
        distance_on_segment: t * segment.planar_length(),
        fraction,
        point: closest,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    points: Vec<Coordinate>,
}

impl Polyline {
    pub fn new(points: Vec<Coordinate>) -> Result<Self> {
        if points.len() < 2 {
            return Err(DistanceError::InputDegenerate(format!(
                "line has {} points, at least 2 required",
                points.len()
            )));
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Coordinate] {
        &self.points
    }

    pub fn first(&self) -> Coordinate {
        self.points[0]
    }

    pub fn last(&self) -> Coordinate {
        self.points[self.points.len() - 1]
    }

    pub fn segment_count(&self) -> usize {
        self.points.len() - 1
    }

    pub fn segment(&self, index: usize) -> Option<Segment> {
        match (self.points.get(index), self.points.get(index + 1)) {
            (Some(start), Some(end)) => Some(Segment::new(*start, *end)),
            _ => None,
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        self.points
            .windows(2)
            .map(|pair| Segment::new(pair[0], pair[1]))
    }

    pub fn length(&self, metric: Metric) -> f64 {
        self.points
            .windows(2)
            .map(|pair| metric.distance(pair[0], pair[1]))
            .sum()
    }

    /// One locator per segment, in segment order.
    pub fn locators(&self, point: Coordinate) -> Vec<Locator> {
        self.segments()
            .enumerate()
            .map(|(index, segment)| project(point, &segment, index))
            .collect()
    }

    /// The locator with the smallest offset; the earliest segment wins ties.
    pub fn closest_locator(&self, point: Coordinate) -> Locator {
        best_locator(&self.locators(point))
            .copied()
            .unwrap_or_else(|| project(point, &Segment::new(self.first(), self.last()), 0))
    }

    pub fn distance_along_line(
        &self,
        point: Coordinate,
        segment_index: usize,
        metric: Metric,
    ) -> Result<f64> {
        LineMeasure::new(self, metric).distance_along_line(point, segment_index)
    }

    /// Returns a line whose segments are no longer than `epsilon`, with evenly
    /// spaced points inserted into long segments. Repeated consecutive points
    /// are dropped.
    ///
    /// Fails instead of allocating when the result would hold more than
    /// `max_points` points.
    pub fn subdivide(&self, epsilon: f64, max_points: usize) -> Result<Polyline> {
        if !(epsilon.is_finite() && epsilon > 0.0) {
            return Err(DistanceError::UnexpectedGeometryFailure(format!(
                "subdivision epsilon must be positive, got {epsilon}"
            )));
        }
        let mut total = 1.0;
        for segment in self.segments() {
            let length = segment.planar_length();
            if !length.is_finite() {
                return Err(DistanceError::UnexpectedGeometryFailure(format!(
                    "segment {:?} has non-finite length",
                    segment
                )));
            }
            if length > 0.0 {
                total += inserted_points(length, epsilon) + 1.0;
            }
        }
        if total > max_points as f64 {
            return Err(DistanceError::UnexpectedGeometryFailure(format!(
                "subdividing by {epsilon} needs {total} points, limit is {max_points}"
            )));
        }

        let mut points = Vec::with_capacity(total as usize);
        points.push(self.first());
        for segment in self.segments() {
            let length = segment.planar_length();
            if length == 0.0 {
                continue;
            }
            if length > epsilon {
                let inserted = inserted_points(length, epsilon) as usize;
                let step = 1.0 / (inserted + 1) as f64;
                for i in 1..=inserted {
                    points.push(segment.interpolate(step * i as f64));
                }
            }
            points.push(segment.end);
        }
        if points.len() < 2 {
            return Err(DistanceError::UnexpectedGeometryFailure(
                "line collapses to a single point".to_string(),
            ));
        }
        Ok(Polyline { points })
    }

    pub fn is_closed(&self) -> bool {
        self.first() == self.last()
    }

    /// True when the line is closed or crosses or retraces itself.
    pub fn is_closed_or_self_intersecting(&self) -> bool {
        self.is_closed() || self.is_self_intersecting()
    }

    fn is_self_intersecting(&self) -> bool {
        let segments: Vec<IndexedSegment> = self
            .segments()
            .enumerate()
            .map(|(index, segment)| IndexedSegment { index, segment })
            .collect();
        let tree = RTree::bulk_load(segments.clone());
        segments.iter().any(|current| {
            tree.locate_in_envelope_intersecting(&current.envelope())
                .filter(|other| other.index > current.index)
                .any(|other| {
                    if other.index == current.index + 1 {
                        adjacent_segments_overlap(&current.segment, &other.segment)
                    } else {
                        segments_intersect(&current.segment, &other.segment)
                    }
                })
        })
    }

    /// The point projects before the start of the first segment.
    pub fn before(&self, point: Coordinate) -> bool {
        self.segments()
            .next()
            .map(|segment| segment.tproj(point) < 0.0)
            .unwrap_or(false)
    }

    /// The point projects past the end of the last segment.
    pub fn after(&self, point: Coordinate) -> bool {
        self.segment(self.segment_count() - 1)
            .map(|segment| segment.tproj(point) > 1.0)
            .unwrap_or(false)
    }
}

fn inserted_points(length: f64, epsilon: f64) -> f64 {
    if length > epsilon {
        (length / epsilon).floor()
    } else {
        0.0
    }
}

/// Smallest `distance_from_segment`, earliest index on ties.
pub fn best_locator(locators: &[Locator]) -> Option<&Locator> {
    locators.iter().reduce(|best, locator| {
        if locator.distance_from_segment < best.distance_from_segment {
            locator
        } else {
            best
        }
    })
}

/// Cumulative segment lengths of a line under one metric.
#[derive(Debug, Clone)]
pub struct LineMeasure<'a> {
    line: &'a Polyline,
    metric: Metric,
    cumulative: Vec<f64>,
}

impl<'a> LineMeasure<'a> {
    pub fn new(line: &'a Polyline, metric: Metric) -> Self {
        let mut cumulative = Vec::with_capacity(line.points.len());
        let mut total = 0.0;
        cumulative.push(total);
        for pair in line.points.windows(2) {
            total += metric.distance(pair[0], pair[1]);
            cumulative.push(total);
        }
        Self {
            line,
            metric,
            cumulative,
        }
    }

    pub fn line(&self) -> &'a Polyline {
        self.line
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn length(&self) -> f64 {
        self.cumulative[self.cumulative.len() - 1]
    }

    /// Length of every segment before `segment_index`, plus the straight
    /// distance from that segment's start to `point`.
    pub fn distance_along_line(&self, point: Coordinate, segment_index: usize) -> Result<f64> {
        if segment_index >= self.line.segment_count() {
            return Err(DistanceError::UnexpectedGeometryFailure(format!(
                "segment index {} out of range for line with {} segments",
                segment_index,
                self.line.segment_count()
            )));
        }
        let start = self.line.points[segment_index];
        Ok(self.cumulative[segment_index] + self.metric.distance(start, point))
    }

    pub fn locator_distance(&self, locator: &Locator) -> Result<f64> {
        self.distance_along_line(locator.point, locator.segment_index)
    }
}

/// Cumulative stop-to-stop distances along straight lines, starting at 0.
pub fn straight_line_distances(points: &[Coordinate], metric: Metric) -> Vec<f64> {
    let mut distances = Vec::with_capacity(points.len());
    let mut total = 0.0;
    if !points.is_empty() {
        distances.push(total);
    }
    for pair in points.windows(2) {
        total += metric.distance(pair[0], pair[1]);
        distances.push(total);
    }
    distances
}

#[derive(Debug, Clone, Copy)]
struct IndexedSegment {
    index: usize,
    segment: Segment,
}

impl RTreeObject for IndexedSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.segment.start.x, self.segment.start.y],
            [self.segment.end.x, self.segment.end.y],
        )
    }
}

fn orientation(a: Coordinate, b: Coordinate, c: Coordinate) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn within_bounds(a: Coordinate, b: Coordinate, p: Coordinate) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

fn segments_intersect(first: &Segment, second: &Segment) -> bool {
    let d1 = orientation(second.start, second.end, first.start);
    let d2 = orientation(second.start, second.end, first.end);
    let d3 = orientation(first.start, first.end, second.start);
    let d4 = orientation(first.start, first.end, second.end);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && within_bounds(second.start, second.end, first.start))
        || (d2 == 0.0 && within_bounds(second.start, second.end, first.end))
        || (d3 == 0.0 && within_bounds(first.start, first.end, second.start))
        || (d4 == 0.0 && within_bounds(first.start, first.end, second.end))
}

/// Consecutive segments always share a vertex; they only overlap when the
/// second one doubles back along the first.
fn adjacent_segments_overlap(first: &Segment, second: &Segment) -> bool {
    if first.is_degenerate() || second.is_degenerate() {
        return false;
    }
    let collinear = orientation(first.start, first.end, second.end) == 0.0;
    let backwards = first.dx() * second.dx() + first.dy() * second.dy() < 0.0;
    collinear && backwards
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(points: &[(f64, f64)]) -> Polyline {
        Polyline::new(points.iter().map(|&(x, y)| Coordinate::new(x, y)).collect()).unwrap()
    }

    #[test]
    fn rejects_single_point_line() {
        let result = Polyline::new(vec![Coordinate::new(0.0, 0.0)]);
        assert!(matches!(result, Err(DistanceError::InputDegenerate(_))));
    }

    #[test]
    fn projects_onto_segment_interior_and_ends() {
        let segment = Segment::new(Coordinate::new(0.0, 0.0), Coordinate::new(10.0, 0.0));

        let inside = project(Coordinate::new(4.0, 3.0), &segment, 7);
        assert_eq!(inside.segment_index, 7);
        assert_eq!(inside.point, Coordinate::new(4.0, 0.0));
        assert_eq!(inside.distance_from_segment, 3.0);
        assert_eq!(inside.distance_on_segment, 4.0);

        let before = project(Coordinate::new(-3.0, 4.0), &segment, 0);
        assert_eq!(before.point, Coordinate::new(0.0, 0.0));
        assert_eq!(before.distance_from_segment, 5.0);
        assert_eq!(before.distance_on_segment, -3.0);
        assert_eq!(before.fraction, 0.0);
    }

    #[test]
    fn projects_onto_zero_length_segment() {
        let segment = Segment::new(Coordinate::new(1.0, 1.0), Coordinate::new(1.0, 1.0));
        let locator = project(Coordinate::new(4.0, 5.0), &segment, 0);
        assert_eq!(locator.point, Coordinate::new(1.0, 1.0));
        assert_eq!(locator.distance_from_segment, 5.0);
        assert_eq!(locator.distance_on_segment, 0.0);
    }

    #[test]
    fn distance_along_line_sums_previous_segments() {
        let line = line(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)]);
        let distance = line
            .distance_along_line(Coordinate::new(10.0, 4.0), 1, Metric::Planar)
            .unwrap();
        assert_eq!(distance, 14.0);
        assert_eq!(line.length(Metric::Planar), 20.0);
        assert!(matches!(
            line.distance_along_line(Coordinate::new(0.0, 0.0), 2, Metric::Planar),
            Err(DistanceError::UnexpectedGeometryFailure(_))
        ));
    }

    #[test]
    fn subdivide_bounds_segment_length_and_keeps_ends() {
        let line = line(&[(0.0, 0.0), (10.0, 0.0), (10.0, 2.0)]);
        let dense = line.subdivide(3.0, 1_000).unwrap();
        assert_eq!(dense.first(), line.first());
        assert_eq!(dense.last(), line.last());
        assert!(dense.segments().all(|segment| segment.planar_length() <= 3.0));
        assert!((dense.length(Metric::Planar) - 12.0).abs() < 1e-9);
        // 10 units split into 4 pieces of 2.5, the short segment untouched
        assert_eq!(dense.points().len(), 6);
    }

    #[test]
    fn subdivide_drops_repeated_points_and_rejects_collapse() {
        let line_with_repeat = line(&[(0.0, 0.0), (0.0, 0.0), (1.0, 0.0)]);
        let dense = line_with_repeat.subdivide(5.0, 1_000).unwrap();
        assert_eq!(dense.points().len(), 2);

        let collapsed = line(&[(2.0, 2.0), (2.0, 2.0)]);
        assert!(matches!(
            collapsed.subdivide(5.0, 1_000),
            Err(DistanceError::UnexpectedGeometryFailure(_))
        ));
        assert!(matches!(
            dense.subdivide(0.0, 1_000),
            Err(DistanceError::UnexpectedGeometryFailure(_))
        ));
    }

    #[test]
    fn subdivide_refuses_to_exceed_point_limit() {
        let long = line(&[(0.0, 0.0), (2.0e7, 0.0)]);
        assert!(matches!(
            long.subdivide(5.0, 50_000),
            Err(DistanceError::UnexpectedGeometryFailure(_))
        ));
        // exactly at the limit: 10 units in pieces of 2.5 needs 5 points
        let short = line(&[(0.0, 0.0), (10.0, 0.0)]);
        assert_eq!(short.subdivide(3.0, 5).unwrap().points().len(), 5);
        assert!(short.subdivide(3.0, 4).is_err());
    }

    #[test]
    fn detects_closed_and_self_intersecting_lines() {
        let straight = line(&[(0.0, 0.0), (5.0, 0.0), (10.0, 0.0)]);
        assert!(!straight.is_closed_or_self_intersecting());

        let ring = line(&[(0.0, 0.0), (5.0, 0.0), (5.0, 5.0), (0.0, 0.0)]);
        assert!(ring.is_closed());
        assert!(ring.is_closed_or_self_intersecting());

        let crossing = line(&[(0.0, 0.0), (10.0, 0.0), (10.0, 5.0), (5.0, -5.0)]);
        assert!(!crossing.is_closed());
        assert!(crossing.is_closed_or_self_intersecting());

        let doubling_back = line(&[(0.0, 0.0), (10.0, 0.0), (4.0, 0.0)]);
        assert!(doubling_back.is_closed_or_self_intersecting());
    }

    #[test]
    fn before_and_after_use_end_segments() {
        let line = line(&[(0.0, 0.0), (10.0, 0.0), (20.0, 0.0)]);
        assert!(line.before(Coordinate::new(-1.0, 3.0)));
        assert!(!line.before(Coordinate::new(1.0, 3.0)));
        assert!(line.after(Coordinate::new(21.0, -3.0)));
        assert!(!line.after(Coordinate::new(19.0, -3.0)));
    }

    #[test]
    fn closest_locator_prefers_earliest_on_ties() {
        let line = line(&[(0.0, 0.0), (10.0, 0.0), (0.0, 0.0)]);
        let locator = line.closest_locator(Coordinate::new(5.0, 1.0));
        assert_eq!(locator.segment_index, 0);
    }

    #[test]
    fn haversine_matches_known_distance() {
        // one degree of latitude
        let distance = Metric::Haversine.distance(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0));
        assert!((distance - 111_195.0).abs() < 10.0, "got {distance}");
    }

    #[test]
    fn straight_line_distances_accumulate() {
        let points = [
            Coordinate::new(0.0, 0.0),
            Coordinate::new(3.0, 4.0),
            Coordinate::new(3.0, 10.0),
        ];
        assert_eq!(
            straight_line_distances(&points, Metric::Planar),
            vec![0.0, 5.0, 11.0]
        );
        assert!(straight_line_distances(&[], Metric::Planar).is_empty());
    }
}
