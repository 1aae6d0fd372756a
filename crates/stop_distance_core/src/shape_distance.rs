//! Distances taken from feed-supplied `shape_dist_traveled` values.
//!
//! When every stop time and every shape point carries a distance, a stop's
//! position is found by locating its value between two shape points and
//! interpolating along that segment. No projection or search is involved.

use stop_distance_model::{Stop, TrustedShapeDistances};

use crate::error::{DistanceError, Result};
use crate::geometry::LineMeasure;

/// Shape distances that passed [`validate_shape_distances`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedShapeDistances {
    stop_times: Vec<f64>,
    shape_points: Vec<f64>,
}

impl ValidatedShapeDistances {
    pub fn stop_times(&self) -> &[f64] {
        &self.stop_times
    }

    pub fn shape_points(&self) -> &[f64] {
        &self.shape_points
    }

    fn last_shape_point(&self) -> f64 {
        self.shape_points[self.shape_points.len() - 1]
    }
}

/// Checks that the supplied values can be trusted for `stops` on a line of
/// `line_points` points.
///
/// Consecutive stop times must increase unless both refer to the same stop,
/// no stop time may exceed the last shape point value, and shape point values
/// must never decrease.
pub fn validate_shape_distances(
    stops: &[Stop],
    shape_distances: &TrustedShapeDistances,
    line_points: usize,
) -> Result<ValidatedShapeDistances> {
    if !shape_distances.is_complete() {
        return Err(DistanceError::ShapeDistanceInconsistent(
            "not every stop time and shape point has a distance".to_string(),
        ));
    }
    let stop_times: Vec<f64> = shape_distances
        .stop_time_distances
        .iter()
        .flatten()
        .copied()
        .collect();
    let shape_points: Vec<f64> = shape_distances
        .shape_point_distances
        .iter()
        .flatten()
        .copied()
        .collect();

    if stop_times.len() != stops.len() {
        return Err(DistanceError::ShapeDistanceInconsistent(format!(
            "{} stop time distances for {} stops",
            stop_times.len(),
            stops.len()
        )));
    }
    if shape_points.len() != line_points || shape_points.len() < 2 {
        return Err(DistanceError::ShapeDistanceInconsistent(format!(
            "{} shape point distances for {} line points",
            shape_points.len(),
            line_points
        )));
    }
    if let Some(value) = stop_times
        .iter()
        .chain(shape_points.iter())
        .find(|value| !value.is_finite())
    {
        return Err(DistanceError::ShapeDistanceInconsistent(format!(
            "non-finite distance {value}"
        )));
    }
    if let Some(index) = shape_points.windows(2).position(|pair| pair[0] > pair[1]) {
        return Err(DistanceError::ShapeDistanceInconsistent(format!(
            "shape point distances decrease after point {index}"
        )));
    }

    let last = shape_points[shape_points.len() - 1];
    for (i, pair) in stop_times.windows(2).enumerate() {
        if pair[0] >= pair[1] && stops[i].stop_id != stops[i + 1].stop_id {
            return Err(DistanceError::ShapeDistanceInconsistent(format!(
                "stop time {} at {} is not before stop time {} at {}",
                i,
                pair[0],
                i + 1,
                pair[1]
            )));
        }
    }
    if let Some(index) = stop_times.iter().position(|&value| value > last) {
        return Err(DistanceError::ShapeDistanceInconsistent(format!(
            "stop time {} at {} exceeds last shape distance {}",
            index, stop_times[index], last
        )));
    }

    Ok(ValidatedShapeDistances {
        stop_times,
        shape_points,
    })
}

/// Distance along `measure`'s line for every stop time, unrounded.
///
/// The bracketing shape points are searched forward from the previous stop's
/// bracket, so the whole pattern costs one pass over the shape. A repeated
/// stop whose value is below its predecessor's keeps the predecessor's
/// distance.
pub fn project_shape_distances(
    measure: &LineMeasure<'_>,
    shape_distances: &ValidatedShapeDistances,
) -> Result<Vec<f64>> {
    let line = measure.line();
    let shape_points = shape_distances.shape_points();
    if shape_points.len() != line.points().len() {
        return Err(DistanceError::ShapeDistanceInconsistent(format!(
            "{} shape point distances for {} line points",
            shape_points.len(),
            line.points().len()
        )));
    }
    let first = shape_points[0];
    let last = shape_distances.last_shape_point();
    let last_segment = line.segment_count() - 1;
    let mut segment_index = 0;
    let mut reached = 0.0;

    let mut distances = Vec::with_capacity(shape_distances.stop_times().len());
    for &value in shape_distances.stop_times() {
        let distance = if value < first {
            0.0
        } else if value > last {
            measure.length()
        } else {
            while segment_index < last_segment && value > shape_points[segment_index + 1] {
                segment_index += 1;
            }
            let start = shape_points[segment_index];
            let span = shape_points[segment_index + 1] - start;
            let ratio = if span > 0.0 { (value - start) / span } else { 0.0 };
            let segment = line.segment(segment_index).ok_or_else(|| {
                DistanceError::UnexpectedGeometryFailure(format!(
                    "no segment {segment_index} for shape distance {value}"
                ))
            })?;
            let point = segment.interpolate(ratio.clamp(0.0, 1.0));
            measure.distance_along_line(point, segment_index)?
        };
        reached = distance.max(reached);
        distances.push(reached);
    }
    Ok(distances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Metric, Polyline};
    use stop_distance_model::Coordinate;

    fn stops(ids: &[&str]) -> Vec<Stop> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| Stop::new(*id, Coordinate::new(i as f64, 0.0)))
            .collect()
    }

    #[test]
    fn interpolates_within_shape_segments() {
        let line = Polyline::new(vec![Coordinate::new(0.0, 0.0), Coordinate::new(100.0, 0.0)])
            .unwrap();
        let measure = LineMeasure::new(&line, Metric::Planar);
        let trusted = TrustedShapeDistances::new(vec![0.0, 40.0, 100.0], vec![0.0, 100.0]);
        let validated = validate_shape_distances(&stops(&["a", "b", "c"]), &trusted, 2).unwrap();
        let distances = project_shape_distances(&measure, &validated).unwrap();
        assert_eq!(distances, vec![0.0, 40.0, 100.0]);
    }

    #[test]
    fn rescales_feed_units_to_line_length() {
        // the feed measures in kilometres, the line in metres
        let line = Polyline::new(vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(500.0, 0.0),
            Coordinate::new(500.0, 500.0),
        ])
        .unwrap();
        let measure = LineMeasure::new(&line, Metric::Planar);
        let trusted = TrustedShapeDistances::new(vec![0.25, 0.5, 0.75], vec![0.0, 0.5, 1.0]);
        let validated = validate_shape_distances(&stops(&["a", "b", "c"]), &trusted, 3).unwrap();
        let distances = project_shape_distances(&measure, &validated).unwrap();
        assert_eq!(distances, vec![250.0, 500.0, 750.0]);
    }

    #[test]
    fn clamps_values_before_shape_start() {
        let line = Polyline::new(vec![Coordinate::new(0.0, 0.0), Coordinate::new(100.0, 0.0)])
            .unwrap();
        let measure = LineMeasure::new(&line, Metric::Planar);
        let trusted = TrustedShapeDistances::new(vec![1.0, 5.0, 10.0], vec![2.0, 12.0]);
        let validated = validate_shape_distances(&stops(&["a", "b", "c"]), &trusted, 2).unwrap();
        let distances = project_shape_distances(&measure, &validated).unwrap();
        assert_eq!(distances[0], 0.0);
        assert!((distances[1] - 30.0).abs() < 1e-9);
        assert!((distances[2] - 80.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_out_of_order_stop_times() {
        let trusted = TrustedShapeDistances::new(vec![0.0, 50.0, 40.0], vec![0.0, 100.0]);
        let error = validate_shape_distances(&stops(&["a", "b", "c"]), &trusted, 2).unwrap_err();
        assert!(matches!(error, DistanceError::ShapeDistanceInconsistent(_)));
    }

    #[test]
    fn repeated_stop_may_keep_its_distance() {
        let trusted = TrustedShapeDistances::new(vec![0.0, 40.0, 40.0, 90.0], vec![0.0, 100.0]);
        assert!(validate_shape_distances(&stops(&["a", "b", "b", "c"]), &trusted, 2).is_ok());
        let error =
            validate_shape_distances(&stops(&["a", "b", "c", "d"]), &trusted, 2).unwrap_err();
        assert!(error.to_string().contains("not before"));
    }

    #[test]
    fn repeated_stop_with_smaller_value_keeps_previous_distance() {
        let line = Polyline::new(vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(50.0, 0.0),
            Coordinate::new(100.0, 0.0),
        ])
        .unwrap();
        let measure = LineMeasure::new(&line, Metric::Planar);
        let trusted =
            TrustedShapeDistances::new(vec![0.0, 60.0, 20.0, 90.0], vec![0.0, 50.0, 100.0]);
        let validated =
            validate_shape_distances(&stops(&["a", "b", "b", "c"]), &trusted, 3).unwrap();
        let distances = project_shape_distances(&measure, &validated).unwrap();
        assert_eq!(distances, vec![0.0, 60.0, 60.0, 90.0]);
    }

    #[test]
    fn rejects_stop_time_past_shape_end() {
        let trusted = TrustedShapeDistances::new(vec![0.0, 120.0, 130.0], vec![0.0, 100.0]);
        let error = validate_shape_distances(&stops(&["a", "b", "c"]), &trusted, 2).unwrap_err();
        assert!(error.to_string().contains("exceeds last shape distance"));
    }

    #[test]
    fn rejects_incomplete_or_mismatched_values() {
        let mut trusted = TrustedShapeDistances::new(vec![0.0, 50.0], vec![0.0, 100.0]);
        trusted.stop_time_distances[1] = None;
        assert!(validate_shape_distances(&stops(&["a", "b"]), &trusted, 2).is_err());

        let trusted = TrustedShapeDistances::new(vec![0.0, 50.0], vec![0.0, 60.0, 100.0]);
        assert!(validate_shape_distances(&stops(&["a", "b"]), &trusted, 2).is_err());
    }
}
