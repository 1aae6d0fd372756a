use stop_distance_model::Coordinate;

use crate::geometry::{Metric, Polyline};
use crate::settings::DistanceSettings;

/// Decides when a stop's projection onto a line should not be trusted.
///
/// The threshold here is only for distance assignment; quality checks elsewhere
/// may use their own.
#[derive(Debug, Clone, Copy)]
pub struct OutlierDetector {
    metric: Metric,
    threshold: f64,
}

impl OutlierDetector {
    pub fn new(metric: Metric, threshold: f64) -> Self {
        Self { metric, threshold }
    }

    pub fn from_settings(settings: &DistanceSettings) -> Self {
        Self::new(settings.metric, settings.outlier_threshold)
    }

    /// Distance from the stop to its closest point on the line.
    pub fn distance_to_line(&self, line: &Polyline, stop: Coordinate) -> f64 {
        let closest = line.closest_locator(stop);
        self.metric.distance(stop, closest.point)
    }

    pub fn is_far_from_line(&self, line: &Polyline, stop: Coordinate) -> bool {
        self.distance_to_line(line, stop) > self.threshold
    }

    /// Too far from the line, or outside its directional bounds at either end.
    pub fn is_outlier(&self, line: &Polyline, stop: Coordinate) -> bool {
        line.before(stop) || line.after(stop) || self.is_far_from_line(line, stop)
    }

    /// First stop of a pattern: lies before the line start or too far away.
    pub fn is_before_line(&self, line: &Polyline, stop: Coordinate) -> bool {
        line.before(stop) || self.is_far_from_line(line, stop)
    }

    /// Last stop of a pattern: lies past the line end or too far away.
    pub fn is_after_line(&self, line: &Polyline, stop: Coordinate) -> bool {
        line.after(stop) || self.is_far_from_line(line, stop)
    }
}
