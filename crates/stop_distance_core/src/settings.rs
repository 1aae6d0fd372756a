use serde::{Deserialize, Serialize};

use crate::geometry::Metric;

const GEOGRAPHIC_SUBDIVISION_EPSILON: f64 = 0.0005;
const PLANAR_SUBDIVISION_EPSILON: f64 = 5.0;
const MAX_SUBDIVIDED_POINTS: usize = 50_000;

/// Tunables for one distance assignment run.
///
/// The defaults describe WGS84 (lon, lat) input: projection happens in degree
/// space while every length is measured in metres along the sphere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceSettings {
    pub metric: Metric,
    /// Stops farther than this from the line are treated as outliers.
    pub outlier_threshold: f64,
    /// Longest segment allowed after subdivision, in coordinate units.
    pub subdivision_epsilon: f64,
    /// Lines that would subdivide into more points than this skip matching
    /// and go straight to the nearest-segment fallback.
    pub max_subdivided_points: usize,
    /// Decimal places kept in returned distances.
    pub distance_precision: u32,
    /// Skip the closed/self-intersecting test and always run the robust path.
    pub assume_complex_lines: bool,
    pub trial_budget: TrialBudget,
}

impl Default for DistanceSettings {
    fn default() -> Self {
        Self {
            metric: Metric::Haversine,
            outlier_threshold: 100.0,
            subdivision_epsilon: GEOGRAPHIC_SUBDIVISION_EPSILON,
            max_subdivided_points: MAX_SUBDIVIDED_POINTS,
            distance_precision: 1,
            assume_complex_lines: true,
            trial_budget: TrialBudget::default(),
        }
    }
}

impl DistanceSettings {
    pub fn geographic() -> Self {
        Self::default()
    }

    /// Settings for projected or synthetic coordinates where one coordinate
    /// unit is one length unit.
    pub fn planar() -> Self {
        Self {
            metric: Metric::Planar,
            subdivision_epsilon: PLANAR_SUBDIVISION_EPSILON,
            ..Self::default()
        }
    }

    pub fn round_distance(&self, distance: f64) -> f64 {
        let factor = 10f64.powi(self.distance_precision as i32);
        (distance * factor).round() / factor
    }
}

/// Caps the backtracking search.
///
/// `k = 1 + spread * ln(n) / n^decay` is the average number of candidates per
/// stop the search may explore; it approaches 1 as `n` grows, so the limit
/// `scale * n * k^n` stays generous for short patterns and bounded for long ones.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialBudget {
    pub scale: f64,
    pub spread: f64,
    pub decay: f64,
}

impl Default for TrialBudget {
    fn default() -> Self {
        Self {
            scale: 3.0,
            spread: 3.0,
            decay: 1.2,
        }
    }
}

impl TrialBudget {
    pub fn limit(&self, stop_count: usize) -> u64 {
        if stop_count == 0 {
            return 0;
        }
        let n = stop_count as f64;
        let k = 1.0 + self.spread * (n.ln() / n.powf(self.decay));
        let limit = self.scale * n * k.powf(n);
        if limit.is_finite() && limit < u64::MAX as f64 {
            limit.floor() as u64
        } else {
            u64::MAX
        }
    }
}
