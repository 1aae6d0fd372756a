//! Strategy selection and final distance assembly.
//!
//! Every call builds its own [`MatchContext`]; nothing is shared between
//! calls, so patterns can be processed on any number of threads.

use serde::{Deserialize, Serialize};
use stop_distance_model::{Coordinate, Stop, TrustedShapeDistances};
use tracing::{debug, warn};

use crate::candidates::{matching_thresholds, prune_candidates, SkipStops};
use crate::error::{DistanceError, FailureReason, Result};
use crate::geometry::{best_locator, straight_line_distances, LineMeasure, Locator, Polyline};
use crate::matcher::{BacktrackingMatcher, MatchOutcome};
use crate::outlier::OutlierDetector;
use crate::settings::DistanceSettings;
use crate::shape_distance::{project_shape_distances, validate_shape_distances};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceStrategy {
    /// Every stop is the same stop; all distances are zero.
    Trivial,
    /// Nearest-segment projection on a simple line, with boundary rules.
    Naive,
    /// Subdivided line, pruned candidates and backtracking search.
    Backtracking,
    /// Interpolated from feed-supplied shape distances.
    ShapeDistance,
    /// Nearest-segment projection after the other strategies failed.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceOutcome {
    /// One distance per stop, in stop order.
    pub distances: Vec<f64>,
    pub strategy: DistanceStrategy,
    /// Length of the route line, rounded like the distances.
    pub line_length: f64,
    /// Stops whose position was not taken from a trusted projection of their
    /// own: boundary and interpolation rules, or outliers in a fallback.
    pub skipped_stops: Vec<usize>,
    /// Recovered failures, in the order they happened.
    pub failures: Vec<FailureReason>,
}

impl DistanceOutcome {
    pub fn is_monotonic(&self) -> bool {
        is_non_decreasing(&self.distances)
    }

    pub fn used_fallback(&self) -> bool {
        self.strategy == DistanceStrategy::Fallback
    }
}

/// Assigns every stop a distance travelled along `line`.
///
/// Degrades through shape distances, backtracking and nearest-segment
/// fallback; only malformed input (fewer than two stops or line points, or
/// non-finite coordinates) is returned as an error.
pub fn compute_stop_distances(
    line: &[Coordinate],
    stops: &[Stop],
    shape_distances: Option<&TrustedShapeDistances>,
    settings: &DistanceSettings,
) -> Result<DistanceOutcome> {
    if stops.len() < 2 {
        return Err(DistanceError::InputDegenerate(format!(
            "pattern has {} stops, at least 2 required",
            stops.len()
        )));
    }
    let line = Polyline::new(line.to_vec())?;
    if let Some(coordinate) = line
        .points()
        .iter()
        .chain(stops.iter().map(|stop| &stop.location))
        .find(|coordinate| !coordinate.is_finite())
    {
        return Err(DistanceError::InputDegenerate(format!(
            "non-finite coordinate {coordinate}"
        )));
    }

    let measure = LineMeasure::new(&line, settings.metric);
    let line_length = settings.round_distance(measure.length());
    if !line_length.is_finite() {
        return Err(DistanceError::InputDegenerate(format!(
            "line length {line_length} is not finite"
        )));
    }
    let mut failures = Vec::new();

    if all_stops_coincide(stops) {
        debug!(stops = stops.len(), "all stops coincide");
        return Ok(DistanceOutcome {
            distances: vec![0.0; stops.len()],
            strategy: DistanceStrategy::Trivial,
            line_length,
            skipped_stops: Vec::new(),
            failures,
        });
    }

    if let Some(shape_distances) = shape_distances {
        let projected = validate_shape_distances(stops, shape_distances, line.points().len())
            .and_then(|validated| project_shape_distances(&measure, &validated));
        match projected {
            Ok(distances) => {
                debug!(stops = stops.len(), "using shape distances");
                return Ok(DistanceOutcome {
                    distances: finalize(&distances, line_length, settings),
                    strategy: DistanceStrategy::ShapeDistance,
                    line_length,
                    skipped_stops: Vec::new(),
                    failures,
                });
            }
            Err(error) => {
                debug!(%error, "shape distances rejected, matching geometrically");
                failures.push(FailureReason::from(error));
            }
        }
    }

    let coordinates: Vec<Coordinate> = stops.iter().map(|stop| stop.location).collect();

    if !settings.assume_complex_lines && !line.is_closed_or_self_intersecting() {
        let mut context = MatchContext::new(&line, &coordinates, settings);
        context.mark_boundary_stops();
        let matches = context.nearest_segments();
        let resolved = context
            .matched_distances(&matches)
            .and_then(|computed| context.resolve_distances(&computed, &matches));
        match resolved.map(|distances| finalize(&distances, line_length, settings)) {
            Ok(distances) if is_non_decreasing(&distances) => {
                debug!(stops = stops.len(), "simple line, naive assignment");
                return Ok(DistanceOutcome {
                    distances,
                    strategy: DistanceStrategy::Naive,
                    line_length,
                    skipped_stops: context.skip_stops.sorted(),
                    failures,
                });
            }
            Ok(_) => {
                debug!(stops = stops.len(), "nearest segments out of order, matching robustly");
            }
            Err(error) => {
                warn!(%error, "naive assignment failed, falling back to nearest segments");
                failures.push(FailureReason::from(error));
                return Ok(hard_fallback(&line, &coordinates, settings, failures));
            }
        }
    }

    match match_on_subdivided_line(&line, stops, &coordinates, settings) {
        Ok(RobustOutcome::Matched {
            distances,
            skipped_stops,
        }) => Ok(DistanceOutcome {
            distances: finalize(&distances, line_length, settings),
            strategy: DistanceStrategy::Backtracking,
            line_length,
            skipped_stops,
            failures,
        }),
        Ok(RobustOutcome::Rejected {
            distances,
            skipped_stops,
            error,
        }) => {
            warn!(%error, "stop matching rejected, falling back to nearest segments");
            failures.push(FailureReason::from(error));
            Ok(DistanceOutcome {
                distances: finalize(&distances, line_length, settings),
                strategy: DistanceStrategy::Fallback,
                line_length,
                skipped_stops,
                failures,
            })
        }
        Err(error) => {
            warn!(%error, "stop matching failed, falling back to nearest segments");
            failures.push(FailureReason::from(error));
            Ok(hard_fallback(&line, &coordinates, settings, failures))
        }
    }
}

enum RobustOutcome {
    Matched {
        distances: Vec<f64>,
        skipped_stops: Vec<usize>,
    },
    /// The search ran but its assignment is unusable; `distances` hold the
    /// nearest-segment positions on the subdivided line.
    Rejected {
        distances: Vec<f64>,
        skipped_stops: Vec<usize>,
        error: DistanceError,
    },
}

fn match_on_subdivided_line(
    line: &Polyline,
    stops: &[Stop],
    coordinates: &[Coordinate],
    settings: &DistanceSettings,
) -> Result<RobustOutcome> {
    let dense = line.subdivide(settings.subdivision_epsilon, settings.max_subdivided_points)?;
    let mut context = MatchContext::new(&dense, coordinates, settings);
    context.mark_boundary_stops();

    let thresholds = matching_thresholds(coordinates, &context.locators, settings.metric);
    let candidates = prune_candidates(
        coordinates,
        &context.locators,
        &thresholds,
        settings.metric,
        &mut context.skip_stops,
    );
    let trial_limit = settings.trial_budget.limit(stops.len());
    let outcome = BacktrackingMatcher::new(&candidates, &context.skip_stops, trial_limit)
        .with_coincident_stops(coincident_stops(stops))
        .run();
    debug!(
        segments = dense.segment_count(),
        trial_steps = outcome.trial_steps,
        trial_limit,
        skipped = context.skip_stops.len(),
        "backtracking finished"
    );

    if let Some(error) = rejection(&outcome, &context.skip_stops) {
        return Ok(RobustOutcome::Rejected {
            distances: context.nearest_segment_distances()?,
            skipped_stops: context.skip_stops.sorted(),
            error,
        });
    }

    let computed = context.matched_distances(&outcome.matches)?;
    let distances = context.resolve_distances(&computed, &outcome.matches)?;
    if let Some(stop_index) = distances.windows(2).position(|pair| pair[0] > pair[1]) {
        return Ok(RobustOutcome::Rejected {
            distances: context.nearest_segment_distances()?,
            skipped_stops: context.skip_stops.sorted(),
            error: DistanceError::NoPlausibleMatch {
                stop_index: stop_index + 1,
            },
        });
    }
    Ok(RobustOutcome::Matched {
        distances,
        skipped_stops: context.skip_stops.sorted(),
    })
}

fn rejection(outcome: &MatchOutcome, skip_stops: &SkipStops) -> Option<DistanceError> {
    if outcome.budget_exhausted {
        return Some(DistanceError::SearchBudgetExceeded {
            limit: outcome.trial_limit,
        });
    }
    if let Some(stop_index) = outcome.first_unmatched(skip_stops) {
        return Some(DistanceError::NoPlausibleMatch { stop_index });
    }
    if let Some(stop_index) = outcome.unmatched_run(skip_stops) {
        return Some(DistanceError::NoPlausibleMatch { stop_index });
    }
    outcome
        .first_out_of_order()
        .map(|stop_index| DistanceError::NoPlausibleMatch { stop_index })
}

/// Nearest-segment distances on the unmodified line. Used when matching
/// raised an error, so no intermediate state is trusted.
fn hard_fallback(
    line: &Polyline,
    coordinates: &[Coordinate],
    settings: &DistanceSettings,
    failures: Vec<FailureReason>,
) -> DistanceOutcome {
    let context = MatchContext::new(line, coordinates, settings);
    let line_length = settings.round_distance(context.measure.length());
    let distances = context.nearest_segment_distances().unwrap_or_else(|error| {
        warn!(%error, "nearest segment projection failed, using straight stop spacing");
        straight_line_distances(coordinates, settings.metric)
    });
    DistanceOutcome {
        distances: finalize(&distances, line_length, settings),
        strategy: DistanceStrategy::Fallback,
        line_length,
        skipped_stops: context.outlier_stops(),
        failures,
    }
}

/// Per-call matching state: the line being matched against, every stop's
/// locators on it and the stops excluded from matching.
struct MatchContext<'a> {
    measure: LineMeasure<'a>,
    coordinates: &'a [Coordinate],
    locators: Vec<Vec<Locator>>,
    skip_stops: SkipStops,
    detector: OutlierDetector,
}

impl<'a> MatchContext<'a> {
    fn new(line: &'a Polyline, coordinates: &'a [Coordinate], settings: &DistanceSettings) -> Self {
        Self {
            measure: LineMeasure::new(line, settings.metric),
            coordinates,
            locators: coordinates.iter().map(|stop| line.locators(*stop)).collect(),
            skip_stops: SkipStops::new(),
            detector: OutlierDetector::from_settings(settings),
        }
    }

    fn last_stop(&self) -> usize {
        self.coordinates.len() - 1
    }

    /// The first stop is skipped when it lies before the line or far from it,
    /// the last when it lies past the line or far from it.
    fn mark_boundary_stops(&mut self) {
        let line = self.measure.line();
        if self.detector.is_before_line(line, self.coordinates[0]) {
            self.skip_stops.insert(0);
        }
        let last = self.last_stop();
        if self.detector.is_after_line(line, self.coordinates[last]) {
            self.skip_stops.insert(last);
        }
    }

    fn outlier_stops(&self) -> Vec<usize> {
        let line = self.measure.line();
        (0..self.coordinates.len())
            .filter(|&i| self.detector.is_outlier(line, self.coordinates[i]))
            .collect()
    }

    fn nearest_segments(&self) -> Vec<Option<usize>> {
        self.locators
            .iter()
            .enumerate()
            .map(|(i, locators)| {
                if self.skip_stops.contains(i) {
                    None
                } else {
                    best_locator(locators).map(|locator| locator.segment_index)
                }
            })
            .collect()
    }

    /// Distance of every stop's closest projection, ignoring order.
    fn nearest_segment_distances(&self) -> Result<Vec<f64>> {
        self.locators
            .iter()
            .map(|locators| match best_locator(locators) {
                Some(locator) => self.measure.locator_distance(locator),
                None => Ok(0.0),
            })
            .collect()
    }

    /// Distance of each matched stop's projection onto its chosen segment.
    fn matched_distances(&self, matches: &[Option<usize>]) -> Result<Vec<Option<f64>>> {
        matches
            .iter()
            .enumerate()
            .map(|(i, segment)| match segment {
                Some(segment) if !self.skip_stops.contains(i) => {
                    let locator = self.locators[i].get(*segment).ok_or_else(|| {
                        DistanceError::UnexpectedGeometryFailure(format!(
                            "stop {i} matched to missing segment {segment}"
                        ))
                    })?;
                    self.measure.locator_distance(locator).map(Some)
                }
                _ => Ok(None),
            })
            .collect()
    }

    /// Places skipped stops: boundary rules for the first and last stop, the
    /// midpoint of the neighbouring distances for interior ones.
    fn resolve_distances(
        &self,
        computed: &[Option<f64>],
        matches: &[Option<usize>],
    ) -> Result<Vec<f64>> {
        let last = self.last_stop();
        let mut resolved = vec![0.0; computed.len()];
        for i in 0..computed.len() {
            if !self.skip_stops.contains(i) {
                resolved[i] = computed[i].ok_or_else(|| {
                    DistanceError::UnexpectedGeometryFailure(format!(
                        "stop {i} has no matched segment"
                    ))
                })?;
                continue;
            }
            resolved[i] = if i == 0 {
                self.first_stop_distance(matches)?
            } else if i == last {
                self.last_stop_distance(matches[last - 1])?
            } else {
                let next = computed[i + 1..]
                    .iter()
                    .flatten()
                    .next()
                    .copied()
                    .unwrap_or_else(|| self.measure.length());
                (resolved[i - 1] + next) / 2.0
            };
        }
        Ok(resolved)
    }

    /// Zero unless the first stop projects before the next matched stop; a
    /// line starting past the first stop must not push it ahead.
    fn first_stop_distance(&self, matches: &[Option<usize>]) -> Result<f64> {
        let first = best_locator(&self.locators[0]);
        let next = matches
            .iter()
            .enumerate()
            .skip(1)
            .find_map(|(i, segment)| segment.and_then(|segment| self.locators[i].get(segment)));
        match (first, next) {
            (Some(first), Some(next)) if precedes(first, next) => {
                self.measure.locator_distance(first)
            }
            _ => Ok(0.0),
        }
    }

    /// The full line length unless the last stop projects past the
    /// penultimate stop's match.
    fn last_stop_distance(&self, penultimate_match: Option<usize>) -> Result<f64> {
        let Some(penultimate_match) = penultimate_match else {
            return Ok(self.measure.length());
        };
        let last = self.last_stop();
        let candidate = self.locators[last]
            .get(penultimate_match..)
            .and_then(best_locator);
        let penultimate = self.locators[last - 1].get(penultimate_match);
        match (candidate, penultimate) {
            (Some(candidate), Some(penultimate)) if precedes(penultimate, candidate) => {
                self.measure.locator_distance(candidate)
            }
            _ => Ok(self.measure.length()),
        }
    }
}

fn is_non_decreasing(distances: &[f64]) -> bool {
    distances.windows(2).all(|pair| pair[0] <= pair[1])
}

/// `a` lies strictly before `b` along the line.
fn precedes(a: &Locator, b: &Locator) -> bool {
    a.segment_index < b.segment_index
        || (a.segment_index == b.segment_index && a.distance_on_segment < b.distance_on_segment)
}

fn all_stops_coincide(stops: &[Stop]) -> bool {
    let first = &stops[0];
    stops.iter().all(|stop| stop.stop_id == first.stop_id)
        || stops.iter().all(|stop| stop.location == first.location)
}

/// `flags[i]`: stops `i` and `i + 1` are the same stop.
fn coincident_stops(stops: &[Stop]) -> Vec<bool> {
    stops
        .windows(2)
        .map(|pair| pair[0].stop_id == pair[1].stop_id || pair[0].location == pair[1].location)
        .collect()
}

/// Rounds to the configured precision and clamps into `[0, line_length]`,
/// where `line_length` is already rounded.
fn finalize(distances: &[f64], line_length: f64, settings: &DistanceSettings) -> Vec<f64> {
    let upper = line_length.max(0.0);
    distances
        .iter()
        .map(|&distance| {
            let distance = if distance.is_finite() { distance } else { 0.0 };
            settings.round_distance(distance).clamp(0.0, upper)
        })
        .collect()
}
