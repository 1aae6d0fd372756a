//! Per-stop candidate segments.
//!
//! Each stop keeps the segments whose projection lies within an adaptive
//! threshold, restricted so that indices never decrease from one stop to the
//! next. This keeps the backtracking search small.

use std::cmp::Ordering;

use rustc_hash::FxHashSet;
use stop_distance_model::Coordinate;

use crate::geometry::{best_locator, Locator, Metric};

/// A plausible segment for one stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub segment_index: usize,
    pub distance_from_segment: f64,
}

/// Stops excluded from matching: outliers at either end, and stops with no
/// segment inside their threshold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkipStops {
    stops: FxHashSet<usize>,
}

impl SkipStops {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stop_index: usize) -> bool {
        self.stops.insert(stop_index)
    }

    pub fn contains(&self, stop_index: usize) -> bool {
        self.stops.contains(&stop_index)
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn sorted(&self) -> Vec<usize> {
        let mut stops: Vec<usize> = self.stops.iter().copied().collect();
        stops.sort_unstable();
        stops
    }
}

impl FromIterator<usize> for SkipStops {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self {
            stops: iter.into_iter().collect(),
        }
    }
}

/// Candidate sets for every stop of a pattern. `None` marks a stop with no
/// plausible match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateSets {
    sets: Vec<Option<Vec<Candidate>>>,
}

impl CandidateSets {
    pub fn from_sets(sets: Vec<Option<Vec<Candidate>>>) -> Self {
        Self { sets }
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn get(&self, stop_index: usize) -> Option<&[Candidate]> {
        self.sets.get(stop_index).and_then(|set| set.as_deref())
    }

    /// Position of `segment_index` within the stop's sorted candidates.
    pub fn position(&self, stop_index: usize, segment_index: usize) -> Option<usize> {
        self.get(stop_index)?
            .iter()
            .position(|candidate| candidate.segment_index == segment_index)
    }

    /// Closest candidate of the stop whose index is at least `min_segment`.
    pub fn first_admissible(&self, stop_index: usize, min_segment: usize) -> Option<usize> {
        self.get(stop_index)?
            .iter()
            .find(|candidate| candidate.segment_index >= min_segment)
            .map(|candidate| candidate.segment_index)
    }
}

/// Per-stop matching threshold `sqrt(x_i^2 + y^2)`.
///
/// `y` is the mean distance from each stop to its best projection; `x_i` is
/// half the spacing to the neighbouring stops (both neighbours averaged for
/// interior stops). Requires at least two stops.
pub fn matching_thresholds(stops: &[Coordinate], locators: &[Vec<Locator>], metric: Metric) -> Vec<f64> {
    if stops.len() < 2 {
        return vec![f64::INFINITY; stops.len()];
    }
    let offsets: Vec<f64> = stops
        .iter()
        .zip(locators)
        .map(|(stop, stop_locators)| {
            best_locator(stop_locators)
                .map(|locator| metric.distance(*stop, locator.point))
                .unwrap_or(0.0)
        })
        .collect();
    let y = offsets.iter().sum::<f64>() / offsets.len() as f64;

    let last = stops.len() - 1;
    (0..stops.len())
        .map(|i| {
            let x = if i == 0 {
                metric.distance(stops[0], stops[1]) / 2.0
            } else if i == last {
                metric.distance(stops[last], stops[last - 1]) / 2.0
            } else {
                (metric.distance(stops[i - 1], stops[i]) + metric.distance(stops[i], stops[i + 1]))
                    / 4.0
            };
            x.hypot(y)
        })
        .collect()
}

/// Filters each stop's locators down to its plausible candidates.
///
/// Walking the stops in order, a stop keeps the segments inside its threshold
/// whose index is not below the smallest index kept by the previous matched
/// stop. Earlier stops then lose candidates beyond the largest index kept by
/// the current one. A stop with every locator outside its threshold is added
/// to `skip_stops`.
pub fn prune_candidates(
    stops: &[Coordinate],
    locators: &[Vec<Locator>],
    thresholds: &[f64],
    metric: Metric,
    skip_stops: &mut SkipStops,
) -> CandidateSets {
    let mut sets: Vec<Option<Vec<Candidate>>> = vec![None; stops.len()];
    let mut min_index = 0;

    for (i, stop) in stops.iter().enumerate() {
        if skip_stops.contains(i) {
            continue;
        }
        let threshold = thresholds[i];
        let mut all_outside = true;
        let mut matches: Vec<Candidate> = Vec::new();
        for locator in &locators[i] {
            let distance = metric.distance(*stop, locator.point);
            if distance <= threshold {
                all_outside = false;
            }
            if locator.segment_index >= min_index && distance <= threshold {
                matches.push(Candidate {
                    segment_index: locator.segment_index,
                    distance_from_segment: locator.distance_from_segment,
                });
            }
        }

        if matches.is_empty() {
            if all_outside {
                skip_stops.insert(i);
            }
            continue;
        }

        let max_index = matches
            .iter()
            .map(|candidate| candidate.segment_index)
            .max()
            .unwrap_or(min_index);
        min_index = matches
            .iter()
            .map(|candidate| candidate.segment_index)
            .min()
            .unwrap_or(min_index);

        for earlier in sets[..i].iter_mut().flatten() {
            earlier.retain(|candidate| candidate.segment_index <= max_index);
        }

        matches.sort_by(|a, b| cmp_f64(a.distance_from_segment, b.distance_from_segment));
        sets[i] = Some(matches);
    }

    CandidateSets { sets }
}

pub(crate) fn cmp_f64(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => Ordering::Equal,
    }
}
