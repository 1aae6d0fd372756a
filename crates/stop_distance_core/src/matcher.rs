//! Bounded backtracking over per-stop candidate segments.
//!
//! Loosely follows OpenTripPlanner's pattern hop geometry matching: candidates
//! are tried in order of distance from the line until every stop has a segment
//! and the chosen segment indices strictly increase from stop to stop. The
//! heuristic pruning in [`crate::candidates`] keeps the candidate lists short;
//! the result may still be a local rather than a global optimum.

use crate::candidates::{CandidateSets, SkipStops};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TrialFrame {
    stop_index: usize,
    segment: Option<usize>,
}

/// Segment chosen for each stop, `None` for skipped or unmatched stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub matches: Vec<Option<usize>>,
    pub trial_steps: u64,
    pub trial_limit: u64,
    pub budget_exhausted: bool,
}

impl MatchOutcome {
    /// First stop left without a segment although it was not skipped.
    pub fn first_unmatched(&self, skip_stops: &SkipStops) -> Option<usize> {
        self.matches
            .iter()
            .enumerate()
            .find(|(i, m)| m.is_none() && !skip_stops.contains(*i))
            .map(|(i, _)| i)
    }

    /// Two consecutive stops without a segment means the line and the stops
    /// do not fit together, except for two-stop patterns and a skipped
    /// penultimate stop followed by a skipped last stop.
    pub fn has_unmatched_run(&self, skip_stops: &SkipStops) -> bool {
        self.unmatched_run(skip_stops).is_some()
    }

    /// Index of the first stop of the first disallowed pair of unmatched stops.
    pub fn unmatched_run(&self, skip_stops: &SkipStops) -> Option<usize> {
        if self.matches.len() == 2 {
            return None;
        }
        let last = self.matches.len().saturating_sub(1);
        self.matches
            .windows(2)
            .enumerate()
            .find(|(i, pair)| {
                let trailing_skips =
                    i + 1 == last && skip_stops.contains(*i) && skip_stops.contains(last);
                pair[0].is_none() && pair[1].is_none() && !trailing_skips
            })
            .map(|(i, _)| i)
    }

    /// First stop whose segment lies before the segment of an earlier
    /// matched stop.
    pub fn first_out_of_order(&self) -> Option<usize> {
        let mut previous: Option<usize> = None;
        for (i, segment) in self.matches.iter().enumerate() {
            let Some(segment) = *segment else {
                continue;
            };
            if previous.is_some_and(|previous| segment < previous) {
                return Some(i);
            }
            previous = Some(segment);
        }
        None
    }

    pub fn is_valid(&self, skip_stops: &SkipStops) -> bool {
        self.first_unmatched(skip_stops).is_none()
            && !self.has_unmatched_run(skip_stops)
            && self.first_out_of_order().is_none()
    }
}

pub struct BacktrackingMatcher<'a> {
    candidates: &'a CandidateSets,
    skip_stops: &'a SkipStops,
    /// `coincident[i]`: stops `i` and `i + 1` are the same stop and may share
    /// a segment.
    coincident: Vec<bool>,
    trial_limit: u64,
}

impl<'a> BacktrackingMatcher<'a> {
    pub fn new(candidates: &'a CandidateSets, skip_stops: &'a SkipStops, trial_limit: u64) -> Self {
        Self {
            candidates,
            skip_stops,
            coincident: vec![false; candidates.len().saturating_sub(1)],
            trial_limit,
        }
    }

    pub fn with_coincident_stops(mut self, coincident: Vec<bool>) -> Self {
        self.coincident = coincident;
        self
    }

    pub fn run(&self) -> MatchOutcome {
        let stop_count = self.candidates.len();
        let mut matches: Vec<Option<usize>> = vec![None; stop_count];
        let mut stack = Vec::with_capacity(stop_count * 2);
        let mut trial_steps = 0u64;
        let mut budget_exhausted = false;

        self.push_forward_chain(0, 0, &mut stack);

        while let Some(frame) = stack.pop() {
            if trial_steps > self.trial_limit {
                budget_exhausted = true;
                break;
            }
            trial_steps += 1;
            let stop_index = frame.stop_index;
            if self.skip_stops.contains(stop_index) {
                continue;
            }
            if stop_index + 1 == stop_count || self.is_valid_choice(stop_index, frame.segment, &matches) {
                matches[stop_index] = frame.segment;
                continue;
            }

            let next_segment = frame.segment.and_then(|segment| {
                let position = self.candidates.position(stop_index, segment)?;
                self.candidates
                    .get(stop_index)?
                    .get(position + 1)
                    .map(|candidate| candidate.segment_index)
            });
            match next_segment {
                Some(segment) => {
                    stack.push(TrialFrame {
                        stop_index,
                        segment: Some(segment),
                    });
                    self.push_forward_chain(stop_index + 1, segment, &mut stack);
                }
                None => matches[stop_index] = None,
            }
        }

        MatchOutcome {
            matches,
            trial_steps,
            trial_limit: self.trial_limit,
            budget_exhausted,
        }
    }

    /// Greedy chain from `from_stop` onward: each stop takes its closest
    /// candidate at or after the running minimum segment.
    fn push_forward_chain(&self, from_stop: usize, mut min_segment: usize, stack: &mut Vec<TrialFrame>) {
        for stop_index in from_stop..self.candidates.len() {
            let segment = if self.skip_stops.contains(stop_index) {
                None
            } else {
                self.candidates.first_admissible(stop_index, min_segment)
            };
            if let Some(segment) = segment {
                min_segment = segment;
            }
            stack.push(TrialFrame {
                stop_index,
                segment,
            });
        }
    }

    /// A choice is kept once every following stop is resolved and the
    /// segments from `stop_index` onward strictly increase. Only coincident
    /// neighbours may share a segment.
    fn is_valid_choice(&self, stop_index: usize, choice: Option<usize>, matches: &[Option<usize>]) -> bool {
        let Some(choice) = choice else {
            return false;
        };
        let following = &matches[stop_index + 1..];
        let all_resolved = following
            .iter()
            .enumerate()
            .all(|(j, m)| m.is_some() || self.skip_stops.contains(stop_index + 1 + j));
        if !all_resolved {
            return false;
        }
        let mut previous = (stop_index, choice);
        for (j, current) in following.iter().enumerate() {
            let Some(segment) = *current else {
                continue;
            };
            let current = (stop_index + 1 + j, segment);
            if !self.in_order(previous, current) {
                return false;
            }
            previous = current;
        }
        true
    }

    fn in_order(&self, (earlier_stop, earlier): (usize, usize), (later_stop, later): (usize, usize)) -> bool {
        let may_share = later_stop == earlier_stop + 1 && self.coincident[earlier_stop];
        earlier < later || (earlier == later && may_share)
    }
}
