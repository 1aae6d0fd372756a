use std::panic::{catch_unwind, AssertUnwindSafe};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use stop_distance_model::RoutePattern;
use tracing::warn;

use crate::engine::{compute_stop_distances, DistanceOutcome};
use crate::error::{DistanceError, Result};
use crate::notice::{DistanceNotice, NoticeContainer, NoticeSeverity};
use crate::progress::ProgressHandler;
use crate::settings::DistanceSettings;

/// Distances and notices for one route pattern of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternResult {
    pub pattern_id: CompactString,
    /// `None` when the pattern could not be processed at all.
    pub outcome: Option<DistanceOutcome>,
    pub notices: NoticeContainer,
}

impl PatternResult {
    pub fn distances(&self) -> Option<&[f64]> {
        self.outcome
            .as_ref()
            .map(|outcome| outcome.distances.as_slice())
    }

    pub fn has_errors(&self) -> bool {
        self.notices.count(NoticeSeverity::Error) > 0
    }
}

/// Computes distances for a single pattern after checking its fields.
pub fn compute_pattern_distances(
    pattern: &RoutePattern,
    settings: &DistanceSettings,
) -> Result<DistanceOutcome> {
    pattern
        .validate()
        .map_err(|error| DistanceError::InputDegenerate(error.to_string()))?;
    compute_stop_distances(
        &pattern.line,
        &pattern.stops,
        pattern.shape_distances.as_ref(),
        settings,
    )
}

/// Processes every pattern independently; results keep the input order.
///
/// A pattern that fails or panics yields an error notice and no outcome
/// instead of aborting the batch.
pub fn compute_batch(
    patterns: &[RoutePattern],
    settings: &DistanceSettings,
    progress: &dyn ProgressHandler,
) -> Vec<PatternResult> {
    progress.set_total_patterns(patterns.len());

    #[cfg(feature = "parallel")]
    let results: Vec<PatternResult> = {
        use rayon::prelude::*;
        patterns
            .par_iter()
            .map(|pattern| run_pattern(pattern, settings, progress))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let results: Vec<PatternResult> = patterns
        .iter()
        .map(|pattern| run_pattern(pattern, settings, progress))
        .collect();

    results
}

fn run_pattern(
    pattern: &RoutePattern,
    settings: &DistanceSettings,
    progress: &dyn ProgressHandler,
) -> PatternResult {
    let pattern_id = pattern.pattern_id.as_str();
    let _span = tracing::debug_span!("pattern", id = pattern_id).entered();
    progress.on_start_pattern(pattern_id);

    let result = catch_unwind(AssertUnwindSafe(|| {
        compute_pattern_distances(pattern, settings)
    }));
    let (outcome, notices) = match result {
        Ok(Ok(outcome)) => {
            let notices = NoticeContainer::from_outcome(pattern_id, &pattern.stops, &outcome);
            (Some(outcome), notices)
        }
        Ok(Err(error)) => {
            warn!(%error, "pattern skipped");
            let mut notices = NoticeContainer::new();
            notices.push(DistanceNotice::from_error(pattern_id, &error));
            (None, notices)
        }
        Err(panic) => {
            let message = panic_payload_message(&*panic);
            warn!(%message, "distance calculation panicked");
            let mut notices = NoticeContainer::new();
            notices.push(DistanceNotice::distance_failed(pattern_id, "panic", message));
            (None, notices)
        }
    };

    progress.on_finish_pattern(pattern_id);
    PatternResult {
        pattern_id: pattern.pattern_id.clone(),
        outcome,
        notices,
    }
}

fn panic_payload_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DistanceStrategy;
    use crate::notice::NOTICE_CODE_DISTANCE_FAILED;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use stop_distance_model::{Coordinate, Stop};

    #[derive(Default)]
    struct CountingProgress {
        total: AtomicUsize,
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    impl ProgressHandler for CountingProgress {
        fn set_total_patterns(&self, count: usize) {
            self.total.store(count, Ordering::SeqCst);
        }

        fn on_start_pattern(&self, _pattern_id: &str) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_finish_pattern(&self, _pattern_id: &str) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pattern(id: &str, stop_count: usize) -> RoutePattern {
        let stops = (0..stop_count)
            .map(|i| Stop::new(format!("s{i}"), Coordinate::new(i as f64 * 100.0, 1.0)))
            .collect();
        RoutePattern::new(
            id,
            vec![Coordinate::new(0.0, 0.0), Coordinate::new(1000.0, 0.0)],
            stops,
        )
    }

    #[test]
    fn keeps_input_order_and_reports_progress() {
        let patterns: Vec<RoutePattern> = (0..8).map(|i| pattern(&format!("p{i}"), 3 + i)).collect();
        let progress = CountingProgress::default();
        let results = compute_batch(&patterns, &DistanceSettings::planar(), &progress);

        assert_eq!(results.len(), 8);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.pattern_id, format!("p{i}"));
            let outcome = result.outcome.as_ref().unwrap();
            assert_eq!(outcome.strategy, DistanceStrategy::Backtracking);
            assert_eq!(outcome.distances.len(), 3 + i);
            assert!(outcome.is_monotonic());
        }
        assert_eq!(progress.total.load(Ordering::SeqCst), 8);
        assert_eq!(progress.started.load(Ordering::SeqCst), 8);
        assert_eq!(progress.finished.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn degenerate_pattern_yields_error_notice() {
        let patterns = vec![pattern("ok", 3), pattern("lonely", 1)];
        let results = compute_batch(
            &patterns,
            &DistanceSettings::planar(),
            &crate::progress::NoOpProgressHandler,
        );
        assert!(results[0].outcome.is_some());
        assert!(!results[0].has_errors());
        assert!(results[1].distances().is_none());
        assert!(results[1].has_errors());
        assert_eq!(
            results[1].notices.iter().next().unwrap().code,
            NOTICE_CODE_DISTANCE_FAILED
        );
    }

    #[test]
    fn invalid_fields_are_rejected_before_matching() {
        let mut broken = pattern("broken", 3);
        broken.stops[1].stop_id = "".into();
        let error = compute_pattern_distances(&broken, &DistanceSettings::planar()).unwrap_err();
        assert!(matches!(error, DistanceError::InputDegenerate(_)));
    }

    #[test]
    fn panic_message_is_extracted() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_payload_message(&*payload), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_payload_message(&*payload), "bang");
    }
}
