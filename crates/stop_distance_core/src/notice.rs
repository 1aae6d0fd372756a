use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stop_distance_model::Stop;

use crate::engine::DistanceOutcome;
use crate::error::{DistanceError, FailureReason};

pub const NOTICE_CODE_DISTANCE_INACCURATE: &str = "distance_calculation_inaccurate";
pub const NOTICE_CODE_STOP_POSITION_INACCURATE: &str = "stop_position_inaccurate";
pub const NOTICE_CODE_DISTANCE_FAILED: &str = "distance_calculation_failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeSeverity {
    Error,
    Warning,
    Info,
}

/// A data-quality finding about one route pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceNotice {
    pub code: String,
    pub severity: NoticeSeverity,
    pub message: String,
    pub pattern_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_order: Vec<String>,
}

impl DistanceNotice {
    pub fn new(
        code: impl Into<String>,
        severity: NoticeSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            severity,
            message: message.into(),
            pattern_id: None,
            context: BTreeMap::new(),
            field_order: Vec::new(),
        }
    }

    /// The engine had to fall back, or rejected the feed's shape distances.
    pub fn distance_inaccurate(pattern_id: &str, reason: &FailureReason) -> Self {
        DistanceNotice::new(
            NOTICE_CODE_DISTANCE_INACCURATE,
            NoticeSeverity::Warning,
            "stop distances could not be computed accurately",
        )
        .with_pattern(pattern_id)
        .with_context_field("patternId", pattern_id)
        .with_context_field("reason", reason.kind)
        .with_context_field("message", &reason.message)
    }

    /// A stop was placed by boundary or interpolation rules.
    pub fn stop_position_inaccurate(pattern_id: &str, stop_index: usize, stop: &Stop) -> Self {
        DistanceNotice::new(
            NOTICE_CODE_STOP_POSITION_INACCURATE,
            NoticeSeverity::Info,
            "stop is too far from the route line to be projected",
        )
        .with_pattern(pattern_id)
        .with_context_field("patternId", pattern_id)
        .with_context_field("stopIndex", stop_index)
        .with_context_field("stopId", stop.stop_id.as_str())
    }

    /// No distances at all: malformed input or a panic inside the engine.
    pub fn distance_failed(pattern_id: &str, exception: &str, message: impl Into<String>) -> Self {
        DistanceNotice::new(
            NOTICE_CODE_DISTANCE_FAILED,
            NoticeSeverity::Error,
            "stop distances could not be computed",
        )
        .with_pattern(pattern_id)
        .with_context_field("patternId", pattern_id)
        .with_context_field("exception", exception)
        .with_context_field("message", message.into())
    }

    pub fn from_error(pattern_id: &str, error: &DistanceError) -> Self {
        let reason = FailureReason::from(error);
        let kind = serde_json::to_value(reason.kind)
            .ok()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| "error".to_string());
        DistanceNotice::distance_failed(pattern_id, &kind, reason.message)
    }

    pub fn insert_context_field<V: Serialize>(&mut self, name: impl Into<String>, value: V) {
        let key = name.into();
        let serialized = serde_json::to_value(value).unwrap_or(Value::Null);
        if !self.field_order.iter().any(|item| item == &key) {
            self.field_order.push(key.clone());
        }
        self.context.insert(key, serialized);
    }

    pub fn with_context_field<V: Serialize>(mut self, name: impl Into<String>, value: V) -> Self {
        self.insert_context_field(name, value);
        self
    }

    fn with_pattern(mut self, pattern_id: &str) -> Self {
        self.pattern_id = Some(pattern_id.to_string());
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoticeContainer {
    notices: Vec<DistanceNotice>,
}

impl NoticeContainer {
    pub fn new() -> Self {
        Self {
            notices: Vec::new(),
        }
    }

    /// Notices describing how `outcome` was produced for `stops`.
    pub fn from_outcome(pattern_id: &str, stops: &[Stop], outcome: &DistanceOutcome) -> Self {
        let mut notices = NoticeContainer::new();
        for reason in &outcome.failures {
            notices.push(DistanceNotice::distance_inaccurate(pattern_id, reason));
        }
        for &stop_index in &outcome.skipped_stops {
            if let Some(stop) = stops.get(stop_index) {
                notices.push(DistanceNotice::stop_position_inaccurate(
                    pattern_id, stop_index, stop,
                ));
            }
        }
        notices
    }

    pub fn push(&mut self, notice: DistanceNotice) {
        self.notices.push(notice);
    }

    pub fn iter(&self) -> impl Iterator<Item = &DistanceNotice> {
        self.notices.iter()
    }

    pub fn len(&self) -> usize {
        self.notices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }

    pub fn count(&self, severity: NoticeSeverity) -> usize {
        self.notices
            .iter()
            .filter(|notice| notice.severity == severity)
            .count()
    }

    pub fn merge(&mut self, other: NoticeContainer) {
        self.notices.extend(other.notices);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DistanceStrategy;
    use crate::error::FailureKind;
    use stop_distance_model::Coordinate;

    #[test]
    fn context_fields_keep_insertion_order() {
        let notice = DistanceNotice::new("code", NoticeSeverity::Info, "message")
            .with_context_field("b", 1)
            .with_context_field("a", "x")
            .with_context_field("b", 2);
        assert_eq!(notice.field_order, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(notice.context["b"], Value::from(2));
    }

    #[test]
    fn outcome_produces_fallback_and_stop_notices() {
        let stops = vec![
            Stop::new("s1", Coordinate::new(0.0, 0.0)),
            Stop::new("s2", Coordinate::new(1.0, 0.0)),
        ];
        let outcome = DistanceOutcome {
            distances: vec![0.0, 1.0],
            strategy: DistanceStrategy::Fallback,
            line_length: 1.0,
            skipped_stops: vec![1],
            failures: vec![FailureReason::from(DistanceError::SearchBudgetExceeded {
                limit: 21,
            })],
        };
        let notices = NoticeContainer::from_outcome("p1", &stops, &outcome);
        assert_eq!(notices.len(), 2);
        assert_eq!(notices.count(NoticeSeverity::Warning), 1);
        assert_eq!(notices.count(NoticeSeverity::Info), 1);

        let first = notices.iter().next().unwrap();
        assert_eq!(first.code, NOTICE_CODE_DISTANCE_INACCURATE);
        assert_eq!(first.pattern_id.as_deref(), Some("p1"));
        assert_eq!(
            first.context["reason"],
            serde_json::to_value(FailureKind::SearchBudgetExceeded).unwrap()
        );
        let second = notices.iter().nth(1).unwrap();
        assert_eq!(second.context["stopId"], Value::from("s2"));
    }

    #[test]
    fn degenerate_input_becomes_error_notice() {
        let error = DistanceError::InputDegenerate("pattern has 1 stops".to_string());
        let notice = DistanceNotice::from_error("p1", &error);
        assert_eq!(notice.code, NOTICE_CODE_DISTANCE_FAILED);
        assert_eq!(notice.severity, NoticeSeverity::Error);
        assert_eq!(notice.context["exception"], Value::from("input_degenerate"));
    }

    #[test]
    fn severity_serializes_lowercase() {
        let json = serde_json::to_string(&NoticeSeverity::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
    }
}
