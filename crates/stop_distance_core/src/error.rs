use serde::{Deserialize, Serialize};

/// Failures raised while assigning distances to a route stop pattern.
///
/// Only [`DistanceError::InputDegenerate`] reaches callers of
/// [`compute_stop_distances`](crate::compute_stop_distances); every other kind
/// is recovered inside the orchestrator and reported as a [`FailureReason`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DistanceError {
    #[error("degenerate input: {0}")]
    InputDegenerate(String),
    #[error("stop {stop_index} has no plausible segment match")]
    NoPlausibleMatch { stop_index: usize },
    #[error("backtracking search exceeded {limit} trial steps")]
    SearchBudgetExceeded { limit: u64 },
    #[error("shape distances are inconsistent: {0}")]
    ShapeDistanceInconsistent(String),
    #[error("unexpected geometry failure: {0}")]
    UnexpectedGeometryFailure(String),
}

impl DistanceError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DistanceError::InputDegenerate(_) => FailureKind::InputDegenerate,
            DistanceError::NoPlausibleMatch { .. } => FailureKind::NoPlausibleMatch,
            DistanceError::SearchBudgetExceeded { .. } => FailureKind::SearchBudgetExceeded,
            DistanceError::ShapeDistanceInconsistent(_) => FailureKind::ShapeDistanceInconsistent,
            DistanceError::UnexpectedGeometryFailure(_) => FailureKind::UnexpectedGeometryFailure,
        }
    }
}

pub type Result<T> = std::result::Result<T, DistanceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InputDegenerate,
    NoPlausibleMatch,
    SearchBudgetExceeded,
    ShapeDistanceInconsistent,
    UnexpectedGeometryFailure,
}

/// Structured cause of a recovered failure, for the caller to log or turn
/// into a data-quality issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&DistanceError> for FailureReason {
    fn from(error: &DistanceError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<DistanceError> for FailureReason {
    fn from(error: DistanceError) -> Self {
        FailureReason::from(&error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_keeps_kind_and_message() {
        let reason = FailureReason::from(DistanceError::SearchBudgetExceeded { limit: 21 });
        assert_eq!(reason.kind, FailureKind::SearchBudgetExceeded);
        assert!(reason.message.contains("21 trial steps"));
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let value = serde_json::to_value(FailureKind::ShapeDistanceInconsistent).unwrap();
        assert_eq!(value, "shape_distance_inconsistent");
    }
}
