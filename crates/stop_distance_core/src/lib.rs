pub mod batch;
pub mod candidates;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod matcher;
pub mod notice;
pub mod outlier;
pub mod progress;
pub mod settings;
pub mod shape_distance;

pub use batch::{compute_batch, compute_pattern_distances, PatternResult};
pub use engine::{compute_stop_distances, DistanceOutcome, DistanceStrategy};
pub use error::{DistanceError, FailureKind, FailureReason, Result};
pub use geometry::{straight_line_distances, LineMeasure, Locator, Metric, Polyline, Segment};
pub use notice::{DistanceNotice, NoticeContainer, NoticeSeverity};
pub use progress::{NoOpProgressHandler, ProgressHandler};
pub use settings::{DistanceSettings, TrialBudget};

pub use stop_distance_model::{Coordinate, RoutePattern, Stop, TrustedShapeDistances};
