/// Trait for handling progress events during a batch run
pub trait ProgressHandler: Send + Sync {
    /// Set total number of patterns in the batch
    fn set_total_patterns(&self, count: usize);

    /// Called before a pattern's distances are computed
    fn on_start_pattern(&self, pattern_id: &str) {
        let _ = pattern_id;
    }

    /// Called once a pattern is done, whatever the outcome
    fn on_finish_pattern(&self, pattern_id: &str);
}

/// A no-op progress handler
pub struct NoOpProgressHandler;

impl ProgressHandler for NoOpProgressHandler {
    fn set_total_patterns(&self, _count: usize) {}
    fn on_finish_pattern(&self, _pattern_id: &str) {}
}
