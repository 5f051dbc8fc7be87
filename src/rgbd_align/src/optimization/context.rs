//! Per-level iteration bookkeeping.

/// Where the optimizer is and how the objective evolved on this level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationContext {
    pub level: usize,
    pub iteration: usize,
    /// Objective of the latest evaluation.
    pub error: f64,
    /// Objective of the evaluation before it.
    pub last_error: f64,
}

impl Default for IterationContext {
    fn default() -> Self {
        Self {
            level: 0,
            iteration: 0,
            error: f64::MAX,
            last_error: f64::MAX,
        }
    }
}

impl IterationContext {
    /// Start a level. Objectives of different resolutions are not
    /// comparable, so the history is cleared.
    pub fn reset(&mut self, level: usize) {
        self.level = level;
        self.iteration = 0;
        self.error = f64::MAX;
        self.last_error = f64::MAX;
    }

    pub fn is_first_iteration_on_level(&self) -> bool {
        self.iteration == 0
    }

    pub fn iterations_exceeded(&self, max_iterations: usize) -> bool {
        self.iteration >= max_iterations
    }

    /// Push a new objective value into the two-slot history.
    pub fn record_error(&mut self, error: f64) {
        self.last_error = self.error;
        self.error = error;
    }

    /// Whether the latest objective is strictly below the previous one.
    pub fn improved(&self) -> bool {
        self.error < self.last_error
    }
}
