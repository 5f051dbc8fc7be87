//! Per-level and per-iteration diagnostics of one alignment.

use nalgebra::{Matrix2, Matrix6, Vector2};
use serde::Serialize;

use super::types::TerminationCriterion;
use crate::geometry::Twist;
use crate::timing::AlignmentTiming;

/// What happened in one iteration of a pyramid level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationStats {
    /// Iteration number within the level (0-indexed).
    pub id: usize,

    /// Twist composed into the estimate at the start of this iteration.
    pub applied_increment: Twist,

    /// Whether the evaluation lowered the objective and was kept.
    pub accepted: bool,

    /// Number of residuals that could be evaluated.
    pub valid_constraints: usize,

    /// Negative data log-likelihood; the objective.
    pub data_log_likelihood: f64,

    /// `μ · ‖log(initial)‖²`.
    pub prior_log_likelihood: f64,

    /// Running residual mean after the weight update.
    pub mean: Vector2<f64>,

    /// Precision used for this iteration.
    pub precision: Matrix2<f64>,

    /// Increment solved from this iteration's normal equations
    /// (zero unless accepted).
    pub increment: Twist,

    /// Damped normal matrix `A + μI` (zero unless accepted).
    pub information: Matrix6<f64>,
}

impl IterationStats {
    pub fn new(id: usize, applied_increment: Twist) -> Self {
        Self {
            id,
            applied_increment,
            accepted: false,
            valid_constraints: 0,
            data_log_likelihood: 0.0,
            prior_log_likelihood: 0.0,
            mean: Vector2::zeros(),
            precision: Matrix2::zeros(),
            increment: Twist::zeros(),
            information: Matrix6::zeros(),
        }
    }

    /// Compact log line.
    pub fn to_log_line(&self) -> String {
        format!(
            "iter={} acc={} n={} nll={:.6} prior={:.6} |x|inf={:.3e}",
            self.id,
            self.accepted,
            self.valid_constraints,
            self.data_log_likelihood,
            self.prior_log_likelihood,
            self.increment.amax(),
        )
    }
}

/// Diagnostics of one pyramid level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelStats {
    /// Pyramid level index.
    pub id: usize,
    /// Pixel budget of the level.
    pub max_valid_pixels: usize,
    /// Reference points selected on the level.
    pub valid_pixels: usize,
    pub iterations: Vec<IterationStats>,
    pub termination: TerminationCriterion,
}

impl LevelStats {
    pub fn accepted_iterations(&self) -> impl Iterator<Item = &IterationStats> {
        self.iterations.iter().filter(|it| it.accepted)
    }

    pub fn last_accepted_iteration(&self) -> Option<&IterationStats> {
        self.iterations.iter().rev().find(|it| it.accepted)
    }
}

/// Complete diagnostics of one alignment, coarse to fine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub levels: Vec<LevelStats>,

    /// Phase timings (populated when the profiling feature is enabled).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<AlignmentTiming>,
}

impl Statistics {
    /// The last accepted iteration across all levels.
    pub fn last_accepted_iteration(&self) -> Option<&IterationStats> {
        self.levels
            .iter()
            .rev()
            .find_map(LevelStats::last_accepted_iteration)
    }

    pub fn total_iterations(&self) -> usize {
        self.levels.iter().map(|l| l.iterations.len()).sum()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Format as compact multi-line log.
    pub fn to_log(&self) -> String {
        let mut lines = vec![format!(
            "=== Dense alignment levels={} iters={} ===",
            self.levels.len(),
            self.total_iterations(),
        )];
        for level in &self.levels {
            lines.push(format!(
                "  level={} points={}/{} termination={}",
                level.id,
                level.valid_pixels,
                level.max_valid_pixels,
                level.termination.as_str(),
            ));
            for iteration in &level.iterations {
                lines.push(format!("    {}", iteration.to_log_line()));
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iteration(id: usize, accepted: bool) -> IterationStats {
        let mut it = IterationStats::new(id, Twist::zeros());
        it.accepted = accepted;
        it.data_log_likelihood = -(id as f64);
        it
    }

    fn level(id: usize, iterations: Vec<IterationStats>) -> LevelStats {
        LevelStats {
            id,
            max_valid_pixels: 100,
            valid_pixels: 80,
            iterations,
            termination: TerminationCriterion::ObjectiveIncreased,
        }
    }

    #[test]
    fn test_last_accepted_skips_rejected_tail() {
        let stats = Statistics {
            levels: vec![
                level(1, vec![iteration(0, true), iteration(1, true)]),
                level(0, vec![iteration(0, true), iteration(1, true), iteration(2, false)]),
            ],
            timing: None,
        };
        let last = stats.last_accepted_iteration().unwrap();
        assert_eq!(last.id, 1);
        assert_eq!(stats.total_iterations(), 5);
        assert_eq!(stats.levels[1].accepted_iterations().count(), 2);
    }

    #[test]
    fn test_last_accepted_falls_back_to_coarser_level() {
        let stats = Statistics {
            levels: vec![
                level(2, vec![iteration(0, true), iteration(4, true)]),
                level(1, vec![iteration(0, false)]),
                level(0, vec![]),
            ],
            timing: None,
        };
        assert_eq!(stats.last_accepted_iteration().unwrap().id, 4);
        assert!(Statistics::default().last_accepted_iteration().is_none());
    }

    #[test]
    fn test_to_json_and_log() {
        let stats = Statistics {
            levels: vec![level(3, vec![iteration(0, true)])],
            timing: None,
        };
        let json = stats.to_json().unwrap();
        assert!(json.contains("\"termination\":\"objective_increased\""));
        assert!(!json.contains("timing"));

        let log = stats.to_log();
        assert!(log.contains("level=3 points=80/100"));
        assert!(log.contains("iter=0 acc=true"));
    }
}
