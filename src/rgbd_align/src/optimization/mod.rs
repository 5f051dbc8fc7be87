//! Coarse-to-fine robust Gauss-Newton alignment.
//!
//! For each pyramid level, from coarse to fine:
//! 1. Warp the reference points with the current estimate
//! 2. Re-weight residuals under a heavy-tailed noise model (IRLS)
//! 3. Accept or roll back the step based on the negative log-likelihood
//! 4. Solve the damped normal equations `(A + μI) x = b + μ·log(initial)`
//!
//! Pose increments are composed on the left on SE(3).

pub mod context;
pub mod level;
pub mod normal_equations;
pub mod stats;
pub mod tracker;
pub mod types;
pub mod workspace;

pub use context::IterationContext;
pub use level::{LevelSolver, PoseState};
pub use normal_equations::{DampedStep, NormalEquations};
pub use stats::{IterationStats, LevelStats, Statistics};
pub use tracker::DenseTracker;
pub use types::{AlignmentResult, Config, ConfigError, TerminationCriterion};
pub use workspace::AlignmentWorkspace;
