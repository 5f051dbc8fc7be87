//! Iteratively reweighted Gauss-Newton on one pyramid level.
//!
//! Each iteration:
//! 1. Compose the pending increment into the estimate (transactionally)
//! 2. Evaluate residuals of the reference points against the current frame
//! 3. Update robust weights, residual mean and precision
//! 4. Accept iff the negative log-likelihood strictly decreased, otherwise
//!    roll back and stop
//! 5. Build and solve the damped normal equations for the next increment

use nalgebra::{Isometry3, Matrix2, Vector2};
use tracing::{debug, warn};

use super::context::IterationContext;
use super::normal_equations::NormalEquations;
use super::stats::{IterationStats, LevelStats};
use super::types::{Config, TerminationCriterion};
use super::workspace::AlignmentWorkspace;
use crate::error::AlignError;
use crate::geometry::{exp, log, Twist};
use crate::image::FrameSampler;
use crate::kernels::{compute_log_likelihood, compute_residuals, compute_scale, compute_weights};
use crate::revertable::Revertable;
use crate::selection::ReferencePoint;
use crate::time_phase;
use crate::timing::TimingCollector;
use crate::weighting::{ScaleEstimator, WeightCalculation};

/// Pose hypotheses carried through all levels of one alignment.
///
/// `estimate` is the cumulative warp from reference to current camera.
/// `initial` is the remaining offset to the initial guess, so that
/// `log(initial)` is the prior residual. `increment` is the step to be
/// composed at the next evaluation.
#[derive(Debug, Clone)]
pub struct PoseState {
    initial: Revertable<Isometry3<f64>>,
    estimate: Revertable<Isometry3<f64>>,
    pub increment: Twist,
}

impl PoseState {
    /// Start from the warp `guess_warp`; it is applied by the first
    /// evaluation.
    pub fn new(guess_warp: Isometry3<f64>) -> Self {
        Self {
            initial: Revertable::new(guess_warp),
            estimate: Revertable::new(Isometry3::identity()),
            increment: log(&guess_warp),
        }
    }

    pub fn estimate(&self) -> &Isometry3<f64> {
        self.estimate.current()
    }

    pub fn initial(&self) -> &Isometry3<f64> {
        self.initial.current()
    }

    /// Compose the pending increment into both transforms.
    pub fn apply(&mut self) {
        let inc = exp(&self.increment);
        let initial = inc.inverse() * self.initial.current();
        let estimate = inc * self.estimate.current();
        *self.initial.update() = initial;
        *self.estimate.update() = estimate;
    }

    /// Undo the last [`apply`](Self::apply).
    pub fn revert(&mut self) {
        self.initial.revert();
        self.estimate.revert();
    }
}

/// Runs the iteration loop of a single level.
pub struct LevelSolver<'a> {
    pub config: &'a Config,
    pub weighting: &'a WeightCalculation,
    pub workspace: &'a mut AlignmentWorkspace,
    pub timing: &'a mut TimingCollector,
}

impl LevelSolver<'_> {
    /// Optimize `state` against `frame` using `points` selected on `level`.
    ///
    /// Returns the level's statistics, or an error when the damped system
    /// cannot be solved.
    pub fn run<F>(
        &mut self,
        level: usize,
        points: &[ReferencePoint],
        frame: &F,
        max_valid_pixels: usize,
        state: &mut PoseState,
    ) -> Result<LevelStats, AlignError>
    where
        F: FrameSampler + ?Sized,
    {
        let config = self.config;
        let weighting = self.weighting;

        let mut stats = LevelStats {
            id: level,
            max_valid_pixels,
            valid_pixels: points.len(),
            iterations: Vec::new(),
            termination: TerminationCriterion::IterationsExceeded,
        };

        if points.len() < config.min_valid_points {
            warn!(level, points = points.len(), "too few reference points, skipping level");
            stats.termination = TerminationCriterion::InsufficientPoints;
            return Ok(stats);
        }

        let mut context = IterationContext::default();
        context.reset(level);
        let mut mean = Vector2::zeros();
        let mut precision = Matrix2::identity();

        let AlignmentWorkspace { errors, weights } = &mut *self.workspace;

        loop {
            self.timing.start_iteration(level, context.iteration);
            let mut iteration = IterationStats::new(context.iteration, state.increment);
            state.apply();

            let n = time_phase!(self.timing, "residuals", {
                compute_residuals(
                    points,
                    frame,
                    state.estimate(),
                    &config.channel_weights,
                    errors,
                )
            });
            iteration.valid_constraints = n;

            if n < config.min_valid_points {
                warn!(
                    level,
                    iteration = context.iteration,
                    valid = n,
                    "too few valid residuals"
                );
                state.revert();
                stats.iterations.push(iteration);
                stats.termination = TerminationCriterion::InsufficientPoints;
                self.timing.end_iteration();
                break;
            }

            time_phase!(self.timing, "weights", {
                if context.is_first_iteration_on_level() {
                    weights.clear();
                    weights.resize(n, 1.0);
                } else {
                    compute_weights(
                        errors,
                        weights,
                        &mut mean,
                        &precision,
                        &weighting.influence_function,
                        weighting.estimate_mean,
                    );
                }

                precision = match weighting.scale_estimator {
                    ScaleEstimator::Unit => Matrix2::identity(),
                    estimator => estimator.precision(&compute_scale(errors, weights, &mean)),
                };
            });

            let objective =
                -compute_log_likelihood(errors, &mean, &precision, &weighting.influence_function);
            let prior = log(state.initial());

            iteration.data_log_likelihood = objective;
            iteration.prior_log_likelihood = config.mu * prior.norm_squared();
            iteration.mean = mean;
            iteration.precision = precision;

            context.record_error(objective);
            let accepted = context.improved();
            let mut increment_small = false;

            if accepted {
                let equations = time_phase!(self.timing, "normal_equations", {
                    NormalEquations::accumulate(errors, weights, &precision)
                });
                let step = time_phase!(self.timing, "solver", {
                    equations.solve_damped(config.mu, &prior)
                });
                let Some(step) = step else {
                    warn!(
                        level,
                        iteration = context.iteration,
                        "damped normal equations are singular"
                    );
                    return Err(AlignError::SingularSystem {
                        level,
                        iteration: context.iteration,
                    });
                };

                iteration.accepted = true;
                iteration.increment = step.increment;
                iteration.information = step.hessian;
                state.increment = step.increment;
                increment_small = step.increment.amax() <= config.precision;

                debug!(
                    level,
                    iteration = context.iteration,
                    valid = n,
                    objective,
                    increment = step.increment.amax(),
                    "step accepted"
                );
                context.iteration += 1;
            } else {
                debug!(
                    level,
                    iteration = context.iteration,
                    objective,
                    previous = context.last_error,
                    "step rejected"
                );
                state.revert();
            }

            stats.iterations.push(iteration);
            self.timing.end_iteration();

            if let Some(termination) = TerminationCriterion::decide(
                accepted,
                context.iterations_exceeded(config.max_iterations_per_level),
                increment_small,
            ) {
                stats.termination = termination;
                break;
            }
        }

        Ok(stats)
    }
}
