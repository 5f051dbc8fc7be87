//! Coarse-to-fine dense tracker.

use nalgebra::Isometry3;
use tracing::{debug, warn};

use super::level::{LevelSolver, PoseState};
use super::stats::Statistics;
use super::types::{AlignmentResult, Config};
use super::workspace::AlignmentWorkspace;
use crate::error::AlignError;
use crate::image::{FramePyramid, FrameSampler, RgbdPyramid};
use crate::selection::{PointSelection, PointSource, SelectionPredicate};
use crate::timing::TimingCollector;
use crate::weighting::WeightCalculation;

/// Dense RGB-D frame-to-frame tracker.
///
/// Holds the configuration and scratch buffers; one instance runs one
/// alignment at a time.
#[derive(Debug)]
pub struct DenseTracker {
    config: Config,
    weighting: WeightCalculation,
    predicate: SelectionPredicate,
    workspace: AlignmentWorkspace,
}

impl DenseTracker {
    /// Create a tracker.
    ///
    /// # Panics
    /// If `config` fails [`Config::validate`].
    pub fn new(config: Config) -> Self {
        if let Err(e) = config.validate() {
            panic!("invalid tracker configuration: {e}");
        }
        Self {
            weighting: config.weight_calculation(),
            predicate: config.selection_predicate(),
            workspace: AlignmentWorkspace::default(),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    /// Replace the configuration.
    ///
    /// # Panics
    /// If `config` fails [`Config::validate`].
    pub fn configure(&mut self, config: Config) {
        *self = Self {
            workspace: std::mem::take(&mut self.workspace),
            ..Self::new(config)
        };
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn weight_calculation(&self) -> &WeightCalculation {
        &self.weighting
    }

    /// Point selection over `pyramid` using the configured derivative
    /// thresholds.
    pub fn selection(&self, pyramid: RgbdPyramid) -> PointSelection {
        PointSelection::new(pyramid, self.predicate)
    }

    /// Align `current` to the reference points of `reference`.
    ///
    /// `guess` is the pose of the current camera in the reference frame and
    /// is only used when `use_initial_estimate` is set. Levels run from
    /// `first_level` down to `last_level`.
    pub fn align<S, P>(
        &mut self,
        reference: &mut S,
        current: &mut P,
        guess: &Isometry3<f64>,
    ) -> Result<AlignmentResult, AlignError>
    where
        S: PointSource + ?Sized,
        P: FramePyramid + ?Sized,
    {
        let config = &self.config;
        let num_levels = config.num_levels();

        reference.prepare(num_levels)?;
        current.compute(num_levels)?;
        self.workspace
            .reserve(reference.maximum_number_of_points(config.last_level));

        let guess_warp = if config.use_initial_estimate {
            guess.inverse()
        } else {
            Isometry3::identity()
        };
        let mut state = PoseState::new(guess_warp);

        let mut timing = TimingCollector::new();
        timing.start_alignment();

        let mut levels = Vec::with_capacity(config.first_level - config.last_level + 1);
        for level in (config.last_level..=config.first_level).rev() {
            let frame = current.level(level);
            let max_valid_pixels = reference.maximum_number_of_points(level);
            let points = reference.select(level, frame.intrinsics());

            let stats = LevelSolver {
                config,
                weighting: &self.weighting,
                workspace: &mut self.workspace,
                timing: &mut timing,
            }
            .run(level, points, frame, max_valid_pixels, &mut state)?;

            debug!(
                level,
                points = stats.valid_pixels,
                iterations = stats.iterations.len(),
                termination = stats.termination.as_str(),
                "level finished"
            );
            levels.push(stats);
        }

        let statistics = Statistics {
            levels,
            timing: timing.finish(),
        };

        let (information, log_likelihood) = match statistics.last_accepted_iteration() {
            Some(last) => {
                let v = config.information_noise_variance;
                (
                    last.information * v * v,
                    last.data_log_likelihood + last.prior_log_likelihood,
                )
            }
            None => {
                warn!("no iteration accepted on any level");
                return Err(AlignError::NoAcceptedIteration);
            }
        };

        Ok(AlignmentResult {
            transformation: state.estimate().inverse(),
            information,
            log_likelihood,
            statistics,
        })
    }

    /// Select reference points from `reference` and align `current` to them.
    pub fn align_images(
        &mut self,
        reference: RgbdPyramid,
        current: &mut RgbdPyramid,
        guess: &Isometry3<f64>,
    ) -> Result<AlignmentResult, AlignError> {
        let mut selection = self.selection(reference);
        self.align(&mut selection, current, guess)
    }

    /// Like [`align`](Self::align) but only returns the transformation.
    pub fn match_transform<S, P>(
        &mut self,
        reference: &mut S,
        current: &mut P,
        guess: &Isometry3<f64>,
    ) -> Result<Isometry3<f64>, AlignError>
    where
        S: PointSource + ?Sized,
        P: FramePyramid + ?Sized,
    {
        self.align(reference, current, guess)
            .map(|result| result.transformation)
    }
}
