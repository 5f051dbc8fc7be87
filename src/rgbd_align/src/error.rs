//! Alignment errors.

use thiserror::Error;

/// Failure of a single alignment call.
#[derive(Debug, Error)]
pub enum AlignError {
    /// The damped normal equations could not be solved.
    #[error("normal equations are singular at level {level}, iteration {iteration}")]
    SingularSystem { level: usize, iteration: usize },

    /// No level produced an accepted iteration, so there is no estimate to report.
    #[error("no iteration was accepted on any pyramid level")]
    NoAcceptedIteration,

    /// Building a pyramid or point selection failed.
    #[error(transparent)]
    Input(#[from] anyhow::Error),
}
