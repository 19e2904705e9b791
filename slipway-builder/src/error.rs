//! Build error type

use slipway_core::{RecipeError, StageError};
use thiserror::Error;

/// Errors returned by a build
#[derive(Debug, Error)]
pub enum BuildError {
    /// The recipe failed validation; nothing was provisioned
    #[error(transparent)]
    Recipe(#[from] RecipeError),

    /// A stage failed; the pipeline is in `Failed`
    #[error(transparent)]
    Stage(#[from] StageError),
}

impl BuildError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::Recipe(_) => 1,
            BuildError::Stage(e) => e.exit_code(),
        }
    }
}
