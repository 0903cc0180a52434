//! Top-level recipe error

use std::io;

use gn_ci_step::{FailureKind, PlatformError, StepFailure};

use crate::build_input::BuildInputError;
use crate::cipd::{CipdError, PackageError};
use crate::config::ConfigError;
use crate::summary::ExitCode;

#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    #[error(transparent)]
    Step(#[from] StepFailure),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("build input error: {0}")]
    BuildInput(#[from] BuildInputError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("package error: {0}")]
    Package(#[from] PackageError),

    #[error("'git rev-parse HEAD' returned '{0}', expected a 40 character hex commit id")]
    InvalidRevision(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CipdError> for RecipeError {
    fn from(err: CipdError) -> Self {
        match err {
            CipdError::Step(failure) => RecipeError::Step(failure),
            CipdError::Package(e) => RecipeError::Package(e),
        }
    }
}

impl RecipeError {
    /// Failure attribution, for summaries
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            RecipeError::Step(failure) => Some(failure.kind),
            RecipeError::Package(_)
            | RecipeError::InvalidRevision(_)
            | RecipeError::Io(_)
            | RecipeError::Serialization(_) => Some(FailureKind::Infra),
            RecipeError::Config(_) | RecipeError::BuildInput(_) | RecipeError::Platform(_) => None,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self.failure_kind() {
            Some(kind) => ExitCode::from(kind),
            None => ExitCode::Config,
        }
    }
}
