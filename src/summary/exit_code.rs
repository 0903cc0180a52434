//! Run status and stable process exit codes

use gn_ci_step::FailureKind;
use serde::{Deserialize, Serialize};

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Built and tested; published or intentionally not published
    Success,
    /// Some step exited non-zero, or the run could not start
    Failed,
}

/// Stable exit codes of the `gn-ci` binary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    #[default]
    Success = 0,
    /// Generate, build, or test failed
    StepFailed = 1,
    /// Tooling or environment failure
    InfraFailure = 2,
    /// A code-review patch could not be fetched or applied
    PatchFailure = 3,
    /// Bad configuration or build input
    Config = 4,
}

impl ExitCode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Success),
            1 => Some(ExitCode::StepFailed),
            2 => Some(ExitCode::InfraFailure),
            3 => Some(ExitCode::PatchFailure),
            4 => Some(ExitCode::Config),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }
}

impl From<FailureKind> for ExitCode {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Step => ExitCode::StepFailed,
            FailureKind::Infra => ExitCode::InfraFailure,
            FailureKind::Patch => ExitCode::PatchFailure,
        }
    }
}
