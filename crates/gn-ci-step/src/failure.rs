//! Failure attribution for steps
//!
//! A failed step is attributed to one of three causes. The attribution is
//! decided by the context the step ran in, not by the command itself.

use serde::{Deserialize, Serialize};

/// What a step failure is attributed to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The code under test failed to generate, build, or pass its tests
    #[default]
    Step,
    /// Tooling or environment problem outside the change's control
    Infra,
    /// A code-review patch could not be fetched or applied
    Patch,
}

impl FailureKind {
    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::Step => "build or test step failed",
            FailureKind::Infra => "infrastructure failure",
            FailureKind::Patch => "patch could not be applied",
        }
    }
}

/// Why a step failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The command ran and exited non-zero (`None` when killed by a signal)
    ExitStatus(Option<i32>),
    /// The command could not be started at all
    Spawn(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::ExitStatus(Some(code)) => write!(f, "exited with code {}", code),
            FailureReason::ExitStatus(None) => write!(f, "terminated by signal"),
            FailureReason::Spawn(msg) => write!(f, "failed to start: {}", msg),
        }
    }
}

/// A failed step, carrying its full presentation name and attribution
#[derive(Debug, Clone, thiserror::Error)]
#[error("step '{step}' {reason} ({})", kind.description())]
pub struct StepFailure {
    /// Full nested step name, e.g. `release|build|ninja`
    pub step: String,
    /// Failure attribution
    pub kind: FailureKind,
    /// Cause
    pub reason: FailureReason,
}

impl StepFailure {
    pub fn is_infra(&self) -> bool {
        self.kind == FailureKind::Infra
    }
}
