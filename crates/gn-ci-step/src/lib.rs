//! GN CI step engine
//!
//! Every external command the recipe issues goes through this crate:
//! - `Steps`: named, nestable steps with a scoped execution context
//! - `StepRunner`: the seam between the recipe and the processes it spawns
//! - `ProcessRunner`: real child processes for production
//! - `MockRunner`: scripted runner that records invocations for tests
//! - `FailureKind`: infra / step / patch attribution of a failed step

pub mod context;
pub mod failure;
pub mod mock;
pub mod platform;
pub mod runner;
pub mod steps;

pub use context::Context;
pub use failure::{FailureKind, FailureReason, StepFailure};
pub use mock::MockRunner;
pub use platform::{Platform, PlatformError};
pub use runner::{IntoArg, ProcessRunner, Step, StepOutput, StepRunner};
pub use steps::{StepRecord, StepStatus, Steps};

/// Build an argv vector from heterogeneous arguments (strings and paths).
///
/// ```
/// use std::path::Path;
/// let argv = gn_ci_step::cmd!["git", "init", Path::new("/b/gn")];
/// assert_eq!(argv, vec!["git", "init", "/b/gn"]);
/// ```
#[macro_export]
macro_rules! cmd {
    ($($arg:expr),* $(,)?) => {
        vec![$($crate::IntoArg::into_arg($arg)),*]
    };
}
