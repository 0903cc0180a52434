//! gn-ci recipe
//!
//! Continuous-integration recipe for GN: checks out the source tree,
//! applies pending code-review patches, installs pinned tools through
//! CIPD, builds and tests every configuration, and on trusted runs
//! packages and publishes the release binary keyed by source revision.
//!
//! Commands run through [`gn_ci_step::Steps`], so the whole recipe can be
//! driven against a [`gn_ci_step::MockRunner`].

pub mod build_input;
pub mod checkout;
pub mod cipd;
pub mod config;
pub mod environment;
pub mod error;
pub mod macos_sdk;
pub mod pipeline;
pub mod summary;

pub use build_input::{BuildDocument, BuildInput, BuilderId, GerritChange, GitilesCommit};
pub use config::{ConfigOverrides, LoadedConfig, RecipeConfig};
pub use error::RecipeError;
pub use macos_sdk::{DeveloperDirSwitch, MacosSdk, SdkKind, SdkSpec, XcodeSelect};
pub use pipeline::{Pipeline, PipelineOutcome, PipelinePaths, Plan, PublishDecision};
pub use summary::{ExitCode, RunHeader, RunSummary, Status};
