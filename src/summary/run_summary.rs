//! Run summary (run_summary.json)

use chrono::{DateTime, Utc};
use gn_ci_step::{FailureKind, Platform, StepRecord, StepStatus};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use super::exit_code::{ExitCode, Status};
use crate::build_input::{BuildInput, BuilderId};
use crate::config::ConfigSource;
use crate::pipeline::{BuiltPackage, PipelineOutcome, PublishDecision};

/// Schema version for run_summary.json
pub const RUN_SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for run_summary.json
pub const RUN_SUMMARY_SCHEMA_ID: &str = "gn-ci/run_summary@1";

/// Run summary (run_summary.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub schema_version: u32,
    pub schema_id: String,

    /// Run identifier (UUID v4)
    pub run_id: String,

    pub platform: Platform,
    pub builder: BuilderId,
    pub input: BuildInput,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Wall-clock duration of the run in milliseconds
    pub duration_ms: u64,

    pub status: Status,

    /// Attribution of the failure, absent on success and config errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,

    pub exit_code: i32,

    /// Error message of the failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Layers the configuration was assembled from
    pub config_sources: Vec<ConfigSource>,

    /// Every step issued, in order
    pub steps: Vec<StepRecord>,

    /// Configurations that built and passed their tests
    pub configurations: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<BuiltPackage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishDecision>,

    /// Human-readable summary
    pub human_summary: String,
}

/// What the run was about, independent of how it ended
#[derive(Debug, Clone)]
pub struct RunHeader {
    pub run_id: String,
    pub platform: Platform,
    pub builder: BuilderId,
    pub input: BuildInput,
    pub config_sources: Vec<ConfigSource>,
    pub started_at: DateTime<Utc>,
}

impl RunHeader {
    pub fn new(
        platform: Platform,
        builder: BuilderId,
        input: BuildInput,
        config_sources: Vec<ConfigSource>,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            platform,
            builder,
            input,
            config_sources,
            started_at: Utc::now(),
        }
    }
}

impl RunSummary {
    /// Summary of a run that reached the end of the pipeline
    pub fn success(header: RunHeader, steps: Vec<StepRecord>, outcome: PipelineOutcome) -> Self {
        let human_summary = Self::success_summary(&outcome);
        Self::build(
            header,
            steps,
            Status::Success,
            None,
            ExitCode::Success,
            None,
            outcome,
            human_summary,
        )
    }

    /// Summary of a run that stopped on an error
    pub fn failure(
        header: RunHeader,
        steps: Vec<StepRecord>,
        failure_kind: Option<FailureKind>,
        exit_code: ExitCode,
        error: String,
    ) -> Self {
        let configurations = completed_configurations(&steps);
        let human_summary = match failure_kind {
            Some(kind) => format!("FAILED ({}): {}", kind.description(), error),
            None => format!("FAILED: {}", error),
        };
        let outcome = PipelineOutcome {
            configurations,
            package: None,
            publish: None,
        };
        Self::build(
            header,
            steps,
            Status::Failed,
            failure_kind,
            exit_code,
            Some(error),
            outcome,
            human_summary,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        header: RunHeader,
        steps: Vec<StepRecord>,
        status: Status,
        failure_kind: Option<FailureKind>,
        exit_code: ExitCode,
        error: Option<String>,
        outcome: PipelineOutcome,
        human_summary: String,
    ) -> Self {
        let finished_at = Utc::now();
        let duration_ms = (finished_at - header.started_at).num_milliseconds().max(0) as u64;

        Self {
            schema_version: RUN_SUMMARY_SCHEMA_VERSION,
            schema_id: RUN_SUMMARY_SCHEMA_ID.to_string(),
            run_id: header.run_id,
            platform: header.platform,
            builder: header.builder,
            input: header.input,
            started_at: header.started_at,
            finished_at,
            duration_ms,
            status,
            failure_kind,
            exit_code: exit_code.as_i32(),
            error,
            config_sources: header.config_sources,
            steps,
            configurations: outcome.configurations,
            package: outcome.package,
            publish: outcome.publish,
            human_summary,
        }
    }

    fn success_summary(outcome: &PipelineOutcome) -> String {
        let built = format!(
            "Built and tested {} configuration{}",
            outcome.configurations.len(),
            if outcome.configurations.len() == 1 { "" } else { "s" }
        );
        match (&outcome.package, &outcome.publish) {
            (None, _) => format!("{}; patched run, not packaged", built),
            (Some(_), None) => format!("{}; packaged, not published", built),
            (Some(_), Some(PublishDecision::UpToDate { instance_id })) => {
                format!("{}; package is up-to-date ({})", built, instance_id)
            }
            (Some(_), Some(PublishDecision::Register { revision })) => {
                format!("{}; registered package at {}", built, revision)
            }
        }
    }

    /// Number of steps that failed
    pub fn failed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|record| matches!(record.status, StepStatus::Failed { .. }))
            .count()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        fs::write(path, json)
    }
}

/// Configurations whose `test` step succeeded, read back from the step log
fn completed_configurations(steps: &[StepRecord]) -> Vec<String> {
    steps
        .iter()
        .filter(|record| matches!(record.status, StepStatus::Success))
        .filter_map(|record| record.name.strip_suffix("|test"))
        .filter(|config| !config.contains('|'))
        .map(str::to_string)
        .collect()
}
