//! The step engine
//!
//! `Steps` owns the runner, the current nesting and context, and the log of
//! every step issued during a run. Blocks are expressed as closures taking
//! `&mut Steps`, so nesting and context are restored when the block returns
//! or unwinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use crate::context::{Context, Effective};
use crate::failure::{FailureKind, FailureReason, StepFailure};
use crate::platform::Platform;
use crate::runner::{Step, StepOutput, StepRunner};

/// Separator between nesting levels in full step names
pub const NEST_SEPARATOR: &str = "|";

/// Outcome of a recorded step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed {
        kind: FailureKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        message: String,
    },
    /// A presentation-only step with no command
    Marker,
}

/// One entry of the step log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub argv: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cwd: Option<PathBuf>,
    pub infra: bool,
    pub started_at: DateTime<Utc>,
    #[serde(flatten)]
    pub status: StepStatus,
}

/// Step engine
pub struct Steps {
    runner: Box<dyn StepRunner>,
    platform: Platform,
    nest: Vec<String>,
    context: Effective,
    log: Vec<StepRecord>,
}

impl Steps {
    pub fn new(runner: Box<dyn StepRunner>, platform: Platform) -> Self {
        Self {
            runner,
            platform,
            nest: Vec::new(),
            context: Effective::default(),
            log: Vec::new(),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Every step issued so far, in order
    pub fn records(&self) -> &[StepRecord] {
        &self.log
    }

    pub fn into_records(self) -> Vec<StepRecord> {
        self.log
    }

    /// Full presentation name for a step issued at the current nesting
    pub fn full_name(&self, name: &str) -> String {
        if self.nest.is_empty() {
            name.to_string()
        } else {
            format!("{}{}{}", self.nest.join(NEST_SEPARATOR), NEST_SEPARATOR, name)
        }
    }

    /// Run `block` with its steps grouped under `name`
    pub fn nest<T, E>(
        &mut self,
        name: &str,
        block: impl FnOnce(&mut Self) -> Result<T, E>,
    ) -> Result<T, E> {
        let depth = self.nest.len();
        self.nest.push(name.to_string());
        let result = panic::catch_unwind(AssertUnwindSafe(|| block(&mut *self)));
        self.nest.truncate(depth);
        result.unwrap_or_else(|payload| panic::resume_unwind(payload))
    }

    /// Run `block` with `update` applied to the current context
    pub fn with_context<T, E>(
        &mut self,
        update: Context,
        block: impl FnOnce(&mut Self) -> Result<T, E>,
    ) -> Result<T, E> {
        let saved = self.context.clone();
        self.context = saved.apply(&update);
        let result = panic::catch_unwind(AssertUnwindSafe(|| block(&mut *self)));
        self.context = saved;
        result.unwrap_or_else(|payload| panic::resume_unwind(payload))
    }

    /// Shorthand for an infra context
    pub fn infra<T, E>(&mut self, block: impl FnOnce(&mut Self) -> Result<T, E>) -> Result<T, E> {
        self.with_context(Context::new().infra(true), block)
    }

    /// Run a command; non-zero exit is a failure
    pub fn step(&mut self, name: &str, argv: Vec<String>) -> Result<StepOutput, StepFailure> {
        self.execute(name, argv, None, false)
    }

    /// Run a command and capture its stdout
    pub fn step_capture(
        &mut self,
        name: &str,
        argv: Vec<String>,
    ) -> Result<StepOutput, StepFailure> {
        self.execute(name, argv, None, true)
    }

    /// Run a command with `input` on stdin
    pub fn step_stdin(
        &mut self,
        name: &str,
        argv: Vec<String>,
        input: String,
    ) -> Result<StepOutput, StepFailure> {
        self.execute(name, argv, Some(input), false)
    }

    /// Record a step with no command, used to surface a decision
    pub fn marker(&mut self, name: &str) {
        let full = self.full_name(name);
        tracing::info!(step = %full, "marker");
        self.log.push(StepRecord {
            name: full,
            argv: Vec::new(),
            cwd: None,
            infra: self.context.infra,
            started_at: Utc::now(),
            status: StepStatus::Marker,
        });
    }

    fn execute(
        &mut self,
        name: &str,
        argv: Vec<String>,
        stdin: Option<String>,
        capture_stdout: bool,
    ) -> Result<StepOutput, StepFailure> {
        let step = Step {
            name: self.full_name(name),
            argv,
            cwd: self.context.cwd.clone(),
            env: self.context.env.clone(),
            stdin,
            capture_stdout,
            infra: self.context.infra,
        };
        let started_at = Utc::now();
        tracing::info!(step = %step.name, infra = step.infra, cmd = %step.command_line(), "running step");

        let result = match self.runner.run(&step) {
            Ok(output) if output.is_success() => Ok(output),
            Ok(output) => Err(FailureReason::ExitStatus(output.exit_code)),
            Err(e) => Err(FailureReason::Spawn(e.to_string())),
        };

        let kind = self.context.failure_kind();
        let status = match result {
            Ok(_) => StepStatus::Success,
            Err(ref reason) => StepStatus::Failed {
                kind,
                exit_code: match reason {
                    FailureReason::ExitStatus(code) => *code,
                    FailureReason::Spawn(_) => None,
                },
                message: reason.to_string(),
            },
        };
        self.log.push(StepRecord {
            name: step.name.clone(),
            argv: step.argv,
            cwd: step.cwd,
            infra: step.infra,
            started_at,
            status,
        });

        result.map_err(|reason| {
            tracing::error!(step = %step.name, kind = ?kind, %reason, "step failed");
            StepFailure {
                step: step.name,
                kind,
                reason,
            }
        })
    }
}
