//! Step runners
//!
//! `StepRunner` is the only place the recipe touches the outside world.
//! `ProcessRunner` spawns real processes; tests use `MockRunner`.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A fully resolved command, as handed to a runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Full nested presentation name, e.g. `debug|build|generate`
    pub name: String,
    /// Program followed by its arguments
    pub argv: Vec<String>,
    /// Working directory (inherits the runner's when `None`)
    pub cwd: Option<PathBuf>,
    /// Environment overrides layered on top of the inherited environment
    pub env: BTreeMap<String, String>,
    /// Data written to the child's stdin
    pub stdin: Option<String>,
    /// Whether stdout is captured instead of passed through
    pub capture_stdout: bool,
    /// Whether the step ran in an infra context
    pub infra: bool,
}

impl Step {
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    /// Shell-like rendering for logs
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// Result of running a command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    /// Exit code; `None` if the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Captured stdout (empty unless requested)
    pub stdout: String,
}

impl StepOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
        }
    }

    pub fn failed(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            stdout: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes steps
pub trait StepRunner {
    /// Run a step to completion. An `Err` means the command could not be
    /// started; a non-zero exit is reported through `StepOutput`.
    fn run(&self, step: &Step) -> io::Result<StepOutput>;
}

/// Runner backed by real child processes
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl StepRunner for ProcessRunner {
    fn run(&self, step: &Step) -> io::Result<StepOutput> {
        let (program, args) = step
            .argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        let mut command = Command::new(program);
        command.args(args).envs(&step.env);
        if let Some(ref cwd) = step.cwd {
            command.current_dir(cwd);
        }
        command.stdin(if step.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        if step.capture_stdout {
            command.stdout(Stdio::piped());
        }

        let mut child = command.spawn()?;

        if let Some(ref input) = step.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes())?;
                // Dropping stdin closes the pipe so the child sees EOF
            }
        }

        let output = child.wait_with_output()?;
        Ok(StepOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

/// Conversion of command arguments to owned strings
pub trait IntoArg {
    fn into_arg(self) -> String;
}

impl IntoArg for &str {
    fn into_arg(self) -> String {
        self.to_string()
    }
}

impl IntoArg for String {
    fn into_arg(self) -> String {
        self
    }
}

impl IntoArg for &String {
    fn into_arg(self) -> String {
        self.clone()
    }
}

impl IntoArg for &Path {
    fn into_arg(self) -> String {
        self.to_string_lossy().into_owned()
    }
}

impl IntoArg for PathBuf {
    fn into_arg(self) -> String {
        self.to_string_lossy().into_owned()
    }
}

impl IntoArg for &PathBuf {
    fn into_arg(self) -> String {
        self.to_string_lossy().into_owned()
    }
}
