//! Mock runner
//!
//! Records every step it receives and answers with scripted outputs keyed
//! by full step name. Unscripted steps succeed with empty stdout. Clones
//! share state, so a test can keep a handle while `Steps` owns the runner.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use crate::runner::{Step, StepOutput, StepRunner};

#[derive(Debug, Clone)]
enum Response {
    Output(StepOutput),
    SpawnError,
}

#[derive(Debug, Default)]
struct MockState {
    executed: Vec<Step>,
    responses: HashMap<String, Response>,
}

/// Scriptable runner for tests
#[derive(Debug, Clone, Default)]
pub struct MockRunner {
    state: Arc<Mutex<MockState>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Succeed with `stdout` for the step named `name`
    pub fn with_stdout(self, name: &str, stdout: &str) -> Self {
        self.respond(name, Response::Output(StepOutput::success(stdout)))
    }

    /// Exit with `code` for the step named `name`
    pub fn with_exit_code(self, name: &str, code: i32) -> Self {
        self.respond(name, Response::Output(StepOutput::failed(code)))
    }

    /// Fail to start the step named `name`
    pub fn with_spawn_error(self, name: &str) -> Self {
        self.respond(name, Response::SpawnError)
    }

    fn respond(self, name: &str, response: Response) -> Self {
        self.lock().responses.insert(name.to_string(), response);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A panicking test must not poison the handle other assertions use
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Steps received so far, in order
    pub fn executed(&self) -> Vec<Step> {
        self.lock().executed.clone()
    }

    /// Full names of steps received so far, in order
    pub fn names(&self) -> Vec<String> {
        self.lock().executed.iter().map(|s| s.name.clone()).collect()
    }

    /// Whether a step with this exact name ran
    pub fn ran(&self, name: &str) -> bool {
        self.lock().executed.iter().any(|s| s.name == name)
    }

    /// Number of steps whose name ends with `suffix`
    pub fn count_ending_with(&self, suffix: &str) -> usize {
        self.lock()
            .executed
            .iter()
            .filter(|s| s.name.ends_with(suffix))
            .count()
    }

    /// The step with this exact name, if it ran
    pub fn find(&self, name: &str) -> Option<Step> {
        self.lock().executed.iter().find(|s| s.name == name).cloned()
    }
}

impl StepRunner for MockRunner {
    fn run(&self, step: &Step) -> io::Result<StepOutput> {
        let mut state = self.lock();
        state.executed.push(step.clone());
        match state.responses.get(&step.name) {
            Some(Response::Output(output)) => Ok(output.clone()),
            Some(Response::SpawnError) => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("mock: cannot start '{}'", step.command_line()),
            )),
            None => Ok(StepOutput::success("")),
        }
    }
}
