//! Scripted command runner for tests

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::spec::{CommandRunner, CommandSpec, ExitOutcome};

/// A command the mock runner was asked to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    /// Program label (file name of the program)
    pub program: String,
    /// Arguments as strings
    pub args: Vec<String>,
}

/// Command runner that records invocations and returns scripted outcomes.
///
/// Outcomes are keyed by program label; unscripted programs succeed.
#[derive(Debug, Default)]
pub struct MockCommandRunner {
    outcomes: Mutex<HashMap<String, ExitOutcome>>,
    calls: Mutex<Vec<RecordedCommand>>,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every run of `program` fail with `reason`
    pub fn fail(self, program: impl Into<String>, reason: impl Into<String>) -> Self {
        self.set_outcome(program, ExitOutcome::Failure(reason.into()));
        self
    }

    /// Set the outcome for `program`
    pub fn set_outcome(&self, program: impl Into<String>, outcome: ExitOutcome) {
        let mut outcomes = self.outcomes.lock().unwrap_or_else(|e| e.into_inner());
        outcomes.insert(program.into(), outcome);
    }

    /// All recorded invocations in order
    pub fn calls(&self) -> Vec<RecordedCommand> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Labels of the programs invoked, in order
    pub fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.program).collect()
    }

    /// Whether `program` was invoked at least once
    pub fn was_called(&self, program: &str) -> bool {
        self.calls().iter().any(|c| c.program == program)
    }
}

#[async_trait]
impl CommandRunner for MockCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> ExitOutcome {
        let program = spec.label();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCommand {
                program: program.clone(),
                args: spec.args_lossy(),
            });

        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&program)
            .cloned()
            .unwrap_or(ExitOutcome::Success)
    }
}
