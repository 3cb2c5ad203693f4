//! Command description and runner trait

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

/// Default timeout for a single external command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// One external program invocation
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program to run (absolute path or a name resolved through PATH)
    pub program: PathBuf,
    /// Arguments, passed through without a shell
    pub args: Vec<OsString>,
    /// Working directory, inherited when unset
    pub working_dir: Option<PathBuf>,
    /// Log each output line while the program runs
    pub stream_output: bool,
    /// Kill the program after this long
    pub timeout: Duration,
}

impl CommandSpec {
    /// Create a spec for `program` with no arguments
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            stream_output: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Set the working directory
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the working directory if one is given
    pub fn current_dir_opt(mut self, dir: Option<&Path>) -> Self {
        self.working_dir = dir.map(Path::to_path_buf);
        self
    }

    /// Set whether output lines are logged as they arrive
    pub fn stream_output(mut self, stream: bool) -> Self {
        self.stream_output = stream;
        self
    }

    /// Set the timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Short name for log lines: the program's file name
    pub fn label(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    /// Arguments as display strings
    pub fn args_lossy(&self) -> Vec<String> {
        self.args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }
}

/// Outcome of running an external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exit status zero
    Success,
    /// Non-zero exit, spawn failure or timeout, with a description
    Failure(String),
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Success)
    }

    /// Convert into a result, mapping the failure reason with `on_failure`
    pub fn into_result<E>(self, on_failure: impl FnOnce(String) -> E) -> std::result::Result<(), E> {
        match self {
            ExitOutcome::Success => Ok(()),
            ExitOutcome::Failure(reason) => Err(on_failure(reason)),
        }
    }
}

/// Trait for executing external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion
    async fn run(&self, spec: &CommandSpec) -> ExitOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_defaults() {
        let spec = CommandSpec::new("bzip2");
        assert!(spec.args.is_empty());
        assert!(spec.working_dir.is_none());
        assert!(!spec.stream_output);
        assert_eq!(spec.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_command_spec_builder() {
        let spec = CommandSpec::new("/opt/bin/bzip2")
            .args(["-z9", "-k"])
            .arg("/maps/fy_test_dev1.bsp")
            .current_dir("/opt/bin")
            .stream_output(true)
            .timeout(Duration::from_secs(5));

        assert_eq!(spec.args_lossy(), vec!["-z9", "-k", "/maps/fy_test_dev1.bsp"]);
        assert_eq!(spec.working_dir, Some(PathBuf::from("/opt/bin")));
        assert!(spec.stream_output);
        assert_eq!(spec.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_command_spec_label() {
        assert_eq!(CommandSpec::new("/opt/bin/pscp").label(), "pscp");
        assert_eq!(CommandSpec::new("plink").label(), "plink");
    }

    #[test]
    fn test_current_dir_opt() {
        let spec = CommandSpec::new("x").current_dir_opt(None);
        assert!(spec.working_dir.is_none());
        let spec = CommandSpec::new("x").current_dir_opt(Some(Path::new("/bin")));
        assert_eq!(spec.working_dir, Some(PathBuf::from("/bin")));
    }

    #[test]
    fn test_exit_outcome_into_result() {
        assert!(ExitOutcome::Success.into_result(|r| r).is_ok());
        let err = ExitOutcome::Failure("exit code 1".to_string())
            .into_result(|r| format!("compress: {}", r))
            .unwrap_err();
        assert_eq!(err, "compress: exit code 1");
    }
}
