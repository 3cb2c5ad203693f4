//! Subprocess-backed command runner

use std::collections::VecDeque;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use super::spec::{CommandRunner, CommandSpec, ExitOutcome};

/// Number of trailing stderr lines kept for failure messages
const STDERR_TAIL_LINES: usize = 20;

/// Runs commands as child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> ExitOutcome {
        let label = spec.label();
        log::debug!("Running {} {:?}", spec.program.display(), spec.args_lossy());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ExitOutcome::Failure(format!("failed to spawn {}: {}", label, e)),
        };

        let stdout = tokio::spawn(drain_lines(child.stdout.take(), label.clone(), spec.stream_output));
        let stderr = tokio::spawn(drain_lines(child.stderr.take(), label.clone(), spec.stream_output));

        let status = match tokio::time::timeout(spec.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return ExitOutcome::Failure(format!("failed waiting on {}: {}", label, e)),
            Err(_) => {
                // Timeout - try to kill the process
                let _ = child.kill().await;
                return ExitOutcome::Failure(format!(
                    "{} timed out after {}ms",
                    label,
                    spec.timeout.as_millis()
                ));
            }
        };

        let _ = stdout.await;
        let stderr_tail = stderr.await.unwrap_or_default();

        if status.success() {
            return ExitOutcome::Success;
        }

        let mut reason = match status.code() {
            Some(code) => format!("{} exited with code {}", label, code),
            None => format!("{} was terminated by a signal", label),
        };
        if !stderr_tail.is_empty() {
            reason.push_str(&format!("; stderr: {}", stderr_tail));
        }
        ExitOutcome::Failure(reason)
    }
}

/// Read a child pipe to the end, optionally logging every line, and return
/// the last few lines joined.
async fn drain_lines<R>(reader: Option<R>, label: String, stream: bool) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };

    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if stream {
            log::info!("[{}] {}", label, line);
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    tail.into_iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}
