//! Watch daemon - wires configuration into the running pipeline
//!
//! Startup order:
//! - Resolve the external toolchain and fail fast if any tool is missing
//! - Build the pipeline controller and its serial queue
//! - Watch the map directory until the shutdown signal arrives
//! - Drain the queue, or abandon it on a second signal

use std::future::Future;
use std::sync::Arc;

use colored::*;

use crate::config::Config;
use crate::error::Result;
use crate::executor::{CommandRunner, ProcessRunner};
use crate::pipeline::{PipelineController, PipelineReport, PipelineSettings};
use crate::queue::TaskQueue;
use crate::rcon::{RconConsole, RemoteConsole};
use crate::toolchain::{Toolchain, check_dependencies};
use crate::tracked::TrackedSet;
use crate::watcher::WatchDispatcher;

/// A configured, not yet running watch daemon
pub struct Daemon {
    config: Config,
    toolchain: Toolchain,
    tracked: TrackedSet,
}

impl Daemon {
    /// Prepare a daemon; missing external tools are fatal here
    pub fn new(config: Config) -> Result<Self> {
        let toolchain = Toolchain::from_config(&config.tools);
        check_dependencies(&config, &toolchain)?;
        let tracked = TrackedSet::new(config.tracked_map_names());
        Ok(Self {
            config,
            toolchain,
            tracked,
        })
    }

    pub fn tracked(&self) -> &TrackedSet {
        &self.tracked
    }

    /// Build the controller with the given runner and console
    pub fn controller(&self, runner: Arc<dyn CommandRunner>, console: Arc<dyn RemoteConsole>) -> PipelineController {
        let settings = PipelineSettings::from_config(&self.config, self.toolchain.clone());
        PipelineController::new(settings, runner, console, self.tracked.version_handle())
    }

    /// The console reload talks to; only contacted when reload is enabled
    fn console(&self) -> Arc<dyn RemoteConsole> {
        Arc::new(RconConsole::new(
            self.config.rcon_address(),
            self.config.remote.rcon.password.clone(),
            self.config.rcon_timeout(),
        ))
    }

    /// Run until `shutdown` resolves, then finish queued work unless `force`
    /// resolves first
    pub async fn run<F, G>(self, shutdown: F, force: G) -> Result<()>
    where
        F: Future<Output = ()>,
        G: Future<Output = ()>,
    {
        let controller = self.controller(Arc::new(ProcessRunner::new()), self.console());
        let queue = TaskQueue::start(Arc::new(controller));
        let dispatcher =
            WatchDispatcher::new(self.tracked.clone(), queue).with_finished_hook(Arc::new(print_outcome));

        println!(
            "{} {} ({})",
            "Watching".cyan(),
            self.config.watch_directory.display(),
            self.tracked.names().join(", ")
        );

        dispatcher
            .run(&self.config.watch_directory, self.config.recursive, shutdown, force)
            .await
    }
}

fn print_outcome(report: &PipelineReport, elapsed: std::time::Duration) {
    let map = report.map_name().unwrap_or_else(|| report.file_name.clone());
    match &report.error {
        None => println!(
            "{} {} -> {} ({:.1}s)",
            "✓".green(),
            report.file_name,
            map.bold(),
            elapsed.as_secs_f64()
        ),
        Some(e) => println!("{} {}: {}", "✗".red(), report.file_name, e.to_string().red()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BspsyncError;
    use tempfile::TempDir;

    #[test]
    fn test_new_reports_missing_tools() {
        let temp = TempDir::new().unwrap();
        let mut config = Config {
            watch_directory: temp.path().to_path_buf(),
            tracked_files: vec!["fy_test".to_string()],
            ..Default::default()
        };
        config.tools.bin_dir = Some(temp.path().to_path_buf());
        config.tools.scp = "/nonexistent/pscp".to_string();

        let err = Daemon::new(config).err().unwrap();
        match err {
            BspsyncError::MissingDependency(msg) => assert!(msg.contains("pscp")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_new_with_tools_present() {
        let temp = TempDir::new().unwrap();
        for tool in ["bzip2", "pscp", "plink"] {
            std::fs::write(temp.path().join(tool), b"").unwrap();
        }
        let mut config = Config {
            watch_directory: temp.path().to_path_buf(),
            tracked_files: vec!["fy_test".to_string(), "fy_test.bsp".to_string()],
            ..Default::default()
        };
        config.tools.bin_dir = Some(temp.path().to_path_buf());

        let daemon = Daemon::new(config).unwrap();
        assert_eq!(daemon.tracked().names(), vec!["fy_test.bsp"]);
    }
}
