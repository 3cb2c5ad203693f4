//! Pipeline controller: runs the stages of one task in order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::stage::{PipelineReport, Stage, StageOutcome};
use crate::config::Config;
use crate::error::Result;
use crate::executor::{CommandRunner, CommandSpec};
use crate::queue::TaskProcessor;
use crate::rcon::RemoteConsole;
use crate::toolchain::Toolchain;
use crate::tracked::{Task, VersionHandle};
use crate::transport::{RemoteExec, SecureCopy, TransportParams, remote_extract_command};
use crate::version::{VersionResolver, VersionedOutput};

/// Everything the controller needs to know about where things go
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_dir: PathBuf,
    pub enable_packing: bool,
    pub enable_reload: bool,
    pub fail_on_optional_stage_error: bool,
    pub stream_output: bool,
    pub stage_timeout: Duration,
    pub fastdl_directory: String,
    pub maps_directory: String,
    pub transport: TransportParams,
    pub toolchain: Toolchain,
}

impl PipelineSettings {
    pub fn from_config(config: &Config, toolchain: Toolchain) -> Self {
        Self {
            output_dir: config.output_dir().to_path_buf(),
            enable_packing: config.enable_packing,
            enable_reload: config.remote.rcon.enabled,
            fail_on_optional_stage_error: config.pipeline.fail_on_optional_stage_error,
            stream_output: config.pipeline.stream_output,
            stage_timeout: config.stage_timeout(),
            fastdl_directory: config.remote.paths.fastdl_directory.clone(),
            maps_directory: config.remote.paths.maps_directory.clone(),
            transport: config.transport_params(),
            toolchain,
        }
    }

    fn is_enabled(&self, stage: Stage) -> bool {
        match stage {
            Stage::Pack => self.enable_packing,
            Stage::Reload => self.enable_reload,
            _ => true,
        }
    }
}

/// Versions, packages and deploys one changed map
pub struct PipelineController {
    settings: PipelineSettings,
    resolver: VersionResolver,
    runner: Arc<dyn CommandRunner>,
    console: Arc<dyn RemoteConsole>,
    versions: VersionHandle,
}

impl PipelineController {
    pub fn new(
        settings: PipelineSettings,
        runner: Arc<dyn CommandRunner>,
        console: Arc<dyn RemoteConsole>,
        versions: VersionHandle,
    ) -> Self {
        Self {
            settings,
            resolver: VersionResolver::new(),
            runner,
            console,
            versions,
        }
    }

    /// Run every stage for `task`, stopping at the first fatal failure
    pub async fn process(&self, task: &Task) -> PipelineReport {
        let mut report = PipelineReport::new(&task.file_name);

        for stage in Stage::ORDER {
            if !self.settings.is_enabled(stage) {
                report.record(stage, StageOutcome::Skipped);
                continue;
            }

            match self.execute(stage, task, &mut report).await {
                Ok(()) => report.record(stage, StageOutcome::Success),
                Err(err) => {
                    report.record(stage, StageOutcome::Failed(err.to_string()));
                    if stage.is_optional() && !self.settings.fail_on_optional_stage_error {
                        log::warn!("Ignoring failed {} stage for '{}': {}", stage, task.file_name, err);
                        continue;
                    }
                    log::error!("Stage {} failed for '{}': {}", stage, task.file_name, err);
                    report.error = Some(err);
                    break;
                }
            }
        }

        report
    }

    async fn execute(&self, stage: Stage, task: &Task, report: &mut PipelineReport) -> Result<()> {
        if stage == Stage::Resolve {
            report.output = Some(self.resolve(task).await?);
            return Ok(());
        }

        let output = report
            .output
            .as_ref()
            .ok_or_else(|| stage.failure("no version was resolved"))?;

        match stage {
            Stage::Resolve => Ok(()),
            Stage::Rename => self.relocate(task, output).await,
            Stage::Pack => self.pack(output).await,
            Stage::Compress => self.compress(output).await,
            Stage::Upload => self.upload(output).await,
            Stage::RemoteExtract => self.remote_extract(output).await,
            Stage::Reload => self.reload(output).await,
        }
    }

    async fn resolve(&self, task: &Task) -> Result<VersionedOutput> {
        let base_name = task.base_name();
        tokio::fs::create_dir_all(&self.settings.output_dir).await.map_err(|e| {
            Stage::Resolve.failure(format!(
                "cannot create output directory {}: {}",
                self.settings.output_dir.display(),
                e
            ))
        })?;

        let version = self
            .resolver
            .resolve(&base_name, &self.settings.output_dir)
            .await
            .map_err(|e| Stage::Resolve.failure(e.to_string()))?;

        let output = VersionedOutput::new(base_name, version, &self.settings.output_dir);
        log::info!("Versioning map '{}' as '{}'", task.file_name, output.map_name());
        Ok(output)
    }

    async fn relocate(&self, task: &Task, output: &VersionedOutput) -> Result<()> {
        let failed = |what: &str, e: std::io::Error| {
            Stage::Rename.failure(format!("{} {}: {}", what, output.output_path.display(), e))
        };

        tokio::fs::create_dir_all(&self.settings.output_dir)
            .await
            .map_err(|e| failed("cannot create output directory for", e))?;

        if tokio::fs::try_exists(&output.output_path).await.unwrap_or(false) {
            return Err(Stage::Rename.failure(format!(
                "{} already exists",
                output.output_path.display()
            )));
        }

        match tokio::fs::rename(&task.source_path, &output.output_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                copy_across_devices(&task.source_path, &output.output_path)
                    .await
                    .map_err(|e| failed("cannot copy map to", e))?;
            }
            Err(e) => return Err(failed("cannot move map to", e)),
        }

        // The version is assigned from here on, whatever happens downstream
        self.versions.record(&task.file_name, output.version);
        Ok(())
    }

    async fn pack(&self, output: &VersionedOutput) -> Result<()> {
        log::info!("Packing resources into '{}'", output.file_name());
        let spec = self
            .settings
            .toolchain
            .pack(&output.output_path, self.settings.stage_timeout);
        self.run(Stage::Pack, spec).await
    }

    async fn compress(&self, output: &VersionedOutput) -> Result<()> {
        log::info!("Compressing '{}' for fast download", output.file_name());
        let spec = self
            .settings
            .toolchain
            .compress(&output.output_path, self.settings.stage_timeout);
        self.run(Stage::Compress, spec).await
    }

    async fn upload(&self, output: &VersionedOutput) -> Result<()> {
        let spec = SecureCopy::new(
            &self.settings.transport,
            output.archive_path(),
            self.settings.fastdl_directory.as_str(),
        )
        .build(&self.settings.toolchain.scp)
        .map_err(|e| Stage::Upload.failure(e.to_string()))?;

        let started = Instant::now();
        log::info!("Uploading '{}' to remote server", output.archive_name());
        self.run(Stage::Upload, self.prepare(spec)).await?;
        log::info!("Uploaded '{}' in {} ms", output.archive_name(), started.elapsed().as_millis());
        Ok(())
    }

    async fn remote_extract(&self, output: &VersionedOutput) -> Result<()> {
        let command = remote_extract_command(
            &self.settings.fastdl_directory,
            &self.settings.maps_directory,
            output,
        )
        .map_err(|e| Stage::RemoteExtract.failure(e.to_string()))?;

        let spec = RemoteExec::new(&self.settings.transport, command)
            .build(&self.settings.toolchain.ssh)
            .map_err(|e| Stage::RemoteExtract.failure(e.to_string()))?;

        let started = Instant::now();
        log::info!("Remotely extracting '{}' to game server", output.archive_name());
        self.run(Stage::RemoteExtract, self.prepare(spec)).await?;
        log::info!("Extracted '{}' in {} ms", output.file_name(), started.elapsed().as_millis());
        Ok(())
    }

    async fn reload(&self, output: &VersionedOutput) -> Result<()> {
        log::info!("Changing level on remote game server to '{}'", output.map_name());
        self.console
            .change_level(&output.map_name())
            .await
            .map_err(|e| Stage::Reload.failure(e.to_string()))
    }

    /// Apply the shared timeout, output and working directory settings
    fn prepare(&self, spec: CommandSpec) -> CommandSpec {
        spec.timeout(self.settings.stage_timeout)
            .current_dir_opt(self.settings.toolchain.bin_dir.as_deref())
    }

    async fn run(&self, stage: Stage, spec: CommandSpec) -> Result<()> {
        let spec = spec.stream_output(self.settings.stream_output);
        self.runner
            .run(&spec)
            .await
            .into_result(|reason| stage.failure(reason))
    }
}

#[async_trait]
impl TaskProcessor for PipelineController {
    async fn process(&self, task: &Task) -> PipelineReport {
        PipelineController::process(self, task).await
    }
}

/// Copy to a temporary sibling, rename it into place, then drop the source.
///
/// Succeeds once the destination exists; a source that cannot be removed
/// afterwards is only logged.
async fn copy_across_devices(source: &Path, destination: &Path) -> std::io::Result<()> {
    let mut partial = destination.as_os_str().to_os_string();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    if let Err(e) = copy_into_place(source, &partial, destination).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }
    discard_source(source).await;
    Ok(())
}

async fn copy_into_place(source: &Path, partial: &Path, destination: &Path) -> std::io::Result<()> {
    tokio::fs::copy(source, partial).await?;
    tokio::fs::rename(partial, destination).await
}

async fn discard_source(source: &Path) {
    if let Err(e) = tokio::fs::remove_file(source).await {
        log::warn!("Copied map but could not remove {}: {}", source.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolsConfig;
    use crate::error::BspsyncError;
    use crate::executor::MockCommandRunner;
    use crate::rcon::MockConsole;
    use crate::tracked::TrackedSet;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        watch: PathBuf,
        output: PathBuf,
        tracked: TrackedSet,
        runner: Arc<MockCommandRunner>,
        console: Arc<MockConsole>,
    }

    impl Fixture {
        fn new(runner: MockCommandRunner, console: MockConsole) -> Self {
            let temp = TempDir::new().unwrap();
            let watch = temp.path().join("watch");
            let output = temp.path().join("versions");
            std::fs::create_dir_all(&watch).unwrap();
            Self {
                _temp: temp,
                watch,
                output,
                tracked: TrackedSet::new(["fy_test.bsp"]),
                runner: Arc::new(runner),
                console: Arc::new(console),
            }
        }

        fn settings(&self) -> PipelineSettings {
            PipelineSettings {
                output_dir: self.output.clone(),
                enable_packing: false,
                enable_reload: false,
                fail_on_optional_stage_error: true,
                stream_output: false,
                stage_timeout: Duration::from_secs(5),
                fastdl_directory: "/srv/fastdl/maps".to_string(),
                maps_directory: "/srv/cstrike/maps".to_string(),
                transport: TransportParams {
                    host: "maps.example.org".to_string(),
                    port: 22,
                    username: "srcds".to_string(),
                    password: None,
                    private_key: None,
                    host_key: "ssh-ed25519 255 SHA256:abc".to_string(),
                },
                toolchain: Toolchain::from_config(&ToolsConfig::default()),
            }
        }

        fn controller(&self, settings: PipelineSettings) -> PipelineController {
            PipelineController::new(
                settings,
                self.runner.clone(),
                self.console.clone(),
                self.tracked.version_handle(),
            )
        }

        fn save_map(&self) -> Task {
            let path = self.watch.join("fy_test.bsp");
            std::fs::write(&path, b"VBSP").unwrap();
            Task::new("fy_test.bsp", path)
        }
    }

    #[tokio::test]
    async fn test_full_run_without_optional_stages() {
        let fx = Fixture::new(MockCommandRunner::new(), MockConsole::new());
        let task = fx.save_map();

        let report = fx.controller(fx.settings()).process(&task).await;

        assert!(report.succeeded(), "{:?}", report.error);
        assert_eq!(report.map_name().as_deref(), Some("fy_test_dev1"));
        assert_eq!(fx.runner.programs(), vec!["bzip2", "pscp", "plink"]);
        assert_eq!(report.outcome(Stage::Pack), Some(&StageOutcome::Skipped));
        assert_eq!(report.outcome(Stage::Reload), Some(&StageOutcome::Skipped));
        assert!(fx.output.join("fy_test_dev1.bsp").exists());
        assert!(!task.source_path.exists());
        assert!(fx.console.levels().is_empty());
    }

    #[tokio::test]
    async fn test_version_follows_existing_outputs() {
        let fx = Fixture::new(MockCommandRunner::new(), MockConsole::new());
        std::fs::create_dir_all(&fx.output).unwrap();
        std::fs::write(fx.output.join("fy_test_dev3.bsp"), b"old").unwrap();
        let task = fx.save_map();

        let report = fx.controller(fx.settings()).process(&task).await;

        assert!(report.succeeded());
        assert_eq!(report.output.as_ref().unwrap().version, 4);
        assert_eq!(fx.tracked.get("fy_test.bsp").unwrap().last_version, 4);
    }

    #[tokio::test]
    async fn test_compression_failure_stops_pipeline() {
        let fx = Fixture::new(MockCommandRunner::new().fail("bzip2", "exit code 1"), MockConsole::new());
        let task = fx.save_map();

        let report = fx.controller(fx.settings()).process(&task).await;

        assert!(matches!(report.error, Some(BspsyncError::CompressionFailed(_))));
        assert_eq!(fx.runner.programs(), vec!["bzip2"]);
        assert_eq!(report.outcome(Stage::Upload), None);
        // rename already happened, so the version is assigned
        assert_eq!(fx.tracked.get("fy_test.bsp").unwrap().last_version, 1);
    }

    #[tokio::test]
    async fn test_missing_source_is_relocation_failure() {
        let fx = Fixture::new(MockCommandRunner::new(), MockConsole::new());
        let task = Task::new("fy_test.bsp", fx.watch.join("fy_test.bsp"));

        let report = fx.controller(fx.settings()).process(&task).await;

        assert!(matches!(report.error, Some(BspsyncError::RelocationFailed(_))));
        assert!(fx.runner.calls().is_empty());
        assert_eq!(fx.tracked.get("fy_test.bsp").unwrap().last_version, 0);
    }

    #[tokio::test]
    async fn test_packing_runs_before_compress() {
        let fx = Fixture::new(MockCommandRunner::new(), MockConsole::new());
        let task = fx.save_map();
        let mut settings = fx.settings();
        settings.enable_packing = true;

        let report = fx.controller(settings).process(&task).await;

        assert!(report.succeeded());
        assert_eq!(fx.runner.programs(), vec!["python", "bzip2", "pscp", "plink"]);
    }

    #[tokio::test]
    async fn test_optional_failure_fatal_by_default() {
        let fx = Fixture::new(MockCommandRunner::new().fail("python", "exit code 2"), MockConsole::new());
        let task = fx.save_map();
        let mut settings = fx.settings();
        settings.enable_packing = true;

        let report = fx.controller(settings).process(&task).await;

        assert!(matches!(report.error, Some(BspsyncError::PackingFailed(_))));
        assert_eq!(fx.runner.programs(), vec!["python"]);
    }

    #[tokio::test]
    async fn test_optional_failure_ignored_when_configured() {
        let fx = Fixture::new(MockCommandRunner::new().fail("python", "exit code 2"), MockConsole::new());
        let task = fx.save_map();
        let mut settings = fx.settings();
        settings.enable_packing = true;
        settings.fail_on_optional_stage_error = false;

        let report = fx.controller(settings).process(&task).await;

        assert!(report.succeeded());
        assert_eq!(report.failed(), vec![Stage::Pack]);
        assert_eq!(fx.runner.programs(), vec!["python", "bzip2", "pscp", "plink"]);
    }

    #[tokio::test]
    async fn test_reload_issues_changelevel() {
        let fx = Fixture::new(MockCommandRunner::new(), MockConsole::new());
        let task = fx.save_map();
        let mut settings = fx.settings();
        settings.enable_reload = true;

        let report = fx.controller(settings).process(&task).await;

        assert!(report.succeeded());
        assert_eq!(fx.console.levels(), vec!["fy_test_dev1"]);
    }

    #[tokio::test]
    async fn test_reload_failure_after_deploy() {
        let fx = Fixture::new(MockCommandRunner::new(), MockConsole::failing("connection refused"));
        let task = fx.save_map();
        let mut settings = fx.settings();
        settings.enable_reload = true;

        let report = fx.controller(settings).process(&task).await;

        assert!(matches!(report.error, Some(BspsyncError::ReloadFailed(_))));
        assert_eq!(
            report.completed(),
            vec![Stage::Resolve, Stage::Rename, Stage::Compress, Stage::Upload, Stage::RemoteExtract]
        );
    }

    #[tokio::test]
    async fn test_upload_args_use_archive() {
        let fx = Fixture::new(MockCommandRunner::new(), MockConsole::new());
        let task = fx.save_map();

        fx.controller(fx.settings()).process(&task).await;

        let upload = &fx.runner.calls()[1];
        let archive = fx.output.join("fy_test_dev1.bsp.bz2").display().to_string();
        assert!(upload.args.contains(&archive));
        assert_eq!(
            upload.args.last().map(String::as_str),
            Some("srcds@maps.example.org:/srv/fastdl/maps")
        );

        let extract = &fx.runner.calls()[2];
        assert!(extract.args.last().unwrap().starts_with("bunzip2 -k -c "));
    }

    #[tokio::test]
    async fn test_refuses_to_overwrite_existing_version() {
        let fx = Fixture::new(MockCommandRunner::new(), MockConsole::new());
        std::fs::create_dir_all(&fx.output).unwrap();
        let task = fx.save_map();
        let settings = fx.settings();
        let controller = fx.controller(settings);

        // Resolution sees nothing, then a racing writer creates dev1
        let output = VersionedOutput::new("fy_test", 1, &fx.output);
        std::fs::write(&output.output_path, b"racer").unwrap();
        let err = controller.relocate(&task, &output).await.unwrap_err();
        assert!(matches!(err, BspsyncError::RelocationFailed(_)));
        assert!(task.source_path.exists());
    }

    #[tokio::test]
    async fn test_copy_across_devices_moves_file() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.bsp");
        let destination = temp.path().join("b.bsp");
        std::fs::write(&source, b"VBSP").unwrap();

        copy_across_devices(&source, &destination).await.unwrap();

        assert!(!source.exists());
        assert_eq!(std::fs::read(&destination).unwrap(), b"VBSP");
        assert!(!temp.path().join("b.bsp.partial").exists());
    }

    #[tokio::test]
    async fn test_copy_failure_removes_partial() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("missing.bsp");
        let destination = temp.path().join("b.bsp");
        let partial = temp.path().join("b.bsp.partial");
        std::fs::write(&partial, b"leftover").unwrap();

        assert!(copy_across_devices(&source, &destination).await.is_err());

        assert!(!partial.exists());
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_source_removal_failure_only_logs() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("gone.bsp");

        // returns unit: a failed removal cannot fail the relocation
        let () = discard_source(&source).await;

        assert!(!source.exists());
    }

    #[tokio::test]
    async fn test_unreadable_output_dir_fails_resolution() {
        let fx = Fixture::new(MockCommandRunner::new(), MockConsole::new());
        std::fs::write(&fx.output, b"not a directory").unwrap();
        let task = fx.save_map();

        let report = fx.controller(fx.settings()).process(&task).await;

        assert!(matches!(report.error, Some(BspsyncError::VersionResolutionFailed(_))));
        assert_eq!(report.failed(), vec![Stage::Resolve]);
        assert!(report.output.is_none());
        assert!(fx.runner.calls().is_empty());
        assert!(task.source_path.exists());
        assert_eq!(fx.tracked.get("fy_test.bsp").unwrap().last_version, 0);
    }
}
