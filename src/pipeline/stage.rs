//! Pipeline stages and run reports

use std::fmt;

use crate::error::BspsyncError;
use crate::version::VersionedOutput;

/// The stages of one pipeline run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Resolve,
    Rename,
    Pack,
    Compress,
    Upload,
    RemoteExtract,
    Reload,
}

impl Stage {
    /// Declared execution order
    pub const ORDER: [Stage; 7] = [
        Stage::Resolve,
        Stage::Rename,
        Stage::Pack,
        Stage::Compress,
        Stage::Upload,
        Stage::RemoteExtract,
        Stage::Reload,
    ];

    /// Optional stages can be disabled by configuration
    pub fn is_optional(self) -> bool {
        matches!(self, Stage::Pack | Stage::Reload)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Rename => "rename",
            Stage::Pack => "pack",
            Stage::Compress => "compress",
            Stage::Upload => "upload",
            Stage::RemoteExtract => "remote-extract",
            Stage::Reload => "reload",
        }
    }

    /// Wrap a failure reason in this stage's error variant
    pub fn failure(self, reason: impl Into<String>) -> BspsyncError {
        let reason = reason.into();
        match self {
            Stage::Resolve => BspsyncError::VersionResolutionFailed(reason),
            Stage::Rename => BspsyncError::RelocationFailed(reason),
            Stage::Pack => BspsyncError::PackingFailed(reason),
            Stage::Compress => BspsyncError::CompressionFailed(reason),
            Stage::Upload => BspsyncError::UploadFailed(reason),
            Stage::RemoteExtract => BspsyncError::RemoteExtractionFailed(reason),
            Stage::Reload => BspsyncError::ReloadFailed(reason),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    /// Disabled by configuration
    Skipped,
    Failed(String),
}

/// A stage and its outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    pub stage: Stage,
    pub outcome: StageOutcome,
}

/// Result of processing one task
#[derive(Debug)]
pub struct PipelineReport {
    pub file_name: String,
    /// Set once the version was resolved
    pub output: Option<VersionedOutput>,
    /// Stages that ran or were skipped, in order
    pub stages: Vec<StageRecord>,
    /// The failure that ended the run, if any
    pub error: Option<BspsyncError>,
}

impl PipelineReport {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            output: None,
            stages: Vec::new(),
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn record(&mut self, stage: Stage, outcome: StageOutcome) {
        self.stages.push(StageRecord { stage, outcome });
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|r| r.stage == stage).map(|r| &r.outcome)
    }

    /// Stages that ran and succeeded
    pub fn completed(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|r| r.outcome == StageOutcome::Success)
            .map(|r| r.stage)
            .collect()
    }

    /// Stages recorded as failed, including ignored optional failures
    pub fn failed(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|r| matches!(r.outcome, StageOutcome::Failed(_)))
            .map(|r| r.stage)
            .collect()
    }

    /// Map name of the deployed version, if one was resolved
    pub fn map_name(&self) -> Option<String> {
        self.output.as_ref().map(VersionedOutput::map_name)
    }
}
