//! The per-task build and deploy pipeline.

mod controller;
mod stage;

pub use controller::{PipelineController, PipelineSettings};
pub use stage::{PipelineReport, Stage, StageOutcome, StageRecord};
