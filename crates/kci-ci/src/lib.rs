//! KCI CI - Kernel CI pipeline orchestration
//!
//! Provides the stage orchestrator that:
//! - Sequences merge, build, publish, run, report and cleanup
//! - Threads facts between stages (and processes) through a persisted State
//! - Records every stage as a structured pass/fail test case
//! - Re-tests the baseline when a run fails, to tell new regressions from
//!   pre-existing ones

pub mod artifact;
pub mod baseline;
pub mod collab;
pub mod config;
mod error;
pub mod fakes;
pub mod harness;
pub mod pipeline;
pub mod publisher;
pub mod reporter;
pub mod stage;
pub mod telemetry;
pub mod toolbox;

// Re-export key types
pub use artifact::BuildArtifact;
pub use baseline::{BaselineRequest, BaselineVerdict};
pub use collab::{
    BuildEngine, BuildSpec, MergeEngine, MergeOutcome, Publisher, Reporter, RunRequest, Runner,
    TreeSpec,
};
pub use config::{MergeRef, PipelineConfig, PublisherSpec, ReporterSpec, RunnerSpec};
pub use error::{CiError, Result};
pub use harness::{Harness, TestCaseRecord};
pub use pipeline::Pipeline;
pub use stage::{Command, Stage};
pub use telemetry::init_tracing;
pub use toolbox::Toolbox;
