//! Pipeline stage and command definitions.

use serde::{Deserialize, Serialize};

/// One phase of the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Check out the base revision and apply merge refs and patches
    Merge,

    /// Build and package the kernel
    Build,

    /// Upload the build artifacts
    Publish,

    /// Submit the build to the test lab
    Run,

    /// Hand the results to a reporter
    Report,

    /// Remove artifacts and persisted state
    Cleanup,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::Merge,
        Stage::Build,
        Stage::Publish,
        Stage::Run,
        Stage::Report,
        Stage::Cleanup,
    ];

    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Merge => "merge",
            Stage::Build => "build",
            Stage::Publish => "publish",
            Stage::Run => "run",
            Stage::Report => "report",
            Stage::Cleanup => "cleanup",
        }
    }

    /// Whether the stage produces a test-case record when recording is on.
    ///
    /// Report and cleanup are never recorded: they exist to surface and
    /// tidy up after the recorded stages.
    pub fn is_recorded(&self) -> bool {
        matches!(
            self,
            Stage::Merge | Stage::Build | Stage::Publish | Stage::Run
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What one invocation was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Exactly one stage, fed by previously persisted state
    Stage(Stage),

    /// Merge, build, publish and run; report when the run waited; cleanup
    All,
}

impl Command {
    /// Name used for the structured report file.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Stage(stage) => stage.name(),
            Command::All => "all",
        }
    }

    /// Whether `stage` may execute as part of this command.
    pub fn includes(&self, stage: Stage) -> bool {
        match self {
            Command::Stage(own) => *own == stage,
            Command::All => true,
        }
    }
}

impl From<Stage> for Command {
    fn from(stage: Stage) -> Self {
        Command::Stage(stage)
    }
}
