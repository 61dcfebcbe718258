//! Collaborator contracts.
//!
//! The pipeline never merges, compiles, uploads or schedules anything itself.
//! Those jobs belong to collaborators behind the traits below:
//! - `MergeEngine`: source tree checkout and change application
//! - `BuildEngine`: kernel configuration, compilation and packaging
//! - `Publisher`: artifact upload and URL derivation
//! - `Runner`: remote test lab submission and result retrieval
//! - `Reporter`: human-readable result delivery
//!
//! All traits are async and return `anyhow::Result`; the pipeline wraps
//! their failures as `CiError::Collaborator`. Instances are created per
//! stage through the factories registered in a [`crate::Toolbox`].

use async_trait::async_trait;
use kci_state::State;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// MergeEngine
// ---------------------------------------------------------------------------

/// Where and what to check out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSpec {
    /// Base repository URL
    pub base_repo: Option<String>,
    /// Base ref the changes are applied to
    pub git_ref: Option<String>,
    /// Working directory holding the tree
    pub workdir: PathBuf,
    /// Shallow clone depth
    pub fetch_depth: Option<String>,
}

/// Result of merging one remote ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// 0 on a clean merge
    pub code: i32,
    /// Engine-specific detail (conflict summary, merged head, ...)
    pub info: String,
}

impl MergeOutcome {
    pub fn clean(info: impl Into<String>) -> Self {
        Self {
            code: 0,
            info: info.into(),
        }
    }
}

#[async_trait]
pub trait MergeEngine: Send + Sync {
    /// Fetch and check out the base revision; returns its commit id.
    async fn checkout(&mut self) -> anyhow::Result<String>;

    /// Commit date of `revision`.
    async fn commit_date(&self, revision: &str) -> anyhow::Result<String>;

    /// Merge `git_ref` (or the default branch) of `url` into the tree.
    async fn merge_git_ref(
        &mut self,
        url: &str,
        git_ref: Option<&str>,
    ) -> anyhow::Result<MergeOutcome>;

    /// Apply a local patch file.
    async fn merge_patch_file(&mut self, path: &Path) -> anyhow::Result<()>;

    /// Download and apply a patchwork patch.
    async fn merge_patchwork_patch(&mut self, url: &str) -> anyhow::Result<()>;

    /// Path of the source tree.
    fn path(&self) -> PathBuf;

    /// Write the build-info file describing what was merged, if any.
    async fn dump_info(&self) -> anyhow::Result<Option<PathBuf>>;

    /// Commit id of the tree after merging.
    async fn commit_hash(&self) -> anyhow::Result<String>;

    /// Log file the engine writes merge output to.
    fn merge_log(&self) -> PathBuf;
}

// ---------------------------------------------------------------------------
// BuildEngine
// ---------------------------------------------------------------------------

/// Inputs for a kernel build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub source_dir: PathBuf,
    pub base_config: Option<PathBuf>,
    /// How to process the base config (e.g. `olddefconfig`, `rh-configs`)
    pub config_type: Option<String>,
    pub make_opts: Option<String>,
    pub enable_debuginfo: bool,
    pub rh_configs_glob: Option<String>,
}

#[async_trait]
pub trait BuildEngine: Send + Sync {
    /// Fully clean the source tree.
    async fn clean_source(&mut self) -> anyhow::Result<()>;

    /// Build and package; returns the tarball path.
    async fn make_package(&mut self) -> anyhow::Result<PathBuf>;

    /// Log file the engine writes build output to.
    fn build_log(&self) -> PathBuf;

    /// The resolved kernel configuration.
    fn config_path(&self) -> PathBuf;

    /// Kernel release string of the build.
    async fn release(&self) -> anyhow::Result<String>;

    /// Target architecture of the build.
    fn arch(&self) -> String;
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Upload `local`; returns the URL it can be fetched from.
    async fn publish(&self, local: &Path) -> anyhow::Result<String>;

    /// URL a previously published `file_name` is reachable at.
    fn derive_url(&self, file_name: &str) -> String;
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// One test-lab submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub build_url: String,
    pub release: Option<String>,
    /// Block until the lab reports completion
    pub wait: bool,
    /// Human-readable identifier of the change under test
    pub uid: Option<String>,
    pub arch: Option<String>,
    /// Pin the job to this host
    pub host: Option<String>,
    /// Whether the lab may reschedule the job elsewhere
    pub reschedule: bool,
}

impl RunRequest {
    pub fn new(build_url: impl Into<String>) -> Self {
        Self {
            build_url: build_url.into(),
            release: None,
            wait: false,
            uid: None,
            arch: None,
            host: None,
            reschedule: true,
        }
    }
}

#[async_trait]
pub trait Runner: Send + Sync {
    /// Submit (and with `wait`, await) a test run; returns its result code.
    async fn run(&mut self, request: &RunRequest) -> anyhow::Result<i32>;

    /// Job identifiers submitted so far, in submission order.
    fn jobs(&self) -> Vec<String>;

    /// Write a structured result for `job` into `dir`.
    async fn dump_junit_results(&self, job: &str, dir: &Path) -> anyhow::Result<()>;

    /// Host the most recent job ran on.
    fn last_host(&self) -> Option<String>;
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Reporter: Send + Sync {
    /// Format and deliver a report of `state`.
    async fn report(&self, state: &State) -> anyhow::Result<()>;
}
