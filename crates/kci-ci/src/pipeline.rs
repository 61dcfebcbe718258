//! Pipeline orchestration.
//!
//! Every stage reads its inputs from the State and persists its outputs
//! through the [`StateStore`], so each one can also run on its own in a
//! later process that picks up where an earlier one stopped. A stage returns
//! `Some(code)` to replace the pipeline result or `None` to leave it alone.

use crate::artifact::{ArtifactNaming, BuildArtifact};
use crate::baseline::{self, BaselineRequest};
use crate::collab::{BuildSpec, MergeEngine, RunRequest, TreeSpec};
use crate::config::{check_build_args, full_path, normalize_paths, path_text, PipelineConfig};
use crate::error::{CiError, Result};
use crate::harness::Harness;
use crate::stage::{Command, Stage};
use crate::toolbox::Toolbox;
use chrono::Local;
use kci_state::{indexed_key, State, StateStore, StateUpdate};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Merge log written by a stubbed merge.
pub const MERGE_LOG: &str = "merge.log";

/// Build URL recorded by a stubbed publish.
pub const STUB_BUILD_URL: &str = "some.url.com";

/// Tags naming the kinds of change a merge applied.
const GIT_TAG: &str = "[git]";
const LOCAL_PATCH_TAG: &str = "[local patch]";
const PATCHWORK_TAG: &str = "[patchwork]";
const BASELINE_TAG: &str = "[baseline]";

/// What the merge steps applied.
#[derive(Debug, Default)]
struct MergeSummary {
    kinds: Vec<&'static str>,
    /// Result of the last merged ref, if any
    code: Option<i32>,
}

impl MergeSummary {
    /// One tag per merged ref.
    fn push(&mut self, kind: &'static str) {
        self.kinds.push(kind);
    }

    /// One tag per kind of change, however many were applied.
    fn mark(&mut self, kind: &'static str) {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
    }

    fn uid(&self) -> String {
        if self.kinds.is_empty() {
            BASELINE_TAG.to_string()
        } else {
            self.kinds.join(" ")
        }
    }
}

/// Stage orchestrator for one invocation.
#[derive(Debug)]
pub struct Pipeline {
    store: StateStore,
    config: PipelineConfig,
    toolbox: Toolbox,
    harness: Harness,
    retcode: i32,
}

impl Pipeline {
    /// Prepare `command` for execution.
    ///
    /// Normalises paths in the State and rejects argument combinations and
    /// collaborator type tags the command cannot run with, before any stage
    /// starts.
    pub fn new(
        mut store: StateStore,
        config: PipelineConfig,
        toolbox: Toolbox,
        command: Command,
    ) -> Result<Self> {
        normalize_paths(store.state_mut())?;

        if command.includes(Stage::Build) {
            check_build_args(store.state())?;
        }

        let real = config.stub.is_none();
        let publisher = config
            .publisher
            .as_ref()
            .filter(|_| real && (command.includes(Stage::Publish) || command.includes(Stage::Run)));
        let runner = config
            .runner
            .as_ref()
            .filter(|_| real && command.includes(Stage::Run));
        let reporter = config
            .reporter
            .as_ref()
            .filter(|_| command.includes(Stage::Report));
        toolbox.check_kinds(publisher, runner, reporter)?;

        let harness = match store.state().str("junit") {
            Some(dir) => Harness::to_dir(full_path(dir)?)?,
            None => Harness::disabled(),
        };

        Ok(Self {
            store,
            config,
            toolbox,
            harness,
            retcode: 0,
        })
    }

    pub fn state(&self) -> &State {
        self.store.state()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn harness(&self) -> &Harness {
        &self.harness
    }

    pub fn retcode(&self) -> i32 {
        self.retcode
    }

    /// Run `command`; returns the pipeline result code.
    pub async fn execute(&mut self, command: Command) -> Result<i32> {
        match command {
            Command::Stage(stage) => self.invoke(stage).await?,
            Command::All => {
                for stage in [Stage::Merge, Stage::Build, Stage::Publish, Stage::Run] {
                    self.invoke(stage).await?;
                }
                if self.store.state().flag("wait") {
                    self.invoke(Stage::Report).await?;
                } else {
                    debug!("Not waiting for test results; skipping report");
                }
                self.invoke(Stage::Cleanup).await?;
            }
        }
        info!(command = command.name(), retcode = self.retcode, "Pipeline finished");
        Ok(self.retcode)
    }

    /// Write the structured stage report for `command`, if recording.
    pub fn write_report(&self, command: Command) -> Result<Option<PathBuf>> {
        self.harness.write(command)
    }

    async fn invoke(&mut self, stage: Stage) -> Result<()> {
        info!(stage = %stage, "Executing stage");
        let started = Instant::now();
        let outcome = match stage {
            Stage::Merge => self.merge().await,
            Stage::Build => self.build().await,
            Stage::Publish => self.publish().await,
            Stage::Run => self.run().await,
            Stage::Report => self.report().await,
            Stage::Cleanup => self.cleanup().await,
        };

        if stage.is_recorded() {
            return self.harness.settle(
                stage,
                started.elapsed(),
                outcome,
                &mut self.retcode,
                self.store.state(),
            );
        }
        if let Some(code) = outcome? {
            self.retcode = code;
        }
        Ok(())
    }

    fn save(&mut self, update: StateUpdate) -> Result<()> {
        Ok(self.store.merge_and_persist(update)?)
    }

    fn workdir(&self) -> Result<PathBuf> {
        self.store
            .state()
            .str("workdir")
            .map(PathBuf::from)
            .ok_or_else(|| CiError::Usage("no working directory is set".to_string()))
    }

    // -----------------------------------------------------------------------
    // merge
    // -----------------------------------------------------------------------

    async fn merge(&mut self) -> Result<Option<i32>> {
        let workdir = self.workdir()?;
        let state = self.store.state();

        if let Some(stub) = self.config.stub {
            let update = if stub == 0 {
                StateUpdate::new()
                    .maybe("baserepo", state.string("baserepo"))
                    .set("mergelog", "")
            } else {
                tokio::fs::create_dir_all(&workdir)
                    .await
                    .map_err(|e| CiError::file(&workdir, e))?;
                let log = workdir.join(MERGE_LOG);
                tokio::fs::write(&log, "stub")
                    .await
                    .map_err(|e| CiError::file(&log, e))?;
                StateUpdate::new().set("mergelog", path_text(&log))
            };
            self.save(update)?;
            return Ok(None);
        }

        let spec = TreeSpec {
            base_repo: state.string("baserepo"),
            git_ref: state.string("ref"),
            workdir,
            fetch_depth: state.string("fetch_depth"),
        };
        let mut tree = self.toolbox.merge_engine(&spec)?;

        let base_head = tree.checkout().await?;
        let commit_date = tree.commit_date(&base_head).await?;
        info!(base_head = %base_head, "Checked out base revision");
        self.save(
            StateUpdate::new()
                .maybe("baserepo", spec.base_repo.clone())
                .set("basehead", base_head.as_str())
                .set("commitdate", commit_date),
        )?;

        let applied = self.apply_changes(tree.as_mut(), &base_head).await;
        let summary = match applied {
            Ok(summary) => summary,
            Err(err) => {
                self.save(StateUpdate::new().set("mergelog", path_text(&tree.merge_log())))?;
                return Err(err);
            }
        };
        if let Some(code) = summary.code.filter(|code| *code != 0) {
            return Ok(Some(code));
        }

        let uid = summary.uid();
        let source = tree.path();
        let build_info = tree.dump_info().await?;
        let build_head = tree.commit_hash().await?;
        info!(uid = %uid, build_head = %build_head, "Merge complete");

        self.save(
            StateUpdate::new()
                .set("workdir", path_text(&source))
                .maybe("buildinfo", build_info.as_deref().map(path_text))
                .set("buildhead", build_head)
                .set("uid", uid),
        )?;
        Ok(summary.code)
    }

    /// Merge refs, then local patches, then patchwork patches. A conflicting
    /// ref stops everything after it; a patch that fails to apply is an
    /// error.
    async fn apply_changes(
        &mut self,
        tree: &mut dyn MergeEngine,
        base_head: &str,
    ) -> Result<MergeSummary> {
        let mut summary = MergeSummary::default();

        let merge_refs = self.config.merge_refs.clone();
        for (idx, merge_ref) in merge_refs.iter().enumerate() {
            self.save(
                StateUpdate::new()
                    .set(indexed_key("mergerepo", idx), merge_ref.url.as_str())
                    .set(indexed_key("mergehead", idx), base_head),
            )?;
            let outcome = tree
                .merge_git_ref(&merge_ref.url, merge_ref.git_ref.as_deref())
                .await?;
            summary.push(GIT_TAG);
            summary.code = Some(outcome.code);
            if outcome.code != 0 {
                warn!(url = %merge_ref.url, code = outcome.code, info = %outcome.info, "Merge failed");
                return Ok(summary);
            }
        }

        let patches = self.store.state().strings("patchlist");
        if !patches.is_empty() {
            summary.mark(LOCAL_PATCH_TAG);
        }
        for (idx, patch) in patches.iter().enumerate() {
            self.save(StateUpdate::new().set(indexed_key("localpatch", idx), patch.as_str()))?;
            tree.merge_patch_file(&full_path(patch)?).await?;
        }

        let patchwork = self.store.state().strings("pw");
        if !patchwork.is_empty() {
            summary.mark(PATCHWORK_TAG);
        }
        for (idx, url) in patchwork.iter().enumerate() {
            self.save(StateUpdate::new().set(indexed_key("patchwork", idx), url.as_str()))?;
            tree.merge_patchwork_patch(url).await?;
        }

        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // build
    // -----------------------------------------------------------------------

    async fn build(&mut self) -> Result<Option<i32>> {
        let started = Local::now();
        let state = self.store.state();

        if let Some(stub) = self.config.stub {
            let update = if stub == 0 {
                StateUpdate::new().maybe("buildhead", state.string("buildhead"))
            } else {
                StateUpdate::new().set("buildlog", "stub")
            };
            self.save(update)?;
            return Ok(None);
        }

        let spec = BuildSpec {
            source_dir: self.workdir()?,
            base_config: state.string("baseconfig").map(PathBuf::from),
            config_type: state.string("cfgtype"),
            make_opts: state.string("makeopts"),
            enable_debuginfo: state.flag("enable_debuginfo"),
            rh_configs_glob: state.string("rh_configs_glob"),
        };
        let wipe = state.flag("wipe");
        let naming = ArtifactNaming::new(state.str("buildhead"), started);
        let build_info = state.string("buildinfo").map(PathBuf::from);

        let mut builder = self.toolbox.build_engine(&spec)?;
        if wipe {
            info!(source = %spec.source_dir.display(), "Cleaning kernel source");
            builder.clean_source().await?;
        }

        let built = match builder.make_package().await {
            Ok(path) => path,
            Err(err) => {
                self.save(StateUpdate::new().set("buildlog", path_text(&builder.build_log())))?;
                return Err(err.into());
            }
        };

        let artifact =
            BuildArtifact::collect(builder.as_ref(), &built, build_info.as_deref(), &naming).await?;
        self.save(artifact.state_update())?;
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // publish
    // -----------------------------------------------------------------------

    async fn publish(&mut self) -> Result<Option<i32>> {
        let state = self.store.state();
        let tarpkg = state.string("tarpkg").ok_or_else(|| {
            CiError::Usage("publish is missing \"--tarpkg <path>\"".to_string())
        })?;
        let build_info = state.string("buildinfo");
        let build_conf = state.string("buildconf");

        if self.config.stub.is_some() {
            self.save(StateUpdate::new().set("buildurl", STUB_BUILD_URL))?;
            return Ok(None);
        }

        let spec = self.config.publisher.as_ref().ok_or_else(|| {
            CiError::Config(
                "no publisher configured; pass --publisher or add a [publisher] section".to_string(),
            )
        })?;
        let publisher = self.toolbox.publisher(spec)?;

        let url = publisher.publish(Path::new(&tarpkg)).await?;
        info!(url = %url, "Published build");
        let info_url = match build_info {
            Some(path) => Some(publisher.publish(Path::new(&path)).await?),
            None => None,
        };
        let cfg_url = match build_conf {
            Some(path) => Some(publisher.publish(Path::new(&path)).await?),
            None => None,
        };

        self.save(
            StateUpdate::new()
                .set("buildurl", url)
                .maybe("infourl", info_url)
                .maybe("cfgurl", cfg_url),
        )?;
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // run
    // -----------------------------------------------------------------------

    async fn run(&mut self) -> Result<Option<i32>> {
        if let Some(stub) = self.config.stub {
            self.save(StateUpdate::new().set("retcode", stub))?;
            return Ok(Some(stub));
        }

        let state = self.store.state();
        let build_url = state.string("buildurl").ok_or_else(|| {
            CiError::Usage("run is missing \"--buildurl <url>\"".to_string())
        })?;
        let wait = state.flag("wait");
        let request = RunRequest {
            release: state.string("krelease"),
            wait,
            uid: state.string("uid"),
            arch: state.string("kernel_arch"),
            ..RunRequest::new(build_url)
        };
        let base_head = state.string("basehead");
        let build_head = state.string("buildhead");

        let runner_spec = self.config.runner.clone().ok_or_else(|| {
            CiError::Config(
                "no runner configured; pass --runner or add a [runner] section".to_string(),
            )
        })?;
        let mut runner = self.toolbox.runner(&runner_spec)?;

        let mut retcode = runner.run(&request).await?;
        info!(retcode = retcode, build_url = %request.build_url, "Test run finished");

        let jobs = runner.jobs();
        let junit_dir = self.harness.output_dir().map(Path::to_path_buf);
        let mut update = StateUpdate::new();
        for (idx, job) in jobs.iter().enumerate() {
            if let (true, Some(dir)) = (wait, junit_dir.as_deref()) {
                runner.dump_junit_results(job, dir).await?;
            }
            update.push(indexed_key("jobid", idx), job.as_str());
        }
        self.save(update)?;
        self.store.state_mut().insert("jobs", distinct(jobs));

        let attempt = baseline::should_attempt(
            retcode,
            base_head.as_deref(),
            build_head.as_deref(),
            self.config.publisher.is_some(),
        );
        if let (true, Some(publisher_spec)) = (attempt, self.config.publisher.clone()) {
            let publisher = self.toolbox.publisher(&publisher_spec)?;
            let mut base_runner = self.toolbox.runner(&runner_spec)?;
            let request = BaselineRequest {
                base_head: base_head.unwrap_or_default(),
                release: request.release.clone(),
                wait,
                host: runner.last_host(),
            };

            let verdict =
                baseline::run_baseline(base_runner.as_mut(), publisher.as_ref(), &request, retcode)
                    .await?;
            self.save(StateUpdate::new().set("baseretcode", verdict.baseline_code))?;
            retcode = verdict.resolved;
        }

        self.save(StateUpdate::new().set("retcode", retcode))?;
        Ok(Some(retcode))
    }

    // -----------------------------------------------------------------------
    // report
    // -----------------------------------------------------------------------

    async fn report(&mut self) -> Result<Option<i32>> {
        let Some(spec) = self.config.reporter.as_ref() else {
            debug!("No reporter configured");
            return Ok(None);
        };
        let reporter = self.toolbox.reporter(spec)?;
        if self.config.stub.is_some() {
            return Ok(None);
        }
        reporter.report(self.store.state()).await?;
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // cleanup
    // -----------------------------------------------------------------------

    async fn cleanup(&mut self) -> Result<Option<i32>> {
        self.store.clear_persisted_state()?;

        let state = self.store.state();
        let artifacts: Vec<String> = ["buildinfo", "tarpkg"]
            .iter()
            .filter_map(|key| state.string(key))
            .collect();
        let workdir = state.string("workdir").filter(|_| state.flag("wipe"));

        for artifact in artifacts {
            remove_if_present(Path::new(&artifact)).await?;
        }
        if let Some(dir) = workdir {
            let dir = PathBuf::from(dir);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => info!(path = %dir.display(), "Removed working directory"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CiError::file(&dir, e)),
            }
        }
        Ok(None)
    }
}

/// Insertion-ordered, without repeats.
fn distinct(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed artifact");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CiError::file(path, e)),
    }
}
