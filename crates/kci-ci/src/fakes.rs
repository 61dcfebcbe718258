//! In-memory collaborator fakes (testing only)
//!
//! All fakes created from one [`FakeLab`] share its settings and its call
//! log, so a test can script collaborator behaviour up front and inspect
//! what the pipeline asked for afterwards. Files the real engines would
//! produce (build info, tarball, config, logs) are written into the working
//! directory so artifact handling runs for real.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use async_trait::async_trait;
use kci_state::State;

use crate::collab::*;
use crate::config::{PublisherSpec, ReporterSpec, RunnerSpec};
use crate::toolbox::Toolbox;

/// Commit id every fake checkout starts from.
pub const FAKE_BASE_HEAD: &str = "0000base";

/// Type tag the fakes are registered under.
pub const FAKE_KIND: &str = "fake";

#[derive(Debug)]
struct LabState {
    calls: Vec<String>,
    merge_code: i32,
    fail_patches: bool,
    fail_build: bool,
    run_codes: VecDeque<i32>,
    jobs_per_run: usize,
    next_job: usize,
    host: String,
    runs: Vec<RunRequest>,
    published: Vec<PathBuf>,
    reports: Vec<State>,
}

impl Default for LabState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            merge_code: 0,
            fail_patches: false,
            fail_build: false,
            run_codes: VecDeque::new(),
            jobs_per_run: 1,
            next_job: 1,
            host: "lab-host-1".to_string(),
            runs: Vec::new(),
            published: Vec::new(),
            reports: Vec::new(),
        }
    }
}

/// Shared script and call log for the fakes.
#[derive(Debug, Clone, Default)]
pub struct FakeLab {
    inner: Arc<Mutex<LabState>>,
}

impl FakeLab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Result code of every `merge_git_ref`.
    pub fn with_merge_code(self, code: i32) -> Self {
        self.inner.lock().unwrap().merge_code = code;
        self
    }

    /// Make every local and patchwork patch fail to apply.
    pub fn failing_patches(self) -> Self {
        self.inner.lock().unwrap().fail_patches = true;
        self
    }

    pub fn failing_build(self) -> Self {
        self.inner.lock().unwrap().fail_build = true;
        self
    }

    /// Result codes of successive runs; runs past the end return 0.
    pub fn with_run_codes(self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.inner.lock().unwrap().run_codes.extend(codes);
        self
    }

    pub fn with_jobs_per_run(self, jobs: usize) -> Self {
        self.inner.lock().unwrap().jobs_per_run = jobs;
        self
    }

    /// Every collaborator call, in order.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn runs(&self) -> Vec<RunRequest> {
        self.inner.lock().unwrap().runs.clone()
    }

    pub fn published(&self) -> Vec<PathBuf> {
        self.inner.lock().unwrap().published.clone()
    }

    /// States handed to the fake reporter.
    pub fn reports(&self) -> Vec<State> {
        self.inner.lock().unwrap().reports.clone()
    }

    /// The builtin toolbox plus fakes for every collaborator, registered
    /// under [`FAKE_KIND`].
    pub fn toolbox(&self) -> Toolbox {
        let merge = self.clone();
        let build = self.clone();
        let publish = self.clone();
        let run = self.clone();
        let report = self.clone();
        Toolbox::builtin()
            .with_merge_engine(move |spec: &TreeSpec| {
                Ok(Box::new(FakeTree::new(merge.clone(), spec.clone())) as Box<dyn MergeEngine>)
            })
            .with_build_engine(move |spec: &BuildSpec| {
                Ok(Box::new(FakeBuilder::new(build.clone(), spec.clone())) as Box<dyn BuildEngine>)
            })
            .with_publisher(FAKE_KIND, move |spec: &PublisherSpec| {
                Ok(Box::new(FakePublisher::new(publish.clone(), &spec.base_url))
                    as Box<dyn Publisher>)
            })
            .with_runner(FAKE_KIND, move |_: &RunnerSpec| {
                Ok(Box::new(FakeRunner::new(run.clone())) as Box<dyn Runner>)
            })
            .with_reporter(FAKE_KIND, move |_: &ReporterSpec| {
                Ok(Box::new(FakeReporter::new(report.clone())) as Box<dyn Reporter>)
            })
    }

    fn log(&self, call: String) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

// ---------------------------------------------------------------------------
// FakeTree
// ---------------------------------------------------------------------------

/// Merge engine whose head changes with every applied change.
#[derive(Debug)]
pub struct FakeTree {
    lab: FakeLab,
    spec: TreeSpec,
    applied: Vec<String>,
}

impl FakeTree {
    pub fn new(lab: FakeLab, spec: TreeSpec) -> Self {
        Self {
            lab,
            spec,
            applied: Vec::new(),
        }
    }

    fn fail_patches(&self) -> bool {
        self.lab.inner.lock().unwrap().fail_patches
    }
}

#[async_trait]
impl MergeEngine for FakeTree {
    async fn checkout(&mut self) -> anyhow::Result<String> {
        self.lab.log(format!(
            "checkout {}",
            self.spec.base_repo.as_deref().unwrap_or("-")
        ));
        tokio::fs::create_dir_all(&self.spec.workdir)
            .await
            .with_context(|| format!("creating {}", self.spec.workdir.display()))?;
        Ok(FAKE_BASE_HEAD.to_string())
    }

    async fn commit_date(&self, revision: &str) -> anyhow::Result<String> {
        self.lab.log(format!("commit_date {revision}"));
        Ok("2024-01-01 00:00:00 +0000".to_string())
    }

    async fn merge_git_ref(
        &mut self,
        url: &str,
        git_ref: Option<&str>,
    ) -> anyhow::Result<MergeOutcome> {
        self.lab
            .log(format!("merge_git_ref {url} {}", git_ref.unwrap_or("master")));
        let code = self.lab.inner.lock().unwrap().merge_code;
        if code != 0 {
            return Ok(MergeOutcome {
                code,
                info: format!("conflict merging {url}"),
            });
        }
        self.applied.push(url.to_string());
        Ok(MergeOutcome::clean(url))
    }

    async fn merge_patch_file(&mut self, path: &Path) -> anyhow::Result<()> {
        self.lab.log(format!("merge_patch_file {}", path.display()));
        if self.fail_patches() {
            bail!("patch {} does not apply", path.display());
        }
        self.applied.push(path.display().to_string());
        Ok(())
    }

    async fn merge_patchwork_patch(&mut self, url: &str) -> anyhow::Result<()> {
        self.lab.log(format!("merge_patchwork_patch {url}"));
        if self.fail_patches() {
            bail!("patchwork patch {url} does not apply");
        }
        self.applied.push(url.to_string());
        Ok(())
    }

    fn path(&self) -> PathBuf {
        self.spec.workdir.clone()
    }

    async fn dump_info(&self) -> anyhow::Result<Option<PathBuf>> {
        let path = self.spec.workdir.join("buildinfo.csv");
        let mut content = format!(
            "base,{},{}\n",
            self.spec.base_repo.as_deref().unwrap_or("-"),
            FAKE_BASE_HEAD
        );
        for change in &self.applied {
            content.push_str(&format!("change,{change}\n"));
        }
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(Some(path))
    }

    async fn commit_hash(&self) -> anyhow::Result<String> {
        if self.applied.is_empty() {
            Ok(FAKE_BASE_HEAD.to_string())
        } else {
            Ok(format!("{:04}head", self.applied.len()))
        }
    }

    fn merge_log(&self) -> PathBuf {
        self.spec.workdir.join("merge.log")
    }
}

// ---------------------------------------------------------------------------
// FakeBuilder
// ---------------------------------------------------------------------------

/// Build engine that writes a small tarball and config into the source dir.
#[derive(Debug)]
pub struct FakeBuilder {
    lab: FakeLab,
    spec: BuildSpec,
}

impl FakeBuilder {
    pub fn new(lab: FakeLab, spec: BuildSpec) -> Self {
        Self { lab, spec }
    }
}

#[async_trait]
impl BuildEngine for FakeBuilder {
    async fn clean_source(&mut self) -> anyhow::Result<()> {
        self.lab.log("clean_source".to_string());
        Ok(())
    }

    async fn make_package(&mut self) -> anyhow::Result<PathBuf> {
        self.lab.log("make_package".to_string());
        let fail = self.lab.inner.lock().unwrap().fail_build;
        tokio::fs::create_dir_all(&self.spec.source_dir).await?;
        if fail {
            tokio::fs::write(self.build_log(), "error: compilation failed\n").await?;
            bail!("kernel build failed");
        }
        tokio::fs::write(self.config_path(), "CONFIG_FAKE=y\n").await?;
        let tarball = self.spec.source_dir.join("linux-fake.tar.gz");
        tokio::fs::write(&tarball, b"fake kernel").await?;
        Ok(tarball)
    }

    fn build_log(&self) -> PathBuf {
        self.spec.source_dir.join("build.log")
    }

    fn config_path(&self) -> PathBuf {
        self.spec.source_dir.join(".config")
    }

    async fn release(&self) -> anyhow::Result<String> {
        Ok("5.0.0-fake".to_string())
    }

    fn arch(&self) -> String {
        "x86_64".to_string()
    }
}

// ---------------------------------------------------------------------------
// FakePublisher
// ---------------------------------------------------------------------------

/// Publisher that records paths and derives URLs without copying anything.
#[derive(Debug)]
pub struct FakePublisher {
    lab: FakeLab,
    base_url: String,
}

impl FakePublisher {
    pub fn new(lab: FakeLab, base_url: &str) -> Self {
        Self {
            lab,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, local: &Path) -> anyhow::Result<String> {
        let name = local
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("no file name in {}", local.display()))?;
        self.lab.log(format!("publish {name}"));
        self.lab
            .inner
            .lock()
            .unwrap()
            .published
            .push(local.to_path_buf());
        Ok(self.derive_url(name))
    }

    fn derive_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.base_url, file_name)
    }
}

// ---------------------------------------------------------------------------
// FakeRunner
// ---------------------------------------------------------------------------

/// Runner that hands out scripted result codes and sequential job ids.
#[derive(Debug)]
pub struct FakeRunner {
    lab: FakeLab,
    jobs: Vec<String>,
}

impl FakeRunner {
    pub fn new(lab: FakeLab) -> Self {
        Self {
            lab,
            jobs: Vec::new(),
        }
    }
}

#[async_trait]
impl Runner for FakeRunner {
    async fn run(&mut self, request: &RunRequest) -> anyhow::Result<i32> {
        self.lab.log(format!("run {}", request.build_url));
        let mut lab = self.lab.inner.lock().unwrap();
        lab.runs.push(request.clone());
        for _ in 0..lab.jobs_per_run {
            self.jobs.push(format!("J:{}", lab.next_job));
            lab.next_job += 1;
        }
        Ok(lab.run_codes.pop_front().unwrap_or(0))
    }

    fn jobs(&self) -> Vec<String> {
        self.jobs.clone()
    }

    async fn dump_junit_results(&self, job: &str, dir: &Path) -> anyhow::Result<()> {
        self.lab.log(format!("dump_junit_results {job}"));
        let path = dir.join(format!("{}.xml", job.replace(':', "_")));
        tokio::fs::write(&path, format!("<testsuite name=\"{job}\"/>\n"))
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    fn last_host(&self) -> Option<String> {
        Some(self.lab.inner.lock().unwrap().host.clone())
    }
}

// ---------------------------------------------------------------------------
// FakeReporter
// ---------------------------------------------------------------------------

/// Reporter that keeps a copy of every State it is handed.
#[derive(Debug)]
pub struct FakeReporter {
    lab: FakeLab,
}

impl FakeReporter {
    pub fn new(lab: FakeLab) -> Self {
        Self { lab }
    }
}

#[async_trait]
impl Reporter for FakeReporter {
    async fn report(&self, state: &State) -> anyhow::Result<()> {
        self.lab.log("report".to_string());
        self.lab.inner.lock().unwrap().reports.push(state.clone());
        Ok(())
    }
}
