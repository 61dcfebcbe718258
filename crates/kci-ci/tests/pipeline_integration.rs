//! End-to-end pipeline scenarios against the in-memory fakes.
//!
//! Each `execute` call builds a fresh store and pipeline, the way a separate
//! `kci` process would, so facts only flow between calls through the
//! persisted state record.

use kci_ci::fakes::{FakeLab, FAKE_BASE_HEAD, FAKE_KIND};
use kci_ci::{
    CiError, Command, MergeRef, Pipeline, PipelineConfig, PublisherSpec, ReporterSpec, RunnerSpec,
    Stage,
};
use kci_state::{State, StateStore, StoreOptions};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

struct Workspace {
    dir: tempfile::TempDir,
    options: StoreOptions,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let rc = dir.path().join("kcirc");
        fs::write(&rc, "[config]\nbaserepo = git://example.org/linux.git\n").unwrap();
        let options = StoreOptions::new(rc).persistent(true);
        Self { dir, options }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn workdir(&self) -> PathBuf {
        self.path("work")
    }

    /// Command-line values every invocation starts from.
    fn cli(&self) -> State {
        let mut state = State::new();
        state.insert("workdir", self.workdir().to_string_lossy().into_owned());
        state
    }

    fn pipeline(
        &self,
        lab: &FakeLab,
        cli: State,
        config: PipelineConfig,
        command: Command,
    ) -> kci_ci::Result<Pipeline> {
        let store = StateStore::load(self.options.clone(), cli)?;
        Pipeline::new(store, config, lab.toolbox(), command)
    }

    async fn execute(
        &self,
        lab: &FakeLab,
        cli: State,
        config: PipelineConfig,
        command: impl Into<Command>,
    ) -> kci_ci::Result<i32> {
        let command = command.into();
        let mut pipeline = self.pipeline(lab, cli, config, command)?;
        let retcode = pipeline.execute(command).await?;
        pipeline.write_report(command)?;
        Ok(retcode)
    }

    /// What the next invocation would load.
    fn persisted(&self) -> State {
        StateStore::load(self.options.clone(), State::new())
            .unwrap()
            .state()
            .clone()
    }

    fn record(&self) -> String {
        fs::read_to_string(&self.options.state_path).unwrap_or_default()
    }
}

fn fake_config() -> PipelineConfig {
    PipelineConfig {
        publisher: Some(PublisherSpec::new(FAKE_KIND, "/unused", "http://pub")),
        runner: Some(RunnerSpec::new(FAKE_KIND)),
        reporter: Some(ReporterSpec::named(FAKE_KIND)),
        ..Default::default()
    }
}

fn stub_config(stub: i32) -> PipelineConfig {
    PipelineConfig {
        stub: Some(stub),
        ..fake_config()
    }
}

// ---------------------------------------------------------------------------
// merge
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_merge_without_changes_is_a_baseline_run() {
    let ws = Workspace::new();
    let lab = FakeLab::new();

    let retcode = ws
        .execute(&lab, ws.cli(), fake_config(), Stage::Merge)
        .await
        .unwrap();
    assert_eq!(retcode, 0);

    let state = ws.persisted();
    assert_eq!(state.str("uid"), Some("[baseline]"));
    assert_eq!(state.str("basehead"), Some(FAKE_BASE_HEAD));
    assert_eq!(state.str("buildhead"), Some(FAKE_BASE_HEAD));
    assert_eq!(state.str("baserepo"), Some("git://example.org/linux.git"));
    assert!(state.str("commitdate").is_some());
    assert!(Path::new(state.str("buildinfo").unwrap()).exists());
}

#[tokio::test]
async fn test_merge_ref_and_local_patches_are_applied_in_order() {
    let ws = Workspace::new();
    let lab = FakeLab::new();
    let mut cli = ws.cli();
    cli.insert("patchlist", json!(["0001-fix.patch", "0002-feature.patch"]));
    let config = PipelineConfig {
        merge_refs: vec![MergeRef::new("git://example.org/net.git", Some("next"))],
        ..fake_config()
    };

    let retcode = ws.execute(&lab, cli, config, Stage::Merge).await.unwrap();
    assert_eq!(retcode, 0);

    let state = ws.persisted();
    assert_eq!(state.str("uid"), Some("[git] [local patch]"));
    assert_eq!(state.str("mergerepo_00"), Some("git://example.org/net.git"));
    assert_eq!(state.str("mergehead_00"), Some(FAKE_BASE_HEAD));
    assert_eq!(
        state.get("localpatches"),
        Some(&json!(["0001-fix.patch", "0002-feature.patch"]))
    );
    assert_eq!(state.str("buildhead"), Some("0003head"));

    let calls = lab.calls();
    let merged: Vec<&str> = calls
        .iter()
        .map(String::as_str)
        .filter(|c| c.starts_with("merge_"))
        .collect();
    assert_eq!(merged.len(), 3);
    assert_eq!(merged[0], "merge_git_ref git://example.org/net.git next");
    // Local patches are handed over as absolute paths.
    assert!(merged[1].starts_with("merge_patch_file /"));
    assert!(merged[1].ends_with("0001-fix.patch"));
    assert!(merged[2].ends_with("0002-feature.patch"));
}

#[tokio::test]
async fn test_each_merged_ref_tags_the_uid() {
    let ws = Workspace::new();
    let lab = FakeLab::new();
    let mut cli = ws.cli();
    cli.insert(
        "pw",
        json!([
            "https://pw.example.org/patch/1",
            "https://pw.example.org/patch/2"
        ]),
    );
    let config = PipelineConfig {
        merge_refs: vec![
            MergeRef::new("git://example.org/net.git", Some("next")),
            MergeRef::new("git://example.org/mm.git", None),
        ],
        ..fake_config()
    };

    let retcode = ws.execute(&lab, cli, config, Stage::Merge).await.unwrap();
    assert_eq!(retcode, 0);

    let state = ws.persisted();
    assert_eq!(state.str("uid"), Some("[git] [git] [patchwork]"));
    assert_eq!(state.str("mergerepo_01"), Some("git://example.org/mm.git"));
    assert_eq!(
        state.str("patchwork_01"),
        Some("https://pw.example.org/patch/2")
    );
}

#[tokio::test]
async fn test_merge_conflict_returns_code_and_skips_patches() {
    let ws = Workspace::new();
    let lab = FakeLab::new().with_merge_code(1);
    let mut cli = ws.cli();
    cli.insert("patchlist", json!(["0001-fix.patch"]));
    let config = PipelineConfig {
        merge_refs: vec![
            MergeRef::new("git://example.org/a.git", None),
            MergeRef::new("git://example.org/b.git", None),
        ],
        ..fake_config()
    };

    let retcode = ws.execute(&lab, cli, config, Stage::Merge).await.unwrap();
    assert_eq!(retcode, 1);

    assert!(!lab.calls().iter().any(|c| c.starts_with("merge_patch_file")));
    assert_eq!(
        lab.calls()
            .iter()
            .filter(|c| c.starts_with("merge_git_ref"))
            .count(),
        1
    );
    let state = ws.persisted();
    assert_eq!(state.str("mergerepo_00"), Some("git://example.org/a.git"));
    assert!(state.str("mergerepo_01").is_none());
    assert!(state.str("uid").is_none());
}

#[tokio::test]
async fn test_failed_patch_persists_merge_log_and_propagates() {
    let ws = Workspace::new();
    let lab = FakeLab::new().failing_patches();
    let mut cli = ws.cli();
    cli.insert("pw", json!(["https://patchwork.example.org/patch/1/"]));

    let err = ws
        .execute(&lab, cli, fake_config(), Stage::Merge)
        .await
        .unwrap_err();
    assert!(matches!(err, CiError::Collaborator(_)));

    let state = ws.persisted();
    let merge_log = ws.workdir().join("merge.log");
    assert_eq!(state.str("mergelog"), Some(merge_log.to_str().unwrap()));
    assert_eq!(
        state.str("patchwork_00"),
        Some("https://patchwork.example.org/patch/1/")
    );
}

// ---------------------------------------------------------------------------
// build
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_build_stub_zero_persists_only_buildhead() {
    let ws = Workspace::new();
    let lab = FakeLab::new();
    let mut cli = ws.cli();
    cli.insert("buildhead", "abc123");

    ws.execute(&lab, cli, stub_config(0), Stage::Build)
        .await
        .unwrap();

    let state = ws.persisted();
    assert_eq!(state.str("buildhead"), Some("abc123"));
    assert!(state.get("buildlog").is_none());
    assert!(!ws.record().contains("buildlog"));
}

#[tokio::test]
async fn test_build_stub_nonzero_persists_stub_log() {
    let ws = Workspace::new();
    let lab = FakeLab::new();

    ws.execute(&lab, ws.cli(), stub_config(1), Stage::Build)
        .await
        .unwrap();

    assert_eq!(ws.persisted().str("buildlog"), Some("stub"));
    assert!(lab.calls().is_empty());
}

#[tokio::test]
async fn test_build_names_artifacts_after_buildhead() {
    let ws = Workspace::new();
    let lab = FakeLab::new();
    let config = PipelineConfig {
        merge_refs: vec![MergeRef::new("git://example.org/net.git", None)],
        ..fake_config()
    };

    ws.execute(&lab, ws.cli(), config, Stage::Merge)
        .await
        .unwrap();
    ws.execute(&lab, ws.cli(), fake_config(), Stage::Build)
        .await
        .unwrap();

    let state = ws.persisted();
    let workdir = ws.workdir();
    let tarball = workdir.join("0001head.tar.gz");
    assert_eq!(state.str("tarpkg"), Some(tarball.to_str().unwrap()));
    assert!(tarball.exists());
    assert!(!workdir.join("linux-fake.tar.gz").exists());
    assert_eq!(
        state.str("buildinfo"),
        Some(workdir.join("0001head.csv").to_str().unwrap())
    );
    assert_eq!(
        fs::read_to_string(workdir.join("0001head.config")).unwrap(),
        "CONFIG_FAKE=y\n"
    );
    assert_eq!(state.str("krelease"), Some("5.0.0-fake"));
    assert_eq!(state.str("kernel_arch"), Some("x86_64"));
}

#[tokio::test]
async fn test_build_without_buildhead_uses_timestamped_names() {
    let ws = Workspace::new();
    let lab = FakeLab::new();

    ws.execute(&lab, ws.cli(), fake_config(), Stage::Build)
        .await
        .unwrap();

    let state = ws.persisted();
    let tarball = PathBuf::from(state.str("tarpkg").unwrap());
    let name = tarball.file_name().unwrap().to_str().unwrap();
    let (stamp, rest) = name.split_once('-').unwrap();
    assert_eq!(stamp.len(), 14);
    assert!(stamp.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(rest, "linux-fake.tar.gz");
    assert!(state.str("buildconf").unwrap().ends_with("-linux-fake.config"));
}

#[tokio::test]
async fn test_build_wipe_cleans_source_first() {
    let ws = Workspace::new();
    let lab = FakeLab::new();
    let mut cli = ws.cli();
    cli.insert("wipe", true);

    ws.execute(&lab, cli, fake_config(), Stage::Build)
        .await
        .unwrap();

    assert_eq!(lab.calls()[..2], ["clean_source", "make_package"]);
}

#[tokio::test]
async fn test_failed_build_persists_build_log() {
    let ws = Workspace::new();
    let lab = FakeLab::new().failing_build();

    let err = ws
        .execute(&lab, ws.cli(), fake_config(), Stage::Build)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("kernel build failed"));

    let log = ws.workdir().join("build.log");
    assert_eq!(ws.persisted().str("buildlog"), Some(log.to_str().unwrap()));
}

#[tokio::test]
async fn test_rh_configs_without_glob_is_rejected_up_front() {
    let ws = Workspace::new();
    let lab = FakeLab::new();
    let mut cli = ws.cli();
    cli.insert("cfgtype", "rh-configs");

    let err = ws
        .pipeline(&lab, cli, fake_config(), Command::All)
        .unwrap_err();
    assert!(matches!(err, CiError::Usage(_)));
}

// ---------------------------------------------------------------------------
// publish
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_publish_without_tarball_is_fatal_even_when_recording() {
    let ws = Workspace::new();
    let lab = FakeLab::new();
    let mut cli = ws.cli();
    cli.insert("junit", ws.path("junit").to_string_lossy().into_owned());

    let mut pipeline = ws
        .pipeline(&lab, cli, fake_config(), Stage::Publish.into())
        .unwrap();
    let err = pipeline
        .execute(Stage::Publish.into())
        .await
        .unwrap_err();

    assert!(matches!(err, CiError::Usage(_)));
    assert!(pipeline.harness().records().is_empty());
}

#[tokio::test]
async fn test_publish_uploads_every_artifact() {
    let ws = Workspace::new();
    let lab = FakeLab::new();

    ws.execute(&lab, ws.cli(), fake_config(), Stage::Merge)
        .await
        .unwrap();
    ws.execute(&lab, ws.cli(), fake_config(), Stage::Build)
        .await
        .unwrap();
    ws.execute(&lab, ws.cli(), fake_config(), Stage::Publish)
        .await
        .unwrap();

    let state = ws.persisted();
    let head = FAKE_BASE_HEAD;
    assert_eq!(
        state.str("buildurl"),
        Some(format!("http://pub/{head}.tar.gz").as_str())
    );
    assert_eq!(
        state.str("infourl"),
        Some(format!("http://pub/{head}.csv").as_str())
    );
    assert_eq!(
        state.str("cfgurl"),
        Some(format!("http://pub/{head}.config").as_str())
    );
    assert_eq!(lab.published().len(), 3);
}

// ---------------------------------------------------------------------------
// run and baseline fallback
// ---------------------------------------------------------------------------

fn run_cli(ws: &Workspace, base_head: &str, build_head: &str) -> State {
    let mut cli = ws.cli();
    cli.insert("buildurl", format!("http://pub/{build_head}.tar.gz"));
    cli.insert("basehead", base_head);
    cli.insert("buildhead", build_head);
    cli.insert("krelease", "5.0.0");
    cli
}

#[tokio::test]
async fn test_failing_baseline_overrides_run_failure() {
    let ws = Workspace::new();
    let lab = FakeLab::new().with_run_codes([1, 1]);

    let retcode = ws
        .execute(&lab, run_cli(&ws, "base0", "head1"), fake_config(), Stage::Run)
        .await
        .unwrap();
    assert_eq!(retcode, 0);

    let runs = lab.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[1].build_url, "http://pub/base0.tar.gz");
    assert_eq!(runs[1].uid.as_deref(), Some("baseline check"));
    assert_eq!(runs[1].host.as_deref(), Some("lab-host-1"));
    assert_eq!(runs[1].release.as_deref(), Some("5.0.0"));
    assert!(!runs[1].reschedule);
    assert!(runs[0].reschedule);

    let state = ws.persisted();
    assert_eq!(state.int("baseretcode"), Some(1));
    assert_eq!(state.int("retcode"), Some(0));
}

#[tokio::test]
async fn test_passing_baseline_keeps_run_failure() {
    let ws = Workspace::new();
    let lab = FakeLab::new().with_run_codes([1, 0]);

    let retcode = ws
        .execute(&lab, run_cli(&ws, "base0", "head1"), fake_config(), Stage::Run)
        .await
        .unwrap();
    assert_eq!(retcode, 1);
    assert_eq!(ws.persisted().int("baseretcode"), Some(0));
    assert_eq!(ws.persisted().int("retcode"), Some(1));
}

#[tokio::test]
async fn test_no_baseline_when_heads_match() {
    let ws = Workspace::new();
    let lab = FakeLab::new().with_run_codes([1]);

    let retcode = ws
        .execute(&lab, run_cli(&ws, "same", "same"), fake_config(), Stage::Run)
        .await
        .unwrap();
    assert_eq!(retcode, 1);
    assert_eq!(lab.runs().len(), 1);
    assert!(ws.persisted().get("baseretcode").is_none());
}

#[tokio::test]
async fn test_no_baseline_without_publisher() {
    let ws = Workspace::new();
    let lab = FakeLab::new().with_run_codes([1]);
    let config = PipelineConfig {
        publisher: None,
        ..fake_config()
    };

    let retcode = ws
        .execute(&lab, run_cli(&ws, "base0", "head1"), config, Stage::Run)
        .await
        .unwrap();
    assert_eq!(retcode, 1);
    assert_eq!(lab.runs().len(), 1);
}

#[tokio::test]
async fn test_jobs_are_recorded_in_submission_order() {
    let ws = Workspace::new();
    let lab = FakeLab::new().with_jobs_per_run(3);
    let junit = ws.path("junit");
    let mut cli = run_cli(&ws, "same", "same");
    cli.insert("wait", true);
    cli.insert("junit", junit.to_string_lossy().into_owned());

    ws.execute(&lab, cli, fake_config(), Stage::Run)
        .await
        .unwrap();

    let state = ws.persisted();
    assert_eq!(state.str("jobid_00"), Some("J:1"));
    assert_eq!(state.str("jobid_02"), Some("J:3"));
    assert_eq!(state.get("jobs"), Some(&json!(["J:1", "J:2", "J:3"])));
    assert!(junit.join("J_1.xml").exists());
    assert!(junit.join("J_3.xml").exists());
    assert!(junit.join("run.xml").exists());
}

#[tokio::test]
async fn test_run_without_build_url_is_a_usage_error() {
    let ws = Workspace::new();
    let lab = FakeLab::new();

    let err = ws
        .execute(&lab, ws.cli(), fake_config(), Stage::Run)
        .await
        .unwrap_err();
    assert!(matches!(err, CiError::Usage(_)));
    assert!(lab.runs().is_empty());
}

// ---------------------------------------------------------------------------
// report
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unknown_reporter_fails_before_any_stage() {
    let ws = Workspace::new();
    let lab = FakeLab::new();
    let config = PipelineConfig {
        reporter: Some(ReporterSpec::named("carrier-pigeon")),
        ..fake_config()
    };

    let err = ws
        .pipeline(&lab, ws.cli(), config, Command::All)
        .unwrap_err();
    assert!(matches!(err, CiError::Config(_)));
    assert!(lab.calls().is_empty());
}

#[tokio::test]
async fn test_report_hands_state_to_reporter() {
    let ws = Workspace::new();
    let lab = FakeLab::new();
    let mut cli = ws.cli();
    cli.insert("uid", "[git]");

    ws.execute(&lab, cli, fake_config(), Stage::Report)
        .await
        .unwrap();

    let reports = lab.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].str("uid"), Some("[git]"));
}

#[tokio::test]
async fn test_report_without_reporter_is_a_noop() {
    let ws = Workspace::new();
    let lab = FakeLab::new();
    let config = PipelineConfig {
        reporter: None,
        ..fake_config()
    };

    let retcode = ws
        .execute(&lab, ws.cli(), config, Stage::Report)
        .await
        .unwrap();
    assert_eq!(retcode, 0);
    assert!(lab.calls().is_empty());
}

// ---------------------------------------------------------------------------
// cleanup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cleanup_removes_artifacts_record_and_workdir() {
    let ws = Workspace::new();
    let lab = FakeLab::new();

    ws.execute(&lab, ws.cli(), fake_config(), Stage::Merge)
        .await
        .unwrap();
    ws.execute(&lab, ws.cli(), fake_config(), Stage::Build)
        .await
        .unwrap();
    let tarball = PathBuf::from(ws.persisted().str("tarpkg").unwrap());
    assert!(tarball.exists());

    let mut cli = ws.cli();
    cli.insert("wipe", true);
    ws.execute(&lab, cli, fake_config(), Stage::Cleanup)
        .await
        .unwrap();

    assert!(!tarball.exists());
    assert!(!ws.workdir().exists());
    let state = ws.persisted();
    assert!(state.get("tarpkg").is_none());
    assert_eq!(state.str("baserepo"), Some("git://example.org/linux.git"));
}

#[tokio::test]
async fn test_cleanup_tolerates_missing_artifacts() {
    let ws = Workspace::new();
    let lab = FakeLab::new();
    let mut cli = ws.cli();
    cli.insert("tarpkg", ws.path("gone.tar.gz").to_string_lossy().into_owned());
    cli.insert("buildinfo", ws.path("gone.csv").to_string_lossy().into_owned());

    let retcode = ws
        .execute(&lab, cli, fake_config(), Stage::Cleanup)
        .await
        .unwrap();
    assert_eq!(retcode, 0);
}

// ---------------------------------------------------------------------------
// all
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_all_runs_every_stage_and_reports_when_waiting() {
    let ws = Workspace::new();
    let lab = FakeLab::new();
    let mut cli = ws.cli();
    cli.insert("wait", true);

    let retcode = ws
        .execute(&lab, cli, fake_config(), Command::All)
        .await
        .unwrap();
    assert_eq!(retcode, 0);

    let reports = lab.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(
        reports[0].str("buildurl"),
        Some(format!("http://pub/{FAKE_BASE_HEAD}.tar.gz").as_str())
    );
    assert_eq!(reports[0].get("jobs"), Some(&json!(["J:1"])));

    // Cleanup ran last.
    assert!(!ws.workdir().join(format!("{FAKE_BASE_HEAD}.tar.gz")).exists());
    assert!(ws.persisted().get("buildhead").is_none());
}

#[tokio::test]
async fn test_all_with_stubbed_run_code_and_no_wait_skips_report() {
    let ws = Workspace::new();
    let lab = FakeLab::new();
    let mut cli = ws.cli();
    cli.insert("tarpkg", ws.path("stub.tar.gz").to_string_lossy().into_owned());

    let retcode = ws
        .execute(&lab, cli, stub_config(2), Command::All)
        .await
        .unwrap();

    assert_eq!(retcode, 2);
    assert!(lab.reports().is_empty());
    assert!(!lab.calls().iter().any(|c| c == "report"));
}

#[tokio::test]
async fn test_recorded_failures_do_not_stop_later_stages() {
    let ws = Workspace::new();
    let lab = FakeLab::new().failing_patches();
    let junit = ws.path("junit");
    let mut cli = ws.cli();
    cli.insert("patchlist", json!(["0001-broken.patch"]));
    cli.insert("junit", junit.to_string_lossy().into_owned());

    let mut pipeline = ws
        .pipeline(&lab, cli, fake_config(), Command::All)
        .unwrap();
    pipeline.execute(Command::All).await.unwrap();
    let report = pipeline.write_report(Command::All).unwrap().unwrap();

    let records = pipeline.harness().records();
    let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["merge", "build", "publish", "run"]);
    assert!(records[0]
        .failure
        .as_deref()
        .unwrap()
        .contains("does not apply"));
    assert!(lab.calls().iter().any(|c| c == "make_package"));
    assert_eq!(lab.runs().len(), 1);

    assert_eq!(report, junit.join("all.xml"));
    let xml = fs::read_to_string(report).unwrap();
    assert!(xml.contains("name=\"merge\""));
    assert!(xml.contains("<failure"));
}

#[tokio::test]
async fn test_unrecorded_failures_stop_the_invocation() {
    let ws = Workspace::new();
    let lab = FakeLab::new().failing_patches();
    let mut cli = ws.cli();
    cli.insert("patchlist", json!(["0001-broken.patch"]));

    let err = ws
        .execute(&lab, cli, fake_config(), Command::All)
        .await
        .unwrap_err();
    assert!(matches!(err, CiError::Collaborator(_)));
    assert!(!lab.calls().iter().any(|c| c == "make_package"));
}

// ---------------------------------------------------------------------------
// stub mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stub_stages_are_idempotent() {
    for stage in [Stage::Merge, Stage::Build, Stage::Run] {
        let ws = Workspace::new();
        let lab = FakeLab::new();
        let mut cli = ws.cli();
        cli.insert("buildhead", "abc123");

        ws.execute(&lab, cli.clone(), stub_config(3), stage)
            .await
            .unwrap();
        let first = ws.record();
        ws.execute(&lab, cli, stub_config(3), stage)
            .await
            .unwrap();

        assert!(!first.is_empty(), "{stage} wrote nothing");
        assert_eq!(first, ws.record(), "{stage} is not idempotent");
    }
}

#[tokio::test]
async fn test_stub_merge_writes_stub_log() {
    let ws = Workspace::new();
    let lab = FakeLab::new();

    ws.execute(&lab, ws.cli(), stub_config(1), Stage::Merge)
        .await
        .unwrap();

    let log = ws.workdir().join("merge.log");
    assert_eq!(fs::read_to_string(&log).unwrap(), "stub");
    assert_eq!(ws.persisted().str("mergelog"), Some(log.to_str().unwrap()));
}

#[tokio::test]
async fn test_stub_publish_records_placeholder_url() {
    let ws = Workspace::new();
    let lab = FakeLab::new();
    let mut cli = ws.cli();
    cli.insert("tarpkg", "k.tar.gz");

    ws.execute(&lab, cli, stub_config(0), Stage::Publish)
        .await
        .unwrap();

    assert_eq!(ws.persisted().str("buildurl"), Some("some.url.com"));
    assert!(lab.published().is_empty());
}
