//! KCI - Kernel CI pipeline orchestrator CLI
//!
//! The `kci` command runs one pipeline stage per invocation, or all of them
//! in a row. Stages hand their results to each other through a persisted
//! state record (`--state`).
//!
//! ## Commands
//!
//! - `merge`: Check out the base revision and apply merge refs and patches
//! - `build`: Build and package the kernel
//! - `publish`: Upload the build artifacts
//! - `run`: Test the published build in a remote lab
//! - `report`: Report the results
//! - `cleanup`: Remove artifacts and persisted state
//! - `all`: merge, build, publish, run, report (with `--wait`), cleanup

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kci_ci::config::{full_path, DEFAULT_RC};
use kci_ci::{
    Command, MergeRef, Pipeline, PipelineConfig, PublisherSpec, ReporterSpec, RunnerSpec, Stage,
    Toolbox,
};
use kci_state::{State, StateStore, StoreOptions};
use serde_json::Value;
use std::future::Future;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kci")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Kernel CI pipeline orchestrator", long_about = None)]
struct Cli {
    /// Path to work dir (default: a new temporary directory)
    #[arg(short = 'd', long)]
    workdir: Option<String>,

    /// Clean the build before building, and remove the work dir on cleanup
    #[arg(short, long)]
    wipe: bool,

    /// Directory for storing structured (JUnit XML) stage results
    #[arg(long)]
    junit: Option<String>,

    /// Increase verbosity level (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Path to rc file
    #[arg(long, default_value = DEFAULT_RC)]
    rc: String,

    /// Save/read state from the pipeline-state record
    #[arg(long)]
    state: bool,

    /// Path to the pipeline-state record (default: <rc>.state)
    #[arg(long)]
    state_file: Option<String>,

    /// Stub the stages using the passed in return code
    #[arg(long)]
    test: Option<i32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch a kernel repository, check out a ref and apply changes
    Merge(MergeArgs),

    /// Build the kernel and package it into a tarball
    Build(BuildArgs),

    /// Publish the tarball, config and build information
    Publish(PublishArgs),

    /// Run tests on a published build
    Run(RunArgs),

    /// Report build and test results
    Report(ReportArgs),

    /// Remove build artifacts and persisted state
    Cleanup,

    /// Run merge, build, publish, run, report (with --wait) and cleanup
    All(AllArgs),
}

impl Commands {
    fn command(&self) -> Command {
        match self {
            Commands::Merge(_) => Stage::Merge.into(),
            Commands::Build(_) => Stage::Build.into(),
            Commands::Publish(_) => Stage::Publish.into(),
            Commands::Run(_) => Stage::Run.into(),
            Commands::Report(_) => Stage::Report.into(),
            Commands::Cleanup => Stage::Cleanup.into(),
            Commands::All(_) => Command::All,
        }
    }

    fn apply(&self, state: &mut State, config: &mut PipelineConfig) -> Result<()> {
        match self {
            Commands::Merge(args) => args.apply(state, config),
            Commands::Build(args) => {
                args.apply(state);
                Ok(())
            }
            Commands::Publish(args) => args.apply(state, config),
            Commands::Run(args) => args.apply(state, config),
            Commands::Report(args) => args.apply(state, config),
            Commands::Cleanup => Ok(()),
            Commands::All(all) => {
                all.merge.apply(state, config)?;
                all.build.apply(state);
                all.publish.apply(state, config)?;
                all.run.apply(state, config)?;
                all.report.apply(state, config)
            }
        }
    }
}

#[derive(Args, Debug, Default)]
struct MergeArgs {
    /// Base repo URL
    #[arg(short = 'b', long)]
    baserepo: Option<String>,

    /// Base repo ref to which patches are applied (default: master)
    #[arg(long = "ref")]
    git_ref: Option<String>,

    /// Paths to patch files to apply, in order
    #[arg(long, num_args = 1..)]
    patchlist: Vec<String>,

    /// Patchwork patch URLs to apply, in order
    #[arg(long, num_args = 1..)]
    pw: Vec<String>,

    /// Merge a ref: "URL [REF]" (repeatable)
    #[arg(short = 'm', long = "merge-ref", value_parser = parse_merge_ref)]
    merge_ref: Vec<MergeRef>,

    /// Depth of the base repo clone
    #[arg(long)]
    fetch_depth: Option<String>,
}

impl MergeArgs {
    fn apply(&self, state: &mut State, config: &mut PipelineConfig) -> Result<()> {
        put(state, "baserepo", self.baserepo.clone());
        put(state, "ref", self.git_ref.clone());
        put(state, "patchlist", list(&self.patchlist));
        put(state, "pw", list(&self.pw));
        put(state, "fetch_depth", self.fetch_depth.clone());
        config.merge_refs.extend(self.merge_ref.iter().cloned());
        Ok(())
    }
}

#[derive(Args, Debug, Default)]
struct BuildArgs {
    /// Path to kernel config to use
    #[arg(short = 'c', long)]
    baseconfig: Option<String>,

    /// How to process default config (default: olddefconfig)
    #[arg(long)]
    cfgtype: Option<String>,

    /// Build kernel with debuginfo
    #[arg(long)]
    enable_debuginfo: bool,

    /// Additional options to pass to make
    #[arg(long)]
    makeopts: Option<String>,

    /// Glob pattern to use when choosing the correct kernel config
    /// (required with --cfgtype rh-configs)
    #[arg(long)]
    rh_configs_glob: Option<String>,
}

impl BuildArgs {
    fn apply(&self, state: &mut State) {
        put(state, "baseconfig", self.baseconfig.clone());
        put(state, "cfgtype", self.cfgtype.clone());
        put(state, "enable_debuginfo", self.enable_debuginfo.then_some(true));
        put(state, "makeopts", self.makeopts.clone());
        put(state, "rh_configs_glob", self.rh_configs_glob.clone());
    }
}

#[derive(Args, Debug, Default)]
struct PublishArgs {
    /// Publisher: TYPE DESTINATION BASEURL
    #[arg(
        short = 'p',
        long,
        num_args = 3,
        value_names = ["TYPE", "DESTINATION", "BASEURL"]
    )]
    publisher: Option<Vec<String>>,

    /// Path to tar pkg to publish
    #[arg(long)]
    tarpkg: Option<String>,

    /// Path to accompanying buildinfo
    #[arg(long)]
    buildinfo: Option<String>,
}

impl PublishArgs {
    fn apply(&self, state: &mut State, config: &mut PipelineConfig) -> Result<()> {
        if let Some(args) = &self.publisher {
            config.publisher = Some(PublisherSpec::from_args(args)?);
        }
        put(state, "tarpkg", self.tarpkg.clone());
        put(state, "buildinfo", self.buildinfo.clone());
        Ok(())
    }
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Runner: TYPE [JSON object of options]
    #[arg(short = 'r', long, num_args = 1..=2, value_names = ["TYPE", "OPTIONS"])]
    runner: Option<Vec<String>>,

    /// Build tarpkg url
    #[arg(long)]
    buildurl: Option<String>,

    /// Kernel release version of the build
    #[arg(long)]
    krelease: Option<String>,

    /// Wait for the test run to finish
    #[arg(long)]
    wait: bool,
}

impl RunArgs {
    fn apply(&self, state: &mut State, config: &mut PipelineConfig) -> Result<()> {
        if let Some(args) = &self.runner {
            config.runner = Some(RunnerSpec::from_args(args)?);
        }
        put(state, "buildurl", self.buildurl.clone());
        put(state, "krelease", self.krelease.clone());
        put(state, "wait", self.wait.then_some(true));
        Ok(())
    }
}

#[derive(Args, Debug, Default)]
struct ReportArgs {
    /// Reporter type (default for `report`: stdio)
    #[arg(long)]
    reporter: Option<String>,

    /// Reporter option KEY=VALUE (repeatable)
    #[arg(long = "reporter-opt", value_parser = parse_key_value)]
    reporter_opt: Vec<(String, String)>,

    /// Path to a state file to include in the report (repeatable)
    #[arg(long)]
    result: Vec<String>,
}

impl ReportArgs {
    fn apply(&self, state: &mut State, config: &mut PipelineConfig) -> Result<()> {
        put(state, "result", list(&self.result));
        if let Some(kind) = &self.reporter {
            let mut spec = ReporterSpec::named(kind.as_str());
            spec.options.extend(self.reporter_opt.iter().cloned());
            config.reporter = Some(spec);
        }
        Ok(())
    }
}

#[derive(Args, Debug, Default)]
struct AllArgs {
    #[command(flatten)]
    merge: MergeArgs,

    #[command(flatten)]
    build: BuildArgs,

    #[command(flatten)]
    publish: PublishArgs,

    #[command(flatten)]
    run: RunArgs,

    #[command(flatten)]
    report: ReportArgs,
}

fn parse_merge_ref(value: &str) -> std::result::Result<MergeRef, String> {
    MergeRef::parse(value).map_err(|e| e.to_string())
}

fn parse_key_value(value: &str) -> std::result::Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{value}'"))
}

fn put<V: Into<Value>>(state: &mut State, key: &str, value: Option<V>) {
    if let Some(value) = value {
        state.insert(key, value);
    }
}

fn list(items: &[String]) -> Option<Value> {
    (!items.is_empty()).then(|| Value::from(items.to_vec()))
}

impl Cli {
    /// Command-line values as the highest-precedence State layer, plus the
    /// collaborator selectors given on the command line.
    fn overrides(&self) -> Result<(State, PipelineConfig)> {
        let mut state = State::new();
        let mut config = PipelineConfig {
            stub: self.test,
            ..Default::default()
        };

        put(&mut state, "workdir", self.workdir.clone());
        put(&mut state, "wipe", self.wipe.then_some(true));
        put(&mut state, "junit", self.junit.clone());
        self.command.apply(&mut state, &mut config)?;
        Ok((state, config))
    }

    fn store_options(&self) -> Result<StoreOptions> {
        let rc = full_path(&self.rc)?;
        let mut options = StoreOptions::new(rc).persistent(self.state);
        if let Some(path) = &self.state_file {
            options = options.with_state_path(full_path(path)?);
        }
        Ok(options)
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let command = cli.command.command();
    let (mut state, overrides) = cli.overrides()?;
    let options = cli.store_options()?;
    state.insert("rc", options.rc_path.to_string_lossy().into_owned());

    let store = StateStore::load(options, state).context("Failed to load pipeline state")?;
    let mut config = PipelineConfig::resolve(overrides, store.rc())?;
    if command == Command::Stage(Stage::Report) && config.reporter.is_none() {
        config.reporter = Some(ReporterSpec::named("stdio"));
    }
    debug!(?config, "Resolved pipeline configuration");

    let mut pipeline = Pipeline::new(store, config, Toolbox::builtin(), command)?;
    let outcome = pipeline.execute(command).await;
    if let Some(path) = pipeline.write_report(command)? {
        info!(path = %path.display(), "Stage results written");
    }
    Ok(outcome?)
}

/// Resolves when `signal` reports Ctrl-C. If the handler could not be
/// installed, logs why and never resolves.
async fn interrupted<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = signal.await {
        warn!(error = %err, "Unable to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    kci_ci::init_tracing(cli.json, cli.verbose);

    let retcode = tokio::select! {
        result = run(cli) => result?,
        () = interrupted(tokio::signal::ctrl_c()) => {
            eprintln!("Exited at user request.");
            std::process::exit(1);
        }
    };
    std::process::exit(retcode);
}
