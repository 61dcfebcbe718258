//! Typed pipeline configuration resolved from the command line and rc file.
//!
//! Collaborator selectors (publisher, runner, reporter) and merge refs are
//! validated here, at the boundary, so a malformed value fails before any
//! stage runs instead of deep inside one.

use crate::error::{CiError, Result};
use kci_state::{RcFile, State};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default rc file location.
pub const DEFAULT_RC: &str = "~/.kcirc";

/// State keys holding file paths that are made absolute on load.
pub const PATH_KEYS: &[&str] = &["baseconfig", "tarpkg", "buildinfo", "buildconf"];

/// State keys holding lists of file paths, made absolute the same way.
pub const PATH_LIST_KEYS: &[&str] = &["result"];

/// Publisher selection: type tag, destination, public base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherSpec {
    pub kind: String,
    pub destination: String,
    pub base_url: String,
}

impl PublisherSpec {
    pub fn new(
        kind: impl Into<String>,
        destination: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            destination: destination.into(),
            base_url: base_url.into(),
        }
    }

    /// From `TYPE DESTINATION BASEURL`.
    pub fn from_args(args: &[String]) -> Result<Self> {
        match args {
            [kind, destination, base_url] => Ok(Self::new(kind, destination, base_url)),
            _ => Err(CiError::Config(
                "publisher takes exactly three values: TYPE DESTINATION BASEURL".to_string(),
            )),
        }
    }

    /// From the rc `[publisher]` section (`type`, `destination`, `baseurl`).
    pub fn from_rc(rc: &RcFile) -> Result<Option<Self>> {
        if !rc.has_section("publisher") {
            return Ok(None);
        }
        let field = |key: &str| {
            rc.get("publisher", key).ok_or_else(|| {
                CiError::Config(format!("[publisher] section is missing '{key}'"))
            })
        };
        Ok(Some(Self::new(
            field("type")?,
            field("destination")?,
            field("baseurl")?,
        )))
    }
}

/// Runner selection: type tag plus free-form string options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerSpec {
    pub kind: String,
    pub options: BTreeMap<String, String>,
}

impl RunnerSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Parse command-line options given as a JSON object of scalars.
    pub fn parse_cli(kind: &str, options: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(options).map_err(|e| {
            CiError::Config(format!("runner options for '{kind}' are not valid JSON: {e}"))
        })?;
        let Value::Object(map) = value else {
            return Err(CiError::Config(format!(
                "runner options for '{kind}' must be a JSON object"
            )));
        };

        let mut spec = Self::new(kind);
        for (key, value) in map {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(CiError::Config(format!(
                        "runner option '{key}' must be a string, number or boolean, got {other}"
                    )))
                }
            };
            spec.options.insert(key, text);
        }
        Ok(spec)
    }

    /// From `TYPE [JSON]`.
    pub fn from_args(args: &[String]) -> Result<Self> {
        match args {
            [kind] => Ok(Self::new(kind.as_str())),
            [kind, options] => Self::parse_cli(kind, options),
            _ => Err(CiError::Config(
                "runner takes a type and an optional JSON object of options".to_string(),
            )),
        }
    }

    /// From the rc `[runner]` section: `type` plus any other options.
    pub fn from_rc(rc: &RcFile) -> Result<Option<Self>> {
        let Some(entries) = rc.section("runner") else {
            return Ok(None);
        };
        let kind = rc
            .get("runner", "type")
            .ok_or_else(|| CiError::Config("[runner] section is missing 'type'".to_string()))?;
        let mut spec = Self::new(kind);
        for (key, value) in entries {
            if key != "type" {
                spec.options.insert(key, value);
            }
        }
        Ok(Some(spec))
    }
}

/// Reporter selection: type tag plus free-form options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReporterSpec {
    pub kind: String,
    pub options: BTreeMap<String, String>,
}

impl ReporterSpec {
    pub fn named(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            options: BTreeMap::new(),
        }
    }

    /// From the rc `[reporter]` section.
    pub fn from_rc(rc: &RcFile) -> Result<Option<Self>> {
        let Some(entries) = rc.section("reporter") else {
            return Ok(None);
        };
        let kind = rc
            .get("reporter", "type")
            .ok_or_else(|| CiError::Config("[reporter] section is missing 'type'".to_string()))?;
        let mut spec = Self::named(kind);
        for (key, value) in entries {
            if key != "type" {
                spec.options.insert(key, value);
            }
        }
        Ok(Some(spec))
    }
}

/// A remote ref merged on top of the base revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRef {
    pub url: String,
    pub git_ref: Option<String>,
}

impl MergeRef {
    pub fn new(url: impl Into<String>, git_ref: Option<&str>) -> Self {
        Self {
            url: url.into(),
            git_ref: git_ref.map(str::to_string),
        }
    }

    /// Parse `URL [REF]`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = text.split_whitespace();
        let url = parts
            .next()
            .ok_or_else(|| CiError::Config("empty merge ref".to_string()))?;
        let git_ref = parts.next();
        if parts.next().is_some() {
            return Err(CiError::Config(format!(
                "merge ref '{text}' must be 'URL [REF]'"
            )));
        }
        Ok(Self::new(url, git_ref))
    }

    /// One entry per rc `[merge-<name>]` section, in file order.
    pub fn from_rc(rc: &RcFile) -> Result<Vec<Self>> {
        rc.sections_with_prefix("merge-")
            .into_iter()
            .map(|section| {
                let url = rc.get(&section, "url").ok_or_else(|| {
                    CiError::Config(format!("[{section}] section is missing 'url'"))
                })?;
                let git_ref = rc.get(&section, "ref");
                Ok(Self::new(url, git_ref.as_deref()))
            })
            .collect()
    }
}

/// Everything the orchestrator needs besides the State.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Stub mode: `None` runs the real collaborators, `Some(n)` makes every
    /// stage write a deterministic synthetic result.
    pub stub: Option<i32>,
    pub publisher: Option<PublisherSpec>,
    pub runner: Option<RunnerSpec>,
    pub reporter: Option<ReporterSpec>,
    pub merge_refs: Vec<MergeRef>,
}

impl PipelineConfig {
    /// Fill selectors the command line left empty from the rc file.
    ///
    /// Merge refs accumulate: command-line refs first, then one per
    /// `[merge-*]` section.
    pub fn resolve(cli: PipelineConfig, rc: &RcFile) -> Result<Self> {
        let publisher = match cli.publisher {
            Some(spec) => Some(spec),
            None => PublisherSpec::from_rc(rc)?,
        };
        let runner = match cli.runner {
            Some(spec) => Some(spec),
            None => RunnerSpec::from_rc(rc)?,
        };
        let reporter = match cli.reporter {
            Some(spec) => Some(spec),
            None => ReporterSpec::from_rc(rc)?,
        };
        let mut merge_refs = cli.merge_refs;
        merge_refs.extend(MergeRef::from_rc(rc)?);

        Ok(Self {
            stub: cli.stub,
            publisher,
            runner,
            reporter,
            merge_refs,
        })
    }
}

/// Make path-valued State entries absolute.
///
/// `workdir` gets a fresh `kci-` temporary directory when nothing supplied
/// one.
pub fn normalize_paths(state: &mut State) -> Result<()> {
    let workdir = match state.string("workdir") {
        Some(dir) => full_path(&dir)?,
        None => {
            let tmp = std::env::temp_dir();
            tempfile::Builder::new()
                .prefix("kci-")
                .tempdir_in(&tmp)
                .map_err(|e| CiError::file(&tmp, e))?
                .keep()
        }
    };
    state.insert("workdir", path_text(&workdir));

    for key in PATH_KEYS {
        if let Some(path) = state.string(key) {
            state.insert(*key, path_text(&full_path(&path)?));
        }
    }
    for key in PATH_LIST_KEYS {
        let paths = state.strings(key);
        if !paths.is_empty() {
            let absolute = paths
                .iter()
                .map(|path| full_path(path).map(|p| path_text(&p)))
                .collect::<Result<Vec<_>>>()?;
            state.insert(*key, absolute);
        }
    }
    Ok(())
}

/// Argument combinations a build cannot start with.
pub fn check_build_args(state: &State) -> Result<()> {
    if state.str("cfgtype") == Some("rh-configs") && !state.is_supplied("rh_configs_glob") {
        return Err(CiError::Usage(
            "--cfgtype rh-configs requires --rh-configs-glob to be set".to_string(),
        ));
    }
    Ok(())
}

/// Absolute form of `path`, with a leading `~` expanded.
pub fn full_path(path: &str) -> Result<PathBuf> {
    let expanded = expand_home(path);
    if expanded.is_absolute() {
        return Ok(expanded);
    }
    let cwd = std::env::current_dir().map_err(|e| CiError::file(Path::new("."), e))?;
    Ok(cwd.join(expanded))
}

/// Expand `~` and `~/...` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        if path == "~" {
            return home;
        }
        if let Some(rest) = path.strip_prefix("~/") {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

pub(crate) fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
