//! Collaborator registries.
//!
//! Publishers, runners and reporters are selected by a lowercase type tag;
//! merge and build engines have one factory each. Every factory produces a
//! fresh boxed collaborator for the stage that needs it.

use crate::collab::{BuildEngine, BuildSpec, MergeEngine, Publisher, Reporter, Runner, TreeSpec};
use crate::config::{PublisherSpec, ReporterSpec, RunnerSpec};
use crate::error::{CiError, Result};
use crate::publisher::CpPublisher;
use crate::reporter::StdioReporter;
use std::collections::BTreeMap;

pub type MergeFactory = Box<dyn Fn(&TreeSpec) -> anyhow::Result<Box<dyn MergeEngine>> + Send + Sync>;
pub type BuildFactory = Box<dyn Fn(&BuildSpec) -> anyhow::Result<Box<dyn BuildEngine>> + Send + Sync>;
pub type PublisherFactory =
    Box<dyn Fn(&PublisherSpec) -> anyhow::Result<Box<dyn Publisher>> + Send + Sync>;
pub type RunnerFactory = Box<dyn Fn(&RunnerSpec) -> anyhow::Result<Box<dyn Runner>> + Send + Sync>;
pub type ReporterFactory =
    Box<dyn Fn(&ReporterSpec) -> anyhow::Result<Box<dyn Reporter>> + Send + Sync>;

/// The collaborators one pipeline invocation may use.
#[derive(Default)]
pub struct Toolbox {
    merge: Option<MergeFactory>,
    build: Option<BuildFactory>,
    publishers: BTreeMap<String, PublisherFactory>,
    runners: BTreeMap<String, RunnerFactory>,
    reporters: BTreeMap<String, ReporterFactory>,
}

impl Toolbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// The collaborators shipped with kci: the `cp` publisher and the
    /// `stdio` reporter.
    pub fn builtin() -> Self {
        Self::new()
            .with_publisher("cp", |spec: &PublisherSpec| {
                Ok(Box::new(CpPublisher::new(&spec.destination, &spec.base_url)) as Box<dyn Publisher>)
            })
            .with_reporter("stdio", |_: &ReporterSpec| {
                Ok(Box::new(StdioReporter::new()) as Box<dyn Reporter>)
            })
    }

    pub fn with_merge_engine<F>(mut self, factory: F) -> Self
    where
        F: Fn(&TreeSpec) -> anyhow::Result<Box<dyn MergeEngine>> + Send + Sync + 'static,
    {
        self.merge = Some(Box::new(factory));
        self
    }

    pub fn with_build_engine<F>(mut self, factory: F) -> Self
    where
        F: Fn(&BuildSpec) -> anyhow::Result<Box<dyn BuildEngine>> + Send + Sync + 'static,
    {
        self.build = Some(Box::new(factory));
        self
    }

    pub fn with_publisher<F>(mut self, kind: &str, factory: F) -> Self
    where
        F: Fn(&PublisherSpec) -> anyhow::Result<Box<dyn Publisher>> + Send + Sync + 'static,
    {
        self.publishers.insert(kind.to_lowercase(), Box::new(factory));
        self
    }

    pub fn with_runner<F>(mut self, kind: &str, factory: F) -> Self
    where
        F: Fn(&RunnerSpec) -> anyhow::Result<Box<dyn Runner>> + Send + Sync + 'static,
    {
        self.runners.insert(kind.to_lowercase(), Box::new(factory));
        self
    }

    pub fn with_reporter<F>(mut self, kind: &str, factory: F) -> Self
    where
        F: Fn(&ReporterSpec) -> anyhow::Result<Box<dyn Reporter>> + Send + Sync + 'static,
    {
        self.reporters.insert(kind.to_lowercase(), Box::new(factory));
        self
    }

    pub fn has_publisher(&self, kind: &str) -> bool {
        self.publishers.contains_key(&kind.to_lowercase())
    }

    pub fn has_runner(&self, kind: &str) -> bool {
        self.runners.contains_key(&kind.to_lowercase())
    }

    pub fn has_reporter(&self, kind: &str) -> bool {
        self.reporters.contains_key(&kind.to_lowercase())
    }

    pub fn merge_engine(&self, spec: &TreeSpec) -> Result<Box<dyn MergeEngine>> {
        let factory = self
            .merge
            .as_ref()
            .ok_or_else(|| CiError::Config("no merge engine is registered".to_string()))?;
        Ok(factory(spec)?)
    }

    pub fn build_engine(&self, spec: &BuildSpec) -> Result<Box<dyn BuildEngine>> {
        let factory = self
            .build
            .as_ref()
            .ok_or_else(|| CiError::Config("no build engine is registered".to_string()))?;
        Ok(factory(spec)?)
    }

    pub fn publisher(&self, spec: &PublisherSpec) -> Result<Box<dyn Publisher>> {
        let factory = lookup(&self.publishers, "publisher", &spec.kind)?;
        Ok(factory(spec)?)
    }

    pub fn runner(&self, spec: &RunnerSpec) -> Result<Box<dyn Runner>> {
        let factory = lookup(&self.runners, "runner", &spec.kind)?;
        Ok(factory(spec)?)
    }

    pub fn reporter(&self, spec: &ReporterSpec) -> Result<Box<dyn Reporter>> {
        let factory = lookup(&self.reporters, "reporter", &spec.kind)?;
        Ok(factory(spec)?)
    }

    /// Reject selectors whose type tag nothing is registered under.
    pub fn check_kinds(
        &self,
        publisher: Option<&PublisherSpec>,
        runner: Option<&RunnerSpec>,
        reporter: Option<&ReporterSpec>,
    ) -> Result<()> {
        if let Some(spec) = publisher {
            lookup(&self.publishers, "publisher", &spec.kind)?;
        }
        if let Some(spec) = runner {
            lookup(&self.runners, "runner", &spec.kind)?;
        }
        if let Some(spec) = reporter {
            lookup(&self.reporters, "reporter", &spec.kind)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Toolbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolbox")
            .field("merge", &self.merge.is_some())
            .field("build", &self.build.is_some())
            .field("publishers", &self.publishers.keys().collect::<Vec<_>>())
            .field("runners", &self.runners.keys().collect::<Vec<_>>())
            .field("reporters", &self.reporters.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn lookup<'a, T>(registry: &'a BTreeMap<String, T>, role: &str, kind: &str) -> Result<&'a T> {
    registry.get(&kind.to_lowercase()).ok_or_else(|| {
        let known: Vec<&str> = registry.keys().map(String::as_str).collect();
        CiError::Config(format!(
            "unknown {role} type '{kind}' (known: {})",
            if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            }
        ))
    })
}
