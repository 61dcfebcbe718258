//! Stage harness: turns stage outcomes into structured pass/fail records.
//!
//! With recording off, a stage error propagates unchanged and nothing is
//! recorded. With recording on, non-fatal errors are logged, recorded as a
//! failure and absorbed so the following stages still run; the pipeline
//! result is forced to 1. Configuration and usage errors are never absorbed.

use crate::error::{CiError, Result};
use crate::stage::{Command, Stage};
use kci_state::State;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

/// Suite and class name used in the structured report.
pub const SUITE_NAME: &str = "kci";

/// One recorded stage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCaseRecord {
    pub name: String,
    pub classname: String,
    pub elapsed: Duration,
    /// The full State at stage exit, as JSON
    pub stdout: String,
    /// Error chain, or a description of the non-zero result code
    pub failure: Option<String>,
}

impl TestCaseRecord {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    pub fn to_junit(&self) -> TestCase {
        let status = match &self.failure {
            None => TestCaseStatus::success(),
            Some(description) => {
                let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
                status.set_description(description.as_str());
                status
            }
        };
        let mut case = TestCase::new(self.name.as_str(), status);
        case.set_classname(self.classname.as_str());
        case.set_time(self.elapsed);
        case.set_system_out(self.stdout.as_str());
        case
    }
}

/// Collects one record per recorded stage and writes them out at exit.
#[derive(Debug, Clone, Default)]
pub struct Harness {
    output_dir: Option<PathBuf>,
    records: Vec<TestCaseRecord>,
}

impl Harness {
    /// Recording off.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Recording on, with reports written into `dir` (created if missing).
    pub fn to_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CiError::file(&dir, e))?;
        Ok(Self {
            output_dir: Some(dir),
            records: Vec::new(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.output_dir.is_some()
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    pub fn records(&self) -> &[TestCaseRecord] {
        &self.records
    }

    /// Fold one stage outcome into the pipeline result.
    ///
    /// `Ok(Some(code))` replaces `retcode`, `Ok(None)` leaves it. Returns an
    /// error only when it must abort the invocation.
    pub fn settle(
        &mut self,
        stage: Stage,
        elapsed: Duration,
        outcome: Result<Option<i32>>,
        retcode: &mut i32,
        state: &State,
    ) -> Result<()> {
        let failure = match outcome {
            Ok(code) => {
                if let Some(code) = code {
                    *retcode = code;
                }
                if *retcode != 0 {
                    Some(format!("Step finished with retcode: {retcode}"))
                } else {
                    None
                }
            }
            Err(err) if err.is_fatal() || !self.is_enabled() => return Err(err),
            Err(err) => {
                let chain = err.describe();
                error!(stage = %stage, error = %chain, "Stage failed");
                *retcode = 1;
                Some(chain)
            }
        };

        if self.is_enabled() {
            self.records.push(TestCaseRecord {
                name: stage.name().to_string(),
                classname: SUITE_NAME.to_string(),
                elapsed,
                stdout: state.to_json().unwrap_or_default(),
                failure,
            });
        }
        Ok(())
    }

    pub fn report(&self) -> Report {
        let mut suite = TestSuite::new(SUITE_NAME);
        for record in &self.records {
            suite.add_test_case(record.to_junit());
        }
        let mut report = Report::new(SUITE_NAME);
        report.add_test_suite(suite);
        report
    }

    /// Write `<dir>/<command>.xml`; returns the path, or `None` when
    /// recording is off.
    pub fn write(&self, command: Command) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.output_dir else {
            return Ok(None);
        };
        let path = dir.join(format!("{}.xml", command.name()));
        let file = fs::File::create(&path).map_err(|e| CiError::file(&path, e))?;
        self.report()
            .serialize(file)
            .map_err(|e| CiError::Report(format!("writing {}: {e}", path.display())))?;
        info!(path = %path.display(), records = self.records.len(), "Wrote stage report");
        Ok(Some(path))
    }
}
