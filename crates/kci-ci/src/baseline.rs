//! Baseline fallback for failed test runs.
//!
//! When a run fails, the pre-change baseline is re-tested on the same host.
//! If the baseline fails as well, the failure predates the change and the
//! run is treated as a pass. If the baseline passes, the failure stands.

use crate::collab::{Publisher, RunRequest, Runner};
use crate::error::Result;
use tracing::{info, warn};

/// Identifier the baseline run is submitted under.
pub const BASELINE_UID: &str = "baseline check";

/// Whether a failed run should be checked against the baseline.
///
/// Needs a failure, a baseline revision that differs from the built one and
/// a publisher to derive the baseline artifact URL from. A build without a
/// known head counts as different.
pub fn should_attempt(
    retcode: i32,
    base_head: Option<&str>,
    build_head: Option<&str>,
    has_publisher: bool,
) -> bool {
    let Some(base) = base_head else {
        return false;
    };
    retcode != 0 && has_publisher && build_head != Some(base)
}

/// Final result once the baseline has run.
pub fn resolve(primary: i32, baseline: i32) -> i32 {
    if baseline != 0 {
        0
    } else {
        primary
    }
}

/// What the baseline run is submitted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineRequest {
    pub base_head: String,
    pub release: Option<String>,
    pub wait: bool,
    /// Host the primary run used
    pub host: Option<String>,
}

impl BaselineRequest {
    /// Published tarball name of the baseline build.
    pub fn tarball_name(&self) -> String {
        format!("{}.tar.gz", self.base_head)
    }

    pub fn run_request(&self, build_url: String) -> RunRequest {
        RunRequest {
            release: self.release.clone(),
            wait: self.wait,
            uid: Some(BASELINE_UID.to_string()),
            host: self.host.clone(),
            reschedule: false,
            ..RunRequest::new(build_url)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineVerdict {
    pub baseline_url: String,
    pub primary_code: i32,
    pub baseline_code: i32,
    pub resolved: i32,
}

impl BaselineVerdict {
    /// The primary failure was overridden.
    pub fn is_preexisting(&self) -> bool {
        self.primary_code != 0 && self.resolved == 0
    }
}

/// Re-test the baseline with `runner` and decide the run's result.
pub async fn run_baseline(
    runner: &mut dyn Runner,
    publisher: &dyn Publisher,
    request: &BaselineRequest,
    primary: i32,
) -> Result<BaselineVerdict> {
    let baseline_url = publisher.derive_url(&request.tarball_name());
    info!(
        base_head = %request.base_head,
        url = %baseline_url,
        host = request.host.as_deref().unwrap_or("-"),
        "Running baseline check"
    );

    let baseline_code = runner
        .run(&request.run_request(baseline_url.clone()))
        .await?;
    let resolved = resolve(primary, baseline_code);

    if resolved == 0 {
        warn!(
            primary = primary,
            baseline = baseline_code,
            "Baseline fails too; treating the failure as pre-existing"
        );
    } else {
        info!(primary = primary, "Baseline passes; failure stands");
    }

    Ok(BaselineVerdict {
        baseline_url,
        primary_code: primary,
        baseline_code,
        resolved,
    })
}
