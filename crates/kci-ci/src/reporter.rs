//! Built-in `stdio` reporter: prints a plain-text summary of the State.

use crate::collab::Reporter;
use async_trait::async_trait;
use kci_state::State;
use std::fmt::Write;

#[derive(Debug, Clone, Default)]
pub struct StdioReporter;

impl StdioReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn render(state: &State) -> String {
        let mut out = String::new();
        let field = |key: &str| state.string(key).unwrap_or_else(|| "-".to_string());

        let _ = writeln!(out, "kci report: {}", field("uid"));
        let _ = writeln!(out, "  base:    {} @ {}", field("baserepo"), field("basehead"));
        let _ = writeln!(out, "  build:   {} ({})", field("buildhead"), field("krelease"));
        let _ = writeln!(out, "  url:     {}", field("buildurl"));

        let jobs = state.strings("jobs");
        if !jobs.is_empty() {
            let _ = writeln!(out, "  jobs:    {}", jobs.join(", "));
        }

        let result = match state.int("retcode") {
            Some(0) => "PASS".to_string(),
            Some(code) => format!("FAIL ({code})"),
            None => "not run".to_string(),
        };
        let _ = writeln!(out, "  result:  {result}");
        if let Some(base) = state.int("baseretcode") {
            let _ = writeln!(out, "  baseline: {base}");
        }

        for path in state.strings("result") {
            let _ = writeln!(out, "  includes: {path}");
        }

        for key in ["mergelog", "buildlog"] {
            if let Some(log) = state.str(key) {
                let _ = writeln!(out, "  {key}: {log}");
            }
        }
        out
    }
}

#[async_trait]
impl Reporter for StdioReporter {
    async fn report(&self, state: &State) -> anyhow::Result<()> {
        print!("{}", Self::render(state));
        Ok(())
    }
}
