//! Build artifact naming and the descriptor Build hands to Publish and Run.

use crate::collab::BuildEngine;
use crate::config::path_text;
use crate::error::{CiError, Result};
use chrono::{DateTime, Local};
use kci_state::StateUpdate;
use std::path::{Path, PathBuf};
use tracing::info;

/// Timestamp embedded in artifact names when no commit id is known.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// `<dir>/<tstamp>-<name>`
pub fn add_timestamp(path: &Path, tstamp: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{tstamp}-{name}"))
}

/// Name of an artifact without its archive/data extension.
fn artifact_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some(stem) = name.strip_suffix(".tar.gz") {
        return stem.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}

/// Final artifact names: after the commit id when known, otherwise the
/// original names prefixed with the build timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNaming {
    head: Option<String>,
    tstamp: String,
}

impl ArtifactNaming {
    pub fn new(head: Option<&str>, started: DateTime<Local>) -> Self {
        Self {
            head: head.filter(|h| !h.is_empty()).map(str::to_string),
            tstamp: started.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    pub fn tarball(&self, built: &Path) -> PathBuf {
        match &self.head {
            Some(head) => built.with_file_name(format!("{head}.tar.gz")),
            None => add_timestamp(built, &self.tstamp),
        }
    }

    pub fn build_info(&self, info: &Path) -> PathBuf {
        match &self.head {
            Some(head) => info.with_file_name(format!("{head}.csv")),
            None => add_timestamp(info, &self.tstamp),
        }
    }

    /// The config copy sits next to the build info (or the tarball when
    /// there is none) and shares its stem.
    pub fn config(&self, tarball: &Path, build_info: Option<&Path>) -> PathBuf {
        let anchor = build_info.unwrap_or(tarball);
        anchor.with_file_name(format!("{}.config", artifact_stem(anchor)))
    }
}

/// Tarball, build info and config produced by one build, plus the release
/// and architecture they were built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    pub tarball: PathBuf,
    pub build_info: Option<PathBuf>,
    pub config: PathBuf,
    pub release: String,
    pub arch: String,
}

impl BuildArtifact {
    /// Move the engine's outputs to their final names and copy the kernel
    /// config beside them.
    pub async fn collect(
        engine: &dyn BuildEngine,
        built: &Path,
        build_info: Option<&Path>,
        naming: &ArtifactNaming,
    ) -> Result<Self> {
        let tarball = naming.tarball(built);
        move_file(built, &tarball).await?;
        info!(path = %tarball.display(), "Tarball ready");

        let build_info = match build_info {
            Some(current) => {
                let renamed = naming.build_info(current);
                move_file(current, &renamed).await?;
                Some(renamed)
            }
            None => None,
        };

        let config = naming.config(&tarball, build_info.as_deref());
        let source = engine.config_path();
        tokio::fs::copy(&source, &config)
            .await
            .map_err(|e| CiError::file(&source, e))?;

        Ok(Self {
            tarball,
            build_info,
            config,
            release: engine.release().await?,
            arch: engine.arch(),
        })
    }

    pub fn state_update(&self) -> StateUpdate {
        StateUpdate::new()
            .set("tarpkg", path_text(&self.tarball))
            .maybe("buildinfo", self.build_info.as_deref().map(path_text))
            .set("buildconf", path_text(&self.config))
            .set("krelease", self.release.as_str())
            .set("kernel_arch", self.arch.as_str())
    }
}

async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if from == to {
        return Ok(());
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    // Rename fails across filesystems; fall back to copy + remove.
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| CiError::file(from, e))?;
    tokio::fs::remove_file(from)
        .await
        .map_err(|e| CiError::file(from, e))
}
