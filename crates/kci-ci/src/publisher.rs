//! Built-in `cp` publisher: copies artifacts into a local directory that is
//! served under a base URL.

use crate::collab::Publisher;
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone)]
pub struct CpPublisher {
    destination: PathBuf,
    base_url: String,
}

impl CpPublisher {
    pub fn new(destination: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            destination: destination.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Publisher for CpPublisher {
    async fn publish(&self, local: &Path) -> anyhow::Result<String> {
        let file_name = local
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("cannot publish {}: no file name", local.display()))?;

        tokio::fs::create_dir_all(&self.destination)
            .await
            .with_context(|| format!("creating {}", self.destination.display()))?;
        let target = self.destination.join(file_name);
        tokio::fs::copy(local, &target)
            .await
            .with_context(|| format!("copying {} to {}", local.display(), target.display()))?;

        let url = self.derive_url(file_name);
        info!(file = %local.display(), url = %url, "Published artifact");
        Ok(url)
    }

    fn derive_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.base_url, file_name)
    }
}
