//! Error types for pipeline orchestration

use kci_state::StateError;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiError {
    /// Bad or missing configuration (unknown type tag, malformed section)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stage was invoked without an input it cannot run without
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("State store error: {0}")]
    State(#[from] StateError),

    #[error("I/O error on {}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Report error: {0}")]
    Report(String),

    /// Failure raised by a merge/build/publish/run/report collaborator
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl CiError {
    pub(crate) fn file(path: &Path, source: std::io::Error) -> Self {
        CiError::File {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Fatal errors abort the invocation even when stage recording is on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CiError::Config(_) | CiError::Usage(_))
    }

    /// The message plus every underlying cause, one per line.
    pub fn describe(&self) -> String {
        let mut text = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            text.push_str("\n  caused by: ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        text
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, CiError>;
