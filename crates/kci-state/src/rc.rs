//! Static configuration (the rc file).
//!
//! The rc file is read once and never written. Option names are folded to
//! lower case; section names are kept as written.

use crate::error::StateError;
use crate::Result;
use ini::Ini;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read-only view of an INI rc file.
pub struct RcFile {
    path: PathBuf,
    ini: Ini,
}

impl RcFile {
    /// Load `path`. A missing file yields an empty configuration.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "rc file not found, using empty configuration");
            return Ok(Self::empty(path));
        }
        let ini = Ini::load_from_file(path).map_err(|e| StateError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            ini,
        })
    }

    /// An rc file with no sections.
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            ini: Ini::new(),
        }
    }

    /// Parse rc content held in memory.
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let ini = Ini::load_from_str(content).map_err(|e| StateError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            ini,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.ini.section(Some(name)).is_some()
    }

    /// Entries of section `name` in file order, option names lower-cased.
    pub fn section(&self, name: &str) -> Option<Vec<(String, String)>> {
        self.ini.section(Some(name)).map(|props| {
            props
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                .collect()
        })
    }

    /// Single option lookup, case-insensitive on the option name.
    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        self.ini.section(Some(section)).and_then(|props| {
            props
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.to_string())
        })
    }

    /// Names of every section starting with `prefix`, in file order.
    pub fn sections_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.ini
            .sections()
            .flatten()
            .filter(|name| name.starts_with(prefix))
            .map(str::to_string)
            .collect()
    }
}

impl std::fmt::Debug for RcFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RcFile").field("path", &self.path).finish()
    }
}
