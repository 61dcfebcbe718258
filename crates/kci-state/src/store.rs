//! StateStore: load, merge and persist the pipeline-state record.
//!
//! Two files are involved:
//! - the rc file (static configuration, read-only)
//! - the state record, an INI file whose `state` section holds facts written
//!   by earlier stages
//!
//! The record is rewritten in full after every stage (last write wins). The
//! new content goes to a temporary file next to the record which is then
//! renamed over it, so an interrupted write leaves the previous record in
//! place. There is no locking: one invocation per record at a time.

use crate::error::StateError;
use crate::indexed::Collector;
use crate::rc::RcFile;
use crate::value::{render, State, StateUpdate};
use crate::Result;
use ini::Ini;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Section of the record holding pipeline facts.
pub const STATE_SECTION: &str = "state";

/// Section of the rc file holding static settings.
pub const CONFIG_SECTION: &str = "config";

/// Where the store reads and writes, and whether it writes at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub rc_path: PathBuf,
    pub state_path: PathBuf,
    pub persist: bool,
}

impl StoreOptions {
    /// Options for `rc_path`, with the record beside it and persistence off.
    pub fn new(rc_path: impl Into<PathBuf>) -> Self {
        let rc_path = rc_path.into();
        let state_path = default_state_path(&rc_path);
        Self {
            rc_path,
            state_path,
            persist: false,
        }
    }

    pub fn with_state_path(mut self, state_path: impl Into<PathBuf>) -> Self {
        self.state_path = state_path.into();
        self
    }

    pub fn persistent(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }
}

/// `<rc>.state`
pub fn default_state_path(rc_path: &Path) -> PathBuf {
    let mut name = rc_path.as_os_str().to_owned();
    name.push(".state");
    PathBuf::from(name)
}

/// In-memory State plus its durable record.
pub struct StateStore {
    options: StoreOptions,
    rc: RcFile,
    record: Ini,
    state: State,
}

impl StateStore {
    /// Build the State for this invocation.
    ///
    /// Precedence, highest first: `cli` values, the persisted `state`
    /// section (only when persisting), the rc `config` section. Lower
    /// sources only fill keys the higher ones left unsupplied. Indexed key
    /// families from the record are also folded into their collection keys.
    pub fn load(options: StoreOptions, cli: State) -> Result<Self> {
        let rc = RcFile::load(&options.rc_path)?;
        let record = if options.persist {
            read_record(&options.state_path)?
        } else {
            Ini::new()
        };

        let mut state = cli;

        if let Some(section) = record.section(Some(STATE_SECTION)) {
            let mut collector = Collector::default();
            for (key, value) in section.iter() {
                if state.is_supplied(key) {
                    continue;
                }
                collector.offer(key, value);
                state.insert(key, value);
            }
            for (collection, values) in collector.finish() {
                state.fill(collection, values);
            }
        }

        if let Some(config) = rc.section(CONFIG_SECTION) {
            for (key, value) in config {
                state.fill(&key, value);
            }
        }

        debug!(
            rc = %options.rc_path.display(),
            persist = options.persist,
            keys = state.len(),
            "Loaded pipeline state"
        );

        Ok(Self {
            options,
            rc,
            record,
            state,
        })
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Mutable access for values that are not persisted (derived paths,
    /// in-memory collections).
    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    pub fn rc(&self) -> &RcFile {
        &self.rc
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn is_persistent(&self) -> bool {
        self.options.persist
    }

    /// Value currently held in the record's `state` section.
    pub fn persisted(&self, key: &str) -> Option<&str> {
        self.record.get_from(Some(STATE_SECTION), key)
    }

    /// Apply `update` to the State and, when persisting, write every
    /// non-null value into the record and rewrite it.
    pub fn merge_and_persist(&mut self, update: StateUpdate) -> Result<()> {
        self.state.apply(&update);

        if !self.options.persist {
            return Ok(());
        }

        for (key, value) in update.iter() {
            let Some(text) = render(value) else {
                continue;
            };
            debug!("state: {} -> {}", key, text);
            self.record
                .with_section(Some(STATE_SECTION))
                .set(key, text);
        }

        self.write_record()
    }

    /// Drop the record's `state` section. The rc file is never touched.
    ///
    /// Returns whether a section was removed.
    pub fn clear_persisted_state(&mut self) -> Result<bool> {
        if !self.options.persist {
            return Ok(false);
        }
        let removed = self.record.delete(Some(STATE_SECTION)).is_some();
        if removed {
            self.write_record()?;
            info!(path = %self.options.state_path.display(), "Cleared persisted state");
        }
        Ok(removed)
    }

    fn write_record(&self) -> Result<()> {
        let path = &self.options.state_path;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| StateError::io(&dir, e))?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| StateError::io(&dir, e))?;
        self.record
            .write_to(&mut tmp)
            .map_err(|e| StateError::io(path, e))?;
        tmp.flush().map_err(|e| StateError::io(path, e))?;
        tmp.persist(path).map_err(|e| StateError::io(path, e.error))?;
        Ok(())
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("options", &self.options)
            .field("state", &self.state)
            .finish()
    }
}

fn read_record(path: &Path) -> Result<Ini> {
    if !path.exists() {
        return Ok(Ini::new());
    }
    Ini::load_from_file(path).map_err(|e| StateError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
