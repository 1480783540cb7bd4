//! State storage backends
//!
//! A `StateStore` owns exactly one `LoopState`. Reads never fail the caller:
//! a missing or unreadable record degrades to the default record.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::record::LoopState;

/// Errors from state storage
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state record {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize state record: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Durable home of one node's `LoopState`
pub trait StateStore {
    /// Read the record; `Ok(None)` when nothing has been written yet
    fn try_load(&self) -> Result<Option<LoopState>, StoreError>;

    /// Replace the record
    fn save(&self, state: &LoopState) -> Result<(), StoreError>;

    /// Human readable location, for log lines
    fn describe(&self) -> String;

    /// Read the record, falling back to the default on any failure
    fn load(&self) -> LoopState {
        match self.try_load() {
            Ok(Some(state)) => {
                debug!(location = %self.describe(), %state, "StateStore::load: loaded");
                state
            }
            Ok(None) => {
                debug!(location = %self.describe(), "StateStore::load: no record, using default");
                LoopState::default()
            }
            Err(e) => {
                warn!(location = %self.describe(), error = %e, "StateStore::load: unreadable record, using default");
                LoopState::default()
            }
        }
    }
}

impl<T: StateStore + ?Sized> StateStore for &T {
    fn try_load(&self) -> Result<Option<LoopState>, StoreError> {
        (**self).try_load()
    }

    fn save(&self, state: &LoopState) -> Result<(), StoreError> {
        (**self).save(state)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<T: StateStore + ?Sized> StateStore for Box<T> {
    fn try_load(&self) -> Result<Option<LoopState>, StoreError> {
        (**self).try_load()
    }

    fn save(&self, state: &LoopState) -> Result<(), StoreError> {
        (**self).save(state)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Pretty-printed JSON file holding one record
///
/// Saves go through a temp file in the same directory followed by a rename,
/// so a reader sees either the old record or the new one.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store backed by the file at `path` (created on first save)
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "JsonFileStore::new: called");
        Self { path }
    }

    /// Store for `filename` inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>, filename: &str) -> Self {
        Self::new(dir.as_ref().join(filename))
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the backing file; a missing file is not an error
    pub fn clear(&self) -> Result<(), StoreError> {
        debug!(path = ?self.path, "JsonFileStore::clear: called");
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = ?self.path, "Removed state record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl StateStore for JsonFileStore {
    fn try_load(&self) -> Result<Option<LoopState>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let state = serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(state))
    }

    fn save(&self, state: &LoopState) -> Result<(), StoreError> {
        let dir = self.parent_dir();
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
        serde_json::to_writer_pretty(&mut tmp, state)?;
        tmp.write_all(b"\n").map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::io(&self.path, e.error))?;

        debug!(path = ?self.path, %state, "JsonFileStore::save: saved");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process store; the record lives as long as the value does
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<LoopState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `state`
    pub fn with_state(state: LoopState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }

    /// Current record, if any was saved
    pub fn snapshot(&self) -> Option<LoopState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl StateStore for MemoryStore {
    fn try_load(&self) -> Result<Option<LoopState>, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &LoopState) -> Result<(), StoreError> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
