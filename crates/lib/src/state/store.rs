//! Persisted remote state.
//!
//! # Storage Layout
//!
//! ```text
//! {state_dir}/
//! ├── units/<unit>.json   # StateFile: version + RemoteState
//! └── locks/<unit>.lock   # UnitLock for in-flight passes
//! ```
//!
//! One file per unit keeps units independent: a pass only ever reads and
//! writes its own unit's file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::lock::{LockError, LockMode, UnitLock};
use super::types::{RemoteState, STATE_VERSION, StateError, StateFile};

const UNITS_DIR: &str = "units";

/// Read/write contract for last-applied state.
///
/// Only the deployment coordinator writes, and only after a confirmed
/// remote apply.
pub trait StateStore {
  type Guard;

  /// Last applied state for `unit`, `None` if never applied.
  ///
  /// Unreadable or unparseable state is an error, never `None`.
  fn get(&self, unit: &str) -> Result<Option<RemoteState>, StateError>;

  /// Commit new state for `state.unit`.
  ///
  /// `expected_serial` is the serial observed by the matching `get`
  /// (`None` if the unit had no state). If the stored serial differs the
  /// write is rejected with [`StateError::Conflict`]. Returns the state as
  /// written, with its serial advanced.
  fn put(&self, state: RemoteState, expected_serial: Option<u64>) -> Result<RemoteState, StateError>;

  /// All recorded units, sorted by name.
  fn list(&self) -> Result<Vec<RemoteState>, StateError>;

  /// Take the named per-unit lock.
  fn lock(&self, unit: &str, mode: LockMode, command: &str) -> Result<Self::Guard, LockError>;

  /// Local directory the store writes to, if any.
  fn location(&self) -> Option<&Path> {
    None
  }
}

/// [`StateStore`] backed by JSON files in a directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
  base_path: PathBuf,
}

impl FileStateStore {
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    Self {
      base_path: base_path.into(),
    }
  }

  pub fn base_path(&self) -> &Path {
    &self.base_path
  }

  fn units_dir(&self) -> PathBuf {
    self.base_path.join(UNITS_DIR)
  }

  fn unit_path(&self, unit: &str) -> PathBuf {
    self.units_dir().join(format!("{}.json", unit))
  }

  fn read_path(&self, path: &Path, unit: Option<&str>) -> Result<Option<RemoteState>, StateError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => {
        return Err(StateError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    let corrupted = |message: String| StateError::Corrupted {
      path: path.to_path_buf(),
      message,
    };

    let file: StateFile = serde_json::from_str(&content).map_err(|e| corrupted(e.to_string()))?;
    if file.version != STATE_VERSION {
      return Err(corrupted(format!("unsupported version {}", file.version)));
    }
    if let Some(unit) = unit
      && file.state.unit != unit
    {
      return Err(corrupted(format!("records unit '{}', expected '{}'", file.state.unit, unit)));
    }
    Ok(Some(file.state))
  }
}

impl StateStore for FileStateStore {
  type Guard = UnitLock;

  fn location(&self) -> Option<&Path> {
    Some(&self.base_path)
  }

  fn get(&self, unit: &str) -> Result<Option<RemoteState>, StateError> {
    self.read_path(&self.unit_path(unit), Some(unit))
  }

  fn put(&self, mut state: RemoteState, expected_serial: Option<u64>) -> Result<RemoteState, StateError> {
    let found = self.get(&state.unit)?.map(|s| s.serial);
    if found != expected_serial {
      return Err(StateError::Conflict {
        unit: state.unit,
        expected: expected_serial,
        found,
      });
    }
    state.serial = found.unwrap_or(0) + 1;

    let dir = self.units_dir();
    let path = self.unit_path(&state.unit);
    let temp_path = dir.join(format!("{}.json.tmp", state.unit));
    let write_err = |source| StateError::Write {
      path: path.clone(),
      source,
    };

    fs::create_dir_all(&dir).map_err(write_err)?;
    let file = StateFile {
      version: STATE_VERSION,
      state,
    };
    let content = serde_json::to_string_pretty(&file).map_err(StateError::Serialize)?;
    fs::write(&temp_path, &content).map_err(write_err)?;
    fs::rename(&temp_path, &path).map_err(write_err)?;

    debug!(unit = %file.state.unit, serial = file.state.serial, "remote state committed");
    Ok(file.state)
  }

  fn list(&self) -> Result<Vec<RemoteState>, StateError> {
    let dir = self.units_dir();
    let entries = match fs::read_dir(&dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(source) => return Err(StateError::Read { path: dir, source }),
    };

    let mut states = Vec::new();
    for entry in entries {
      let entry = entry.map_err(|source| StateError::Read {
        path: dir.clone(),
        source,
      })?;
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some("json") {
        continue;
      }
      let unit = path.file_stem().and_then(|s| s.to_str()).map(str::to_string);
      if let Some(state) = self.read_path(&path, unit.as_deref())? {
        states.push(state);
      }
    }
    states.sort_by(|a, b| a.unit.cmp(&b.unit));
    Ok(states)
  }

  fn lock(&self, unit: &str, mode: LockMode, command: &str) -> Result<UnitLock, LockError> {
    UnitLock::acquire(&self.base_path, unit, mode, command)
  }
}
