//! Per-unit advisory locks.
//!
//! A deployment pass holds its unit's lock from the state read until the
//! state write, so two passes for the same unit never interleave. Passes
//! for different units take different lock files and run freely.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::unix_now;

const LOCKS_DIR: &str = "locks";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  /// Readers (`plan`, `status`). Multiple holders allowed.
  Shared,
  /// A pass that may apply and write state.
  Exclusive,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub unit: String,
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error(
    "unit '{unit}' is locked by another process: {command} (PID {pid}, started at unix {started_at})\n\
             If no other deployment is running, remove the lock file:\n  {lock_path}"
  )]
  Contention {
    unit: String,
    command: String,
    pid: u32,
    started_at: u64,
    lock_path: PathBuf,
  },

  #[error(
    "unit '{unit}' is locked (could not read lock metadata)\n\
             If no other deployment is running, remove the lock file:\n  {lock_path}"
  )]
  ContentionUnknown { unit: String, lock_path: PathBuf },

  #[error("failed to create lock directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

impl LockError {
  pub fn is_contention(&self) -> bool {
    matches!(self, LockError::Contention { .. } | LockError::ContentionUnknown { .. })
  }
}

/// Held lock on `<state_dir>/locks/<unit>.lock`, released on drop.
#[derive(Debug)]
pub struct UnitLock {
  file: File,
  unit: String,
  lock_path: PathBuf,
}

impl UnitLock {
  pub fn acquire(state_dir: &Path, unit: &str, mode: LockMode, command: &str) -> Result<Self, LockError> {
    let dir = state_dir.join(LOCKS_DIR);
    let lock_path = dir.join(format!("{}.lock", unit));

    std::fs::create_dir_all(&dir).map_err(LockError::CreateDir)?;

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(LockError::OpenFile)?;

    if let Err(err) = try_lock(&file, mode) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(contention_error(unit, &lock_path));
      }
      return Err(LockError::LockFailed(err));
    }

    if mode == LockMode::Exclusive {
      write_metadata(&file, unit, command)?;
    }

    Ok(UnitLock {
      file,
      unit: unit.to_string(),
      lock_path,
    })
  }

  /// Reads metadata through the held handle.
  ///
  /// Opening a second handle would fail on Windows while the lock is held.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn unit(&self) -> &str {
    &self.unit
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn write_metadata(file: &File, unit: &str, command: &str) -> Result<(), LockError> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    started_at_unix: unix_now(),
    command: command.to_string(),
    unit: unit.to_string(),
  };

  file.set_len(0).map_err(LockError::WriteMetadata)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, &metadata).map_err(|e| LockError::WriteMetadata(io::Error::other(e)))?;
  writer.flush().map_err(LockError::WriteMetadata)?;
  Ok(())
}

fn contention_error(unit: &str, lock_path: &Path) -> LockError {
  if let Ok(mut file) = File::open(lock_path) {
    let mut contents = String::new();
    if file.read_to_string(&mut contents).is_ok()
      && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
    {
      return LockError::Contention {
        unit: unit.to_string(),
        command: metadata.command,
        pid: metadata.pid,
        started_at: metadata.started_at_unix,
        lock_path: lock_path.to_path_buf(),
      };
    }
  }

  LockError::ContentionUnknown {
    unit: unit.to_string(),
    lock_path: lock_path.to_path_buf(),
  }
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: OVERLAPPED is valid zero-initialized and the handle is owned by `file`.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
