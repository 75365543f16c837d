//! Immutable packaged outputs.
//!
//! An [`Artifact`] is a file on disk identified by its content fingerprint.
//! Artifacts are written once under a content-addressed name and never
//! modified afterwards, so a path recorded in a build record or remote state
//! keeps pointing at the same bytes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::util::hash::{Fingerprint, HashError, hash_file};

/// A packaged code bundle or dependency layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
  /// Logical name (`code`, `layer`, ...).
  pub name: String,
  /// Location of the packaged bytes.
  pub path: PathBuf,
  /// Digest of the packaged bytes.
  pub fingerprint: Fingerprint,
  /// Size in bytes.
  pub size: u64,
}

impl Artifact {
  /// Describe an existing file, hashing its content.
  pub fn from_file(name: &str, path: &Path) -> Result<Self, HashError> {
    let fingerprint = hash_file(path)?;
    let size = std::fs::metadata(path)
      .map_err(|source| HashError::ReadFile {
        path: path.display().to_string(),
        source,
      })?
      .len();

    Ok(Self {
      name: name.to_string(),
      path: path.to_path_buf(),
      fingerprint,
      size,
    })
  }

  /// Check that the file still exists and hashes to the recorded fingerprint.
  pub fn verify(&self) -> bool {
    match hash_file(&self.path) {
      Ok(actual) if actual == self.fingerprint => true,
      Ok(actual) => {
        warn!(
          path = %self.path.display(),
          expected = %self.fingerprint,
          actual = %actual,
          "artifact content changed"
        );
        false
      }
      Err(e) => {
        warn!(path = %self.path.display(), error = %e, "artifact unreadable");
        false
      }
    }
  }
}

/// Content-addressed file name for an artifact.
pub fn artifact_file_name(name: &str, fingerprint: &Fingerprint) -> String {
  format!("{}-{}.zip", name, fingerprint.0)
}

/// Remove artifacts in `dir` that share `keep`'s logical name but hold other
/// content.
///
/// Only content-addressed `<name>-*.zip` files are touched. Returns how many
/// were removed; files that cannot be removed are logged and left in place.
pub fn prune_superseded(dir: &Path, keep: &Artifact) -> usize {
  let entries = match std::fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) => {
      debug!(dir = %dir.display(), error = %e, "nothing to prune");
      return 0;
    }
  };

  let prefix = format!("{}-", keep.name);
  let keep_name = keep.path.file_name();
  let mut removed = 0;
  for entry in entries.flatten() {
    let file_name = entry.file_name();
    let Some(name) = file_name.to_str() else {
      continue;
    };
    if !name.starts_with(&prefix) || !name.ends_with(".zip") || Some(file_name.as_os_str()) == keep_name {
      continue;
    }
    let path = entry.path();
    match std::fs::remove_file(&path) {
      Ok(()) => {
        debug!(path = %path.display(), "removed superseded artifact");
        removed += 1;
      }
      Err(e) => warn!(path = %path.display(), error = %e, "failed to remove superseded artifact"),
    }
  }
  removed
}
