//! Content fingerprints for change detection.
//!
//! This module provides:
//! - `Fingerprint`: a full 64-character SHA-256 digest
//! - `hash_bytes()`: arbitrary byte hashing
//! - `hash_file()`: single file hashing
//! - `hash_entries()`: canonical hashing of `(path, digest)` pairs
//! - `hash_tree()`: deterministic hashing of a [`SourceTree`]
//!
//! Fingerprints only ever see content and relative paths. Timestamps,
//! permissions and traversal order never influence the result, and code
//! archives write one fixed mode per entry so their byte hash holds to the
//! same rule.

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::FINGERPRINT_SHORT_LEN;
use crate::source::{SourceError, SourceTree};

/// A deterministic content digest, the sole change-detection signal.
///
/// # Format
///
/// Lowercase hexadecimal SHA-256 (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Prefix used in log lines and terminal output.
  pub fn short(&self) -> &str {
    let len = self.0.len().min(FINGERPRINT_SHORT_LEN);
    &self.0[..len]
  }
}

impl std::fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error while reading content to hash.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
  #[error("failed to read {path}: {source}")]
  ReadFile {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Source(#[from] SourceError),
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> Fingerprint {
  let mut hasher = Sha256::new();
  hasher.update(data);
  Fingerprint(hex::encode(hasher.finalize()))
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<Fingerprint, HashError> {
  let read_err = |source| HashError::ReadFile {
    path: path.display().to_string(),
    source,
  };

  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(read_err)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(Fingerprint(hex::encode(hasher.finalize())))
}

/// Hash a canonicalized set of `(relative_path, content_digest)` pairs.
///
/// Entries are sorted by path before hashing, so callers may pass them in
/// any order.
pub fn hash_entries<I, P>(entries: I) -> Fingerprint
where
  I: IntoIterator<Item = (P, Fingerprint)>,
  P: AsRef<str>,
{
  let mut lines: Vec<String> = entries
    .into_iter()
    .map(|(path, digest)| format!("F:{}:{}", path.as_ref(), digest.0))
    .collect();
  lines.sort();

  let mut hasher = Sha256::new();
  for line in lines {
    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }
  Fingerprint(hex::encode(hasher.finalize()))
}

/// Compute the content fingerprint of a source tree.
///
/// Only non-excluded regular files (and symlinks resolving to files)
/// contribute. Empty directories do not, matching what gets archived.
pub fn hash_tree(tree: &SourceTree) -> Result<Fingerprint, HashError> {
  let mut entries = Vec::new();
  for file in tree.files()? {
    let digest = hash_file(&file.absolute)?;
    entries.push((file.relative, digest));
  }
  Ok(hash_entries(entries))
}
