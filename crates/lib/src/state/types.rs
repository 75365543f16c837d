use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::hash::Fingerprint;

/// Current on-disk format of unit state files.
pub const STATE_VERSION: u32 = 1;

/// Durable record of what was last successfully applied for a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteState {
  pub unit: String,
  pub code_fingerprint: Fingerprint,
  /// `None` when the unit declares no dependency manifest.
  pub manifest_fingerprint: Option<Fingerprint>,
  /// Fingerprint of the layer artifact that was attached.
  pub layer_fingerprint: Option<Fingerprint>,
  /// Digest of platform, settings and environment at apply time.
  #[serde(default)]
  pub config_fingerprint: Option<Fingerprint>,
  /// Version token, incremented on every successful write.
  pub serial: u64,
  pub applied_at: u64,
}

/// On-disk envelope for a [`RemoteState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct StateFile {
  pub version: u32,
  pub state: RemoteState,
}

/// Errors reading or writing persisted remote state.
#[derive(Debug, Error)]
pub enum StateError {
  /// Persisted state exists but cannot be trusted.
  #[error("state file {path} is corrupted: {message}")]
  Corrupted { path: PathBuf, message: String },

  /// Another pass committed state for this unit since it was read.
  #[error("state for unit '{unit}' changed concurrently (expected serial {expected:?}, found {found:?})")]
  Conflict {
    unit: String,
    expected: Option<u64>,
    found: Option<u64>,
  },

  #[error("failed to read state {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write state {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to serialize state: {0}")]
  Serialize(#[source] serde_json::Error),
}
