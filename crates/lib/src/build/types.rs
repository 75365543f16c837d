use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::artifact::Artifact;
use crate::platform::TargetPlatform;
use crate::util::hash::Fingerprint;

/// Current on-disk format of `record.json`.
pub const BUILD_RECORD_VERSION: u32 = 1;

/// The last successfully produced layer and the manifest state that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
  pub version: u32,
  pub manifest_fingerprint: Fingerprint,
  pub platform: TargetPlatform,
  /// Directory the dependencies were installed under inside the layer.
  #[serde(default)]
  pub prefix: String,
  pub layer: Artifact,
  pub built_at: u64,
}

impl BuildRecord {
  pub fn new(manifest_fingerprint: Fingerprint, platform: TargetPlatform, prefix: impl Into<String>, layer: Artifact) -> Self {
    Self {
      version: BUILD_RECORD_VERSION,
      manifest_fingerprint,
      platform,
      prefix: prefix.into(),
      layer,
      built_at: crate::util::unix_now(),
    }
  }
}

/// Result of [`LayerBuilder::build`](super::LayerBuilder::build).
#[derive(Debug, Clone)]
pub struct LayerOutcome {
  /// The layer to reference (freshly built or reused).
  pub artifact: Artifact,
  /// Record describing `artifact`.
  pub record: BuildRecord,
  /// `false` on a cache hit.
  pub built: bool,
}

/// Output captured from a build environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildLog {
  pub output: String,
}

impl BuildLog {
  pub fn from_output(stdout: &[u8], stderr: &[u8]) -> Self {
    let mut output = String::from_utf8_lossy(stdout).into_owned();
    let stderr = String::from_utf8_lossy(stderr);
    if !stderr.is_empty() {
      if !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
      }
      output.push_str(&stderr);
    }
    Self { output }
  }

  /// Last `n` lines, for error messages.
  pub fn tail(&self, n: usize) -> String {
    let lines: Vec<&str> = self.output.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
  }
}

/// Errors that can occur while producing a dependency layer.
#[derive(Debug, Error)]
pub enum LayerBuildError {
  /// The isolated build environment could not be started.
  #[error("build environment '{environment}' unavailable: {message}")]
  EnvironmentUnavailable { environment: String, message: String },

  /// The build process exited non-zero.
  #[error("dependency build failed with exit code {code:?} (full log: {log_path})\n{log_tail}")]
  BuildFailed {
    code: Option<i32>,
    log_tail: String,
    log_path: PathBuf,
  },

  #[error("failed to package layer: {0}")]
  Archive(#[from] ArchiveError),

  #[error("build record error: {0}")]
  Record(#[from] BuildRecordError),

  #[error("io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Errors reading or writing build records.
#[derive(Debug, Error)]
pub enum BuildRecordError {
  #[error("failed to write build record {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to serialize build record: {0}")]
  Serialize(#[source] serde_json::Error),
}
