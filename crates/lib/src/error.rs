//! Pass-level errors.
//!
//! Each stage keeps its own error type; [`PipelineError`] records which
//! stage failed and [`ErrorKind`] classifies it for callers deciding
//! whether operator action is needed.

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::build::LayerBuildError;
use crate::config::ConfigError;
use crate::deploy::RemoteError;
use crate::manifest::ManifestError;
use crate::source::SourceError;
use crate::state::{LockError, StateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Source tree or manifest missing.
  NotFound,
  /// Build environment could not be started.
  EnvironmentUnavailable,
  /// Dependency build exited non-zero.
  BuildFailed,
  /// The remote mutation failed; state was not updated.
  RemoteApplyFailed,
  /// Persisted state is unreadable.
  StateCorrupted,
  /// Another pass holds the unit lock.
  Locked,
  /// State changed underneath this pass.
  Conflict,
  Config,
  Io,
}

impl ErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorKind::NotFound => "not-found",
      ErrorKind::EnvironmentUnavailable => "environment-unavailable",
      ErrorKind::BuildFailed => "build-failed",
      ErrorKind::RemoteApplyFailed => "remote-apply-failed",
      ErrorKind::StateCorrupted => "state-corrupted",
      ErrorKind::Locked => "locked",
      ErrorKind::Conflict => "conflict",
      ErrorKind::Config => "config",
      ErrorKind::Io => "io",
    }
  }
}

impl std::fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("lock: {0}")]
  Lock(#[from] LockError),

  #[error("state: {0}")]
  State(#[from] StateError),

  #[error("dependency manifest: {0}")]
  Manifest(#[from] ManifestError),

  #[error("code packaging: {0}")]
  Archive(#[from] ArchiveError),

  #[error("layer build: {0}")]
  Layer(#[from] LayerBuildError),

  #[error("remote apply: {0}")]
  Remote(#[from] RemoteError),

  #[error("configuration: {0}")]
  Config(#[from] ConfigError),
}

impl PipelineError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      PipelineError::Lock(e) if e.is_contention() => ErrorKind::Locked,
      PipelineError::Lock(_) => ErrorKind::Io,
      PipelineError::State(StateError::Corrupted { .. }) => ErrorKind::StateCorrupted,
      PipelineError::State(StateError::Conflict { .. }) => ErrorKind::Conflict,
      PipelineError::State(_) => ErrorKind::Io,
      PipelineError::Manifest(ManifestError::NotFound(_)) => ErrorKind::NotFound,
      PipelineError::Manifest(ManifestError::Unsupported { .. }) => ErrorKind::Config,
      PipelineError::Manifest(_) => ErrorKind::Io,
      PipelineError::Archive(e) => archive_kind(e),
      PipelineError::Layer(LayerBuildError::EnvironmentUnavailable { .. }) => ErrorKind::EnvironmentUnavailable,
      PipelineError::Layer(LayerBuildError::BuildFailed { .. }) => ErrorKind::BuildFailed,
      PipelineError::Layer(LayerBuildError::Archive(e)) => archive_kind(e),
      PipelineError::Layer(_) => ErrorKind::Io,
      PipelineError::Remote(_) => ErrorKind::RemoteApplyFailed,
      PipelineError::Config(_) => ErrorKind::Config,
    }
  }
}

fn archive_kind(err: &ArchiveError) -> ErrorKind {
  match err {
    ArchiveError::Source(SourceError::NotFound(_)) => ErrorKind::NotFound,
    ArchiveError::Source(SourceError::InvalidPattern { .. }) => ErrorKind::Config,
    _ => ErrorKind::Io,
  }
}
