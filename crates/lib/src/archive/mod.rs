//! Deterministic zip packaging of source trees.
//!
//! Two runs over identical content produce byte-identical archives:
//!
//! - entries are written in sorted relative-path order
//! - every entry carries the same timestamp (1980-01-01 00:00:00)
//! - every entry carries the same permissions (`0o755`), whatever the
//!   file's mode on disk
//! - directories are implied by file paths, never written as entries

use std::fs::File;
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::artifact::{Artifact, artifact_file_name};
use crate::source::{SourceError, SourceTree};
use crate::util::hash::HashError;

/// Mode of every archive entry, whatever the file's mode on disk.
const ENTRY_MODE: u32 = 0o755;

#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error(transparent)]
  Source(#[from] SourceError),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write archive {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("zip error: {0}")]
  Zip(#[from] zip::result::ZipError),

  #[error(transparent)]
  Hash(#[from] HashError),
}

impl ArchiveError {
  /// True when the source root itself was missing.
  pub fn is_not_found(&self) -> bool {
    matches!(self, ArchiveError::Source(SourceError::NotFound(_)))
  }
}

/// Write a deterministic zip of `tree` to `writer`.
///
/// With `prefix`, every entry is placed under `<prefix>/`.
/// Returns the number of file entries written.
pub fn write_archive<W: Write + Seek>(tree: &SourceTree, prefix: Option<&str>, writer: W) -> Result<usize, ArchiveError> {
  let files = tree.files()?;
  let mut zip = ZipWriter::new(writer);

  for file in &files {
    let entry_name = match prefix {
      Some(p) => format!("{}/{}", p.trim_matches('/'), file.relative),
      None => file.relative.clone(),
    };
    let options = SimpleFileOptions::default()
      .compression_method(CompressionMethod::Deflated)
      .last_modified_time(DateTime::default())
      .unix_permissions(ENTRY_MODE);

    zip.start_file(entry_name, options)?;
    let mut input = File::open(&file.absolute).map_err(|source| ArchiveError::Read {
      path: file.absolute.clone(),
      source,
    })?;
    io::copy(&mut input, &mut zip).map_err(|source| ArchiveError::Read {
      path: file.absolute.clone(),
      source,
    })?;
  }

  zip.finish()?;
  Ok(files.len())
}

/// Package `tree` into a content-addressed artifact inside `out_dir`.
///
/// The archive is written to a temp file and renamed to
/// `<name>-<fingerprint>.zip`. An existing file with that name already holds
/// identical bytes and is reused.
pub fn archive(tree: &SourceTree, name: &str, prefix: Option<&str>, out_dir: &Path) -> Result<Artifact, ArchiveError> {
  info!(root = %tree.root().display(), name, "archiving source tree");

  let write_err = |source| ArchiveError::Write {
    path: out_dir.to_path_buf(),
    source,
  };

  std::fs::create_dir_all(out_dir).map_err(write_err)?;
  let mut temp = tempfile::NamedTempFile::new_in(out_dir).map_err(write_err)?;
  let count = write_archive(tree, prefix, temp.as_file_mut())?;
  temp.as_file_mut().flush().map_err(write_err)?;

  let staged = Artifact::from_file(name, temp.path())?;
  let final_path = out_dir.join(artifact_file_name(name, &staged.fingerprint));

  if final_path.exists() {
    debug!(path = %final_path.display(), "archive already present");
  } else {
    temp.persist(&final_path).map_err(|e| ArchiveError::Write {
      path: final_path.clone(),
      source: e.error,
    })?;
  }

  debug!(entries = count, fingerprint = %staged.fingerprint.short(), "archive written");

  Ok(Artifact {
    path: final_path,
    ..staged
  })
}
