//! Dependency manifests.
//!
//! A manifest is a pinned-requirements file: one specifier per line, `#`
//! comments, optional trailing-backslash continuations. The fingerprint is
//! taken over the normalized specifier list, so reformatting or editing
//! comments never triggers a layer rebuild while any change to a specifier
//! (or their order) does.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::util::hash::{Fingerprint, hash_bytes};

/// Directives that pull in other files; their content would escape the
/// fingerprint.
const INCLUDE_DIRECTIVES: &[&str] = &["--requirement", "--constraint"];

/// Short forms of the include directives; pip also accepts them with the
/// file name attached (`-rbase.txt`).
const SHORT_INCLUDE_DIRECTIVES: &[&str] = &["-r", "-c"];

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("dependency manifest not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read manifest {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("{path}:{line}: '{directive}' includes another file and is not supported")]
  Unsupported {
    path: PathBuf,
    line: usize,
    directive: String,
  },
}

/// Ordered list of pinned dependency specifiers plus its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyManifest {
  path: PathBuf,
  specifiers: Vec<String>,
  fingerprint: Fingerprint,
}

impl DependencyManifest {
  /// Read and parse a manifest file.
  pub fn load(path: &Path) -> Result<Self, ManifestError> {
    let content = match std::fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ManifestError::NotFound(path.to_path_buf())),
      Err(source) => {
        return Err(ManifestError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };
    Self::parse(path, &content)
  }

  /// Parse manifest content. `path` is kept for error messages and for
  /// mounting the file into a build environment.
  pub fn parse(path: &Path, content: &str) -> Result<Self, ManifestError> {
    let mut specifiers = Vec::new();
    let mut pending = String::new();
    let mut pending_line = 0;

    for (idx, raw) in content.lines().enumerate() {
      let line = strip_comment(raw).trim();
      if pending.is_empty() {
        pending_line = idx + 1;
      }

      if let Some(head) = line.strip_suffix('\\') {
        pending.push_str(head.trim());
        pending.push(' ');
        continue;
      }
      pending.push_str(line);

      let spec = normalize_whitespace(&pending);
      pending.clear();
      if spec.is_empty() {
        continue;
      }
      check_directive(path, pending_line, &spec)?;
      specifiers.push(spec);
    }

    let spec = normalize_whitespace(&pending);
    if !spec.is_empty() {
      check_directive(path, pending_line, &spec)?;
      specifiers.push(spec);
    }

    let fingerprint = hash_bytes(specifiers.join("\n").as_bytes());
    Ok(Self {
      path: path.to_path_buf(),
      specifiers,
      fingerprint,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn specifiers(&self) -> &[String] {
    &self.specifiers
  }

  pub fn fingerprint(&self) -> &Fingerprint {
    &self.fingerprint
  }

  pub fn is_empty(&self) -> bool {
    self.specifiers.is_empty()
  }
}

fn strip_comment(line: &str) -> &str {
  if line.trim_start().starts_with('#') {
    return "";
  }
  match line.find(" #").or_else(|| line.find("\t#")) {
    Some(idx) => &line[..idx],
    None => line,
  }
}

fn normalize_whitespace(s: &str) -> String {
  s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn check_directive(path: &Path, line: usize, spec: &str) -> Result<(), ManifestError> {
  let first = spec.split([' ', '=']).next().unwrap_or_default();
  if INCLUDE_DIRECTIVES.contains(&first) || SHORT_INCLUDE_DIRECTIVES.iter().any(|short| first.starts_with(short)) {
    return Err(ManifestError::Unsupported {
      path: path.to_path_buf(),
      line,
      directive: spec.to_string(),
    });
  }
  Ok(())
}
