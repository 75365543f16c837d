//! Source trees: a root directory plus exclude patterns.
//!
//! Exclude patterns use gitignore semantics (`venv/` matches directories only,
//! `*.pyc` matches at any depth, `/build` is anchored to the root). Files are
//! always enumerated in sorted relative-path order so everything derived from
//! a tree (fingerprints, archives) is independent of filesystem traversal
//! order.

use std::path::{Component, Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors produced while resolving or walking a source tree.
#[derive(Debug, Error)]
pub enum SourceError {
  /// Root does not exist or is not a directory.
  #[error("source directory not found: {0}")]
  NotFound(PathBuf),

  #[error("invalid exclude pattern '{pattern}': {message}")]
  InvalidPattern { pattern: String, message: String },

  #[error("failed to walk {root}: {message}")]
  Walk { root: PathBuf, message: String },
}

/// A file selected for packaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
  /// Path relative to the tree root, `/`-separated.
  pub relative: String,
  /// Path on disk.
  pub absolute: PathBuf,
}

/// Root path plus an ordered set of exclude globs.
#[derive(Debug, Clone)]
pub struct SourceTree {
  root: PathBuf,
  excludes: Vec<String>,
  matcher: Gitignore,
}

impl SourceTree {
  /// Resolve a source tree.
  ///
  /// Fails with [`SourceError::NotFound`] if `root` is missing or not a
  /// directory.
  pub fn new(root: impl AsRef<Path>, excludes: Vec<String>) -> Result<Self, SourceError> {
    let root = root.as_ref();
    if !root.is_dir() {
      return Err(SourceError::NotFound(root.to_path_buf()));
    }
    let root = dunce::canonicalize(root).map_err(|_| SourceError::NotFound(root.to_path_buf()))?;

    let mut builder = GitignoreBuilder::new(&root);
    for pattern in &excludes {
      builder.add_line(None, pattern).map_err(|e| SourceError::InvalidPattern {
        pattern: pattern.clone(),
        message: e.to_string(),
      })?;
    }
    let matcher = builder.build().map_err(|e| SourceError::InvalidPattern {
      pattern: excludes.join(", "),
      message: e.to_string(),
    })?;

    Ok(Self { root, excludes, matcher })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn excludes(&self) -> &[String] {
    &self.excludes
  }

  /// Check whether a root-relative path is excluded.
  pub fn is_excluded(&self, relative: &Path, is_dir: bool) -> bool {
    self.matcher.matched_path_or_any_parents(relative, is_dir).is_ignore()
  }

  /// Enumerate all non-excluded files, sorted by relative path.
  ///
  /// Symlinks are followed; a dangling link is an error.
  pub fn files(&self) -> Result<Vec<SourceFile>, SourceError> {
    let walk_err = |message: String| SourceError::Walk {
      root: self.root.clone(),
      message,
    };

    let walker = WalkDir::new(&self.root)
      .follow_links(true)
      .sort_by_file_name()
      .into_iter()
      .filter_entry(|entry| {
        if entry.depth() == 0 {
          return true;
        }
        match entry.path().strip_prefix(&self.root) {
          Ok(rel) => !self.is_excluded(rel, entry.file_type().is_dir()),
          Err(_) => true,
        }
      });

    let mut files = Vec::new();
    for entry in walker {
      let entry = entry.map_err(|e| walk_err(e.to_string()))?;
      if !entry.file_type().is_file() {
        continue;
      }

      let rel = entry
        .path()
        .strip_prefix(&self.root)
        .map_err(|e| walk_err(e.to_string()))?;
      files.push(SourceFile {
        relative: to_slash(rel),
        absolute: entry.path().to_path_buf(),
      });
    }

    // Flat order on the joined path, not per-directory walk order.
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
  }
}

/// Anchored exclude patterns for each of `dirs` that lies strictly inside
/// `root`.
///
/// Directories that do not exist yet are resolved through their nearest
/// existing ancestor so they compare equal to the canonical root.
pub fn nested_excludes<'a>(root: &Path, dirs: impl IntoIterator<Item = &'a Path>) -> Vec<String> {
  let root = resolve(root);
  dirs
    .into_iter()
    .filter_map(|dir| {
      let rel = to_slash(resolve(dir).strip_prefix(&root).ok()?);
      (!rel.is_empty()).then(|| format!("/{}/", rel))
    })
    .collect()
}

fn resolve(path: &Path) -> PathBuf {
  for ancestor in path.ancestors() {
    if let Ok(base) = dunce::canonicalize(ancestor) {
      return match path.strip_prefix(ancestor) {
        Ok(rest) if !rest.as_os_str().is_empty() => base.join(rest),
        _ => base,
      };
    }
  }
  path.to_path_buf()
}

/// Join path components with `/` regardless of host separator.
pub fn to_slash(path: &Path) -> String {
  path
    .components()
    .filter_map(|c| match c {
      Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
      _ => None,
    })
    .collect::<Vec<_>>()
    .join("/")
}
