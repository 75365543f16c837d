//! Implementation of the `ldeploy hash` command.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;

use layerdeploy_lib::source::SourceTree;
use layerdeploy_lib::util::hash::{hash_file, hash_tree};

use crate::output::print_json;

/// Print the content fingerprint of a file, or of a directory tree after
/// applying `excludes`.
pub fn cmd_hash(path: &Path, excludes: Vec<String>, json: bool) -> Result<()> {
  let fingerprint = if path.is_dir() {
    let tree = SourceTree::new(path, excludes).with_context(|| format!("Failed to read {}", path.display()))?;
    hash_tree(&tree)?
  } else {
    hash_file(path).with_context(|| format!("Failed to hash {}", path.display()))?
  };

  if json {
    print_json(&json!({ "path": path, "fingerprint": fingerprint }))?;
  } else {
    println!("{}  {}", fingerprint, path.display());
  }
  Ok(())
}
