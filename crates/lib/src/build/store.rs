//! Build record and artifact storage.
//!
//! ```text
//! {store}/code/<unit>/code-<fp>.zip   # packaged code artifacts
//! {store}/layers/<unit>/<platform>/
//! ├── record.json       # BuildRecord for the last successful build
//! ├── layer-<fp>.zip    # layer artifacts (never modified once written)
//! ├── build.log         # output of the last failed build
//! └── staging/          # scratch install root, recreated for every build
//! ```
//!
//! Records are keyed per unit and per platform; two units never share a
//! layer record even when their manifests are identical.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::platform::TargetPlatform;

use super::types::{BUILD_RECORD_VERSION, BuildRecord, BuildRecordError};

const CODE_DIR: &str = "code";
const LAYERS_DIR: &str = "layers";
const RECORD_FILENAME: &str = "record.json";
const STAGING_DIR: &str = "staging";
const BUILD_LOG_FILENAME: &str = "build.log";

/// Locates and persists build records under a store root.
#[derive(Debug, Clone)]
pub struct BuildRecordStore {
  root: PathBuf,
}

impl BuildRecordStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Output directory for a unit's code artifacts.
  pub fn code_dir(&self, unit: &str) -> PathBuf {
    self.root.join(CODE_DIR).join(unit)
  }

  /// Directory holding everything for one unit/platform pair.
  pub fn layer_dir(&self, unit: &str, platform: &TargetPlatform) -> PathBuf {
    self.root.join(LAYERS_DIR).join(unit).join(platform.dir_name())
  }

  pub fn record_path(&self, unit: &str, platform: &TargetPlatform) -> PathBuf {
    self.layer_dir(unit, platform).join(RECORD_FILENAME)
  }

  pub fn staging_dir(&self, unit: &str, platform: &TargetPlatform) -> PathBuf {
    self.layer_dir(unit, platform).join(STAGING_DIR)
  }

  pub fn build_log_path(&self, unit: &str, platform: &TargetPlatform) -> PathBuf {
    self.layer_dir(unit, platform).join(BUILD_LOG_FILENAME)
  }

  /// Load the record for a unit/platform pair.
  ///
  /// A missing, unreadable or unparseable record is a cache miss: the layer
  /// is rebuilt, never deployed from a record that cannot be trusted.
  pub fn load(&self, unit: &str, platform: &TargetPlatform) -> Option<BuildRecord> {
    let path = self.record_path(unit, platform);

    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "unreadable build record, will rebuild");
        return None;
      }
    };

    match serde_json::from_str::<BuildRecord>(&content) {
      Ok(record) if record.version == BUILD_RECORD_VERSION => Some(record),
      Ok(record) => {
        warn!(path = %path.display(), version = record.version, "unsupported build record version, will rebuild");
        None
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "invalid build record, will rebuild");
        None
      }
    }
  }

  /// Persist a record atomically (write temp, then rename).
  pub fn save(&self, unit: &str, record: &BuildRecord) -> Result<(), BuildRecordError> {
    let dir = self.layer_dir(unit, &record.platform);
    let path = dir.join(RECORD_FILENAME);
    let temp_path = dir.join("record.json.tmp");
    let write_err = |source| BuildRecordError::Write {
      path: path.clone(),
      source,
    };

    fs::create_dir_all(&dir).map_err(write_err)?;
    let content = serde_json::to_string_pretty(record).map_err(BuildRecordError::Serialize)?;
    fs::write(&temp_path, content).map_err(write_err)?;
    fs::rename(&temp_path, &path).map_err(write_err)?;

    debug!(path = %path.display(), fingerprint = %record.manifest_fingerprint.short(), "build record saved");
    Ok(())
  }
}
