//! Layer build orchestration.
//!
//! Decides between reusing the recorded layer and running a fresh isolated
//! build, and produces the layer artifact and its [`BuildRecord`].

use std::path::Path;

use tokio::fs;
use tracing::{debug, info, warn};

use crate::archive::archive;
use crate::artifact::prune_superseded;
use crate::manifest::DependencyManifest;
use crate::platform::TargetPlatform;
use crate::source::SourceTree;

use super::env::{BuildEnvironment, BuildRequest};
use super::store::BuildRecordStore;
use super::types::{BuildRecord, LayerBuildError, LayerOutcome};

/// Logical artifact name for dependency layers.
pub const LAYER_ARTIFACT_NAME: &str = "layer";

/// Produces dependency layers through a [`BuildEnvironment`].
#[derive(Debug, Clone)]
pub struct LayerBuilder<E> {
  env: E,
  records: BuildRecordStore,
  prefix: String,
}

impl<E: BuildEnvironment> LayerBuilder<E> {
  /// `prefix` is the directory dependencies live under inside the layer
  /// (`python` for Python runtimes, empty for none).
  pub fn new(env: E, records: BuildRecordStore, prefix: impl Into<String>) -> Self {
    Self {
      env,
      records,
      prefix: prefix.into(),
    }
  }

  pub fn records(&self) -> &BuildRecordStore {
    &self.records
  }

  pub fn environment(&self) -> &E {
    &self.env
  }

  /// True if `prior` can be reused for `manifest` on `platform`.
  ///
  /// The record must match the manifest fingerprint, the platform and this
  /// builder's layer prefix, and its artifact must still hash to what was
  /// recorded.
  pub fn is_cache_hit(&self, manifest: &DependencyManifest, platform: &TargetPlatform, prior: Option<&BuildRecord>) -> bool {
    let Some(record) = prior else {
      return false;
    };
    if record.manifest_fingerprint != *manifest.fingerprint() || record.platform != *platform {
      return false;
    }
    if record.prefix != self.prefix {
      debug!(recorded = %record.prefix, wanted = %self.prefix, "layer prefix changed, will rebuild");
      return false;
    }
    if !record.layer.verify() {
      warn!(path = %record.layer.path.display(), "recorded layer missing or modified, will rebuild");
      return false;
    }
    true
  }

  /// Build or reuse the layer for `manifest`.
  ///
  /// Does not persist anything but the layer artifact; see
  /// [`ensure_layer`](Self::ensure_layer) for the record-keeping variant.
  pub async fn build(
    &self,
    unit: &str,
    manifest: &DependencyManifest,
    platform: TargetPlatform,
    prior: Option<&BuildRecord>,
  ) -> Result<LayerOutcome, LayerBuildError> {
    let fingerprint = manifest.fingerprint();

    if self.is_cache_hit(manifest, &platform, prior)
      && let Some(record) = prior
    {
      debug!(unit, fingerprint = %fingerprint.short(), "layer cache hit");
      return Ok(LayerOutcome {
        artifact: record.layer.clone(),
        record: record.clone(),
        built: false,
      });
    }

    info!(
      unit,
      platform = %platform,
      fingerprint = %fingerprint.short(),
      environment = self.env.name(),
      "building dependency layer"
    );

    let staging = self.records.staging_dir(unit, &platform);
    reset_dir(&staging).await?;

    let install_dir = if self.prefix.is_empty() {
      staging.clone()
    } else {
      staging.join(&self.prefix)
    };
    fs::create_dir_all(&install_dir).await.map_err(|source| LayerBuildError::Io {
      path: install_dir.clone(),
      source,
    })?;

    let request = BuildRequest {
      manifest,
      platform,
      staging: &staging,
      install_dir: &install_dir,
    };

    let log = match self.env.install(&request).await {
      Ok(log) => log,
      Err(err) => {
        let log_path = self.records.build_log_path(unit, &platform);
        if let super::env::InstallError::Failed { ref log, .. } = err
          && let Err(e) = fs::write(&log_path, &log.output).await
        {
          warn!(path = %log_path.display(), error = %e, "failed to write build log");
        }
        let _ = fs::remove_dir_all(&staging).await;
        return Err(err.into_build_error(self.env.name(), log_path));
      }
    };
    debug!(unit, bytes = log.output.len(), "dependency install finished");

    let tree = SourceTree::new(&staging, Vec::new()).map_err(crate::archive::ArchiveError::from)?;
    let artifact = archive(&tree, LAYER_ARTIFACT_NAME, None, &self.records.layer_dir(unit, &platform))?;
    let _ = fs::remove_dir_all(&staging).await;

    info!(unit, layer = %artifact.fingerprint.short(), size = artifact.size, "dependency layer built");

    let record = BuildRecord::new(fingerprint.clone(), platform, self.prefix.clone(), artifact.clone());
    Ok(LayerOutcome {
      artifact,
      record,
      built: true,
    })
  }

  /// Build or reuse the layer, persisting a new record after a fresh build.
  ///
  /// On failure the existing record is left untouched.
  pub async fn ensure_layer(
    &self,
    unit: &str,
    manifest: &DependencyManifest,
    platform: TargetPlatform,
  ) -> Result<LayerOutcome, LayerBuildError> {
    let prior = self.records.load(unit, &platform);
    let outcome = self.build(unit, manifest, platform, prior.as_ref()).await?;
    if outcome.built {
      self.records.save(unit, &outcome.record)?;
      prune_superseded(&self.records.layer_dir(unit, &platform), &outcome.artifact);
    }
    Ok(outcome)
  }
}

/// Remove any stale contents and recreate `dir` empty.
async fn reset_dir(dir: &Path) -> Result<(), LayerBuildError> {
  let io_err = |source| LayerBuildError::Io {
    path: dir.to_path_buf(),
    source,
  };

  match fs::remove_dir_all(dir).await {
    Ok(()) => debug!(path = %dir.display(), "removed stale staging directory"),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => return Err(io_err(e)),
  }
  fs::create_dir_all(dir).await.map_err(io_err)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::env::InstallError;
  use crate::build::types::BuildLog;
  use crate::platform::Arch;
  use crate::util::testutil::{FakeBuildEnv, unavailable};
  use std::path::PathBuf;
  use tempfile::TempDir;

  fn manifest(dir: &Path, content: &str) -> DependencyManifest {
    let path = dir.join("requirements.txt");
    std::fs::write(&path, content).unwrap();
    DependencyManifest::load(&path).unwrap()
  }

  fn arm() -> TargetPlatform {
    TargetPlatform::linux(Arch::Aarch64)
  }

  #[tokio::test]
  async fn first_build_invokes_environment_and_records() {
    let temp = TempDir::new().unwrap();
    let env = FakeBuildEnv::default();
    let builder = LayerBuilder::new(&env, BuildRecordStore::new(temp.path().join("store")), "python");
    let m = manifest(temp.path(), "requests==2.0\n");

    let outcome = builder.ensure_layer("fn", &m, arm()).await.unwrap();

    assert!(outcome.built);
    assert_eq!(env.calls(), 1);
    assert_eq!(&outcome.record.manifest_fingerprint, m.fingerprint());
    assert_eq!(builder.records().load("fn", &arm()), Some(outcome.record.clone()));
    assert!(outcome.artifact.path.exists());
    assert!(!builder.records().staging_dir("fn", &arm()).exists());

    let file = std::fs::File::open(&outcome.artifact.path).unwrap();
    let zip = zip::ZipArchive::new(file).unwrap();
    assert!(zip.file_names().any(|n| n == "python/requests/__init__.py"));
  }

  #[tokio::test]
  async fn unchanged_manifest_is_cache_hit() {
    let temp = TempDir::new().unwrap();
    let env = FakeBuildEnv::default();
    let builder = LayerBuilder::new(&env, BuildRecordStore::new(temp.path().join("store")), "python");
    let m = manifest(temp.path(), "requests==2.0\n");

    let first = builder.ensure_layer("fn", &m, arm()).await.unwrap();
    let second = builder.ensure_layer("fn", &m, arm()).await.unwrap();

    assert!(!second.built);
    assert_eq!(env.calls(), 1);
    assert_eq!(first.artifact, second.artifact);
  }

  #[tokio::test]
  async fn changed_manifest_rebuilds_and_updates_record() {
    let temp = TempDir::new().unwrap();
    let env = FakeBuildEnv::default();
    let builder = LayerBuilder::new(&env, BuildRecordStore::new(temp.path().join("store")), "python");

    let m1 = manifest(temp.path(), "requests==2.0\n");
    builder.ensure_layer("fn", &m1, arm()).await.unwrap();
    let m2 = manifest(temp.path(), "requests==2.1\n");
    let outcome = builder.ensure_layer("fn", &m2, arm()).await.unwrap();

    assert!(outcome.built);
    assert_eq!(env.calls(), 2);
    let record = builder.records().load("fn", &arm()).unwrap();
    assert_eq!(&record.manifest_fingerprint, m2.fingerprint());
  }

  #[tokio::test]
  async fn rebuild_removes_superseded_layer() {
    let temp = TempDir::new().unwrap();
    let env = FakeBuildEnv::default();
    let builder = LayerBuilder::new(&env, BuildRecordStore::new(temp.path().join("store")), "python");

    let old = builder
      .ensure_layer("fn", &manifest(temp.path(), "requests==2.0\n"), arm())
      .await
      .unwrap();
    let new = builder
      .ensure_layer("fn", &manifest(temp.path(), "requests==2.1\n"), arm())
      .await
      .unwrap();

    assert!(!old.artifact.path.exists());
    assert!(new.artifact.verify());
    let layers: Vec<_> = std::fs::read_dir(builder.records().layer_dir("fn", &arm()))
      .unwrap()
      .flatten()
      .filter(|e| e.file_name().to_string_lossy().starts_with("layer-"))
      .collect();
    assert_eq!(layers.len(), 1);
  }

  #[tokio::test]
  async fn build_with_matching_prior_skips_environment() {
    let temp = TempDir::new().unwrap();
    let env = FakeBuildEnv::default();
    let builder = LayerBuilder::new(&env, BuildRecordStore::new(temp.path().join("store")), "python");
    let m = manifest(temp.path(), "requests==2.0\n");

    let built = builder.build("fn", &m, arm(), None).await.unwrap();
    let reused = builder.build("fn", &m, arm(), Some(&built.record)).await.unwrap();

    assert!(!reused.built);
    assert_eq!(env.calls(), 1);
    // build() alone never writes a record
    assert!(builder.records().load("fn", &arm()).is_none());
  }

  #[tokio::test]
  async fn prefix_change_rebuilds_layer() {
    let temp = TempDir::new().unwrap();
    let env = FakeBuildEnv::default();
    let store = temp.path().join("store");
    let m = manifest(temp.path(), "lodash==4.17\n");

    let python = LayerBuilder::new(&env, BuildRecordStore::new(&store), "python");
    python.ensure_layer("fn", &m, arm()).await.unwrap();

    let nodejs = LayerBuilder::new(&env, BuildRecordStore::new(&store), "nodejs");
    let outcome = nodejs.ensure_layer("fn", &m, arm()).await.unwrap();

    assert!(outcome.built);
    assert_eq!(env.calls(), 2);
    assert_eq!(outcome.record.prefix, "nodejs");
    let zip = zip::ZipArchive::new(std::fs::File::open(&outcome.artifact.path).unwrap()).unwrap();
    let names: Vec<&str> = zip.file_names().collect();
    assert_eq!(names, vec!["nodejs/lodash/__init__.py"]);
  }

  #[tokio::test]
  async fn missing_layer_artifact_forces_rebuild() {
    let temp = TempDir::new().unwrap();
    let env = FakeBuildEnv::default();
    let builder = LayerBuilder::new(&env, BuildRecordStore::new(temp.path().join("store")), "python");
    let m = manifest(temp.path(), "requests==2.0\n");

    let first = builder.ensure_layer("fn", &m, arm()).await.unwrap();
    std::fs::remove_file(&first.artifact.path).unwrap();

    let second = builder.ensure_layer("fn", &m, arm()).await.unwrap();
    assert!(second.built);
    assert_eq!(env.calls(), 2);
    assert!(second.artifact.path.exists());
  }

  #[tokio::test]
  async fn failure_keeps_previous_record_and_writes_log() {
    let temp = TempDir::new().unwrap();
    let env = FakeBuildEnv::default();
    let builder = LayerBuilder::new(&env, BuildRecordStore::new(temp.path().join("store")), "python");

    let m1 = manifest(temp.path(), "requests==2.0\n");
    let good = builder.ensure_layer("fn", &m1, arm()).await.unwrap();

    env.fail(|| InstallError::Failed {
      code: Some(1),
      log: BuildLog {
        output: "ERROR: No matching distribution found for requests==99".to_string(),
      },
    });
    let m2 = manifest(temp.path(), "requests==99\n");
    let err = builder.ensure_layer("fn", &m2, arm()).await.unwrap_err();

    match err {
      LayerBuildError::BuildFailed { code, ref log_path, .. } => {
        assert_eq!(code, Some(1));
        let log = std::fs::read_to_string(log_path).unwrap();
        assert!(log.contains("No matching distribution"));
      }
      other => panic!("expected BuildFailed, got {:?}", other),
    }
    assert_eq!(builder.records().load("fn", &arm()), Some(good.record.clone()));
    assert!(good.artifact.verify());
  }

  #[tokio::test]
  async fn unavailable_environment_is_reported() {
    let temp = TempDir::new().unwrap();
    let env = FakeBuildEnv::default();
    env.fail(unavailable);
    let builder = LayerBuilder::new(&env, BuildRecordStore::new(temp.path().join("store")), "python");
    let m = manifest(temp.path(), "requests==2.0\n");

    let err = builder.ensure_layer("fn", &m, arm()).await.unwrap_err();
    assert!(matches!(err, LayerBuildError::EnvironmentUnavailable { .. }));
    assert!(builder.records().load("fn", &arm()).is_none());
  }

  #[tokio::test]
  async fn stale_staging_is_discarded_before_build() {
    let temp = TempDir::new().unwrap();
    let env = FakeBuildEnv::default();
    let store = BuildRecordStore::new(temp.path().join("store"));
    let staging: PathBuf = store.staging_dir("fn", &arm());
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join("leftover.txt"), "partial").unwrap();

    let builder = LayerBuilder::new(&env, store, "python");
    let m = manifest(temp.path(), "requests==2.0\n");
    let outcome = builder.ensure_layer("fn", &m, arm()).await.unwrap();

    assert!(!env.saw_stale());
    let file = std::fs::File::open(&outcome.artifact.path).unwrap();
    let zip = zip::ZipArchive::new(file).unwrap();
    assert!(!zip.file_names().any(|n| n.contains("leftover")));
  }
}
