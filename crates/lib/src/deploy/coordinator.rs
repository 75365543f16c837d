//! Convergence passes.
//!
//! A pass computes a unit's desired artifacts, compares their fingerprints
//! with the last applied state and makes at most one remote call. State is
//! written only after the remote confirms the apply.

use tracing::{debug, info, warn};

use crate::archive::{ArchiveError, archive, write_archive};
use crate::artifact::prune_superseded;
use crate::build::{BuildEnvironment, LayerBuilder};
use crate::error::PipelineError;
use crate::manifest::DependencyManifest;
use crate::source::{SourceTree, nested_excludes};
use crate::state::{LockMode, RemoteState, StateStore};
use crate::util::hash::hash_bytes;
use crate::util::unix_now;

use super::diff::{Desired, compute_diff};
use super::remote::RemoteTarget;
use super::types::{ApplyRequest, DeployableUnit, PassReport, PlanReport};

/// Logical artifact name for packaged code.
pub const CODE_ARTIFACT_NAME: &str = "code";

pub struct DeploymentCoordinator<E, S, R> {
  builder: LayerBuilder<E>,
  state: S,
  target: R,
}

impl<E, S, R> DeploymentCoordinator<E, S, R>
where
  E: BuildEnvironment,
  S: StateStore,
  R: RemoteTarget,
{
  pub fn new(builder: LayerBuilder<E>, state: S, target: R) -> Self {
    Self { builder, state, target }
  }

  pub fn builder(&self) -> &LayerBuilder<E> {
    &self.builder
  }

  pub fn state(&self) -> &S {
    &self.state
  }

  pub fn target(&self) -> &R {
    &self.target
  }

  /// Converge one unit.
  ///
  /// Steps, under the unit's exclusive lock:
  /// 1. read the recorded state (corrupt state aborts before any work)
  /// 2. package code
  /// 3. build or reuse the dependency layer
  /// 4. diff fingerprints against the recorded state
  /// 5. apply through the remote target if anything changed
  /// 6. commit the new state
  ///
  /// A failure at any step leaves recorded state untouched. A layer built
  /// before a failed apply stays recorded and is reused by the next pass.
  pub async fn run_pass(&self, unit: &DeployableUnit) -> Result<PassReport, PipelineError> {
    let _guard = self.state.lock(&unit.name, LockMode::Exclusive, "apply")?;

    let previous = self.state.get(&unit.name)?;
    let manifest = load_manifest(unit)?;

    let tree = self.source_tree(unit)?;
    let code_dir = self.builder.records().code_dir(&unit.name);
    let code = archive(&tree, CODE_ARTIFACT_NAME, None, &code_dir)?;
    debug!(unit = %unit.name, code = %code.fingerprint.short(), "code packaged");

    // The layer must exist before anything references it.
    let (layer, layer_built) = match &manifest {
      Some(m) => {
        let outcome = self.builder.ensure_layer(&unit.name, m, unit.platform).await?;
        (Some(outcome.artifact), outcome.built)
      }
      None => (None, false),
    };

    let manifest_fingerprint = manifest.as_ref().map(|m| m.fingerprint().clone());
    let config_fingerprint = unit.config_fingerprint();
    let diff = compute_diff(
      previous.as_ref(),
      Desired {
        code: &code.fingerprint,
        manifest: manifest_fingerprint.as_ref(),
        config: &config_fingerprint,
      },
    );

    if !diff.needs_apply() {
      info!(unit = %unit.name, "up to date");
      prune_superseded(&code_dir, &code);
      return Ok(PassReport {
        unit: unit.name.clone(),
        code,
        layer,
        layer_built,
        diff,
        applied: None,
        state: previous,
      });
    }

    info!(
      unit = %unit.name,
      target = self.target.name(),
      changes = %diff.reasons().join(", "),
      "applying"
    );

    let request = ApplyRequest {
      unit: &unit.name,
      code: &code,
      layer: layer.as_ref(),
      environment: &unit.environment,
      settings: &unit.settings,
      platform: unit.platform,
      previous: previous.as_ref(),
    };
    let outcome = match self.target.apply(&request).await {
      Ok(outcome) => outcome,
      Err(e) => {
        warn!(unit = %unit.name, error = %e, "remote apply failed, state left unchanged");
        return Err(e.into());
      }
    };

    let next = RemoteState {
      unit: unit.name.clone(),
      code_fingerprint: code.fingerprint.clone(),
      manifest_fingerprint,
      layer_fingerprint: layer.as_ref().map(|l| l.fingerprint.clone()),
      config_fingerprint: Some(config_fingerprint),
      serial: 0,
      applied_at: unix_now(),
    };
    let committed = self.state.put(next, previous.as_ref().map(|s| s.serial))?;
    prune_superseded(&code_dir, &code);

    info!(unit = %unit.name, action = %outcome.action, serial = committed.serial, "applied");

    Ok(PassReport {
      unit: unit.name.clone(),
      code,
      layer,
      layer_built,
      diff,
      applied: Some(outcome),
      state: Some(committed),
    })
  }

  /// Compute what [`run_pass`](Self::run_pass) would do.
  ///
  /// Packages code in memory only to fingerprint it; builds nothing, calls
  /// nothing remote and writes nothing.
  pub fn plan(&self, unit: &DeployableUnit) -> Result<PlanReport, PipelineError> {
    let _guard = self.state.lock(&unit.name, LockMode::Shared, "plan")?;

    let previous = self.state.get(&unit.name)?;
    let manifest = load_manifest(unit)?;

    let tree = self.source_tree(unit)?;
    let mut buffer = std::io::Cursor::new(Vec::new());
    write_archive(&tree, None, &mut buffer)?;
    let code_fingerprint = hash_bytes(buffer.get_ref());

    let layer_rebuild = match &manifest {
      Some(m) => {
        let prior = self.builder.records().load(&unit.name, &unit.platform);
        !self.builder.is_cache_hit(m, &unit.platform, prior.as_ref())
      }
      None => false,
    };

    let manifest_fingerprint = manifest.map(|m| m.fingerprint().clone());
    let config_fingerprint = unit.config_fingerprint();
    let diff = compute_diff(
      previous.as_ref(),
      Desired {
        code: &code_fingerprint,
        manifest: manifest_fingerprint.as_ref(),
        config: &config_fingerprint,
      },
    );

    Ok(PlanReport {
      unit: unit.name.clone(),
      code_fingerprint,
      manifest_fingerprint,
      layer_rebuild,
      diff,
      previous,
    })
  }

  /// The unit's source tree, minus any store, state or publish directory
  /// this coordinator writes to inside it.
  fn source_tree(&self, unit: &DeployableUnit) -> Result<SourceTree, PipelineError> {
    let own_dirs = [Some(self.builder.records().root()), self.state.location(), self.target.location()];
    let mut excludes = unit.excludes.clone();
    excludes.extend(nested_excludes(&unit.source, own_dirs.into_iter().flatten()));
    Ok(SourceTree::new(&unit.source, excludes).map_err(ArchiveError::from)?)
  }
}

fn load_manifest(unit: &DeployableUnit) -> Result<Option<DependencyManifest>, PipelineError> {
  Ok(unit.manifest.as_deref().map(DependencyManifest::load).transpose()?)
}
