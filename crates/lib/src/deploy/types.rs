use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::platform::TargetPlatform;
use crate::state::RemoteState;
use crate::util::hash::{Fingerprint, hash_bytes};

use super::diff::UnitDiff;

/// Settings handed to the remote resource unchanged.
///
/// Role and log destination are owned by other systems and never
/// interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSettings {
  pub runtime: String,
  pub handler: String,
  pub memory_mb: u32,
  pub timeout_secs: u32,
  pub role: Option<String>,
  pub log_group: Option<String>,
}

impl Default for FunctionSettings {
  fn default() -> Self {
    Self {
      runtime: "python3.12".to_string(),
      handler: "lambda_function.lambda_handler".to_string(),
      memory_mb: 128,
      timeout_secs: 3,
      role: None,
      log_group: None,
    }
  }
}

impl FunctionSettings {
  /// Directory dependencies live under inside a layer for this runtime.
  pub fn layer_prefix(&self) -> &'static str {
    if self.runtime.starts_with("python") {
      "python"
    } else if self.runtime.starts_with("nodejs") {
      "nodejs"
    } else {
      ""
    }
  }
}

/// Desired state of one deployable unit.
#[derive(Debug, Clone)]
pub struct DeployableUnit {
  pub name: String,
  /// Root of the code to package.
  pub source: PathBuf,
  /// Gitignore-style patterns left out of the code artifact.
  pub excludes: Vec<String>,
  /// Dependency manifest; `None` deploys without a layer.
  pub manifest: Option<PathBuf>,
  pub platform: TargetPlatform,
  /// Injected into the deployed unit as-is.
  pub environment: BTreeMap<String, String>,
  pub settings: FunctionSettings,
}

impl DeployableUnit {
  /// Digest of everything applied besides code and dependencies.
  ///
  /// Hashes a JSON encoding, so separators inside keys or values cannot
  /// make two different configurations collide.
  pub fn config_fingerprint(&self) -> Fingerprint {
    let canonical = serde_json::json!({
      "platform": self.platform.to_string(),
      "settings": self.settings,
      "environment": self.environment,
    });
    hash_bytes(canonical.to_string().as_bytes())
  }
}

/// One create-or-update call against a remote target.
#[derive(Debug, Clone)]
pub struct ApplyRequest<'a> {
  pub unit: &'a str,
  pub code: &'a Artifact,
  pub layer: Option<&'a Artifact>,
  pub environment: &'a BTreeMap<String, String>,
  pub settings: &'a FunctionSettings,
  pub platform: TargetPlatform,
  /// State from the last successful apply, if any.
  pub previous: Option<&'a RemoteState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyAction {
  Create,
  Update,
}

impl ApplyAction {
  pub fn as_str(&self) -> &'static str {
    match self {
      ApplyAction::Create => "create",
      ApplyAction::Update => "update",
    }
  }
}

impl std::fmt::Display for ApplyAction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Result of a successful remote apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
  pub action: ApplyAction,
  /// Target-specific detail (output location, command output).
  pub detail: Option<String>,
}

/// What one deployment pass did.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
  pub unit: String,
  pub code: Artifact,
  pub layer: Option<Artifact>,
  /// True if the layer was built during this pass rather than reused.
  pub layer_built: bool,
  pub diff: UnitDiff,
  /// `None` when nothing changed and no remote call was made.
  pub applied: Option<ApplyOutcome>,
  /// Remote state after the pass.
  pub state: Option<RemoteState>,
}

impl PassReport {
  pub fn is_noop(&self) -> bool {
    self.applied.is_none() && !self.layer_built
  }
}

/// What a pass would do, computed without building or writing anything.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
  pub unit: String,
  pub code_fingerprint: Fingerprint,
  pub manifest_fingerprint: Option<Fingerprint>,
  /// A manifest is declared and no reusable layer is recorded for it.
  pub layer_rebuild: bool,
  pub diff: UnitDiff,
  pub previous: Option<RemoteState>,
}

impl PlanReport {
  pub fn would_apply(&self) -> bool {
    self.diff.needs_apply()
  }
}
