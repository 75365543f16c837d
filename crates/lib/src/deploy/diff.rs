//! Desired-vs-recorded comparison.

use serde::Serialize;

use crate::state::RemoteState;
use crate::util::hash::Fingerprint;

/// Which recorded fingerprints differ from the desired ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitDiff {
  /// No state recorded for the unit.
  pub first_deploy: bool,
  pub code_changed: bool,
  /// Covers adding, changing and removing the dependency manifest.
  pub manifest_changed: bool,
  /// Platform, function settings or environment differ.
  pub config_changed: bool,
}

impl UnitDiff {
  pub fn needs_apply(&self) -> bool {
    self.first_deploy || self.code_changed || self.manifest_changed || self.config_changed
  }

  /// Human-readable list of changes.
  pub fn reasons(&self) -> Vec<&'static str> {
    let mut reasons = Vec::new();
    if self.first_deploy {
      reasons.push("first deploy");
    } else {
      if self.code_changed {
        reasons.push("code changed");
      }
      if self.manifest_changed {
        reasons.push("dependencies changed");
      }
      if self.config_changed {
        reasons.push("configuration changed");
      }
    }
    reasons
  }
}

/// Desired fingerprints of a unit.
#[derive(Debug, Clone, Copy)]
pub struct Desired<'a> {
  pub code: &'a Fingerprint,
  pub manifest: Option<&'a Fingerprint>,
  pub config: &'a Fingerprint,
}

/// Compare desired fingerprints against the last applied state.
///
/// State written before config fingerprints were recorded compares as
/// unchanged configuration.
pub fn compute_diff(previous: Option<&RemoteState>, desired: Desired<'_>) -> UnitDiff {
  match previous {
    None => UnitDiff {
      first_deploy: true,
      code_changed: true,
      manifest_changed: desired.manifest.is_some(),
      config_changed: true,
    },
    Some(state) => UnitDiff {
      first_deploy: false,
      code_changed: state.code_fingerprint != *desired.code,
      manifest_changed: state.manifest_fingerprint.as_ref() != desired.manifest,
      config_changed: state.config_fingerprint.as_ref().is_some_and(|c| c != desired.config),
    },
  }
}
