//! Implementation of the `ldeploy status` command.
//!
//! Lists the last applied state of every unit in the project, including
//! declared units that were never applied.

use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde_json::json;

use layerdeploy_lib::state::{FileStateStore, StateStore};

use super::load_config;
use crate::output::{print_info, print_json, print_stat, print_success, print_warning};

pub fn cmd_status(config_path: Option<&Path>, json: bool) -> Result<()> {
  let config = load_config(config_path)?;
  let store = FileStateStore::new(config.state_dir());
  let states = store
    .list()
    .with_context(|| format!("Failed to read state from {}", store.base_path().display()))?;

  let pending: Vec<&str> = config
    .units
    .iter()
    .map(|u| u.name.as_str())
    .filter(|name| !states.iter().any(|s| s.unit == *name))
    .collect();

  if json {
    return print_json(&json!({ "units": states, "never_applied": pending }));
  }

  if states.is_empty() && pending.is_empty() {
    print_info("No units declared or applied.");
    return Ok(());
  }

  for state in &states {
    print_success(&state.unit);
    print_stat("Code", state.code_fingerprint.short());
    print_stat(
      "Manifest",
      state.manifest_fingerprint.as_ref().map(|f| f.short()).unwrap_or("none"),
    );
    print_stat("Layer", state.layer_fingerprint.as_ref().map(|f| f.short()).unwrap_or("none"));
    print_stat("Serial", &state.serial.to_string());
    let applied = UNIX_EPOCH + Duration::from_secs(state.applied_at);
    print_stat("Applied", &humantime::format_rfc3339_seconds(applied).to_string());
    if config.unit(&state.unit).is_none() {
      print_warning(&format!("{} is no longer declared in {}", state.unit, config.path.display()));
    }
  }

  for name in pending {
    print_info(&format!("{}: never applied", name));
  }

  Ok(())
}
