use std::path::Path;

use anyhow::Result;
use serde_json::json;

use layerdeploy_lib::platform::TargetPlatform;
use layerdeploy_lib::platform::paths;

use super::load_config;
use crate::output::{print_json, print_stat};

pub fn cmd_info(config_path: Option<&Path>, json: bool) -> Result<()> {
  let host = TargetPlatform::host().map(|p| p.to_string());
  // A missing project is fine here; fall back to the per-user defaults.
  let config = load_config(config_path).ok();
  let (store, state) = match &config {
    Some(c) => (c.store_dir(), c.state_dir()),
    None => (paths::store_dir(), paths::state_dir()),
  };

  if json {
    return print_json(&json!({
      "version": env!("CARGO_PKG_VERSION"),
      "platform": host,
      "config": config.as_ref().map(|c| &c.path),
      "store": store,
      "state": state,
    }));
  }

  println!("ldeploy v{}", env!("CARGO_PKG_VERSION"));
  print_stat("Platform", host.as_deref().unwrap_or("unknown"));
  match &config {
    Some(c) => print_stat("Config", &c.path.display().to_string()),
    None => print_stat("Config", "none"),
  }
  print_stat("Store", &dunce::simplified(&store).display().to_string());
  print_stat("State", &dunce::simplified(&state).display().to_string());
  Ok(())
}
