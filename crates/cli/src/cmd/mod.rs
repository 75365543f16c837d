mod apply;
mod hash;
mod info;
mod plan;
mod status;

pub use apply::cmd_apply;
pub use hash::cmd_hash;
pub use info::cmd_info;
pub use plan::cmd_plan;
pub use status::cmd_status;

use std::path::Path;

use anyhow::{Context, Result, bail};

use layerdeploy_lib::build::{BuildRecordStore, LayerBuilder};
use layerdeploy_lib::config::{ConfiguredEnvironment, ConfiguredTarget, ProjectConfig};
use layerdeploy_lib::consts::CONFIG_FILENAME;
use layerdeploy_lib::deploy::{DeployableUnit, DeploymentCoordinator};
use layerdeploy_lib::state::FileStateStore;

pub type Coordinator = DeploymentCoordinator<ConfiguredEnvironment, FileStateStore, ConfiguredTarget>;

/// Load the given project file, or the nearest one above the current directory.
pub fn load_config(path: Option<&Path>) -> Result<ProjectConfig> {
  let path = match path {
    Some(p) => p.to_path_buf(),
    None => {
      let cwd = std::env::current_dir().context("Failed to determine current directory")?;
      ProjectConfig::find(&cwd)
        .with_context(|| format!("No {} found in {} or any parent directory", CONFIG_FILENAME, cwd.display()))?
    }
  };
  ProjectConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Units named on the command line, or all of them.
pub fn select_units<'a>(config: &'a ProjectConfig, names: &[String]) -> Result<Vec<&'a DeployableUnit>> {
  if names.is_empty() {
    if config.units.is_empty() {
      bail!("{} declares no units", config.path.display());
    }
    return Ok(config.units.iter().collect());
  }

  names
    .iter()
    .map(|name| {
      config
        .unit(name)
        .with_context(|| format!("Unknown unit '{}' in {}", name, config.path.display()))
    })
    .collect()
}

pub fn coordinator(config: &ProjectConfig, unit: &DeployableUnit) -> Coordinator {
  let builder = LayerBuilder::new(
    config.builder.environment(),
    BuildRecordStore::new(config.store_dir()),
    unit.settings.layer_prefix(),
  );
  DeploymentCoordinator::new(builder, FileStateStore::new(config.state_dir()), config.target.target())
}
