//! Project configuration (`layerdeploy.toml`).
//!
//! Relative paths resolve against the directory holding the config file.
//! `LAYERDEPLOY_STORE` / `LAYERDEPLOY_STATE` take precedence over `[paths]`.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::build::{BuildEnvironment, BuildLog, BuildRequest, ContainerEnvironment, InstallError, ShellEnvironment};
use crate::consts::{CONFIG_FILENAME, DEFAULT_EXCLUDES, STATE_ENV, STORE_ENV};
use crate::deploy::{
  ApplyOutcome, ApplyRequest, CommandTarget, DeployableUnit, DirectoryTarget, FunctionSettings, RemoteError, RemoteTarget,
};
use crate::platform::TargetPlatform;
use crate::platform::paths;

const MEMORY_RANGE: std::ops::RangeInclusive<u32> = 128..=10240;
const TIMEOUT_RANGE: std::ops::RangeInclusive<u32> = 1..=900;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid config {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("invalid value for '{field}': {message}")]
  Invalid { field: String, message: String },
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
  ConfigError::Invalid {
    field: field.into(),
    message: message.into(),
  }
}

/// How layers are built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BuilderConfig {
  Container {
    #[serde(default = "default_runtime")]
    runtime: String,
    #[serde(default = "default_image")]
    image: String,
  },
  Shell {
    command: String,
    #[serde(default = "default_search_path")]
    path: String,
  },
}

impl Default for BuilderConfig {
  fn default() -> Self {
    BuilderConfig::Container {
      runtime: default_runtime(),
      image: default_image(),
    }
  }
}

/// Where applied units go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetConfig {
  Directory { path: PathBuf },
  Command { command: String, working_dir: PathBuf },
}

impl BuilderConfig {
  pub fn environment(&self) -> ConfiguredEnvironment {
    match self {
      BuilderConfig::Container { runtime, image } => {
        ConfiguredEnvironment::Container(ContainerEnvironment::new(runtime.clone(), image.clone()))
      }
      BuilderConfig::Shell { command, path } => {
        ConfiguredEnvironment::Shell(ShellEnvironment::new(command.clone(), path.clone()))
      }
    }
  }
}

impl TargetConfig {
  pub fn target(&self) -> ConfiguredTarget {
    match self {
      TargetConfig::Directory { path } => ConfiguredTarget::Directory(DirectoryTarget::new(path.clone())),
      TargetConfig::Command { command, working_dir } => ConfiguredTarget::Command(CommandTarget {
        command: command.clone(),
        working_dir: Some(working_dir.clone()),
      }),
    }
  }
}

/// Build environment selected by `[builder]`.
#[derive(Debug, Clone)]
pub enum ConfiguredEnvironment {
  Container(ContainerEnvironment),
  Shell(ShellEnvironment),
}

impl BuildEnvironment for ConfiguredEnvironment {
  fn name(&self) -> &str {
    match self {
      ConfiguredEnvironment::Container(env) => env.name(),
      ConfiguredEnvironment::Shell(env) => env.name(),
    }
  }

  async fn install(&self, request: &BuildRequest<'_>) -> Result<BuildLog, InstallError> {
    match self {
      ConfiguredEnvironment::Container(env) => env.install(request).await,
      ConfiguredEnvironment::Shell(env) => env.install(request).await,
    }
  }
}

/// Remote target selected by `[target]`.
#[derive(Debug, Clone)]
pub enum ConfiguredTarget {
  Directory(DirectoryTarget),
  Command(CommandTarget),
}

impl RemoteTarget for ConfiguredTarget {
  fn name(&self) -> &str {
    match self {
      ConfiguredTarget::Directory(target) => target.name(),
      ConfiguredTarget::Command(target) => target.name(),
    }
  }

  async fn apply(&self, request: &ApplyRequest<'_>) -> Result<ApplyOutcome, RemoteError> {
    match self {
      ConfiguredTarget::Directory(target) => target.apply(request).await,
      ConfiguredTarget::Command(target) => target.apply(request).await,
    }
  }

  fn location(&self) -> Option<&Path> {
    match self {
      ConfiguredTarget::Directory(target) => target.location(),
      ConfiguredTarget::Command(target) => target.location(),
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
  #[serde(default)]
  paths: RawPaths,
  #[serde(default)]
  builder: BuilderConfig,
  #[serde(default)]
  target: RawTarget,
  #[serde(default, rename = "unit")]
  units: Vec<RawUnit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPaths {
  store: Option<PathBuf>,
  state: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum RawTarget {
  Directory {
    #[serde(default = "default_remote_dir")]
    path: PathBuf,
  },
  Command {
    command: String,
  },
}

impl Default for RawTarget {
  fn default() -> Self {
    RawTarget::Directory {
      path: default_remote_dir(),
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUnit {
  name: String,
  source: PathBuf,
  exclude: Option<Vec<String>>,
  manifest: Option<PathBuf>,
  #[serde(default = "default_platform")]
  platform: String,
  runtime: Option<String>,
  handler: Option<String>,
  memory_mb: Option<u32>,
  timeout_secs: Option<u32>,
  role: Option<String>,
  log_group: Option<String>,
  #[serde(default)]
  environment: BTreeMap<String, String>,
}

fn default_runtime() -> String {
  "docker".to_string()
}

fn default_image() -> String {
  "public.ecr.aws/sam/build-python3.12".to_string()
}

fn default_search_path() -> String {
  "/usr/local/bin:/usr/bin:/bin".to_string()
}

fn default_remote_dir() -> PathBuf {
  PathBuf::from(".layerdeploy/remote")
}

fn default_platform() -> String {
  "linux/arm64".to_string()
}

/// A loaded and validated project.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
  /// Config file location.
  pub path: PathBuf,
  /// Directory relative paths resolve against.
  pub root: PathBuf,
  store: Option<PathBuf>,
  state: Option<PathBuf>,
  pub builder: BuilderConfig,
  pub target: TargetConfig,
  pub units: Vec<DeployableUnit>,
}

impl ProjectConfig {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = match std::fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ConfigError::NotFound(path.to_path_buf())),
      Err(source) => {
        return Err(ConfigError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };
    Self::parse(path, &content)
  }

  pub fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
    let raw: RawConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?;

    let root = match path.parent() {
      Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
      _ => PathBuf::from("."),
    };
    let resolve = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { root.join(p) };

    let target = match raw.target {
      RawTarget::Directory { path } => TargetConfig::Directory { path: resolve(&path) },
      RawTarget::Command { command } => {
        if command.trim().is_empty() {
          return Err(invalid("target.command", "must not be empty"));
        }
        TargetConfig::Command {
          command,
          working_dir: root.clone(),
        }
      }
    };

    if let BuilderConfig::Shell { command, .. } = &raw.builder
      && command.trim().is_empty()
    {
      return Err(invalid("builder.command", "must not be empty"));
    }

    let mut seen = HashSet::new();
    let mut units = Vec::with_capacity(raw.units.len());
    for unit in raw.units {
      validate_name(&unit.name)?;
      if !seen.insert(unit.name.clone()) {
        return Err(invalid(format!("unit.{}", unit.name), "duplicate unit name"));
      }
      units.push(build_unit(unit, &resolve)?);
    }

    debug!(path = %path.display(), units = units.len(), "loaded project config");

    Ok(Self {
      path: path.to_path_buf(),
      store: raw.paths.store.as_deref().map(&resolve),
      state: raw.paths.state.as_deref().map(&resolve),
      root,
      builder: raw.builder,
      target,
      units,
    })
  }

  /// Walk up from `start` looking for a project file.
  pub fn find(start: &Path) -> Option<PathBuf> {
    start
      .ancestors()
      .map(|dir| dir.join(CONFIG_FILENAME))
      .find(|candidate| candidate.is_file())
  }

  pub fn unit(&self, name: &str) -> Option<&DeployableUnit> {
    self.units.iter().find(|u| u.name == name)
  }

  /// Artifact store: environment override, then `[paths] store`, then the
  /// per-user default.
  pub fn store_dir(&self) -> PathBuf {
    match &self.store {
      Some(dir) if std::env::var_os(STORE_ENV).is_none() => dir.clone(),
      _ => paths::store_dir(),
    }
  }

  /// State directory, resolved like [`store_dir`](Self::store_dir).
  pub fn state_dir(&self) -> PathBuf {
    match &self.state {
      Some(dir) if std::env::var_os(STATE_ENV).is_none() => dir.clone(),
      _ => paths::state_dir(),
    }
  }
}

fn validate_name(name: &str) -> Result<(), ConfigError> {
  if name.is_empty() {
    return Err(invalid("unit.name", "must not be empty"));
  }
  if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
    return Err(invalid(
      "unit.name",
      format!("'{}' may only contain letters, digits, '-' and '_'", name),
    ));
  }
  Ok(())
}

fn build_unit(raw: RawUnit, resolve: &impl Fn(&Path) -> PathBuf) -> Result<DeployableUnit, ConfigError> {
  let field = |f: &str| format!("unit.{}.{}", raw.name, f);

  let platform: TargetPlatform = raw
    .platform
    .parse()
    .map_err(|e: crate::platform::PlatformParseError| invalid(field("platform"), e.to_string()))?;

  let defaults = FunctionSettings::default();
  let memory_mb = raw.memory_mb.unwrap_or(defaults.memory_mb);
  if !MEMORY_RANGE.contains(&memory_mb) {
    return Err(invalid(
      field("memory_mb"),
      format!("{} is outside {}..={}", memory_mb, MEMORY_RANGE.start(), MEMORY_RANGE.end()),
    ));
  }
  let timeout_secs = raw.timeout_secs.unwrap_or(defaults.timeout_secs);
  if !TIMEOUT_RANGE.contains(&timeout_secs) {
    return Err(invalid(
      field("timeout_secs"),
      format!("{} is outside {}..={}", timeout_secs, TIMEOUT_RANGE.start(), TIMEOUT_RANGE.end()),
    ));
  }

  let settings = FunctionSettings {
    runtime: raw.runtime.unwrap_or(defaults.runtime),
    handler: raw.handler.unwrap_or(defaults.handler),
    memory_mb,
    timeout_secs,
    role: raw.role,
    log_group: raw.log_group,
  };

  Ok(DeployableUnit {
    source: resolve(&raw.source),
    excludes: raw
      .exclude
      .unwrap_or_else(|| DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()),
    manifest: raw.manifest.as_deref().map(resolve),
    platform,
    environment: raw.environment,
    settings,
    name: raw.name,
  })
}
