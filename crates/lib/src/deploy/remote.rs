//! Remote targets that receive applied units.
//!
//! Create and update share one call path; a target decides which it
//! performed and reports it in the [`ApplyOutcome`].

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use crate::build::BuildLog;

use super::types::{ApplyAction, ApplyOutcome, ApplyRequest};

/// Manifest written next to the published artifacts.
pub const FUNCTION_MANIFEST: &str = "function.json";
pub const CODE_FILE: &str = "code.zip";
pub const LAYER_FILE: &str = "layer.zip";

#[derive(Debug, Error)]
pub enum RemoteError {
  /// The target rejected or failed the mutation.
  #[error("remote apply via '{target}' failed: {message}")]
  Failed {
    target: String,
    message: String,
    output: Option<String>,
  },

  #[error("remote target io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to serialize function manifest: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// Receives create-or-update calls for deployable units.
pub trait RemoteTarget {
  fn name(&self) -> &str;

  fn apply(&self, request: &ApplyRequest<'_>) -> impl Future<Output = Result<ApplyOutcome, RemoteError>> + Send;

  /// Local directory applies publish into, if any.
  fn location(&self) -> Option<&Path> {
    None
  }
}

/// Description of a published unit, as written to `function.json`.
#[derive(Debug, Serialize)]
struct PublishedFunction<'a> {
  unit: &'a str,
  platform: String,
  runtime: &'a str,
  handler: &'a str,
  memory_mb: u32,
  timeout_secs: u32,
  role: Option<&'a str>,
  log_group: Option<&'a str>,
  environment: &'a std::collections::BTreeMap<String, String>,
  code_fingerprint: &'a str,
  layer_fingerprint: Option<&'a str>,
}

impl<'a> PublishedFunction<'a> {
  fn from_request(request: &'a ApplyRequest<'a>) -> Self {
    Self {
      unit: request.unit,
      platform: request.platform.to_string(),
      runtime: &request.settings.runtime,
      handler: &request.settings.handler,
      memory_mb: request.settings.memory_mb,
      timeout_secs: request.settings.timeout_secs,
      role: request.settings.role.as_deref(),
      log_group: request.settings.log_group.as_deref(),
      environment: request.environment,
      code_fingerprint: request.code.fingerprint.as_str(),
      layer_fingerprint: request.layer.map(|l| l.fingerprint.as_str()),
    }
  }
}

/// Publishes units into `<root>/<unit>/`.
///
/// Artifacts are copied before `function.json` is replaced, so a reader that
/// sees a manifest always finds the artifacts it names.
#[derive(Debug, Clone)]
pub struct DirectoryTarget {
  root: PathBuf,
}

impl DirectoryTarget {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn unit_dir(&self, unit: &str) -> PathBuf {
    self.root.join(unit)
  }
}

impl RemoteTarget for DirectoryTarget {
  fn name(&self) -> &str {
    "directory"
  }

  fn location(&self) -> Option<&Path> {
    Some(&self.root)
  }

  async fn apply(&self, request: &ApplyRequest<'_>) -> Result<ApplyOutcome, RemoteError> {
    let dir = self.unit_dir(request.unit);
    let manifest_path = dir.join(FUNCTION_MANIFEST);
    let action = if fs::try_exists(&manifest_path).await.unwrap_or(false) {
      ApplyAction::Update
    } else {
      ApplyAction::Create
    };

    fs::create_dir_all(&dir).await.map_err(|source| RemoteError::Io {
      path: dir.clone(),
      source,
    })?;

    replace_file(&request.code.path, &dir.join(CODE_FILE)).await?;
    let layer_path = dir.join(LAYER_FILE);
    match request.layer {
      Some(layer) => replace_file(&layer.path, &layer_path).await?,
      None => match fs::remove_file(&layer_path).await {
        Ok(()) => debug!(path = %layer_path.display(), "detached layer"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
          return Err(RemoteError::Io {
            path: layer_path,
            source,
          });
        }
      },
    }

    let published = PublishedFunction::from_request(request);
    let content = serde_json::to_string_pretty(&published)?;
    write_atomic(&manifest_path, content.as_bytes()).await?;

    info!(unit = request.unit, action = %action, dir = %dir.display(), "published unit");
    Ok(ApplyOutcome {
      action,
      detail: Some(dir.display().to_string()),
    })
  }
}

/// Hands the apply to an external command.
///
/// The command runs through the shell with the request exported as
/// `DEPLOY_*` variables. Exit status 0 means the remote accepted the update.
#[derive(Debug, Clone)]
pub struct CommandTarget {
  pub command: String,
  /// Working directory for the command; inherited when unset.
  pub working_dir: Option<PathBuf>,
}

impl CommandTarget {
  pub fn new(command: impl Into<String>) -> Self {
    Self {
      command: command.into(),
      working_dir: None,
    }
  }

  /// Environment exported to the command.
  pub fn env_vars(&self, request: &ApplyRequest<'_>) -> Result<Vec<(String, String)>, RemoteError> {
    let action = if request.previous.is_some() {
      ApplyAction::Update
    } else {
      ApplyAction::Create
    };
    let settings = request.settings;

    let mut vars = vec![
      ("DEPLOY_UNIT", request.unit.to_string()),
      ("DEPLOY_ACTION", action.as_str().to_string()),
      ("DEPLOY_CODE_ZIP", request.code.path.display().to_string()),
      ("DEPLOY_CODE_FINGERPRINT", request.code.fingerprint.to_string()),
      ("DEPLOY_PLATFORM", request.platform.to_string()),
      ("DEPLOY_ARCH", request.platform.arch.function_name().to_string()),
      ("DEPLOY_RUNTIME", settings.runtime.clone()),
      ("DEPLOY_HANDLER", settings.handler.clone()),
      ("DEPLOY_MEMORY_MB", settings.memory_mb.to_string()),
      ("DEPLOY_TIMEOUT_SECS", settings.timeout_secs.to_string()),
      ("DEPLOY_ROLE", settings.role.clone().unwrap_or_default()),
      ("DEPLOY_LOG_GROUP", settings.log_group.clone().unwrap_or_default()),
      ("DEPLOY_ENV_JSON", serde_json::to_string(request.environment)?),
    ];
    if let Some(layer) = request.layer {
      vars.push(("DEPLOY_LAYER_ZIP", layer.path.display().to_string()));
      vars.push(("DEPLOY_LAYER_FINGERPRINT", layer.fingerprint.to_string()));
    }

    Ok(vars.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
  }
}

impl RemoteTarget for CommandTarget {
  fn name(&self) -> &str {
    "command"
  }

  async fn apply(&self, request: &ApplyRequest<'_>) -> Result<ApplyOutcome, RemoteError> {
    let vars = self.env_vars(request)?;
    let action = if request.previous.is_some() {
      ApplyAction::Update
    } else {
      ApplyAction::Create
    };

    info!(unit = request.unit, action = %action, cmd = %self.command, "running remote apply command");

    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(&self.command).envs(vars).stdin(Stdio::null());
    if let Some(dir) = &self.working_dir {
      cmd.current_dir(dir);
    }

    let output = cmd.output().await.map_err(|e| RemoteError::Failed {
      target: self.name().to_string(),
      message: format!("failed to start command: {}", e),
      output: None,
    })?;

    let log = BuildLog::from_output(&output.stdout, &output.stderr);
    if !output.status.success() {
      return Err(RemoteError::Failed {
        target: self.name().to_string(),
        message: match output.status.code() {
          Some(code) => format!("command exited with status {}", code),
          None => "command terminated by signal".to_string(),
        },
        output: Some(log.tail(40)),
      });
    }

    let detail = log.output.trim();
    Ok(ApplyOutcome {
      action,
      detail: (!detail.is_empty()).then(|| detail.to_string()),
    })
  }
}

/// Copy `src` over `dest` through a sibling temp file.
async fn replace_file(src: &Path, dest: &Path) -> Result<(), RemoteError> {
  let temp = temp_sibling(dest);
  fs::copy(src, &temp).await.map_err(|source| RemoteError::Io {
    path: src.to_path_buf(),
    source,
  })?;
  fs::rename(&temp, dest).await.map_err(|source| RemoteError::Io {
    path: dest.to_path_buf(),
    source,
  })
}

async fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), RemoteError> {
  let temp = temp_sibling(dest);
  let io_err = |source| RemoteError::Io {
    path: dest.to_path_buf(),
    source,
  };
  fs::write(&temp, content).await.map_err(io_err)?;
  fs::rename(&temp, dest).await.map_err(io_err)
}

fn temp_sibling(path: &Path) -> PathBuf {
  let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
  name.push(".tmp");
  path.with_file_name(name)
}
