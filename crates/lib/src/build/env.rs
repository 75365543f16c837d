//! Isolated build environments.
//!
//! A [`BuildEnvironment`] installs a manifest's dependencies into a clean
//! directory for a given target platform. The orchestration in
//! [`LayerBuilder`](super::LayerBuilder) never touches processes directly.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::consts::SOURCE_DATE_EPOCH;
use crate::manifest::DependencyManifest;
use crate::platform::TargetPlatform;

use super::types::{BuildLog, LayerBuildError};

/// Mount point of the manifest directory inside the container.
const CONTAINER_MANIFEST_DIR: &str = "/manifest";
/// Mount point of the staging root inside the container.
const CONTAINER_OUT_DIR: &str = "/out";

/// Everything a build environment needs for one install.
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
  pub manifest: &'a DependencyManifest,
  pub platform: TargetPlatform,
  /// Clean staging root that becomes the layer.
  pub staging: &'a Path,
  /// Directory under `staging` the dependencies must land in
  /// (`staging` itself when the layer has no prefix).
  pub install_dir: &'a Path,
}

/// Outcome of a failed install, before the builder attaches log paths.
#[derive(Debug)]
pub enum InstallError {
  /// The environment could not be started.
  Unavailable(String),
  /// The install ran and exited non-zero.
  Failed { code: Option<i32>, log: BuildLog },
}

/// Installs dependencies for a target platform in isolation.
pub trait BuildEnvironment {
  /// Short name used in logs and error messages.
  fn name(&self) -> &str;

  /// Install `request.manifest` into `request.install_dir`.
  fn install(&self, request: &BuildRequest<'_>) -> impl Future<Output = Result<BuildLog, InstallError>> + Send;
}

/// Runs the install inside a platform-targeted container.
#[derive(Debug, Clone)]
pub struct ContainerEnvironment {
  /// Container runtime binary (`docker`, `podman`, ...).
  pub runtime: String,
  /// Build image providing the language toolchain.
  pub image: String,
  /// Extra arguments passed to the install command.
  pub install_args: Vec<String>,
}

impl ContainerEnvironment {
  pub fn new(runtime: impl Into<String>, image: impl Into<String>) -> Self {
    Self {
      runtime: runtime.into(),
      image: image.into(),
      install_args: Vec::new(),
    }
  }

  /// Check that the runtime binary exists and its daemon answers.
  async fn probe(&self) -> Result<(), InstallError> {
    debug!(runtime = %self.runtime, "probing container runtime");
    let output = Command::new(&self.runtime)
      .arg("info")
      .stdin(Stdio::null())
      .output()
      .await
      .map_err(|e| InstallError::Unavailable(spawn_message(&self.runtime, &e)))?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(InstallError::Unavailable(format!(
        "'{} info' exited with {:?}: {}",
        self.runtime,
        output.status.code(),
        stderr.trim()
      )));
    }
    Ok(())
  }

  /// Arguments for `<runtime> run ...`.
  pub fn run_args(&self, request: &BuildRequest<'_>) -> Result<Vec<String>, InstallError> {
    let manifest_path = absolute(request.manifest.path());
    let manifest_dir = manifest_path.parent().unwrap_or(Path::new("/"));
    let manifest_file = manifest_path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .ok_or_else(|| InstallError::Unavailable(format!("manifest path has no file name: {}", manifest_path.display())))?;
    let rel_install = request
      .install_dir
      .strip_prefix(request.staging)
      .map(crate::source::to_slash)
      .unwrap_or_default();
    let target = if rel_install.is_empty() {
      CONTAINER_OUT_DIR.to_string()
    } else {
      format!("{}/{}", CONTAINER_OUT_DIR, rel_install)
    };

    let mut install = format!(
      "pip install --no-cache-dir --disable-pip-version-check -r {}/{} -t {}",
      CONTAINER_MANIFEST_DIR, manifest_file, target
    );
    for arg in &self.install_args {
      install.push(' ');
      install.push_str(arg);
    }

    let mut args = vec![
      "run".to_string(),
      "--rm".to_string(),
      "--platform".to_string(),
      request.platform.container_platform(),
      "-e".to_string(),
      "HOME=/tmp".to_string(),
      "-e".to_string(),
      format!("SOURCE_DATE_EPOCH={}", SOURCE_DATE_EPOCH),
      "-v".to_string(),
      format!("{}:{}:ro", manifest_dir.display(), CONTAINER_MANIFEST_DIR),
      "-v".to_string(),
      format!("{}:{}", absolute(request.staging).display(), CONTAINER_OUT_DIR),
    ];
    if let Some(user) = host_user() {
      args.push("--user".to_string());
      args.push(user);
    }
    args.push(self.image.clone());
    args.push("/bin/sh".to_string());
    args.push("-c".to_string());
    args.push(install);
    Ok(args)
  }
}

impl BuildEnvironment for ContainerEnvironment {
  fn name(&self) -> &str {
    &self.runtime
  }

  async fn install(&self, request: &BuildRequest<'_>) -> Result<BuildLog, InstallError> {
    self.probe().await?;

    let args = self.run_args(request)?;
    info!(
      runtime = %self.runtime,
      image = %self.image,
      platform = %request.platform,
      "running containerized dependency install"
    );
    debug!(args = ?args, "spawning container");

    let output = Command::new(&self.runtime)
      .args(&args)
      .stdin(Stdio::null())
      .output()
      .await
      .map_err(|e| InstallError::Unavailable(spawn_message(&self.runtime, &e)))?;

    let log = BuildLog::from_output(&output.stdout, &output.stderr);
    if !output.status.success() {
      return Err(InstallError::Failed {
        code: output.status.code(),
        log,
      });
    }
    Ok(log)
  }
}

/// Runs a user-supplied install command in a scrubbed host environment.
///
/// The command sees only:
/// - `PATH` from configuration
/// - `HOME=/homeless-shelter`
/// - `TMPDIR`/`TMP`/`TEMP` inside the staging root
/// - `SOURCE_DATE_EPOCH`, `LANG=C`, `LC_ALL=C`
/// - `LAYER_OUT`, `LAYER_MANIFEST`, `LAYER_PLATFORM`, `LAYER_ARCH`
#[derive(Debug, Clone)]
pub struct ShellEnvironment {
  pub command: String,
  pub path: String,
  /// Shell binary; `/bin/sh` when unset.
  pub shell: Option<String>,
}

impl ShellEnvironment {
  pub fn new(command: impl Into<String>, path: impl Into<String>) -> Self {
    Self {
      command: command.into(),
      path: path.into(),
      shell: None,
    }
  }
}

impl BuildEnvironment for ShellEnvironment {
  fn name(&self) -> &str {
    self.shell.as_deref().unwrap_or("/bin/sh")
  }

  async fn install(&self, request: &BuildRequest<'_>) -> Result<BuildLog, InstallError> {
    let tmp_dir = request.staging.join(".tmp");
    tokio::fs::create_dir_all(&tmp_dir)
      .await
      .map_err(|e| InstallError::Unavailable(format!("failed to create {}: {}", tmp_dir.display(), e)))?;

    let shell = self.name().to_string();
    info!(cmd = %self.command, platform = %request.platform, "running shell dependency install");

    let result = Command::new(&shell)
      .arg("-c")
      .arg(&self.command)
      .current_dir(request.staging)
      .env_clear()
      .env("PATH", &self.path)
      .env("HOME", "/homeless-shelter")
      .env("TMPDIR", &tmp_dir)
      .env("TMP", &tmp_dir)
      .env("TEMP", &tmp_dir)
      .env("LANG", "C")
      .env("LC_ALL", "C")
      .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH.to_string())
      .env("LAYER_OUT", request.install_dir)
      .env("LAYER_MANIFEST", absolute(request.manifest.path()))
      .env("LAYER_PLATFORM", request.platform.container_platform())
      .env("LAYER_ARCH", request.platform.arch.container_name())
      .stdin(Stdio::null())
      .output()
      .await;

    // Scratch space must not end up in the layer.
    let _ = tokio::fs::remove_dir_all(&tmp_dir).await;

    let output = result.map_err(|e| InstallError::Unavailable(spawn_message(&shell, &e)))?;
    let log = BuildLog::from_output(&output.stdout, &output.stderr);
    if !output.status.success() {
      return Err(InstallError::Failed {
        code: output.status.code(),
        log,
      });
    }
    Ok(log)
  }
}

impl InstallError {
  /// Attach the environment name and log location.
  pub fn into_build_error(self, environment: &str, log_path: PathBuf) -> LayerBuildError {
    match self {
      InstallError::Unavailable(message) => LayerBuildError::EnvironmentUnavailable {
        environment: environment.to_string(),
        message,
      },
      InstallError::Failed { code, log } => LayerBuildError::BuildFailed {
        code,
        log_tail: log.tail(40),
        log_path,
      },
    }
  }
}

fn spawn_message(program: &str, err: &io::Error) -> String {
  if err.kind() == io::ErrorKind::NotFound {
    format!("'{}' not found; install it or adjust the builder configuration", program)
  } else {
    format!("failed to start '{}': {}", program, err)
  }
}

fn absolute(path: &Path) -> PathBuf {
  dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(unix)]
fn host_user() -> Option<String> {
  let uid = rustix::process::getuid().as_raw();
  let gid = rustix::process::getgid().as_raw();
  Some(format!("{}:{}", uid, gid))
}

#[cfg(not(unix))]
fn host_user() -> Option<String> {
  None
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::Arch;
  use tempfile::TempDir;

  fn manifest_in(dir: &Path) -> DependencyManifest {
    let path = dir.join("requirements.txt");
    std::fs::write(&path, "requests==2.0\n").unwrap();
    DependencyManifest::load(&path).unwrap()
  }

  #[test]
  fn container_args_target_platform_and_mounts() {
    let temp = TempDir::new().unwrap();
    let manifest = manifest_in(temp.path());
    let staging = temp.path().join("staging");
    let install_dir = staging.join("python");
    std::fs::create_dir_all(&install_dir).unwrap();

    let env = ContainerEnvironment::new("docker", "public.ecr.aws/sam/build-python3.12");
    let request = BuildRequest {
      manifest: &manifest,
      platform: TargetPlatform::linux(Arch::Aarch64),
      staging: &staging,
      install_dir: &install_dir,
    };
    let args = env.run_args(&request).unwrap();

    assert_eq!(&args[..4], &["run", "--rm", "--platform", "linux/arm64"]);
    assert!(args.iter().any(|a| a.ends_with(":/manifest:ro")));
    assert!(args.iter().any(|a| a.ends_with(":/out")));
    assert!(args.contains(&"public.ecr.aws/sam/build-python3.12".to_string()));
    let install = args.last().unwrap();
    assert!(install.contains("-r /manifest/requirements.txt"));
    assert!(install.contains("-t /out/python"));
  }

  #[tokio::test]
  async fn missing_container_runtime_is_unavailable() {
    let temp = TempDir::new().unwrap();
    let manifest = manifest_in(temp.path());
    let staging = temp.path().join("staging");
    std::fs::create_dir_all(&staging).unwrap();

    let env = ContainerEnvironment::new("layerdeploy-no-such-runtime", "image");
    let request = BuildRequest {
      manifest: &manifest,
      platform: TargetPlatform::linux(Arch::Aarch64),
      staging: &staging,
      install_dir: &staging,
    };

    assert!(matches!(env.install(&request).await, Err(InstallError::Unavailable(_))));
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn shell_install_runs_isolated() {
    let temp = TempDir::new().unwrap();
    let manifest = manifest_in(temp.path());
    let staging = temp.path().join("staging");
    let install_dir = staging.join("python");
    std::fs::create_dir_all(&install_dir).unwrap();

    let env = ShellEnvironment::new(
      "echo \"$HOME $LAYER_ARCH\" > \"$LAYER_OUT/env.txt\"; cp \"$LAYER_MANIFEST\" \"$LAYER_OUT/\"",
      "/usr/bin:/bin",
    );
    let request = BuildRequest {
      manifest: &manifest,
      platform: TargetPlatform::linux(Arch::Aarch64),
      staging: &staging,
      install_dir: &install_dir,
    };
    env.install(&request).await.unwrap();

    let env_txt = std::fs::read_to_string(install_dir.join("env.txt")).unwrap();
    assert_eq!(env_txt.trim(), "/homeless-shelter arm64");
    assert!(install_dir.join("requirements.txt").exists());
    assert!(!staging.join(".tmp").exists());
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn shell_install_failure_captures_output() {
    let temp = TempDir::new().unwrap();
    let manifest = manifest_in(temp.path());
    let staging = temp.path().join("staging");
    std::fs::create_dir_all(&staging).unwrap();

    let env = ShellEnvironment::new("echo 'no matching distribution' >&2; exit 3", "/usr/bin:/bin");
    let request = BuildRequest {
      manifest: &manifest,
      platform: TargetPlatform::linux(Arch::X86_64),
      staging: &staging,
      install_dir: &staging,
    };

    match env.install(&request).await {
      Err(InstallError::Failed { code, log }) => {
        assert_eq!(code, Some(3));
        assert!(log.output.contains("no matching distribution"));
      }
      other => panic!("expected Failed, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn missing_shell_is_unavailable() {
    let temp = TempDir::new().unwrap();
    let manifest = manifest_in(temp.path());
    let staging = temp.path().join("staging");
    std::fs::create_dir_all(&staging).unwrap();

    let mut env = ShellEnvironment::new("true", "/usr/bin:/bin");
    env.shell = Some("/nonexistent/shell".to_string());
    let request = BuildRequest {
      manifest: &manifest,
      platform: TargetPlatform::linux(Arch::X86_64),
      staging: &staging,
      install_dir: &staging,
    };

    assert!(matches!(env.install(&request).await, Err(InstallError::Unavailable(_))));
  }

  #[test]
  fn install_error_maps_to_taxonomy() {
    let err = InstallError::Unavailable("docker not found".to_string()).into_build_error("docker", PathBuf::from("/l"));
    assert!(matches!(err, LayerBuildError::EnvironmentUnavailable { .. }));

    let err = InstallError::Failed {
      code: Some(1),
      log: BuildLog {
        output: "boom".to_string(),
      },
    }
    .into_build_error("docker", PathBuf::from("/l/build.log"));
    match err {
      LayerBuildError::BuildFailed { code, log_tail, log_path } => {
        assert_eq!(code, Some(1));
        assert_eq!(log_tail, "boom");
        assert_eq!(log_path, PathBuf::from("/l/build.log"));
      }
      other => panic!("unexpected {:?}", other),
    }
  }
}
