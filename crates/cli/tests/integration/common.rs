//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Installs each `name==version` line as `<LAYER_OUT>/<name>/__init__.py` and
/// appends to the build log so tests can count builds.
const FAKE_INSTALL: &str = r#"while IFS= read -r line; do name="${line%%=*}"; [ -n "$name" ] || continue; mkdir -p "$LAYER_OUT/$name"; echo "$line" > "$LAYER_OUT/$name/__init__.py"; done < "$LAYER_MANIFEST" && echo "$LAYER_PLATFORM" >> "@BUILDS@""#;

/// Isolated project with its own store, state and remote directories.
///
/// Starts as source tree `{app.py}` with manifest `{requests==2.0}`.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let env = Self {
      temp: TempDir::new().unwrap(),
    };
    env.write_file("src/app.py", "def lambda_handler(event, context):\n    return {'ok': True}\n");
    env.write_file("requirements.txt", "requests==2.0\n");
    env.write_config(&env.shell_builder(FAKE_INSTALL), &env.directory_target());
    env
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }

  /// Write a file relative to the project root.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn config_path(&self) -> PathBuf {
    self.path().join("layerdeploy.toml")
  }

  pub fn builds_log(&self) -> PathBuf {
    self.path().join("builds.log")
  }

  /// Number of dependency builds that ran.
  pub fn build_count(&self) -> usize {
    std::fs::read_to_string(self.builds_log())
      .map(|s| s.lines().count())
      .unwrap_or(0)
  }

  pub fn remote_dir(&self) -> PathBuf {
    self.path().join("remote")
  }

  pub fn store_dir(&self) -> PathBuf {
    self.path().join("store")
  }

  pub fn state_dir(&self) -> PathBuf {
    self.path().join("state")
  }

  pub fn shell_builder(&self, command: &str) -> String {
    let command = command.replace("@BUILDS@", &self.builds_log().display().to_string());
    format!("[builder]\nkind = \"shell\"\ncommand = '''{}'''\n", command)
  }

  pub fn directory_target(&self) -> String {
    "[target]\nkind = \"directory\"\npath = \"remote\"\n".to_string()
  }

  pub fn command_target(&self, command: &str) -> String {
    format!("[target]\nkind = \"command\"\ncommand = '''{}'''\n", command)
  }

  pub fn write_config(&self, builder: &str, target: &str) {
    let unit = r#"
[[unit]]
name = "analyzer"
source = "src"
manifest = "requirements.txt"
platform = "linux/arm64"
runtime = "python3.12"
handler = "app.lambda_handler"
memory_mb = 256
timeout_secs = 30

[unit.environment]
LOG_LEVEL = "INFO"
"#;
    self.write_file("layerdeploy.toml", &format!("{}\n{}\n{}", builder, target, unit));
  }

  /// Swap in a builder that always fails.
  pub fn break_builder(&self) {
    self.write_config(
      &self.shell_builder("echo 'ERROR: No matching distribution found' >&2; exit 1"),
      &self.directory_target(),
    );
  }

  /// Get a pre-configured Command for the ldeploy binary.
  ///
  /// Runs inside the project directory with store and state redirected into
  /// the temp dir via `LAYERDEPLOY_STORE` / `LAYERDEPLOY_STATE`.
  pub fn cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("ldeploy");
    cmd.current_dir(self.path());
    cmd.env("LAYERDEPLOY_STORE", self.store_dir());
    cmd.env("LAYERDEPLOY_STATE", self.state_dir());
    cmd.env("XDG_DATA_HOME", self.path().join("data"));
    cmd.env_remove("RUST_LOG");
    cmd
  }
}
