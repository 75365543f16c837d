//! Apply command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn first_apply_builds_layer_and_creates() {
  let env = TestEnv::new();

  env
    .cmd()
    .arg("apply")
    .assert()
    .success()
    .stdout(predicate::str::contains("analyzer: created (first deploy)"))
    .stdout(predicate::str::contains("built"));

  assert_eq!(env.build_count(), 1);
  let published = env.remote_dir().join("analyzer");
  assert!(published.join("code.zip").exists());
  assert!(published.join("layer.zip").exists());

  let function: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(published.join("function.json")).unwrap()).unwrap();
  assert_eq!(function["handler"], "app.lambda_handler");
  assert_eq!(function["memory_mb"], 256);
  assert_eq!(function["environment"]["LOG_LEVEL"], "INFO");
}

#[test]
fn apply_is_idempotent() {
  let env = TestEnv::new();

  env.cmd().arg("apply").assert().success();
  env
    .cmd()
    .arg("apply")
    .assert()
    .success()
    .stdout(predicate::str::contains("analyzer: up to date"))
    .stdout(predicate::str::contains("cached"));

  assert_eq!(env.build_count(), 1);
}

#[test]
fn code_change_updates_without_rebuild() {
  let env = TestEnv::new();
  env.cmd().arg("apply").assert().success();

  env.write_file("src/app.py", "def lambda_handler(event, context):\n    return {'ok': False}\n");
  env
    .cmd()
    .arg("apply")
    .assert()
    .success()
    .stdout(predicate::str::contains("analyzer: updated (code changed)"));

  assert_eq!(env.build_count(), 1);
}

#[test]
fn manifest_change_rebuilds_layer() {
  let env = TestEnv::new();
  env.cmd().arg("apply").assert().success();

  env.write_file("requirements.txt", "requests==2.1\n");
  env
    .cmd()
    .arg("apply")
    .assert()
    .success()
    .stdout(predicate::str::contains("dependencies changed"));

  assert_eq!(env.build_count(), 2);
}

#[test]
fn runtime_change_rebuilds_layer_under_new_prefix() {
  let env = TestEnv::new();
  env.cmd().arg("apply").assert().success();

  let config = std::fs::read_to_string(env.config_path()).unwrap();
  env.write_file(
    "layerdeploy.toml",
    &config.replace("runtime = \"python3.12\"", "runtime = \"nodejs20.x\""),
  );
  env
    .cmd()
    .arg("apply")
    .assert()
    .success()
    .stdout(predicate::str::contains("analyzer: updated (configuration changed)"))
    .stdout(predicate::str::contains("built"));

  assert_eq!(env.build_count(), 2);
}

#[test]
fn failed_build_exits_nonzero_and_writes_no_state() {
  let env = TestEnv::new();
  env.break_builder();

  env
    .cmd()
    .arg("apply")
    .assert()
    .failure()
    .stderr(predicate::str::contains("build-failed"))
    .stderr(predicate::str::contains("No matching distribution"));

  assert!(!env.remote_dir().join("analyzer").exists());
  env
    .cmd()
    .arg("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("analyzer: never applied"));
}

#[test]
fn failed_remote_apply_is_retried_without_rebuild() {
  let env = TestEnv::new();
  let builder = env.shell_builder(
    r#"while IFS= read -r line; do mkdir -p "$LAYER_OUT/${line%%=*}"; done < "$LAYER_MANIFEST" && echo built >> "@BUILDS@""#,
  );
  env.write_config(&builder, &env.command_target("echo 'throttled' >&2; exit 1"));

  env
    .cmd()
    .arg("apply")
    .assert()
    .failure()
    .stderr(predicate::str::contains("remote-apply-failed"));
  assert_eq!(env.build_count(), 1);

  env.write_config(&builder, &env.command_target("echo \"$DEPLOY_ACTION $DEPLOY_UNIT\""));
  env
    .cmd()
    .arg("apply")
    .assert()
    .success()
    .stdout(predicate::str::contains("analyzer: created"))
    .stdout(predicate::str::contains("create analyzer"));
  assert_eq!(env.build_count(), 1);
}

#[test]
fn apply_json_reports_each_unit() {
  let env = TestEnv::new();

  let output = env.cmd().args(["apply", "--json"]).output().unwrap();
  assert!(output.status.success());

  let results: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(results[0]["unit"], "analyzer");
  assert_eq!(results[0]["ok"], true);
  assert_eq!(results[0]["report"]["applied"]["action"], "create");
  assert_eq!(results[0]["report"]["layer_built"], true);
}

#[test]
fn unknown_unit_is_rejected() {
  let env = TestEnv::new();

  env
    .cmd()
    .args(["apply", "nope"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Unknown unit 'nope'"));
}

#[test]
fn missing_source_reports_not_found() {
  let env = TestEnv::new();
  std::fs::remove_dir_all(env.path().join("src")).unwrap();

  env
    .cmd()
    .arg("apply")
    .assert()
    .failure()
    .stderr(predicate::str::contains("not-found"));
  assert_eq!(env.build_count(), 0);
}
