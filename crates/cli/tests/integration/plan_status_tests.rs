//! Plan and status integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn plan_before_apply_writes_nothing() {
  let env = TestEnv::new();

  env
    .cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("analyzer: create"))
    .stdout(predicate::str::contains("rebuild for manifest"))
    .stdout(predicate::str::contains("1 unit(s) to apply"));

  assert_eq!(env.build_count(), 0);
  assert!(!env.store_dir().exists());
  assert!(!env.remote_dir().exists());
}

#[test]
fn plan_after_apply_shows_no_changes() {
  let env = TestEnv::new();
  env.cmd().arg("apply").assert().success();

  env
    .cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("analyzer: no changes"))
    .stdout(predicate::str::contains("cached for manifest"))
    .stdout(predicate::str::contains("0 unit(s) to apply, 1 unchanged"));
}

#[test]
fn plan_code_fingerprint_matches_apply() {
  let env = TestEnv::new();

  let plan = env.cmd().args(["plan", "--json"]).output().unwrap();
  let plan: serde_json::Value = serde_json::from_slice(&plan.stdout).unwrap();
  let apply = env.cmd().args(["apply", "--json"]).output().unwrap();
  let apply: serde_json::Value = serde_json::from_slice(&apply.stdout).unwrap();

  assert_eq!(plan[0]["code_fingerprint"], apply[0]["report"]["code"]["fingerprint"]);
}

#[test]
fn status_lists_applied_units() {
  let env = TestEnv::new();
  env.cmd().arg("apply").assert().success();

  let output = env.cmd().args(["status", "--json"]).output().unwrap();
  assert!(output.status.success());
  let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

  assert_eq!(status["units"][0]["unit"], "analyzer");
  assert_eq!(status["units"][0]["serial"], 1);
  assert!(status["never_applied"].as_array().unwrap().is_empty());
}

#[test]
fn corrupted_state_is_fatal() {
  let env = TestEnv::new();
  env.write_file("state/units/analyzer.json", "{ not json");

  env
    .cmd()
    .arg("apply")
    .assert()
    .failure()
    .stderr(predicate::str::contains("state-corrupted"));
  assert_eq!(env.build_count(), 0);
}
