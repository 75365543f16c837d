//! Fakes for build environments and remote targets.
//!
//! Both count their invocations so tests can assert exactly when a build
//! or a remote call happened.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::build::{BuildEnvironment, BuildLog, BuildRequest, InstallError};
use crate::deploy::{ApplyAction, ApplyOutcome, ApplyRequest, RemoteError, RemoteTarget};
use crate::util::hash::Fingerprint;

/// Writes one package directory per specifier into the install dir.
#[derive(Default)]
pub struct FakeBuildEnv {
  calls: AtomicUsize,
  fail_with: Mutex<Option<fn() -> InstallError>>,
  saw_stale: AtomicBool,
}

impl FakeBuildEnv {
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  /// Make every following install fail with `f()`.
  pub fn fail(&self, f: fn() -> InstallError) {
    *self.fail_with.lock().unwrap() = Some(f);
  }

  pub fn succeed(&self) {
    *self.fail_with.lock().unwrap() = None;
  }

  /// True if an install ever started with leftovers in its staging root.
  pub fn saw_stale(&self) -> bool {
    self.saw_stale.load(Ordering::SeqCst)
  }
}

pub fn unavailable() -> InstallError {
  InstallError::Unavailable("docker not found".to_string())
}

impl BuildEnvironment for &FakeBuildEnv {
  fn name(&self) -> &str {
    "fake"
  }

  async fn install(&self, request: &BuildRequest<'_>) -> Result<BuildLog, InstallError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if request.staging.join("leftover.txt").exists() {
      self.saw_stale.store(true, Ordering::SeqCst);
    }
    let failure = *self.fail_with.lock().unwrap();
    if let Some(f) = failure {
      std::fs::write(request.staging.join("leftover.txt"), "partial").unwrap();
      return Err(f());
    }
    for spec in request.manifest.specifiers() {
      let name = spec.split("==").next().unwrap();
      std::fs::create_dir_all(request.install_dir.join(name)).unwrap();
      std::fs::write(request.install_dir.join(name).join("__init__.py"), spec).unwrap();
    }
    Ok(BuildLog {
      output: "installed".to_string(),
    })
  }
}

/// One call observed by [`FakeRemote`].
#[derive(Debug, Clone)]
pub struct RecordedApply {
  pub unit: String,
  pub action: ApplyAction,
  pub code: Fingerprint,
  pub layer: Option<Fingerprint>,
  pub environment: Vec<(String, String)>,
}

#[derive(Default)]
pub struct FakeRemote {
  applies: Mutex<Vec<RecordedApply>>,
  failing: AtomicBool,
}

impl FakeRemote {
  pub fn calls(&self) -> usize {
    self.applies.lock().unwrap().len()
  }

  pub fn applies(&self) -> Vec<RecordedApply> {
    self.applies.lock().unwrap().clone()
  }

  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }
}

impl RemoteTarget for &FakeRemote {
  fn name(&self) -> &str {
    "fake"
  }

  async fn apply(&self, request: &ApplyRequest<'_>) -> Result<ApplyOutcome, RemoteError> {
    let action = if request.previous.is_some() {
      ApplyAction::Update
    } else {
      ApplyAction::Create
    };
    self.applies.lock().unwrap().push(RecordedApply {
      unit: request.unit.to_string(),
      action,
      code: request.code.fingerprint.clone(),
      layer: request.layer.map(|l| l.fingerprint.clone()),
      environment: request.environment.clone().into_iter().collect(),
    });
    if self.failing.load(Ordering::SeqCst) {
      return Err(RemoteError::Failed {
        target: "fake".to_string(),
        message: "throttled".to_string(),
        output: None,
      });
    }
    Ok(ApplyOutcome { action, detail: None })
  }
}
