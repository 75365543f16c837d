//! Desired-state reconciliation for deployable units.

mod coordinator;
mod diff;
mod remote;
mod types;

pub use coordinator::{CODE_ARTIFACT_NAME, DeploymentCoordinator};
pub use diff::{Desired, UnitDiff, compute_diff};
pub use remote::{CODE_FILE, CommandTarget, DirectoryTarget, FUNCTION_MANIFEST, LAYER_FILE, RemoteError, RemoteTarget};
pub use types::{ApplyAction, ApplyOutcome, ApplyRequest, DeployableUnit, FunctionSettings, PassReport, PlanReport};
