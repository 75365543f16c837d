//! Dependency layer builds.
//!
//! A layer is rebuilt exactly when the manifest fingerprint differs from the
//! last successful [`BuildRecord`] for that unit and platform. Builds run in
//! an isolated, platform-targeted environment and always start from an empty
//! staging root.
//!
//! # Submodules
//!
//! - [`env`] - Build environments (container, shell)
//! - [`execute`] - Cache decision and layer packaging
//! - [`store`] - Build record and layer storage

pub mod env;
pub mod execute;
pub mod store;
mod types;

pub use env::{BuildEnvironment, BuildRequest, ContainerEnvironment, InstallError, ShellEnvironment};
pub use execute::{LAYER_ARTIFACT_NAME, LayerBuilder};
pub use store::BuildRecordStore;
pub use types::*;
