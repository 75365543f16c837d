//! layerdeploy-lib: incremental, content-addressed build-and-deploy pipeline
//!
//! - `source` / `archive`: deterministic code packaging
//! - `manifest` / `build`: dependency layers, rebuilt only when the manifest
//!   fingerprint changes
//! - `state`: last-applied fingerprints per unit, guarded by per-unit locks
//! - `deploy`: diff-and-apply convergence against a remote target

pub mod archive;
pub mod artifact;
pub mod build;
pub mod config;
pub mod consts;
pub mod deploy;
pub mod error;
pub mod manifest;
pub mod platform;
pub mod source;
pub mod state;
pub mod util;

pub use error::{ErrorKind, PipelineError};
