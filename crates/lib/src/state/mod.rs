//! Last-applied state per deployable unit.

mod lock;
mod store;
mod types;

pub use lock::{LockError, LockMetadata, LockMode, UnitLock};
pub use store::{FileStateStore, StateStore};
pub use types::{RemoteState, STATE_VERSION, StateError};
