//! Shared utilities.
//!
//! Common utilities used across the crate including hashing and test helpers.

pub mod hash;

#[cfg(test)]
pub mod testutil;

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, `0` if the clock is before it.
pub fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}
