/// Application name used for data/cache directory resolution.
pub const APP_NAME: &str = "layerdeploy";

/// Length of a full SHA-256 fingerprint in lowercase hex.
pub const FINGERPRINT_LEN: usize = 64;

/// Number of fingerprint characters shown in human-facing output.
pub const FINGERPRINT_SHORT_LEN: usize = 12;

/// Unix timestamp used for every archive entry and as `SOURCE_DATE_EPOCH`
/// (1980-01-01 00:00:00 UTC, the zip epoch).
pub const SOURCE_DATE_EPOCH: u64 = 315532800;

/// Overrides the artifact/layer store directory.
pub const STORE_ENV: &str = "LAYERDEPLOY_STORE";

/// Overrides the remote-state directory.
pub const STATE_ENV: &str = "LAYERDEPLOY_STATE";

/// Default project file name.
pub const CONFIG_FILENAME: &str = "layerdeploy.toml";

/// Excluded from code artifacts unless a unit lists its own patterns.
pub const DEFAULT_EXCLUDES: &[&str] = &[".env", "__pycache__/", "*.pyc", "venv/", ".venv/", ".git/", ".layerdeploy/"];
