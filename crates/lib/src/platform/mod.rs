//! Target platform identifiers and host path resolution.

pub mod arch;
pub mod os;
pub mod paths;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use arch::Arch;
pub use os::Os;

/// Platform a layer is built for and a function runs on
/// (e.g. `linux/arm64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetPlatform {
  pub os: Os,
  pub arch: Arch,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized platform '{0}' (expected e.g. linux/arm64, arm64, x86_64)")]
pub struct PlatformParseError(pub String);

impl TargetPlatform {
  pub fn new(os: Os, arch: Arch) -> Self {
    Self { os, arch }
  }

  /// Linux on the given architecture.
  pub fn linux(arch: Arch) -> Self {
    Self::new(Os::Linux, arch)
  }

  /// Detect the host platform.
  ///
  /// Returns `None` if the OS or architecture is not supported
  pub fn host() -> Option<Self> {
    Some(Self {
      arch: Arch::current()?,
      os: Os::current()?,
    })
  }

  /// `--platform` value for container runtimes (`linux/arm64`).
  pub fn container_platform(&self) -> String {
    format!("{}/{}", self.os, self.arch.container_name())
  }

  /// Filesystem-safe identifier used for per-platform store directories.
  pub fn dir_name(&self) -> String {
    format!("{}-{}", self.os, self.arch.container_name())
  }

  /// Returns the platform triple string (e.g., "aarch64-linux")
  pub fn triple(&self) -> String {
    format!("{}-{}", self.arch, self.os)
  }
}

impl FromStr for TargetPlatform {
  type Err = PlatformParseError;

  /// Accepts `os/arch` (`linux/arm64`), triples (`aarch64-linux`) and a
  /// bare architecture, which implies Linux.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let err = || PlatformParseError(s.to_string());
    let trimmed = s.trim();

    if let Some((os, arch)) = trimmed.split_once('/') {
      return Ok(Self::new(Os::parse(os).ok_or_else(err)?, Arch::parse(arch).ok_or_else(err)?));
    }
    if let Some((arch, os)) = trimmed.split_once('-') {
      return Ok(Self::new(Os::parse(os).ok_or_else(err)?, Arch::parse(arch).ok_or_else(err)?));
    }
    Arch::parse(trimmed).map(Self::linux).ok_or_else(err)
  }
}

impl TryFrom<String> for TargetPlatform {
  type Error = PlatformParseError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<TargetPlatform> for String {
  fn from(value: TargetPlatform) -> Self {
    value.container_platform()
  }
}

impl fmt::Display for TargetPlatform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.container_platform())
  }
}
