use std::fmt;

/// CPU architectures a function or layer can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
  X86_64,
  Aarch64,
}

impl Arch {
  /// Detect the current CPU architecture at runtime
  pub fn current() -> Option<Self> {
    Self::parse(std::env::consts::ARCH)
  }

  /// Accepts both toolchain names (`aarch64`) and container/function
  /// names (`arm64`).
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "x86_64" | "amd64" => Some(Self::X86_64),
      "aarch64" | "arm64" => Some(Self::Aarch64),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this architecture
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64",
      Self::Aarch64 => "aarch64",
    }
  }

  /// Name used by container runtimes (`--platform linux/<name>`).
  pub fn container_name(&self) -> &'static str {
    match self {
      Self::X86_64 => "amd64",
      Self::Aarch64 => "arm64",
    }
  }

  /// Name used by function runtimes for the `architectures` setting.
  pub fn function_name(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64",
      Self::Aarch64 => "arm64",
    }
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}
