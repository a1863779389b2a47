pub mod arch;
pub mod matrix;
pub mod os;
pub mod paths;

use std::fmt;

use thiserror::Error;

pub use arch::Arch;
pub use matrix::PlatformMatrix;
pub use os::Os;

/// Errors raised while parsing platform identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlatformError {
  #[error("unknown operating system: {0}")]
  UnknownOs(String),

  #[error("unknown architecture: {0}")]
  UnknownArch(String),

  #[error("invalid platform '{0}', expected <os>/<arch> or <arch>-<os>")]
  InvalidPlatform(String),
}

/// Platform identifier combining architecture and OS (e.g., "aarch64-darwin")
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Platform {
  pub arch: Arch,
  pub os: Os,
}

impl Platform {
  /// Create a new platform identifier
  pub fn new(arch: Arch, os: Os) -> Self {
    Self { arch, os }
  }

  /// Detect the current platform at runtime
  ///
  /// Returns `None` if the OS or architecture is not supported
  pub fn current() -> Option<Self> {
    Some(Self {
      arch: Arch::current()?,
      os: Os::current()?,
    })
  }

  /// Returns the platform triple string (e.g., "aarch64-darwin")
  pub fn triple(&self) -> String {
    format!("{}-{}", self.arch, self.os)
  }

  /// Directory name artifacts for this platform are built into (e.g., "darwin-aarch64").
  pub fn target_dir(&self) -> String {
    format!("{}-{}", self.os, self.arch)
  }

  /// Parse `<os>/<arch>` (Go style) or `<arch>-<os>` (triple style).
  pub fn parse(s: &str) -> Result<Self, PlatformError> {
    if let Some((os, arch)) = s.split_once('/') {
      return Ok(Self::new(arch.parse()?, os.parse()?));
    }
    if let Some((arch, os)) = s.split_once('-') {
      return Ok(Self::new(arch.parse()?, os.parse()?));
    }
    Err(PlatformError::InvalidPlatform(s.to_string()))
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.triple())
  }
}

/// Returns the platform triple for the current system (e.g., "aarch64-darwin")
///
/// Returns `None` if the current platform is not supported
pub fn platform_triple() -> Option<String> {
  Platform::current().map(|p| p.triple())
}
