//! OS × architecture build matrix.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{Arch, Os, Platform, PlatformError};

/// Mapping of operating system to the architectures to build for it.
///
/// Iteration order is deterministic (sorted by OS, architectures in insertion
/// order with duplicates removed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformMatrix(BTreeMap<Os, Vec<Arch>>);

impl PlatformMatrix {
  /// An empty matrix.
  pub fn new() -> Self {
    Self(BTreeMap::new())
  }

  /// Add architectures for an OS.
  pub fn with(mut self, os: Os, archs: impl IntoIterator<Item = Arch>) -> Self {
    let entry = self.0.entry(os).or_default();
    for arch in archs {
      if !entry.contains(&arch) {
        entry.push(arch);
      }
    }
    self
  }

  /// The cartesian set of platforms described by the matrix.
  pub fn platforms(&self) -> Vec<Platform> {
    self
      .0
      .iter()
      .flat_map(|(os, archs)| archs.iter().map(|arch| Platform::new(*arch, *os)))
      .collect()
  }

  pub fn len(&self) -> usize {
    self.0.values().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl Default for PlatformMatrix {
  fn default() -> Self {
    Self::new()
      .with(Os::Linux, [Arch::X86_64, Arch::Aarch64])
      .with(Os::MacOs, [Arch::X86_64, Arch::Aarch64])
      .with(Os::Windows, [Arch::X86_64])
  }
}

/// Parses a comma separated list such as `linux/amd64,darwin/arm64`.
impl FromStr for PlatformMatrix {
  type Err = PlatformError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut matrix = Self::new();
    for item in s.split(',').map(str::trim).filter(|item| !item.is_empty()) {
      let platform = Platform::parse(item)?;
      matrix = matrix.with(platform.os, [platform.arch]);
    }
    Ok(matrix)
  }
}
