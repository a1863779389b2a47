//! The `checksums.txt` manifest published with every version.
//!
//! One line per artifact in `sha256sum --binary` format:
//!
//! ```text
//! 3a7bd3e2360a3d29eea436fcfb7e44c735d117c42d1c1835420b6b9942dd4f1b *linux-x86_64/app
//! ```

use std::fmt;

use thiserror::Error;

use crate::platform::Platform;
use crate::util::hash::ContentHash;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
  #[error("malformed checksum line {line_no}: {line:?}")]
  Malformed { line_no: usize, line: String },
}

/// A single artifact hash and its path relative to the version root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
  pub hash: ContentHash,
  pub path: String,
}

impl fmt::Display for ManifestEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} *{}", self.hash, self.path)
  }
}

/// Ordered list of manifest entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
  entries: Vec<ManifestEntry>,
}

impl Manifest {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, hash: ContentHash, path: impl Into<String>) {
    self.entries.push(ManifestEntry {
      hash,
      path: path.into(),
    });
  }

  pub fn entries(&self) -> &[ManifestEntry] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Render the manifest, one newline-terminated line per entry.
  pub fn render(&self) -> String {
    self.entries.iter().map(|entry| format!("{}\n", entry)).collect()
  }

  /// Parse manifest text. Blank lines are ignored; both binary (`*path`) and
  /// text mode (`  path`) lines are accepted.
  pub fn parse(text: &str) -> Result<Self, ManifestError> {
    let mut manifest = Self::new();
    for (idx, line) in text.lines().enumerate() {
      if line.trim().is_empty() {
        continue;
      }
      let malformed = || ManifestError::Malformed {
        line_no: idx + 1,
        line: line.to_string(),
      };

      let (hash, rest) = line.split_once(' ').ok_or_else(malformed)?;
      let hash = ContentHash::parse(hash).ok_or_else(malformed)?;
      let path = rest.strip_prefix('*').or_else(|| rest.strip_prefix(' ')).ok_or_else(malformed)?;
      if path.is_empty() {
        return Err(malformed());
      }
      manifest.push(hash, path);
    }
    Ok(manifest)
  }

  /// First entry whose path names both the OS and the architecture of
  /// `platform`. Go-style architecture names are accepted as well.
  pub fn find(&self, platform: &Platform) -> Option<&ManifestEntry> {
    let os = platform.os.as_str();
    let arches = [platform.arch.as_str(), platform.arch.go_name()];
    self
      .entries
      .iter()
      .find(|entry| entry.path.contains(os) && arches.iter().any(|arch| entry.path.contains(arch)))
  }

  /// Entry with exactly this relative path.
  pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
    self.entries.iter().find(|entry| entry.path == path)
  }
}
