//! SHA-256 helpers for artifact integrity.
//!
//! Every digest is a full 64-character lowercase hex string, the format
//! `sha256sum` prints and the checksum manifest stores.

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A full 64-character SHA256 hash for content verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
  /// Accepts a 64 character hex digest, normalizing it to lowercase.
  pub fn parse(s: &str) -> Option<Self> {
    if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
      Some(Self(s.to_ascii_lowercase()))
    } else {
      None
    }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash a file's contents.
///
/// Reads in 8 KiB blocks so large binaries are never held in memory.
pub fn hash_file(path: &Path) -> std::io::Result<ContentHash> {
  let file = fs::File::open(path)?;
  hash_reader(file)
}

/// Hash everything a reader yields.
pub fn hash_reader(mut reader: impl Read) -> std::io::Result<ContentHash> {
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = reader.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}
