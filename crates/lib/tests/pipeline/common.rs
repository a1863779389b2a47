//! Shared helpers for pipeline tests.

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use tempfile::TempDir;

/// Files of a small multi-platform release, relative to the tree root.
pub const ARTIFACTS: &[(&str, &[u8])] = &[
  ("darwin-aarch64/app", b"#!/bin/sh\necho darwin arm\n"),
  ("linux-aarch64/app", b"#!/bin/sh\necho linux arm\n"),
  ("linux-x86_64/app", b"#!/bin/sh\necho linux x86\n"),
  ("windows-x86_64/app.exe", b"MZ windows build"),
];

/// Write `ARTIFACTS` into a fresh temporary directory.
pub fn artifact_tree() -> TempDir {
  let temp = TempDir::new().unwrap();
  write_tree(temp.path(), ARTIFACTS);
  temp
}

pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
  for (rel, content) in files {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
  }
}

pub fn gunzip(data: &[u8]) -> Vec<u8> {
  let mut out = Vec::new();
  GzDecoder::new(data).read_to_end(&mut out).unwrap();
  out
}
