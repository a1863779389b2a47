//! Toolchain invocation for compile jobs.
//!
//! A [`Toolchain`] turns a work item and its output path into the subprocess
//! that produces the binary. The compiler owns spawning, stdio and
//! cancellation; toolchains only describe the command line.

use std::path::Path;

use tokio::process::Command;

use super::types::WorkItem;

/// Build tag the coverage harness is compiled with.
///
/// The target package is expected to carry a test under this tag that strips
/// a leading `--` from its arguments and then calls the real entry point, so
/// the harness behaves like the binary while writing a coverage profile.
pub const COVERAGE_BUILD_TAG: &str = "testrunmain";

/// Describes how to invoke an external compiler for a work item.
pub trait Toolchain: Send + Sync + 'static {
  /// Command that builds `item` into `output`.
  ///
  /// Item environment overrides must be applied after any toolchain defaults.
  fn command(&self, item: &WorkItem, output: &Path) -> Command;
}

/// The Go toolchain (`go build`, or `go test -c` in coverage mode).
#[derive(Debug, Clone)]
pub struct GoToolchain {
  binary: String,
}

impl GoToolchain {
  pub fn new(binary: impl Into<String>) -> Self {
    Self { binary: binary.into() }
  }
}

impl Default for GoToolchain {
  fn default() -> Self {
    Self::new("go")
  }
}

impl Toolchain for GoToolchain {
  fn command(&self, item: &WorkItem, output: &Path) -> Command {
    let mut command = Command::new(&self.binary);

    if item.coverage {
      command
        .arg("test")
        .arg("-c")
        .arg("-cover")
        .arg("-covermode=atomic")
        .arg("-tags")
        .arg(COVERAGE_BUILD_TAG);
    } else {
      command.arg("build");
    }

    command.arg("-o").arg(output);

    if let Some(ldflags) = &item.ldflags {
      command.arg("-ldflags").arg(ldflags);
    }

    command.arg(&item.source);

    if let Some(platform) = item.platform {
      command
        .env("GOOS", platform.os.as_str())
        .env("GOARCH", platform.arch.go_name());
    }

    for (key, value) in &item.env {
      command.env(key, value);
    }

    command
  }
}
