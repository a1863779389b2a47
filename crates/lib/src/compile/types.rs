//! Work items and errors for the parallel compiler.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use thiserror::Error;

use crate::platform::{Os, Platform};

/// Shared slot receiving the output path of a work item once it is built.
///
/// A populated slot also marks the item as done: re-submitting it to a
/// compiler is a no-op.
pub type OutputSlot = Arc<OnceLock<PathBuf>>;

/// Errors that can occur while compiling work items.
#[derive(Debug, Error)]
pub enum CompileError {
  /// A required work item field was empty.
  #[error("invalid work item: {field} must not be empty")]
  InvalidWorkItem { field: &'static str },

  /// The toolchain process could not be started.
  #[error("failed to start toolchain for {name}: {source}")]
  Spawn {
    name: String,
    #[source]
    source: std::io::Error,
  },

  /// The toolchain exited unsuccessfully.
  #[error("compiling {name} ({output}) failed with exit code {code:?}")]
  Failed {
    name: String,
    output: PathBuf,
    code: Option<i32>,
  },

  /// The build directory could not be created or removed.
  #[error("build directory {path}: {source}")]
  BuildDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The run was cancelled before all work completed.
  #[error("compilation cancelled")]
  Cancelled,

  /// `run` was called after `cleanup`.
  #[error("compiler has already been cleaned up")]
  CleanedUp,

  /// A worker task panicked or was aborted.
  #[error("compile worker failed: {0}")]
  Worker(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// One compile job: a source package built into one binary.
#[derive(Debug, Clone)]
pub struct WorkItem {
  /// Binary name, without platform suffix.
  pub name: String,
  /// Directory under the compiler's base directory the binary is written to.
  pub target: String,
  /// Package or path handed to the toolchain.
  pub source: String,
  /// Target platform; `None` builds for the host.
  pub platform: Option<Platform>,
  /// Extra environment for the toolchain process, applied last.
  pub env: BTreeMap<String, String>,
  /// Linker flags.
  pub ldflags: Option<String>,
  /// Build a coverage-instrumented test harness instead of a plain binary.
  pub coverage: bool,
  /// Receives the output path after a successful build.
  pub output: Option<OutputSlot>,
}

impl WorkItem {
  pub fn builder(name: impl Into<String>) -> WorkItemBuilder {
    WorkItemBuilder {
      name: name.into(),
      ..WorkItemBuilder::default()
    }
  }

  /// OS the binary is built for.
  pub fn target_os(&self) -> Option<Os> {
    self.platform.map(|p| p.os).or_else(Os::current)
  }

  /// File name of the produced binary, including the platform suffix.
  pub fn file_name(&self) -> String {
    let suffix = self.target_os().map(|os| os.exe_suffix()).unwrap_or_default();
    format!("{}{}", self.name, suffix)
  }

  /// Deterministic output path of this item under `base`.
  ///
  /// This path is the identity of the item.
  pub fn output_path(&self, base: &Path) -> PathBuf {
    base.join(&self.target).join(self.file_name())
  }

  /// Whether the output slot has already been filled.
  pub fn is_done(&self) -> bool {
    self.output.as_ref().is_some_and(|slot| slot.get().is_some())
  }
}

/// Builder validating the required fields of a [`WorkItem`].
#[derive(Debug, Default)]
pub struct WorkItemBuilder {
  name: String,
  target: String,
  source: String,
  platform: Option<Platform>,
  env: BTreeMap<String, String>,
  ldflags: Option<String>,
  coverage: bool,
  output: Option<OutputSlot>,
}

impl WorkItemBuilder {
  pub fn target(mut self, target: impl Into<String>) -> Self {
    self.target = target.into();
    self
  }

  pub fn source(mut self, source: impl Into<String>) -> Self {
    self.source = source.into();
    self
  }

  pub fn platform(mut self, platform: Platform) -> Self {
    self.platform = Some(platform);
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  pub fn envs(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
    self.env.extend(env);
    self
  }

  pub fn ldflags(mut self, ldflags: impl Into<String>) -> Self {
    self.ldflags = Some(ldflags.into());
    self
  }

  pub fn coverage(mut self, coverage: bool) -> Self {
    self.coverage = coverage;
    self
  }

  pub fn output(mut self, slot: OutputSlot) -> Self {
    self.output = Some(slot);
    self
  }

  pub fn build(self) -> Result<WorkItem, CompileError> {
    if self.name.trim().is_empty() {
      return Err(CompileError::InvalidWorkItem { field: "name" });
    }
    if self.target.trim().is_empty() {
      return Err(CompileError::InvalidWorkItem { field: "target" });
    }
    if self.source.trim().is_empty() {
      return Err(CompileError::InvalidWorkItem { field: "source" });
    }

    Ok(WorkItem {
      name: self.name,
      target: self.target,
      source: self.source,
      platform: self.platform,
      env: self.env,
      ldflags: self.ldflags,
      coverage: self.coverage,
      output: self.output,
    })
  }
}
