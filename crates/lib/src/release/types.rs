//! Requests, reports and errors for the releaser.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::manifest::Manifest;
use crate::blob::{BlobError, Tags};
use crate::compile::CompileError;
use crate::platform::PlatformMatrix;

/// Errors from the build, publish and release stages.
///
/// The display string always starts with the stage that failed.
#[derive(Debug, Error)]
pub enum ReleaseError {
  #[error("invalid request: {0}")]
  InvalidRequest(String),

  #[error("build: {0}")]
  Build(#[from] CompileError),

  #[error("upload: walking {root}: {message}")]
  Walk { root: PathBuf, message: String },

  #[error("upload: reading {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("upload: {key}: {source}")]
  Upload {
    key: String,
    #[source]
    source: BlobError,
  },

  #[error("checksum: {path}: {source}")]
  Checksum {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("manifest: {key}: {source}")]
  Manifest {
    key: String,
    #[source]
    source: BlobError,
  },

  #[error("release: {key}: {source}")]
  Pointer {
    key: String,
    #[source]
    source: BlobError,
  },

  #[error("{stage}: cancelled")]
  Cancelled { stage: &'static str },

  /// A blocking task panicked or was aborted.
  #[error("{stage}: task failed: {message}")]
  Task { stage: &'static str, message: String },
}

/// Predicate over paths relative to the published tree.
pub type IncludeFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Arguments to [`Releaser::publish`](super::Releaser::publish).
#[derive(Clone)]
pub struct PublishRequest {
  /// Root of the artifact tree.
  pub path: PathBuf,
  pub bucket: String,
  pub app: String,
  pub version: String,
  /// Only files for which this returns `true` are published.
  pub include: Option<IncludeFilter>,
  pub tags: Tags,
}

impl PublishRequest {
  pub fn new(
    path: impl Into<PathBuf>,
    bucket: impl Into<String>,
    app: impl Into<String>,
    version: impl Into<String>,
  ) -> Self {
    Self {
      path: path.into(),
      bucket: bucket.into(),
      app: app.into(),
      version: version.into(),
      include: None,
      tags: Tags::new(),
    }
  }

  pub fn include(mut self, filter: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
    self.include = Some(Arc::new(filter));
    self
  }

  pub fn tags(mut self, tags: Tags) -> Self {
    self.tags = tags;
    self
  }
}

impl fmt::Debug for PublishRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PublishRequest")
      .field("path", &self.path)
      .field("bucket", &self.bucket)
      .field("app", &self.app)
      .field("version", &self.version)
      .field("include", &self.include.is_some())
      .field("tags", &self.tags)
      .finish()
  }
}

/// Arguments to [`Releaser::release`](super::Releaser::release).
#[derive(Debug, Clone)]
pub struct ReleaseRequest {
  pub bucket: String,
  pub app: String,
  pub version: String,
  /// Defaults to `release`.
  pub environment: Option<String>,
  pub tags: Tags,
}

impl ReleaseRequest {
  pub fn new(bucket: impl Into<String>, app: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      bucket: bucket.into(),
      app: app.into(),
      version: version.into(),
      environment: None,
      tags: Tags::new(),
    }
  }

  pub fn environment(mut self, environment: impl Into<String>) -> Self {
    self.environment = Some(environment.into());
    self
  }

  pub fn tags(mut self, tags: Tags) -> Self {
    self.tags = tags;
    self
  }
}

/// Arguments to [`build_matrix`](super::build_matrix): one binary per
/// platform in the matrix.
#[derive(Debug, Clone)]
pub struct BuildRequest {
  pub name: String,
  /// Source package handed to the toolchain.
  pub source: String,
  pub matrix: PlatformMatrix,
  pub ldflags: Option<String>,
  pub env: BTreeMap<String, String>,
  pub coverage: bool,
  /// Binaries land in `<out_dir>/<os>-<arch>/<name><suffix>`.
  pub out_dir: PathBuf,
  pub parallelism: usize,
}

impl BuildRequest {
  pub fn new(name: impl Into<String>, source: impl Into<String>, out_dir: impl Into<PathBuf>) -> Self {
    Self {
      name: name.into(),
      source: source.into(),
      matrix: PlatformMatrix::default(),
      ldflags: None,
      env: BTreeMap::new(),
      coverage: false,
      out_dir: out_dir.into(),
      parallelism: crate::consts::DEFAULT_PARALLELISM,
    }
  }
}

/// One uploaded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedArtifact {
  /// Path relative to the published tree, `/`-separated.
  pub path: String,
  pub key: String,
  /// Uncompressed size.
  pub size: u64,
  /// Size of the gzip stream as stored.
  pub stored_size: u64,
}

/// Outcome of a publish.
#[derive(Debug, Clone)]
pub struct PublishReport {
  pub artifacts: Vec<UploadedArtifact>,
  pub manifest: Manifest,
  pub manifest_key: String,
}
