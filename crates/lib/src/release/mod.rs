//! Publishing built artifacts and pointing environments at versions.
//!
//! A release is laid out in the blob store as
//!
//! ```text
//! <namespace>/<app>/<version>/<relative-path>     gzip-encoded artifacts
//! <namespace>/<app>/<version>/checksums.txt       sha256 manifest, uploaded last
//! <namespace>/<app>/<environment>.txt             current version, written by `release`
//! ```
//!
//! The [`Releaser`] holds no state between calls beyond the store handle and
//! namespace.

pub mod build;
pub mod manifest;
pub mod pipe;
pub mod publish;
pub mod types;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

pub use build::build_matrix;
pub use manifest::{Manifest, ManifestEntry, ManifestError};
pub use pipe::{PipeReader, PipeWriter, pipe};
pub use types::{
  BuildRequest, IncludeFilter, PublishReport, PublishRequest, ReleaseError, ReleaseRequest, UploadedArtifact,
};

use crate::blob::{BlobError, BlobStore, PutObject, object_key};
use crate::compile::Toolchain;
use crate::consts::{CHECKSUMS_FILE, DEFAULT_ENVIRONMENT};

/// Uploads artifact trees and release pointers to a blob store.
#[derive(Clone)]
pub struct Releaser {
  store: Arc<dyn BlobStore>,
  namespace: String,
}

/// Outcome of [`Releaser::ship`].
#[derive(Debug, Clone)]
pub struct ShipReport {
  pub binaries: Vec<PathBuf>,
  pub publish: PublishReport,
  pub pointer_key: String,
}

impl Releaser {
  pub fn new(store: Arc<dyn BlobStore>) -> Self {
    Self {
      store,
      namespace: String::new(),
    }
  }

  /// Prefix every key with `namespace`.
  pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
    self.namespace = namespace.into();
    self
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  pub fn store(&self) -> &Arc<dyn BlobStore> {
    &self.store
  }

  /// Key of `rel` inside a version directory.
  pub fn version_key(&self, app: &str, version: &str, rel: &str) -> String {
    object_key(&[&self.namespace, app, version, rel])
  }

  pub fn manifest_key(&self, app: &str, version: &str) -> String {
    self.version_key(app, version, CHECKSUMS_FILE)
  }

  /// Key of the pointer object for an environment.
  pub fn pointer_key(&self, app: &str, environment: &str) -> String {
    object_key(&[&self.namespace, app, &format!("{}.txt", environment)])
  }

  /// Point `environment` (default `release`) at `version`.
  ///
  /// The pointer's body is exactly the version string. Returns its key.
  #[instrument(skip(self, ctx, request), fields(app = %request.app, version = %request.version))]
  pub async fn release(&self, ctx: &CancellationToken, request: &ReleaseRequest) -> Result<String, ReleaseError> {
    validate_segment("app", &request.app)?;
    validate_segment("version", &request.version)?;
    let environment = request.environment.as_deref().unwrap_or(DEFAULT_ENVIRONMENT);
    validate_segment("environment", environment)?;

    if ctx.is_cancelled() {
      return Err(ReleaseError::Cancelled { stage: "release" });
    }

    let key = self.pointer_key(&request.app, environment);
    let object = PutObject::from_bytes(&request.bucket, &key, request.version.clone())
      .content_type("text/plain; charset=utf-8")
      .tags(request.tags.clone());
    self
      .store
      .put(object)
      .await
      .map_err(|source| ReleaseError::Pointer { key: key.clone(), source })?;

    info!(environment, key = %key, "release pointer updated");
    Ok(key)
  }

  /// Version an environment currently points at, if it has been released.
  pub async fn current_version(
    &self,
    bucket: &str,
    app: &str,
    environment: &str,
  ) -> Result<Option<String>, ReleaseError> {
    let key = self.pointer_key(app, environment);
    match self.store.get(bucket, &key).await {
      Ok(object) => Ok(Some(String::from_utf8_lossy(&object.body).trim().to_string())),
      Err(BlobError::NotFound { .. }) => Ok(None),
      Err(source) => Err(ReleaseError::Pointer { key, source }),
    }
  }

  /// Build every platform in the matrix, publish the binaries, then move the
  /// environment pointer. Nothing is released unless every earlier stage
  /// succeeded.
  pub async fn ship(
    &self,
    ctx: &CancellationToken,
    build: &BuildRequest,
    toolchain: impl Toolchain,
    release: &ReleaseRequest,
  ) -> Result<ShipReport, ReleaseError> {
    let binaries = build_matrix(ctx, build, toolchain).await?;

    let built: BTreeSet<PathBuf> = binaries
      .iter()
      .filter_map(|path| path.strip_prefix(&build.out_dir).ok().map(Path::to_path_buf))
      .collect();
    let publish = PublishRequest::new(&build.out_dir, &release.bucket, &release.app, &release.version)
      .include(move |rel| built.contains(rel))
      .tags(release.tags.clone());
    let publish = self.publish(ctx, &publish).await?;

    let pointer_key = self.release(ctx, release).await?;
    Ok(ShipReport {
      binaries,
      publish,
      pointer_key,
    })
  }
}

impl std::fmt::Debug for Releaser {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Releaser")
      .field("namespace", &self.namespace)
      .finish_non_exhaustive()
  }
}

/// App, version and environment names become single key segments.
fn validate_segment(field: &str, value: &str) -> Result<(), ReleaseError> {
  if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
    return Err(ReleaseError::InvalidRequest(format!(
      "{} must be a single non-empty path segment, got {:?}",
      field, value
    )));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::blob::{MemoryStore, Tags};

  fn releaser(store: Arc<MemoryStore>) -> Releaser {
    Releaser::new(store).with_namespace("releases")
  }

  #[test]
  fn keys_follow_release_layout() {
    let releaser = releaser(Arc::new(MemoryStore::new()));
    assert_eq!(releaser.version_key("app", "v1", "linux-x86_64/app"), "releases/app/v1/linux-x86_64/app");
    assert_eq!(releaser.manifest_key("app", "v1"), "releases/app/v1/checksums.txt");
    assert_eq!(releaser.pointer_key("app", "staging"), "releases/app/staging.txt");

    let bare = Releaser::new(Arc::new(MemoryStore::new()));
    assert_eq!(bare.pointer_key("app", "release"), "app/release.txt");
  }

  #[tokio::test]
  async fn release_writes_exactly_the_version() {
    let store = Arc::new(MemoryStore::new());
    let releaser = releaser(store.clone());
    let ctx = CancellationToken::new();

    let key = releaser
      .release(&ctx, &ReleaseRequest::new("artifacts", "app", "v1.2.3"))
      .await
      .unwrap();

    assert_eq!(key, "releases/app/release.txt");
    let object = store.get("artifacts", &key).await.unwrap();
    assert_eq!(&object.body[..], b"v1.2.3");
  }

  #[tokio::test]
  async fn release_overwrites_pointer_and_keeps_tags() {
    let store = Arc::new(MemoryStore::new());
    let releaser = releaser(store.clone());
    let ctx = CancellationToken::new();
    let mut tags = Tags::new();
    tags.insert("channel".to_string(), "beta".to_string());

    let request = ReleaseRequest::new("artifacts", "app", "v1").environment("staging");
    releaser.release(&ctx, &request).await.unwrap();
    let request = ReleaseRequest::new("artifacts", "app", "v2")
      .environment("staging")
      .tags(tags.clone());
    releaser.release(&ctx, &request).await.unwrap();

    let object = store.get("artifacts", "releases/app/staging.txt").await.unwrap();
    assert_eq!(&object.body[..], b"v2");
    assert_eq!(object.meta.tags, tags);
    assert_eq!(
      releaser.current_version("artifacts", "app", "staging").await.unwrap().as_deref(),
      Some("v2")
    );
    assert_eq!(releaser.current_version("artifacts", "app", "release").await.unwrap(), None);
  }

  #[tokio::test]
  async fn release_rejects_bad_names() {
    let releaser = releaser(Arc::new(MemoryStore::new()));
    let ctx = CancellationToken::new();

    for request in [
      ReleaseRequest::new("b", "", "v1"),
      ReleaseRequest::new("b", "app", "../v1"),
      ReleaseRequest::new("b", "app", "v1").environment("a/b"),
    ] {
      let err = releaser.release(&ctx, &request).await.unwrap_err();
      assert!(matches!(err, ReleaseError::InvalidRequest(_)), "{err}");
    }
  }

  #[tokio::test]
  async fn cancelled_release_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let releaser = releaser(store.clone());
    let ctx = CancellationToken::new();
    ctx.cancel();

    let err = releaser
      .release(&ctx, &ReleaseRequest::new("b", "app", "v1"))
      .await
      .unwrap_err();
    assert!(matches!(err, ReleaseError::Cancelled { .. }));
    assert_eq!(err.to_string(), "release: cancelled");
    assert!(store.is_empty().await);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn ship_builds_publishes_and_releases() {
    use crate::platform::{Arch, Os, PlatformMatrix};
    use crate::util::testutil::EchoToolchain;

    let temp = tempfile::TempDir::new().unwrap();
    let out_dir = temp.path().join("dist");
    std::fs::create_dir_all(&out_dir).unwrap();
    std::fs::write(out_dir.join("stray.log"), "not an artifact").unwrap();

    let store = Arc::new(MemoryStore::new());
    let releaser = releaser(store.clone());
    let ctx = CancellationToken::new();

    let mut build = BuildRequest::new("app", "./cmd/app", &out_dir);
    build.matrix = PlatformMatrix::new()
      .with(Os::Linux, [Arch::X86_64])
      .with(Os::Windows, [Arch::X86_64]);

    let report = releaser
      .ship(
        &ctx,
        &build,
        EchoToolchain::default(),
        &ReleaseRequest::new("artifacts", "app", "v3"),
      )
      .await
      .unwrap();

    assert_eq!(report.binaries.len(), 2);
    let paths: Vec<&str> = report.publish.manifest.entries().iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["linux-x86_64/app", "windows-x86_64/app.exe"]);
    assert_eq!(report.pointer_key, "releases/app/release.txt");

    let pointer = store.get("artifacts", "releases/app/release.txt").await.unwrap();
    assert_eq!(&pointer.body[..], b"v3");
    assert!(store.get("artifacts", "releases/app/v3/stray.log").await.is_err());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn failed_build_releases_nothing() {
    use crate::platform::{Arch, Os, PlatformMatrix};
    use crate::util::testutil::EchoToolchain;

    let temp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let releaser = releaser(store.clone());
    let ctx = CancellationToken::new();

    let mut build = BuildRequest::new("app", "./cmd/app", temp.path());
    build.matrix = PlatformMatrix::new().with(Os::Linux, [Arch::X86_64]);

    let err = releaser
      .ship(
        &ctx,
        &build,
        EchoToolchain::failing("app"),
        &ReleaseRequest::new("artifacts", "app", "v3"),
      )
      .await
      .unwrap_err();

    assert!(err.to_string().starts_with("build:"), "{err}");
    assert!(store.is_empty().await);
  }
}
