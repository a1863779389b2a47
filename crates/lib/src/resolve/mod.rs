//! Consumer side of a release: read the environment pointer and the
//! checksum manifest over HTTP, then fetch and verify the binary for a
//! platform.
//!
//! URLs mirror the blob keys the releaser writes, below a base URL that
//! serves the bucket:
//!
//! ```text
//! <base>/<namespace>/<app>/<environment>.txt
//! <base>/<namespace>/<app>/<version>/checksums.txt
//! <base>/<namespace>/<app>/<version>/<relative-path>
//! ```

use std::path::PathBuf;
use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::blob::object_key;
use crate::consts::{CHECKSUMS_FILE, DEFAULT_ATTEMPT_TIMEOUT_SECS};
use crate::download::{DownloadError, Downloader};
use crate::platform::Platform;
use crate::release::{Manifest, ManifestError};
use crate::util::hash::{ContentHash, hash_file};

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("resolve failed: invalid base url {url}: {message}")]
  InvalidBaseUrl { url: String, message: String },

  #[error("resolve failed: {url}: {source}")]
  Request {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("resolve failed: {url}: bad status: {status}")]
  Status { url: String, status: StatusCode },

  #[error("resolve failed: {url}: pointer is empty")]
  EmptyPointer { url: String },

  #[error("resolve failed: {url}: {source}")]
  Manifest {
    url: String,
    #[source]
    source: ManifestError,
  },

  #[error("resolve failed: no artifact for {platform} in {url}")]
  NoArtifact { platform: Platform, url: String },

  #[error("resolve failed: cancelled")]
  Cancelled,

  #[error(transparent)]
  Download(#[from] DownloadError),

  #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
  ChecksumMismatch {
    path: PathBuf,
    expected: ContentHash,
    actual: ContentHash,
  },

  #[error("hashing {path}: {source}")]
  Hash {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// An artifact chosen for a platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolved {
  pub version: String,
  /// Path relative to the version directory.
  pub path: String,
  pub url: String,
  pub sha256: String,
}

/// A verified artifact in the local cache.
#[derive(Debug, Clone, Serialize)]
pub struct Fetched {
  #[serde(flatten)]
  pub resolved: Resolved,
  pub local_path: PathBuf,
}

/// Reads release pointers and manifests from a base URL.
#[derive(Debug, Clone)]
pub struct Resolver {
  base: String,
  namespace: String,
  client: reqwest::Client,
  timeout: Duration,
}

impl Resolver {
  pub fn new(base_url: &str) -> Result<Self, ResolveError> {
    let invalid = |message: String| ResolveError::InvalidBaseUrl {
      url: base_url.to_string(),
      message,
    };
    let parsed = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
      return Err(invalid(format!("unsupported scheme {:?}", parsed.scheme())));
    }
    let client = reqwest::Client::builder()
      .gzip(true)
      .build()
      .map_err(|e| invalid(e.to_string()))?;

    Ok(Self {
      base: base_url.trim_end_matches('/').to_string(),
      namespace: String::new(),
      client,
      timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
    })
  }

  pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
    self.namespace = namespace.into();
    self
  }

  /// Per-request timeout for pointer and manifest reads.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  fn url(&self, parts: &[&str]) -> String {
    let mut key_parts = vec![self.namespace.as_str()];
    key_parts.extend_from_slice(parts);
    format!("{}/{}", self.base, object_key(&key_parts))
  }

  pub fn pointer_url(&self, app: &str, environment: &str) -> String {
    self.url(&[app, &format!("{}.txt", environment)])
  }

  pub fn manifest_url(&self, app: &str, version: &str) -> String {
    self.url(&[app, version, CHECKSUMS_FILE])
  }

  pub fn artifact_url(&self, app: &str, version: &str, path: &str) -> String {
    self.url(&[app, version, path])
  }

  async fn get_text(&self, ctx: &CancellationToken, url: &str) -> Result<String, ResolveError> {
    let request = async {
      let response = self
        .client
        .get(url)
        .timeout(self.timeout)
        .send()
        .await
        .map_err(|source| ResolveError::Request {
          url: url.to_string(),
          source,
        })?;
      let status = response.status();
      if !status.is_success() {
        return Err(ResolveError::Status {
          url: url.to_string(),
          status,
        });
      }
      response.text().await.map_err(|source| ResolveError::Request {
        url: url.to_string(),
        source,
      })
    };

    tokio::select! {
      _ = ctx.cancelled() => Err(ResolveError::Cancelled),
      text = request => text,
    }
  }

  /// The version `environment` currently points at.
  pub async fn current_version(
    &self,
    ctx: &CancellationToken,
    app: &str,
    environment: &str,
  ) -> Result<String, ResolveError> {
    let url = self.pointer_url(app, environment);
    let version = self.get_text(ctx, &url).await?.trim().to_string();
    if version.is_empty() {
      return Err(ResolveError::EmptyPointer { url });
    }
    Ok(version)
  }

  pub async fn manifest(&self, ctx: &CancellationToken, app: &str, version: &str) -> Result<Manifest, ResolveError> {
    let url = self.manifest_url(app, version);
    let text = self.get_text(ctx, &url).await?;
    Manifest::parse(&text).map_err(|source| ResolveError::Manifest { url, source })
  }

  /// Pick the artifact for `platform` from the version `environment` points at.
  #[instrument(skip(self, ctx))]
  pub async fn resolve(
    &self,
    ctx: &CancellationToken,
    app: &str,
    environment: &str,
    platform: Platform,
  ) -> Result<Resolved, ResolveError> {
    let version = self.current_version(ctx, app, environment).await?;
    let manifest = self.manifest(ctx, app, &version).await?;
    let entry = manifest.find(&platform).ok_or_else(|| ResolveError::NoArtifact {
      platform,
      url: self.manifest_url(app, &version),
    })?;

    let resolved = Resolved {
      url: self.artifact_url(app, &version, &entry.path),
      path: entry.path.clone(),
      sha256: entry.hash.to_string(),
      version,
    };
    debug!(version = %resolved.version, path = %resolved.path, "resolved artifact");
    Ok(resolved)
  }

  /// Resolve, download into the cache and verify the SHA-256.
  ///
  /// A cached file that does not match the manifest is removed so the next
  /// fetch downloads it again.
  pub async fn fetch(
    &self,
    ctx: &CancellationToken,
    downloader: &Downloader,
    app: &str,
    environment: &str,
    platform: Platform,
    permissions: u32,
  ) -> Result<Fetched, ResolveError> {
    let resolved = self.resolve(ctx, app, environment, platform).await?;
    let local_path = downloader.download(ctx, &resolved.url, permissions).await?;

    let hashed = local_path.clone();
    let actual = tokio::task::spawn_blocking(move || hash_file(&hashed))
      .await
      .map_err(|e| ResolveError::Hash {
        path: local_path.clone(),
        source: std::io::Error::other(e.to_string()),
      })?
      .map_err(|source| ResolveError::Hash {
        path: local_path.clone(),
        source,
      })?;

    if actual.as_str() != resolved.sha256 {
      warn!(path = %local_path.display(), "checksum mismatch, dropping cache entry");
      downloader.remove(&resolved.url).await?;
      return Err(ResolveError::ChecksumMismatch {
        path: local_path,
        expected: ContentHash(resolved.sha256),
        actual,
      });
    }

    info!(version = %resolved.version, path = %local_path.display(), "artifact verified");
    Ok(Fetched { resolved, local_path })
  }
}
