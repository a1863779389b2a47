//! Caching artifact downloader.
//!
//! A URL is cached at its path mirrored under the cache root, so
//! `https://host/ns/app/v1/linux-x86_64/app` lands in
//! `<cache>/ns/app/v1/linux-x86_64/app`. Entries never expire; a present file
//! is returned without touching the network until [`Downloader::remove`]
//! deletes it.
//!
//! Fetches write to a private temp file beside the target and are renamed
//! into place. Each attempt
//! has its own deadline (see [`with_isolated_timeout`]); attempts that time
//! out are retried until the overall timeout passes, any other failure is
//! returned at once.

pub mod timeout;

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use reqwest::{StatusCode, Url};
use tempfile::TempPath;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use timeout::{AttemptScope, Expired, with_isolated_timeout};

use crate::consts::{DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_DOWNLOAD_TIMEOUT_SECS, DOWNLOAD_TMP_SUFFIX};

/// Errors returned by the downloader. Every message names the URL.
#[derive(Debug, Error)]
pub enum DownloadError {
  #[error("download ({url}) problem: invalid url: {message}")]
  InvalidUrl { url: String, message: String },

  #[error("download ({url}) problem: creating {path}: {source}")]
  CreateDir {
    url: String,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("download ({url}) problem: bad status: {status}")]
  Status { url: String, status: StatusCode },

  #[error("download ({url}) problem: timed out after {attempts} attempt(s) in {elapsed:?}")]
  Timeout {
    url: String,
    attempts: u32,
    elapsed: Duration,
  },

  #[error("download ({url}) problem: cancelled")]
  Cancelled { url: String },

  #[error("download ({url}) problem: {source}")]
  Request {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("download ({url}) problem: {path}: {source}")]
  Io {
    url: String,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("http client: {0}")]
  Client(#[source] reqwest::Error),
}

impl DownloadError {
  /// Whether the error came from a non-2xx response with this status.
  pub fn status(&self) -> Option<StatusCode> {
    match self {
      DownloadError::Status { status, .. } => Some(*status),
      _ => None,
    }
  }
}

/// Outcome of one attempt.
enum AttemptError {
  /// Retry if time remains.
  TimedOut,
  Fatal(DownloadError),
}

/// Fetches URLs into a local cache directory it owns.
#[derive(Debug, Clone)]
pub struct Downloader {
  cache_dir: PathBuf,
  client: reqwest::Client,
  timeout: Duration,
  attempt_timeout: Duration,
}

impl Downloader {
  /// Downloader with the default timeouts: 5 minutes overall, 1 minute per
  /// attempt.
  pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self, DownloadError> {
    let client = reqwest::Client::builder()
      .gzip(true)
      .build()
      .map_err(DownloadError::Client)?;
    Ok(Self {
      cache_dir: cache_dir.into(),
      client,
      timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
      attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
    })
  }

  /// Bound on the whole `download` call, retries included.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Bound on a single request and body copy.
  pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
    self.attempt_timeout = timeout;
    self
  }

  pub fn cache_dir(&self) -> &Path {
    &self.cache_dir
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  pub fn attempt_timeout(&self) -> Duration {
    self.attempt_timeout
  }

  /// Where `raw_url` is cached. Does not check whether it exists.
  pub fn cache_path(&self, raw_url: &str) -> Result<PathBuf, DownloadError> {
    let url = parse_url(raw_url)?;
    self.cache_path_for(raw_url, &url)
  }

  fn cache_path_for(&self, raw_url: &str, url: &Url) -> Result<PathBuf, DownloadError> {
    let invalid = |message: &str| DownloadError::InvalidUrl {
      url: raw_url.to_string(),
      message: message.to_string(),
    };

    let segments = url.path_segments().ok_or_else(|| invalid("url cannot have a path"))?;
    let mut path = self.cache_dir.clone();
    let mut depth = 0;
    for segment in segments.filter(|s| !s.is_empty()) {
      if segment == "." || segment == ".." || segment.contains(['\\', ':']) {
        return Err(invalid("path escapes the cache directory"));
      }
      path.push(segment);
      depth += 1;
    }
    if depth == 0 {
      return Err(invalid("url has no path"));
    }
    Ok(path)
  }

  /// Return the cached file for `raw_url`, fetching it first on a miss.
  ///
  /// `permissions` is the Unix mode given to a freshly downloaded file; it is
  /// ignored elsewhere. The attempt in flight is not interrupted by `ctx`,
  /// but no new attempt starts once it is cancelled.
  #[instrument(skip(self, ctx), fields(url = %raw_url))]
  pub async fn download(
    &self,
    ctx: &CancellationToken,
    raw_url: &str,
    permissions: u32,
  ) -> Result<PathBuf, DownloadError> {
    let url = parse_url(raw_url)?;
    let target = self.cache_path_for(raw_url, &url)?;

    match fs::metadata(&target).await {
      Ok(meta) if !meta.is_dir() => {
        debug!(path = %target.display(), "cache hit");
        return Ok(target);
      }
      _ => {}
    }

    if let Some(parent) = target.parent() {
      fs::create_dir_all(parent)
        .await
        .map_err(|source| DownloadError::CreateDir {
          url: raw_url.to_string(),
          path: parent.to_path_buf(),
          source,
        })?;
    }

    // Private per call: concurrent downloads of one URL only race on the
    // rename, and the last one wins.
    let tmp = tmp_file(&target).map_err(|source| io_error(raw_url, &target, source))?;
    self.fetch_with_retry(ctx, raw_url, &url, &tmp).await?;
    set_mode(&tmp, permissions)
      .await
      .map_err(|source| io_error(raw_url, &tmp, source))?;
    tmp
      .persist(&target)
      .map_err(|e| io_error(raw_url, &target, e.error))?;

    info!(path = %target.display(), "downloaded");
    Ok(target)
  }

  /// Delete the cache entry for `raw_url`. A missing entry is not an error.
  pub async fn remove(&self, raw_url: &str) -> Result<(), DownloadError> {
    let target = self.cache_path(raw_url)?;
    match fs::remove_file(&target).await {
      Ok(()) => {
        debug!(path = %target.display(), "removed cache entry");
        Ok(())
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(io_error(raw_url, &target, source)),
    }
  }

  async fn fetch_with_retry(
    &self,
    ctx: &CancellationToken,
    raw_url: &str,
    url: &Url,
    tmp: &Path,
  ) -> Result<(), DownloadError> {
    let started = Instant::now();
    let ceiling = started + self.timeout;
    let mut attempts = 0u32;

    loop {
      if ctx.is_cancelled() {
        return Err(DownloadError::Cancelled {
          url: raw_url.to_string(),
        });
      }
      if Instant::now() >= ceiling {
        return Err(DownloadError::Timeout {
          url: raw_url.to_string(),
          attempts,
          elapsed: started.elapsed(),
        });
      }

      attempts += 1;
      let scope = with_isolated_timeout(ceiling, self.attempt_timeout);
      match scope.run(self.fetch_once(raw_url, url, tmp)).await {
        Ok(Ok(())) => {
          debug!(attempts, "fetch complete");
          return Ok(());
        }
        Ok(Err(AttemptError::Fatal(e))) => return Err(e),
        Ok(Err(AttemptError::TimedOut)) | Err(Expired) => {
          warn!(attempt = attempts, elapsed = ?started.elapsed(), "download attempt timed out");
        }
      }
    }
  }

  async fn fetch_once(&self, raw_url: &str, url: &Url, tmp: &Path) -> Result<(), AttemptError> {
    let request_error = |source: reqwest::Error| {
      if source.is_timeout() {
        AttemptError::TimedOut
      } else {
        AttemptError::Fatal(DownloadError::Request {
          url: raw_url.to_string(),
          source,
        })
      }
    };

    let response = self.client.get(url.clone()).send().await.map_err(request_error)?;
    let status = response.status();
    if !status.is_success() {
      return Err(AttemptError::Fatal(DownloadError::Status {
        url: raw_url.to_string(),
        status,
      }));
    }

    let mut file = fs::File::create(tmp)
      .await
      .map_err(|source| AttemptError::Fatal(io_error(raw_url, tmp, source)))?;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
      let chunk = chunk.map_err(request_error)?;
      file
        .write_all(&chunk)
        .await
        .map_err(|source| AttemptError::Fatal(io_error(raw_url, tmp, source)))?;
    }
    file
      .sync_all()
      .await
      .map_err(|source| AttemptError::Fatal(io_error(raw_url, tmp, source)))?;
    Ok(())
  }
}

fn parse_url(raw_url: &str) -> Result<Url, DownloadError> {
  let url = Url::parse(raw_url).map_err(|e| DownloadError::InvalidUrl {
    url: raw_url.to_string(),
    message: e.to_string(),
  })?;
  match url.scheme() {
    "http" | "https" => Ok(url),
    other => Err(DownloadError::InvalidUrl {
      url: raw_url.to_string(),
      message: format!("unsupported scheme {:?}", other),
    }),
  }
}

/// A fresh `.<name>.<random>.tmp` file beside `target`, deleted on drop
/// unless persisted.
fn tmp_file(target: &Path) -> std::io::Result<TempPath> {
  let parent = target
    .parent()
    .ok_or_else(|| std::io::Error::other("cache path has no parent"))?;
  let name = target.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
  Ok(
    tempfile::Builder::new()
      .prefix(&format!(".{}.", name))
      .suffix(DOWNLOAD_TMP_SUFFIX)
      .tempfile_in(parent)?
      .into_temp_path(),
  )
}

fn io_error(raw_url: &str, path: &Path, source: std::io::Error) -> DownloadError {
  DownloadError::Io {
    url: raw_url.to_string(),
    path: path.to_path_buf(),
    source,
  }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
  Ok(())
}
