//! Blob storage abstraction used by the releaser.
//!
//! Objects are addressed by `(bucket, key)`. Keys are `/`-separated relative
//! paths; the release layout is
//!
//! ```text
//! <namespace>/<app>/<version>/<relative-path>
//! <namespace>/<app>/<version>/checksums.txt
//! <namespace>/<app>/<environment>.txt
//! ```

pub mod filesystem;
pub mod memory;

use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, stream};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;

/// A boxed stream of bytes used as an upload body.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Key/value labels attached to stored objects.
pub type Tags = BTreeMap<String, String>;

/// Number of keys returned per listing page unless asked otherwise.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Errors returned by blob store backends.
#[derive(Debug, Error)]
pub enum BlobError {
  #[error("object not found: {bucket}/{key}")]
  NotFound { bucket: String, key: String },

  #[error("invalid key: {0}")]
  InvalidKey(String),

  #[error("invalid bucket: {0}")]
  InvalidBucket(String),

  /// The upload body failed while being read.
  #[error("reading upload body: {0}")]
  Body(#[source] std::io::Error),

  #[error("object metadata: {0}")]
  Metadata(#[from] serde_json::Error),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

/// Metadata stored alongside an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
  pub size: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content_encoding: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content_type: Option<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub tags: Tags,
}

/// A stored object and its metadata.
#[derive(Debug, Clone)]
pub struct Object {
  pub body: Bytes,
  pub meta: ObjectMeta,
}

/// An upload request.
pub struct PutObject {
  pub bucket: String,
  pub key: String,
  pub body: ByteStream,
  pub content_encoding: Option<String>,
  pub content_type: Option<String>,
  pub tags: Tags,
}

impl PutObject {
  pub fn new(bucket: impl Into<String>, key: impl Into<String>, body: ByteStream) -> Self {
    Self {
      bucket: bucket.into(),
      key: key.into(),
      body,
      content_encoding: None,
      content_type: None,
      tags: Tags::new(),
    }
  }

  /// Upload an in-memory body.
  pub fn from_bytes(bucket: impl Into<String>, key: impl Into<String>, body: impl Into<Bytes>) -> Self {
    let body: Bytes = body.into();
    Self::new(bucket, key, Box::pin(stream::once(async move { Ok(body) })))
  }

  pub fn content_encoding(mut self, encoding: impl Into<String>) -> Self {
    self.content_encoding = Some(encoding.into());
    self
  }

  pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
    self.content_type = Some(content_type.into());
    self
  }

  pub fn tags(mut self, tags: Tags) -> Self {
    self.tags = tags;
    self
  }
}

impl std::fmt::Debug for PutObject {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PutObject")
      .field("bucket", &self.bucket)
      .field("key", &self.key)
      .field("content_encoding", &self.content_encoding)
      .field("content_type", &self.content_type)
      .field("tags", &self.tags)
      .finish_non_exhaustive()
  }
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
  /// Keys in lexicographic order.
  pub keys: Vec<String>,
  /// Pass as `start_after` to fetch the next page; `None` on the last page.
  pub next: Option<String>,
}

/// Object store with put/get/list/delete by key.
#[async_trait]
pub trait BlobStore: Send + Sync {
  /// Store an object, replacing any existing one. Returns the stored size.
  async fn put(&self, object: PutObject) -> Result<u64, BlobError>;

  /// Fetch an object and its metadata.
  async fn get(&self, bucket: &str, key: &str) -> Result<Object, BlobError>;

  /// List keys under `prefix`, in order, strictly after `start_after`.
  async fn list_page(
    &self,
    bucket: &str,
    prefix: &str,
    start_after: Option<&str>,
    limit: usize,
  ) -> Result<ListPage, BlobError>;

  /// Delete an object. Deleting a missing object succeeds.
  async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobError>;

  /// List every key under `prefix`, following pagination.
  async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BlobError> {
    let mut keys = Vec::new();
    let mut start_after: Option<String> = None;
    loop {
      let page = self
        .list_page(bucket, prefix, start_after.as_deref(), DEFAULT_PAGE_SIZE)
        .await?;
      keys.extend(page.keys);
      match page.next {
        Some(next) => start_after = Some(next),
        None => return Ok(keys),
      }
    }
  }
}

/// Join key segments with `/`, skipping empty segments and stray slashes.
pub fn object_key(parts: &[&str]) -> String {
  parts
    .iter()
    .map(|part| part.trim_matches('/'))
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join("/")
}

/// Reject keys that are empty, absolute, or contain `.`/`..` components.
pub fn validate_key(key: &str) -> Result<(), BlobError> {
  if key.is_empty() || key.starts_with('/') || key.starts_with('\\') || key.contains('\\') {
    return Err(BlobError::InvalidKey(key.to_string()));
  }
  for component in Path::new(key).components() {
    match component {
      Component::Normal(_) => {}
      _ => return Err(BlobError::InvalidKey(key.to_string())),
    }
  }
  if key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
    return Err(BlobError::InvalidKey(key.to_string()));
  }
  Ok(())
}

/// Buckets are a single non-hidden path segment.
pub fn validate_bucket(bucket: &str) -> Result<(), BlobError> {
  if bucket.is_empty() || bucket.starts_with('.') || bucket.contains(['/', '\\']) {
    return Err(BlobError::InvalidBucket(bucket.to_string()));
  }
  Ok(())
}
