//! Local filesystem blob store.
//!
//! Objects live at `<root>/<bucket>/<key>`; their metadata is kept in JSON
//! sidecars under `<root>/.meta/<bucket>/<key>.json` so listings only ever see
//! object files. Writes go to a temporary file under `<root>/.tmp` and are
//! renamed into place, so a partial write is never inside a bucket.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use super::{BlobError, BlobStore, ListPage, Object, ObjectMeta, PutObject, validate_bucket, validate_key};

const META_DIR: &str = ".meta";
const TMP_DIR: &str = ".tmp";

/// Blob store backed by a local directory.
#[derive(Debug, Clone)]
pub struct FilesystemStore {
  root: PathBuf,
}

impl FilesystemStore {
  /// Create a store rooted at `root`, creating the directory if needed.
  pub async fn new(root: impl AsRef<Path>) -> Result<Self, BlobError> {
    let root = root.as_ref().to_path_buf();
    fs::create_dir_all(&root).await?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Path of the object file for a key.
  pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, BlobError> {
    validate_bucket(bucket)?;
    validate_key(key)?;
    Ok(self.root.join(bucket).join(key))
  }

  fn meta_path(&self, bucket: &str, key: &str) -> PathBuf {
    self.root.join(META_DIR).join(bucket).join(format!("{}.json", key))
  }

  fn tmp_dir(&self) -> PathBuf {
    self.root.join(TMP_DIR)
  }
}

/// Stream `body` into `dest` through a temporary file in `tmp_dir`.
///
/// `tmp_dir` must be on the same filesystem as `dest`.
async fn write_atomic(dest: &Path, tmp_dir: &Path, body: &mut super::ByteStream) -> Result<u64, BlobError> {
  let parent = dest
    .parent()
    .ok_or_else(|| BlobError::InvalidKey(dest.display().to_string()))?;
  fs::create_dir_all(parent).await?;
  fs::create_dir_all(tmp_dir).await?;

  let tmp = tempfile::Builder::new().prefix("put-").tempfile_in(tmp_dir)?;
  let mut file = fs::File::from_std(tmp.as_file().try_clone()?);

  let mut written = 0u64;
  while let Some(chunk) = body.next().await {
    let chunk = chunk.map_err(BlobError::Body)?;
    file.write_all(&chunk).await?;
    written += chunk.len() as u64;
  }
  file.flush().await?;
  file.sync_all().await?;
  drop(file);

  let dest = dest.to_path_buf();
  tokio::task::spawn_blocking(move || tmp.persist(&dest).map(|_| ()).map_err(|e| e.error))
    .await
    .map_err(|e| std::io::Error::other(format!("spawn_blocking failed: {e}")))??;

  Ok(written)
}

fn not_found(bucket: &str, key: &str) -> BlobError {
  BlobError::NotFound {
    bucket: bucket.to_string(),
    key: key.to_string(),
  }
}

#[async_trait]
impl BlobStore for FilesystemStore {
  #[instrument(skip(self, object), fields(backend = "filesystem", bucket = %object.bucket, key = %object.key))]
  async fn put(&self, mut object: PutObject) -> Result<u64, BlobError> {
    let path = self.object_path(&object.bucket, &object.key)?;
    let size = write_atomic(&path, &self.tmp_dir(), &mut object.body).await?;

    let meta = ObjectMeta {
      size,
      content_encoding: object.content_encoding,
      content_type: object.content_type,
      tags: object.tags,
    };
    let json = serde_json::to_vec_pretty(&meta)?;
    let mut body: super::ByteStream = Box::pin(futures::stream::once(async move { Ok(Bytes::from(json)) }));
    write_atomic(&self.meta_path(&object.bucket, &object.key), &self.tmp_dir(), &mut body).await?;

    debug!(size, "stored object");
    Ok(size)
  }

  #[instrument(skip(self), fields(backend = "filesystem"))]
  async fn get(&self, bucket: &str, key: &str) -> Result<Object, BlobError> {
    let path = self.object_path(bucket, key)?;
    let body = match fs::read(&path).await {
      Ok(body) => Bytes::from(body),
      Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found(bucket, key)),
      Err(e) => return Err(e.into()),
    };

    let meta = match fs::read(self.meta_path(bucket, key)).await {
      Ok(json) => serde_json::from_slice(&json)?,
      Err(e) if e.kind() == ErrorKind::NotFound => ObjectMeta {
        size: body.len() as u64,
        ..ObjectMeta::default()
      },
      Err(e) => return Err(e.into()),
    };

    Ok(Object { body, meta })
  }

  #[instrument(skip(self), fields(backend = "filesystem"))]
  async fn list_page(
    &self,
    bucket: &str,
    prefix: &str,
    start_after: Option<&str>,
    limit: usize,
  ) -> Result<ListPage, BlobError> {
    validate_bucket(bucket)?;
    let bucket_dir = self.root.join(bucket);
    let prefix = prefix.to_string();
    let start_after = start_after.map(str::to_string);

    let mut keys = tokio::task::spawn_blocking(move || -> Result<Vec<String>, BlobError> {
      if !bucket_dir.is_dir() {
        return Ok(Vec::new());
      }

      let mut keys = Vec::new();
      for entry in WalkDir::new(&bucket_dir) {
        let entry = entry.map_err(|e| BlobError::Io(std::io::Error::other(e.to_string())))?;
        if !entry.file_type().is_file() {
          continue;
        }
        let Ok(rel) = entry.path().strip_prefix(&bucket_dir) else {
          continue;
        };
        let key = rel
          .components()
          .map(|c| c.as_os_str().to_string_lossy())
          .collect::<Vec<_>>()
          .join("/");
        if key.starts_with(&prefix) && start_after.as_deref().is_none_or(|after| key.as_str() > after) {
          keys.push(key);
        }
      }
      Ok(keys)
    })
    .await
    .map_err(|e| std::io::Error::other(format!("spawn_blocking failed: {e}")))??;

    keys.sort();
    let limit = limit.max(1);
    let next = if keys.len() > limit {
      keys.truncate(limit);
      keys.last().cloned()
    } else {
      None
    };

    Ok(ListPage { keys, next })
  }

  #[instrument(skip(self), fields(backend = "filesystem"))]
  async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobError> {
    let path = self.object_path(bucket, key)?;
    for path in [path, self.meta_path(bucket, key)] {
      match fs::remove_file(&path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::blob::Tags;
  use tempfile::TempDir;

  async fn store() -> (TempDir, FilesystemStore) {
    let temp = TempDir::new().unwrap();
    let store = FilesystemStore::new(temp.path().join("blobs")).await.unwrap();
    (temp, store)
  }

  #[tokio::test]
  async fn put_then_get_roundtrips_body_and_meta() {
    let (_temp, store) = store().await;
    let mut tags = Tags::new();
    tags.insert("lifecycle".to_string(), "short".to_string());

    let put = PutObject::from_bytes("artifacts", "app/v1/linux-x86_64/app", "binary")
      .content_encoding("gzip")
      .content_type("application/octet-stream")
      .tags(tags.clone());
    assert_eq!(store.put(put).await.unwrap(), 6);

    let object = store.get("artifacts", "app/v1/linux-x86_64/app").await.unwrap();
    assert_eq!(object.body, Bytes::from_static(b"binary"));
    assert_eq!(object.meta.content_encoding.as_deref(), Some("gzip"));
    assert_eq!(object.meta.tags, tags);
  }

  #[tokio::test]
  async fn put_overwrites_existing_object() {
    let (_temp, store) = store().await;
    store.put(PutObject::from_bytes("b", "app/release.txt", "v1")).await.unwrap();
    store.put(PutObject::from_bytes("b", "app/release.txt", "v2")).await.unwrap();

    let object = store.get("b", "app/release.txt").await.unwrap();
    assert_eq!(object.body, Bytes::from_static(b"v2"));
  }

  #[tokio::test]
  async fn failing_body_leaves_no_object() {
    let (_temp, store) = store().await;
    let body: crate::blob::ByteStream = Box::pin(futures::stream::iter(vec![
      Ok(Bytes::from_static(b"partial")),
      Err(std::io::Error::other("compressor died")),
    ]));

    let err = store.put(PutObject::new("b", "app/v1/app", body)).await.unwrap_err();
    assert!(matches!(err, BlobError::Body(_)));
    assert!(matches!(store.get("b", "app/v1/app").await, Err(BlobError::NotFound { .. })));
    assert!(store.list("b", "").await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn list_is_sorted_prefixed_and_paginated() {
    let (_temp, store) = store().await;
    for key in ["app/v1/b", "app/v1/a", "app/v2/a", "other/x"] {
      store.put(PutObject::from_bytes("b", key, "x")).await.unwrap();
    }

    let page = store.list_page("b", "app/", None, 2).await.unwrap();
    assert_eq!(page.keys, vec!["app/v1/a", "app/v1/b"]);
    assert_eq!(page.next.as_deref(), Some("app/v1/b"));

    let page = store.list_page("b", "app/", page.next.as_deref(), 2).await.unwrap();
    assert_eq!(page.keys, vec!["app/v2/a"]);
    assert_eq!(page.next, None);

    assert_eq!(store.list("b", "app/v1").await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn dot_tmp_names_are_ordinary_keys() {
    let (_temp, store) = store().await;
    store.put(PutObject::from_bytes("b", "app/v1/.tmpfoo", "x")).await.unwrap();
    store.put(PutObject::from_bytes("b", "app/v1/app", "y")).await.unwrap();

    assert_eq!(store.list("b", "app/").await.unwrap(), vec!["app/v1/.tmpfoo", "app/v1/app"]);
    assert!(!store.root().join("b/app/v1").read_dir().unwrap().any(|e| {
      let name = e.unwrap().file_name().to_string_lossy().to_string();
      name.starts_with("put-")
    }));
  }

  #[tokio::test]
  async fn delete_is_idempotent() {
    let (_temp, store) = store().await;
    store.put(PutObject::from_bytes("b", "k", "x")).await.unwrap();

    store.delete("b", "k").await.unwrap();
    store.delete("b", "k").await.unwrap();
    assert!(matches!(store.get("b", "k").await, Err(BlobError::NotFound { .. })));
  }

  #[tokio::test]
  async fn traversal_is_rejected() {
    let (_temp, store) = store().await;
    let err = store.put(PutObject::from_bytes("b", "../escape", "x")).await.unwrap_err();
    assert!(matches!(err, BlobError::InvalidKey(_)));
  }
}
