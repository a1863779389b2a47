//! In-memory blob store.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::RwLock;

use super::{BlobError, BlobStore, ListPage, Object, ObjectMeta, PutObject, validate_bucket, validate_key};

/// Blob store keeping every object in memory, ordered by `(bucket, key)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
  objects: RwLock<BTreeMap<(String, String), Object>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of stored objects across all buckets.
  pub async fn len(&self) -> usize {
    self.objects.read().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.len().await == 0
  }
}

#[async_trait]
impl BlobStore for MemoryStore {
  async fn put(&self, mut object: PutObject) -> Result<u64, BlobError> {
    validate_bucket(&object.bucket)?;
    validate_key(&object.key)?;

    let mut body = BytesMut::new();
    while let Some(chunk) = object.body.next().await {
      body.extend_from_slice(&chunk.map_err(BlobError::Body)?);
    }
    let size = body.len() as u64;

    let stored = Object {
      body: body.freeze(),
      meta: ObjectMeta {
        size,
        content_encoding: object.content_encoding,
        content_type: object.content_type,
        tags: object.tags,
      },
    };
    self.objects.write().await.insert((object.bucket, object.key), stored);
    Ok(size)
  }

  async fn get(&self, bucket: &str, key: &str) -> Result<Object, BlobError> {
    self
      .objects
      .read()
      .await
      .get(&(bucket.to_string(), key.to_string()))
      .cloned()
      .ok_or_else(|| BlobError::NotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
      })
  }

  async fn list_page(
    &self,
    bucket: &str,
    prefix: &str,
    start_after: Option<&str>,
    limit: usize,
  ) -> Result<ListPage, BlobError> {
    validate_bucket(bucket)?;
    let limit = limit.max(1);
    let lower = match start_after {
      Some(after) => Bound::Excluded((bucket.to_string(), after.to_string())),
      None => Bound::Included((bucket.to_string(), String::new())),
    };

    let objects = self.objects.read().await;
    let mut keys: Vec<String> = objects
      .range((lower, Bound::Unbounded))
      .take_while(|((b, _), _)| b == bucket)
      .map(|((_, key), _)| key)
      .filter(|key| key.starts_with(prefix))
      .take(limit + 1)
      .cloned()
      .collect();

    let next = if keys.len() > limit {
      keys.truncate(limit);
      keys.last().cloned()
    } else {
      None
    };
    Ok(ListPage { keys, next })
  }

  async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobError> {
    self.objects.write().await.remove(&(bucket.to_string(), key.to_string()));
    Ok(())
  }
}
