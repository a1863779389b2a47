//! Publishing into the filesystem store.

use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use shipwright_lib::blob::{BlobStore, FilesystemStore};
use shipwright_lib::release::{Manifest, PublishRequest, ReleaseRequest, Releaser};
use shipwright_lib::util::hash::hash_bytes;

use super::common::{ARTIFACTS, artifact_tree, gunzip};

async fn filesystem_releaser() -> (TempDir, Arc<FilesystemStore>, Releaser) {
  let temp = TempDir::new().unwrap();
  let store = Arc::new(FilesystemStore::new(temp.path().join("blobs")).await.unwrap());
  let releaser = Releaser::new(store.clone()).with_namespace("releases");
  (temp, store, releaser)
}

#[tokio::test]
async fn published_objects_gunzip_to_originals() {
  let tree = artifact_tree();
  let (_temp, store, releaser) = filesystem_releaser().await;
  let ctx = CancellationToken::new();

  let report = releaser
    .publish(&ctx, &PublishRequest::new(tree.path(), "artifacts", "app", "v1.0.0"))
    .await
    .unwrap();

  assert_eq!(report.artifacts.len(), ARTIFACTS.len());
  for (rel, content) in ARTIFACTS {
    let path = store
      .object_path("artifacts", &format!("releases/app/v1.0.0/{}", rel))
      .unwrap();
    let stored = std::fs::read(&path).unwrap();
    assert_eq!(gunzip(&stored), *content, "{rel}");
  }
}

#[tokio::test]
async fn manifest_has_one_line_per_artifact() {
  let tree = artifact_tree();
  let (_temp, store, releaser) = filesystem_releaser().await;
  let ctx = CancellationToken::new();

  releaser
    .publish(&ctx, &PublishRequest::new(tree.path(), "artifacts", "app", "v1.0.0"))
    .await
    .unwrap();

  let object = store
    .get("artifacts", "releases/app/v1.0.0/checksums.txt")
    .await
    .unwrap();
  let text = String::from_utf8(object.body.to_vec()).unwrap();
  assert_eq!(text.lines().count(), ARTIFACTS.len());

  let manifest = Manifest::parse(&text).unwrap();
  let expected: Vec<(String, String)> = ARTIFACTS
    .iter()
    .map(|(rel, content)| (hash_bytes(content).to_string(), rel.to_string()))
    .collect();
  let actual: Vec<(String, String)> = manifest
    .entries()
    .iter()
    .map(|entry| (entry.hash.to_string(), entry.path.clone()))
    .collect();
  assert_eq!(actual, expected);
  for line in text.lines() {
    assert_eq!(line.split_once(' ').unwrap().1.chars().next(), Some('*'));
  }
}

#[tokio::test]
async fn concurrent_versions_write_disjoint_keys() {
  let tree = artifact_tree();
  let (_temp, store, releaser) = filesystem_releaser().await;
  let ctx = CancellationToken::new();

  let first = PublishRequest::new(tree.path(), "artifacts", "app", "v1");
  let second = PublishRequest::new(tree.path(), "artifacts", "app", "v2");
  let (a, b) = tokio::join!(releaser.publish(&ctx, &first), releaser.publish(&ctx, &second));
  a.unwrap();
  b.unwrap();

  let v1 = store.list("artifacts", "releases/app/v1/").await.unwrap();
  let v2 = store.list("artifacts", "releases/app/v2/").await.unwrap();
  assert_eq!(v1.len(), ARTIFACTS.len() + 1);
  assert_eq!(v2.len(), ARTIFACTS.len() + 1);
}

#[tokio::test]
async fn release_after_publish_moves_pointer() {
  let tree = artifact_tree();
  let (_temp, store, releaser) = filesystem_releaser().await;
  let ctx = CancellationToken::new();

  for version in ["v1", "v2"] {
    releaser
      .publish(&ctx, &PublishRequest::new(tree.path(), "artifacts", "app", version))
      .await
      .unwrap();
    releaser
      .release(&ctx, &ReleaseRequest::new("artifacts", "app", version))
      .await
      .unwrap();
  }

  let pointer = store.get("artifacts", "releases/app/release.txt").await.unwrap();
  assert_eq!(&pointer.body[..], b"v2");
  // Older versions stay in place.
  assert!(store.get("artifacts", "releases/app/v1/checksums.txt").await.is_ok());
}
