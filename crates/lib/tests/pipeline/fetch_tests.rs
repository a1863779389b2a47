//! Publishing into memory, serving the store over HTTP and fetching back.

use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use shipwright_lib::blob::{BlobStore, MemoryStore};
use shipwright_lib::download::Downloader;
use shipwright_lib::platform::{Arch, Os, Platform};
use shipwright_lib::release::{PublishRequest, ReleaseRequest, Releaser};
use shipwright_lib::resolve::Resolver;

use super::common::{ARTIFACTS, artifact_tree};

/// Serve every object of `bucket` the way a CDN in front of the bucket would.
async fn serve_bucket(server: &mut mockito::ServerGuard, store: &MemoryStore, bucket: &str) -> Vec<mockito::Mock> {
  let mut mocks = Vec::new();
  for key in store.list(bucket, "").await.unwrap() {
    let object = store.get(bucket, &key).await.unwrap();
    let mut mock = server.mock("GET", format!("/{}", key).as_str()).with_status(200);
    if let Some(encoding) = &object.meta.content_encoding {
      mock = mock.with_header("content-encoding", encoding);
    }
    mocks.push(mock.with_body(object.body.to_vec()).create_async().await);
  }
  mocks
}

#[tokio::test]
async fn released_binary_round_trips_through_http() {
  let tree = artifact_tree();
  let store = Arc::new(MemoryStore::new());
  let releaser = Releaser::new(store.clone()).with_namespace("ns");
  let ctx = CancellationToken::new();

  releaser
    .publish(&ctx, &PublishRequest::new(tree.path(), "artifacts", "app", "v7"))
    .await
    .unwrap();
  releaser
    .release(&ctx, &ReleaseRequest::new("artifacts", "app", "v7"))
    .await
    .unwrap();

  let mut server = mockito::Server::new_async().await;
  let _mocks = serve_bucket(&mut server, &store, "artifacts").await;

  let cache = TempDir::new().unwrap();
  let downloader = Downloader::new(cache.path()).unwrap();
  let resolver = Resolver::new(&server.url()).unwrap().with_namespace("ns");

  for (os, arch, rel) in [
    (Os::Linux, Arch::X86_64, "linux-x86_64/app"),
    (Os::MacOs, Arch::Aarch64, "darwin-aarch64/app"),
    (Os::Windows, Arch::X86_64, "windows-x86_64/app.exe"),
  ] {
    let fetched = resolver
      .fetch(&ctx, &downloader, "app", "release", Platform::new(arch, os), 0o755)
      .await
      .unwrap();

    let expected = ARTIFACTS.iter().find(|(path, _)| *path == rel).unwrap().1;
    assert_eq!(fetched.resolved.version, "v7");
    assert_eq!(std::fs::read(&fetched.local_path).unwrap(), expected);
    assert!(fetched.local_path.starts_with(cache.path().join("ns/app/v7")));
  }
}
