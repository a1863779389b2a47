//! Publishing an artifact tree: gzip upload of every file, then the manifest.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use super::Releaser;
use super::manifest::Manifest;
use super::pipe::{PipeWriter, pipe};
use super::types::{IncludeFilter, PublishReport, PublishRequest, ReleaseError, UploadedArtifact};
use super::validate_segment;
use crate::blob::{BlobError, PutObject};
use crate::consts::PIPE_CAPACITY;
use crate::util::hash::hash_file;

/// A regular file found under the publish root.
#[derive(Debug, Clone)]
struct Artifact {
  path: PathBuf,
  /// Relative path, `/`-separated.
  rel: String,
}

impl Releaser {
  /// Upload every file under `request.path` and then its checksum manifest.
  ///
  /// Files are uploaded one at a time, gzip-compressed on the fly, to
  /// `<namespace>/<app>/<version>/<rel>`. Hashes come from a second pass over
  /// the original files. `checksums.txt` is only written once every artifact
  /// is stored.
  #[instrument(skip(self, ctx, request), fields(app = %request.app, version = %request.version))]
  pub async fn publish(&self, ctx: &CancellationToken, request: &PublishRequest) -> Result<PublishReport, ReleaseError> {
    validate_segment("app", &request.app)?;
    validate_segment("version", &request.version)?;
    match tokio::fs::metadata(&request.path).await {
      Ok(meta) if meta.is_dir() => {}
      _ => {
        return Err(ReleaseError::InvalidRequest(format!(
          "{} is not a directory",
          request.path.display()
        )));
      }
    }

    let files = artifact_files(&request.path, request.include.clone()).await?;
    info!(files = files.len(), root = %request.path.display(), "publishing artifacts");

    let mut artifacts = Vec::with_capacity(files.len());
    for file in &files {
      if ctx.is_cancelled() {
        return Err(ReleaseError::Cancelled { stage: "upload" });
      }
      artifacts.push(self.upload_artifact(ctx, request, file).await?);
    }

    let mut manifest = Manifest::new();
    for file in artifact_files(&request.path, request.include.clone()).await? {
      let path = file.path.clone();
      let hash = tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .map_err(|e| ReleaseError::Task {
          stage: "checksum",
          message: e.to_string(),
        })?
        .map_err(|source| ReleaseError::Checksum {
          path: file.path.clone(),
          source,
        })?;
      debug!(path = %file.rel, hash = %hash, "hashed artifact");
      manifest.push(hash, file.rel);
    }

    if ctx.is_cancelled() {
      return Err(ReleaseError::Cancelled { stage: "manifest" });
    }

    let manifest_key = self.manifest_key(&request.app, &request.version);
    let object = PutObject::from_bytes(&request.bucket, &manifest_key, manifest.render())
      .content_type("text/plain; charset=utf-8")
      .tags(request.tags.clone());
    self.store.put(object).await.map_err(|source| ReleaseError::Manifest {
      key: manifest_key.clone(),
      source,
    })?;

    info!(artifacts = artifacts.len(), key = %manifest_key, "publish complete");
    Ok(PublishReport {
      artifacts,
      manifest,
      manifest_key,
    })
  }

  /// Compress one file on a blocking thread while the store consumes the
  /// other end of the pipe.
  async fn upload_artifact(
    &self,
    ctx: &CancellationToken,
    request: &PublishRequest,
    file: &Artifact,
  ) -> Result<UploadedArtifact, ReleaseError> {
    let key = self.version_key(&request.app, &request.version, &file.rel);
    let (writer, reader) = pipe(PIPE_CAPACITY);

    let source = file.path.clone();
    let compressor = tokio::task::spawn_blocking(move || compress_into(&source, writer));
    let object = PutObject::new(&request.bucket, &key, Box::pin(reader))
      .content_encoding("gzip")
      .content_type(content_type(&file.rel))
      .tags(request.tags.clone());

    let compress = async {
      compressor
        .await
        .map_err(|e| ReleaseError::Task {
          stage: "upload",
          message: e.to_string(),
        })?
        .map_err(|source| ReleaseError::Read {
          path: file.path.clone(),
          source,
        })
    };
    let upload = async {
      match self.store.put(object).await {
        Ok(size) => Ok(size),
        // The body failed because the compressor did; report its error.
        Err(BlobError::Body(source)) => Err(ReleaseError::Read {
          path: file.path.clone(),
          source,
        }),
        Err(source) => Err(ReleaseError::Upload {
          key: key.clone(),
          source,
        }),
      }
    };

    let (size, stored_size) = tokio::select! {
      biased;
      _ = ctx.cancelled() => return Err(ReleaseError::Cancelled { stage: "upload" }),
      joined = async { tokio::try_join!(compress, upload) } => joined?,
    };

    debug!(key = %key, size, stored_size, "uploaded artifact");
    Ok(UploadedArtifact {
      path: file.rel.clone(),
      key,
      size,
      stored_size,
    })
  }
}

/// Gzip `path` into the pipe. Returns the number of uncompressed bytes.
///
/// On failure the pipe is closed with a copy of the error so the uploader
/// stops too.
fn compress_into(path: &Path, writer: PipeWriter) -> io::Result<u64> {
  let mut encoder = GzEncoder::new(writer, Compression::default());
  let copied = File::open(path).and_then(|mut file| io::copy(&mut file, &mut encoder));
  match copied {
    Ok(size) => {
      encoder.finish()?.close()?;
      Ok(size)
    }
    Err(err) => {
      encoder
        .get_mut()
        .close_with_error(io::Error::new(err.kind(), err.to_string()));
      Err(err)
    }
  }
}

/// Regular files under `root` in file-name order, filtered by `include`.
async fn artifact_files(root: &Path, include: Option<IncludeFilter>) -> Result<Vec<Artifact>, ReleaseError> {
  let root = root.to_path_buf();
  tokio::task::spawn_blocking(move || {
    let mut files = Vec::new();
    for entry in WalkDir::new(&root).sort_by_file_name() {
      let entry = entry.map_err(|e| ReleaseError::Walk {
        root: root.clone(),
        message: e.to_string(),
      })?;
      if !entry.file_type().is_file() {
        continue;
      }
      let Ok(rel) = entry.path().strip_prefix(&root) else {
        continue;
      };
      if include.as_ref().is_some_and(|include| !include(rel)) {
        continue;
      }
      let rel = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
      files.push(Artifact {
        path: entry.path().to_path_buf(),
        rel,
      });
    }
    Ok(files)
  })
  .await
  .map_err(|e| ReleaseError::Task {
    stage: "upload",
    message: e.to_string(),
  })?
}

fn content_type(rel: &str) -> &'static str {
  match Path::new(rel).extension().and_then(|ext| ext.to_str()) {
    Some("txt") => "text/plain; charset=utf-8",
    Some("json") => "application/json",
    Some("gz" | "tgz") => "application/gzip",
    Some("zip") => "application/zip",
    _ => "application/octet-stream",
  }
}

#[cfg(test)]
mod tests {
  use std::io::Read;
  use std::sync::{Arc, Mutex};

  use async_trait::async_trait;
  use flate2::read::GzDecoder;
  use tempfile::TempDir;

  use super::*;
  use crate::blob::{BlobStore, ListPage, MemoryStore, Object, Tags};
  use crate::util::hash::hash_bytes;

  /// Memory store that records the order of puts and can refuse them.
  #[derive(Default)]
  struct RecordingStore {
    inner: MemoryStore,
    puts: Mutex<Vec<String>>,
    offline: bool,
  }

  #[async_trait]
  impl BlobStore for RecordingStore {
    async fn put(&self, object: PutObject) -> Result<u64, BlobError> {
      if self.offline {
        return Err(BlobError::Io(io::Error::other("store offline")));
      }
      self.puts.lock().unwrap().push(object.key.clone());
      self.inner.put(object).await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Object, BlobError> {
      self.inner.get(bucket, key).await
    }

    async fn list_page(
      &self,
      bucket: &str,
      prefix: &str,
      start_after: Option<&str>,
      limit: usize,
    ) -> Result<ListPage, BlobError> {
      self.inner.list_page(bucket, prefix, start_after, limit).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobError> {
      self.inner.delete(bucket, key).await
    }
  }

  fn artifact_tree() -> (TempDir, Vec<(&'static str, Vec<u8>)>) {
    let temp = TempDir::new().unwrap();
    let files = vec![
      ("darwin-aarch64/app", b"darwin binary".to_vec()),
      ("linux-x86_64/app", (0..200_000u32).map(|i| (i % 7) as u8).collect()),
      ("notes.txt", b"release notes\n".to_vec()),
    ];
    for (rel, content) in &files {
      let path = temp.path().join(rel);
      std::fs::create_dir_all(path.parent().unwrap()).unwrap();
      std::fs::write(path, content).unwrap();
    }
    (temp, files)
  }

  fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out).unwrap();
    out
  }

  #[tokio::test]
  async fn publish_uploads_gzip_objects_and_manifest() {
    let (temp, files) = artifact_tree();
    let store = Arc::new(MemoryStore::new());
    let releaser = Releaser::new(store.clone()).with_namespace("ns");
    let ctx = CancellationToken::new();

    let report = releaser
      .publish(&ctx, &PublishRequest::new(temp.path(), "artifacts", "app", "v1"))
      .await
      .unwrap();

    assert_eq!(report.manifest.len(), files.len());
    for (rel, content) in &files {
      let entry = report.manifest.get(rel).unwrap();
      assert_eq!(entry.hash, hash_bytes(content));

      let object = store.get("artifacts", &format!("ns/app/v1/{}", rel)).await.unwrap();
      assert_eq!(object.meta.content_encoding.as_deref(), Some("gzip"));
      assert_eq!(gunzip(&object.body), *content);
    }

    let notes = store.get("artifacts", "ns/app/v1/notes.txt").await.unwrap();
    assert_eq!(notes.meta.content_type.as_deref(), Some("text/plain; charset=utf-8"));

    let manifest = store.get("artifacts", "ns/app/v1/checksums.txt").await.unwrap();
    assert_eq!(manifest.meta.content_encoding, None);
    let parsed = Manifest::parse(std::str::from_utf8(&manifest.body).unwrap()).unwrap();
    assert_eq!(parsed, report.manifest);
    assert_eq!(report.manifest_key, "ns/app/v1/checksums.txt");
  }

  #[tokio::test]
  async fn manifest_is_uploaded_last() {
    let (temp, _files) = artifact_tree();
    let store = Arc::new(RecordingStore::default());
    let releaser = Releaser::new(store.clone());
    let ctx = CancellationToken::new();
    let mut tags = Tags::new();
    tags.insert("lifecycle".to_string(), "short".to_string());

    let request = PublishRequest::new(temp.path(), "artifacts", "app", "v1").tags(tags.clone());
    releaser.publish(&ctx, &request).await.unwrap();

    let puts = store.puts.lock().unwrap().clone();
    assert_eq!(
      puts,
      vec![
        "app/v1/darwin-aarch64/app",
        "app/v1/linux-x86_64/app",
        "app/v1/notes.txt",
        "app/v1/checksums.txt",
      ]
    );
    for key in &puts {
      assert_eq!(store.get("artifacts", key).await.unwrap().meta.tags, tags);
    }
  }

  #[tokio::test]
  async fn include_filter_limits_published_files() {
    let (temp, _files) = artifact_tree();
    let store = Arc::new(MemoryStore::new());
    let releaser = Releaser::new(store.clone());
    let ctx = CancellationToken::new();

    let request = PublishRequest::new(temp.path(), "artifacts", "app", "v1")
      .include(|rel| rel.extension().is_none_or(|ext| ext != "txt"));
    let report = releaser.publish(&ctx, &request).await.unwrap();

    assert_eq!(report.artifacts.len(), 2);
    assert_eq!(report.manifest.len(), 2);
    assert!(report.manifest.get("notes.txt").is_none());
    assert!(store.get("artifacts", "app/v1/notes.txt").await.is_err());
  }

  #[tokio::test]
  async fn store_failure_is_labelled_upload() {
    let (temp, _files) = artifact_tree();
    let store = Arc::new(RecordingStore {
      offline: true,
      ..RecordingStore::default()
    });
    let releaser = Releaser::new(store.clone());
    let ctx = CancellationToken::new();

    let err = releaser
      .publish(&ctx, &PublishRequest::new(temp.path(), "artifacts", "app", "v1"))
      .await
      .unwrap_err();

    assert!(matches!(err, ReleaseError::Upload { .. }), "{err}");
    assert!(err.to_string().starts_with("upload:"), "{err}");
  }

  #[tokio::test]
  async fn missing_tree_is_rejected() {
    let temp = TempDir::new().unwrap();
    let releaser = Releaser::new(Arc::new(MemoryStore::new()));
    let ctx = CancellationToken::new();

    let err = releaser
      .publish(
        &ctx,
        &PublishRequest::new(temp.path().join("nope"), "artifacts", "app", "v1"),
      )
      .await
      .unwrap_err();
    assert!(matches!(err, ReleaseError::InvalidRequest(_)));
  }

  #[tokio::test]
  async fn cancelled_publish_uploads_nothing() {
    let (temp, _files) = artifact_tree();
    let store = Arc::new(MemoryStore::new());
    let releaser = Releaser::new(store.clone());
    let ctx = CancellationToken::new();
    ctx.cancel();

    let err = releaser
      .publish(&ctx, &PublishRequest::new(temp.path(), "artifacts", "app", "v1"))
      .await
      .unwrap_err();
    assert!(matches!(err, ReleaseError::Cancelled { .. }));
    assert_eq!(err.to_string(), "upload: cancelled");
    assert!(store.is_empty().await);
  }

  #[test]
  fn compress_error_reaches_the_reader() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let (writer, mut reader) = pipe(4);

    let handle = std::thread::spawn(move || compress_into(Path::new("/definitely/not/here"), writer));
    let result = handle.join().unwrap();
    assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);

    runtime.block_on(async {
      use futures::StreamExt;
      let mut saw_error = false;
      while let Some(item) = reader.next().await {
        if let Err(err) = item {
          assert_eq!(err.kind(), io::ErrorKind::NotFound);
          saw_error = true;
        }
      }
      assert!(saw_error);
    });
  }

  #[test]
  fn content_types_by_extension() {
    assert_eq!(content_type("linux-x86_64/app"), "application/octet-stream");
    assert_eq!(content_type("dist/app.tar.gz"), "application/gzip");
    assert_eq!(content_type("meta.json"), "application/json");
  }
}
