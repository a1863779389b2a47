//! Implementation of the `shipwright publish` command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use shipwright_lib::config::Config;
use shipwright_lib::release::{PublishRequest, UploadedArtifact};

use super::{StoreArgs, block_on};
use crate::output::{OutputFormat, format_bytes, print_item, print_json, print_stat, print_success, truncate_hash};

#[derive(Args, Debug)]
pub struct PublishArgs {
  /// Artifact tree to upload
  path: PathBuf,

  /// Application name
  #[arg(long)]
  app: String,

  /// Version to publish under
  #[arg(long)]
  version: String,

  /// Only publish files under these relative prefixes (repeatable)
  #[arg(long = "include", value_name = "PREFIX")]
  include: Vec<PathBuf>,

  #[command(flatten)]
  store: StoreArgs,
}

#[derive(Serialize)]
struct PublishOutput {
  bucket: String,
  manifest_key: String,
  artifacts: Vec<PublishedArtifact>,
}

#[derive(Serialize)]
struct PublishedArtifact {
  #[serde(flatten)]
  upload: UploadedArtifact,
  sha256: String,
}

/// Execute the publish command.
///
/// Uploads every file under the tree gzip-compressed, then `checksums.txt`.
pub fn cmd_publish(args: PublishArgs, config: &Config, output: OutputFormat) -> Result<()> {
  let bucket = args.store.bucket(config);
  let mut request = PublishRequest::new(&args.path, &bucket, &args.app, &args.version).tags(args.store.tags());
  if !args.include.is_empty() {
    let prefixes = args.include.clone();
    request = request.include(move |rel: &Path| prefixes.iter().any(|prefix| rel.starts_with(prefix)));
  }

  let store = args.store.clone();
  let report = block_on(|ctx| async move {
    let releaser = store.releaser(config).await?;
    releaser.publish(&ctx, &request).await.context("Publish failed")
  })?;

  let artifacts: Vec<PublishedArtifact> = report
    .artifacts
    .into_iter()
    .map(|upload| {
      let sha256 = report
        .manifest
        .get(&upload.path)
        .map(|entry| entry.hash.to_string())
        .unwrap_or_default();
      PublishedArtifact { upload, sha256 }
    })
    .collect();

  if output.is_json() {
    print_json(&PublishOutput {
      bucket,
      manifest_key: report.manifest_key,
      artifacts,
    })?;
  } else {
    print_success(&format!("Published {} {}", args.app, args.version));
    for artifact in &artifacts {
      let detail = format!(
        "({}, {} stored, {})",
        format_bytes(artifact.upload.size),
        format_bytes(artifact.upload.stored_size),
        truncate_hash(&artifact.sha256)
      );
      print_item(&artifact.upload.key, &detail);
    }
    print_stat("Manifest", &report.manifest_key);
  }

  Ok(())
}
