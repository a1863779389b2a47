mod build;
mod download;
mod fetch;
mod info;
mod publish;
mod release;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use shipwright_lib::blob::{FilesystemStore, Tags};
use shipwright_lib::config::Config;
use shipwright_lib::release::Releaser;

pub use build::{BuildArgs, cmd_build};
pub use download::{DownloadArgs, RemoveArgs, cmd_download, cmd_remove};
pub use fetch::{FetchArgs, cmd_fetch};
pub use info::cmd_info;
pub use publish::{PublishArgs, cmd_publish};
pub use release::{ReleaseArgs, cmd_release};

/// Blob store location shared by `publish` and `release`.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
  /// Filesystem store root (default: config, then <data dir>/shipwright/store)
  #[arg(long)]
  store: Option<PathBuf>,

  /// Bucket to write to
  #[arg(long)]
  bucket: Option<String>,

  /// Key prefix for every object
  #[arg(long)]
  namespace: Option<String>,

  /// Tag attached to uploaded objects (repeatable)
  #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_key_val)]
  tags: Vec<(String, String)>,
}

impl StoreArgs {
  fn bucket(&self, config: &Config) -> String {
    self.bucket.clone().unwrap_or_else(|| config.store.bucket.clone())
  }

  fn tags(&self) -> Tags {
    self.tags.iter().cloned().collect()
  }

  async fn releaser(&self, config: &Config) -> Result<Releaser> {
    let root = self.store.clone().unwrap_or_else(|| config.store_root());
    let store = FilesystemStore::new(&root)
      .await
      .with_context(|| format!("Failed to open store at {}", root.display()))?;
    let namespace = self.namespace.clone().unwrap_or_else(|| config.store.namespace.clone());
    Ok(Releaser::new(Arc::new(store)).with_namespace(namespace))
  }
}

/// Run `f` on a fresh runtime with a context cancelled by Ctrl-C.
fn block_on<F, T>(f: impl FnOnce(CancellationToken) -> F) -> Result<T>
where
  F: Future<Output = Result<T>>,
{
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let ctx = CancellationToken::new();
  let interrupt = ctx.clone();
  rt.block_on(async move {
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, cancelling");
        interrupt.cancel();
      }
    });
    f(ctx).await
  })
}

fn parse_key_val(s: &str) -> Result<(String, String)> {
  let (key, value) = s
    .split_once('=')
    .ok_or_else(|| anyhow!("expected KEY=VALUE, got {:?}", s))?;
  if key.is_empty() {
    return Err(anyhow!("empty key in {:?}", s));
  }
  Ok((key.to_string(), value.to_string()))
}

/// Parse an octal file mode such as `755` or `0o644`.
fn parse_mode(s: &str) -> Result<u32> {
  let digits = s.trim_start_matches("0o");
  let mode = u32::from_str_radix(digits, 8).with_context(|| format!("invalid octal mode {:?}", s))?;
  if mode > 0o7777 {
    return Err(anyhow!("mode {:?} out of range", s));
  }
  Ok(mode)
}
