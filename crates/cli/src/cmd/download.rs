//! Implementation of the `shipwright download` and `shipwright remove` commands.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use shipwright_lib::config::Config;
use shipwright_lib::download::Downloader;

use super::{block_on, parse_mode};
use crate::output::{OutputFormat, print_json, print_stat, print_success};

/// Cache location and timeouts shared by `download` and `fetch`.
#[derive(Args, Debug, Clone)]
pub struct CacheArgs {
  /// Cache directory (default: config, then <cache dir>/shipwright)
  #[arg(long)]
  cache_dir: Option<PathBuf>,

  /// Overall timeout, e.g. `5m` (default: config)
  #[arg(long, value_parser = humantime::parse_duration)]
  timeout: Option<Duration>,

  /// Timeout of a single attempt, e.g. `1m` (default: config)
  #[arg(long, value_parser = humantime::parse_duration)]
  attempt_timeout: Option<Duration>,
}

impl CacheArgs {
  pub fn downloader(&self, config: &Config) -> Result<Downloader> {
    let cache_dir = self.cache_dir.clone().unwrap_or_else(|| config.cache_dir());
    Ok(
      Downloader::new(cache_dir)
        .context("Failed to create HTTP client")?
        .with_timeout(self.timeout.unwrap_or_else(|| config.download.timeout()))
        .with_attempt_timeout(self.attempt_timeout.unwrap_or_else(|| config.download.attempt_timeout())),
    )
  }
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
  /// URL to fetch
  url: String,

  /// Octal permissions of the cached file
  #[arg(long, default_value = "755", value_parser = parse_mode)]
  mode: u32,

  #[command(flatten)]
  cache: CacheArgs,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
  /// URL whose cache entry to delete
  url: String,

  /// Cache directory (default: config, then <cache dir>/shipwright)
  #[arg(long)]
  cache_dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct CacheOutput<'a> {
  url: &'a str,
  path: PathBuf,
}

/// Execute the download command. Prints the cached path.
pub fn cmd_download(args: DownloadArgs, config: &Config, output: OutputFormat) -> Result<()> {
  let downloader = args.cache.downloader(config)?;
  let (url, mode) = (args.url.as_str(), args.mode);
  let path = block_on(|ctx| async move {
    downloader
      .download(&ctx, url, mode)
      .await
      .context("Download failed")
  })?;

  if output.is_json() {
    print_json(&CacheOutput { url, path })?;
  } else {
    println!("{}", path.display());
  }
  Ok(())
}

/// Execute the remove command.
pub fn cmd_remove(args: RemoveArgs, config: &Config, output: OutputFormat) -> Result<()> {
  let cache_dir = args.cache_dir.clone().unwrap_or_else(|| config.cache_dir());
  let downloader = Downloader::new(cache_dir).context("Failed to create HTTP client")?;
  let path = downloader.cache_path(&args.url)?;

  let url = args.url.as_str();
  block_on(|_ctx| async move { downloader.remove(url).await.context("Remove failed") })?;

  if output.is_json() {
    print_json(&CacheOutput { url, path })?;
  } else {
    print_success("Removed from cache");
    print_stat("Path", &path.display().to_string());
  }
  Ok(())
}
