//! Implementation of the `shipwright fetch` command.

use anyhow::{Context, Result, anyhow};
use clap::Args;

use shipwright_lib::config::Config;
use shipwright_lib::consts::DEFAULT_ENVIRONMENT;
use shipwright_lib::platform::Platform;
use shipwright_lib::resolve::Resolver;

use super::download::CacheArgs;
use super::{block_on, parse_mode};
use crate::output::{OutputFormat, print_json, print_stat, print_success};

#[derive(Args, Debug)]
pub struct FetchArgs {
  /// Application name
  #[arg(long)]
  app: String,

  /// Environment whose pointer to follow
  #[arg(long, default_value = DEFAULT_ENVIRONMENT)]
  environment: String,

  /// Target platform, `<os>/<arch>` or `<arch>-<os>` (default: host)
  #[arg(long, value_parser = Platform::parse)]
  platform: Option<Platform>,

  /// URL the bucket is served from (default: config)
  #[arg(long)]
  base_url: Option<String>,

  /// Key prefix used when publishing (default: config)
  #[arg(long)]
  namespace: Option<String>,

  /// Octal permissions of the cached file
  #[arg(long, default_value = "755", value_parser = parse_mode)]
  mode: u32,

  #[command(flatten)]
  cache: CacheArgs,
}

/// Execute the fetch command.
///
/// Resolves the released version, downloads the matching binary into the
/// cache and checks it against the manifest.
pub fn cmd_fetch(args: FetchArgs, config: &Config, output: OutputFormat) -> Result<()> {
  let base_url = args
    .base_url
    .clone()
    .or_else(|| config.base_url.clone())
    .ok_or_else(|| anyhow!("No base URL: pass --base-url or set base_url in the config"))?;
  let platform = match args.platform {
    Some(platform) => platform,
    None => Platform::current().ok_or_else(|| anyhow!("Unsupported host platform, pass --platform"))?,
  };
  let namespace = args.namespace.clone().unwrap_or_else(|| config.store.namespace.clone());

  let resolver = Resolver::new(&base_url)?
    .with_namespace(namespace)
    .with_timeout(config.download.attempt_timeout());
  let downloader = args.cache.downloader(config)?;

  let (app, environment, mode) = (args.app.as_str(), args.environment.as_str(), args.mode);
  let fetched = block_on(|ctx| async move {
    resolver
      .fetch(&ctx, &downloader, app, environment, platform, mode)
      .await
      .context("Fetch failed")
  })?;

  if output.is_json() {
    print_json(&fetched)?;
  } else {
    print_success(&format!("{} {} ({})", args.app, fetched.resolved.version, platform));
    print_stat("Path", &fetched.local_path.display().to_string());
    print_stat("SHA-256", &fetched.resolved.sha256);
  }
  Ok(())
}
