//! Implementation of the `shipwright release` command.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use shipwright_lib::config::Config;
use shipwright_lib::consts::DEFAULT_ENVIRONMENT;
use shipwright_lib::release::ReleaseRequest;

use super::{StoreArgs, block_on};
use crate::output::{OutputFormat, print_json, print_stat, print_success};

#[derive(Args, Debug)]
pub struct ReleaseArgs {
  /// Application name
  #[arg(long)]
  app: String,

  /// Version to point the environment at
  #[arg(long)]
  version: String,

  /// Environment name
  #[arg(long, default_value = DEFAULT_ENVIRONMENT)]
  environment: String,

  #[command(flatten)]
  store: StoreArgs,
}

#[derive(Serialize)]
struct ReleaseOutput {
  bucket: String,
  key: String,
  environment: String,
  version: String,
  previous: Option<String>,
}

/// Execute the release command.
pub fn cmd_release(args: ReleaseArgs, config: &Config, output: OutputFormat) -> Result<()> {
  let bucket = args.store.bucket(config);
  let request = ReleaseRequest::new(&bucket, &args.app, &args.version)
    .environment(&args.environment)
    .tags(args.store.tags());

  let store = args.store.clone();
  let environment = args.environment.as_str();
  let (previous, key) = block_on(|ctx| async move {
    let releaser = store.releaser(config).await?;
    let previous = releaser
      .current_version(&request.bucket, &request.app, environment)
      .await
      .context("Failed to read current release")?;
    let key = releaser.release(&ctx, &request).await.context("Release failed")?;
    Ok((previous, key))
  })?;

  if output.is_json() {
    print_json(&ReleaseOutput {
      bucket,
      key,
      environment: args.environment.clone(),
      version: args.version.clone(),
      previous,
    })?;
  } else {
    print_success(&format!("{} {} is now {}", args.app, args.environment, args.version));
    print_stat("Pointer", &key);
    if let Some(previous) = previous {
      print_stat("Previous", &previous);
    }
  }

  Ok(())
}
