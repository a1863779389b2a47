//! Implementation of the `shipwright build` command.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use shipwright_lib::compile::GoToolchain;
use shipwright_lib::config::Config;
use shipwright_lib::platform::PlatformMatrix;
use shipwright_lib::release::{BuildRequest, build_matrix};

use super::{block_on, parse_key_val};
use crate::output::{OutputFormat, format_duration, print_item, print_json, print_stat, print_success};

#[derive(Args, Debug)]
pub struct BuildArgs {
  /// Binary name
  #[arg(long)]
  name: String,

  /// Source package handed to the toolchain
  #[arg(long)]
  source: String,

  /// Platforms, e.g. `linux/amd64,darwin/arm64` (default: config matrix)
  #[arg(long)]
  matrix: Option<PlatformMatrix>,

  /// Linker flags
  #[arg(long)]
  ldflags: Option<String>,

  /// Extra build environment (repeatable)
  #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
  env: Vec<(String, String)>,

  /// Build coverage-instrumented binaries
  #[arg(long)]
  coverage: bool,

  /// Output directory
  #[arg(long, default_value = "dist")]
  out_dir: PathBuf,

  /// Concurrent compile jobs (default: config)
  #[arg(short = 'j', long)]
  parallelism: Option<usize>,

  /// Toolchain binary (default: config)
  #[arg(long)]
  toolchain: Option<String>,
}

#[derive(Serialize)]
struct BuildOutput {
  binaries: Vec<PathBuf>,
}

/// Execute the build command.
///
/// Compiles one binary per platform into `<out_dir>/<os>-<arch>/`.
pub fn cmd_build(args: BuildArgs, config: &Config, output: OutputFormat) -> Result<()> {
  let start = Instant::now();

  let mut request = BuildRequest::new(&args.name, &args.source, &args.out_dir);
  request.matrix = args.matrix.unwrap_or_else(|| config.matrix.clone());
  request.ldflags = args.ldflags;
  request.env = args.env.into_iter().collect();
  request.coverage = args.coverage;
  request.parallelism = args.parallelism.unwrap_or(config.compile.parallelism);

  let toolchain = GoToolchain::new(args.toolchain.unwrap_or_else(|| config.compile.toolchain.clone()));
  let binaries = block_on(|ctx| async move {
    build_matrix(&ctx, &request, toolchain).await.context("Build failed")
  })?;

  if output.is_json() {
    print_json(&BuildOutput { binaries })?;
  } else {
    print_success("Build complete!");
    for binary in &binaries {
      print_item(&binary.display().to_string(), "");
    }
    print_stat("Binaries", &binaries.len().to_string());
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
