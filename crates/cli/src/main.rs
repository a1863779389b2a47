mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shipwright_lib::config::Config;

use crate::output::{OutputFormat, print_error};

/// shipwright - build, release and fetch binary artifacts
#[derive(Parser)]
#[command(name = "shipwright")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Config file (default: <config dir>/shipwright/config.toml)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Compile a package for every platform in the matrix
  Build(cmd::BuildArgs),

  /// Upload an artifact tree and its checksum manifest
  Publish(cmd::PublishArgs),

  /// Point an environment at a published version
  Release(cmd::ReleaseArgs),

  /// Download a URL into the local cache
  Download(cmd::DownloadArgs),

  /// Remove a URL from the local cache
  Remove(cmd::RemoveArgs),

  /// Resolve, download and verify the released binary for a platform
  Fetch(cmd::FetchArgs),

  /// Show platform and configuration information
  Info,
}

fn main() {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  if let Err(e) = run(cli) {
    print_error(&format!("{:#}", e));
    std::process::exit(1);
  }
}

fn run(cli: Cli) -> Result<()> {
  let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
  let config = Config::load_from(&config_path).with_context(|| format!("Failed to load {}", config_path.display()))?;

  match cli.command {
    Commands::Build(args) => cmd::cmd_build(args, &config, cli.output),
    Commands::Publish(args) => cmd::cmd_publish(args, &config, cli.output),
    Commands::Release(args) => cmd::cmd_release(args, &config, cli.output),
    Commands::Download(args) => cmd::cmd_download(args, &config, cli.output),
    Commands::Remove(args) => cmd::cmd_remove(args, &config, cli.output),
    Commands::Fetch(args) => cmd::cmd_fetch(args, &config, cli.output),
    Commands::Info => cmd::cmd_info(&config, &config_path, cli.output),
  }
}
