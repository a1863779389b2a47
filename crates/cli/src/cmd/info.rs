use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use shipwright_lib::config::Config;
use shipwright_lib::platform::platform_triple;

use crate::output::{OutputFormat, print_info, print_json, print_stat};

#[derive(Serialize)]
struct Info<'a> {
  platform: Option<String>,
  config_file: &'a Path,
  cache_dir: PathBuf,
  store_root: PathBuf,
  bucket: &'a str,
  namespace: &'a str,
  base_url: Option<&'a str>,
  parallelism: usize,
  matrix: Vec<String>,
}

pub fn cmd_info(config: &Config, config_path: &Path, output: OutputFormat) -> Result<()> {
  let info = Info {
    platform: platform_triple(),
    config_file: config_path,
    cache_dir: config.cache_dir(),
    store_root: config.store_root(),
    bucket: &config.store.bucket,
    namespace: &config.store.namespace,
    base_url: config.base_url.as_deref(),
    parallelism: config.compile.parallelism,
    matrix: config.matrix.platforms().iter().map(|p| p.target_dir()).collect(),
  };

  if output.is_json() {
    return print_json(&info);
  }

  print_info("System:");
  match &info.platform {
    Some(triple) => print_stat("Platform", triple),
    None => print_stat("Platform", "unknown"),
  }
  print_info("Configuration:");
  print_stat("Config file", &info.config_file.display().to_string());
  print_stat("Cache", &info.cache_dir.display().to_string());
  print_stat("Store", &info.store_root.display().to_string());
  print_stat("Bucket", info.bucket);
  if !info.namespace.is_empty() {
    print_stat("Namespace", info.namespace);
  }
  print_stat("Base URL", info.base_url.unwrap_or("(not set)"));
  print_stat("Parallelism", &info.parallelism.to_string());
  print_stat("Matrix", &info.matrix.join(", "));
  Ok(())
}
