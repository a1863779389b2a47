//! User configuration.
//!
//! Read from `<config_dir>/config.toml`; every field is optional. A few
//! settings can be overridden with environment variables, and the CLI applies
//! its flags on top of that.
//!
//! ```toml
//! cache_dir = "/var/cache/shipwright"
//! base_url = "https://artifacts.example.com"
//!
//! [store]
//! root = "/srv/blobs"
//! bucket = "artifacts"
//! namespace = "releases"
//!
//! [compile]
//! parallelism = 4
//! toolchain = "go"
//!
//! [download]
//! timeout_secs = 300
//! attempt_timeout_secs = 60
//!
//! [matrix]
//! linux = ["x86_64", "aarch64"]
//! darwin = ["aarch64"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_DOWNLOAD_TIMEOUT_SECS, DEFAULT_PARALLELISM};
use crate::platform::{PlatformMatrix, paths};

pub const CACHE_DIR_ENV: &str = "SHIPWRIGHT_CACHE_DIR";
pub const STORE_ENV: &str = "SHIPWRIGHT_STORE";
pub const BASE_URL_ENV: &str = "SHIPWRIGHT_BASE_URL";
pub const PARALLELISM_ENV: &str = "SHIPWRIGHT_PARALLELISM";

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("reading {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("parsing {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid value {value:?} for {var}: {message}")]
  InvalidEnv {
    var: &'static str,
    value: String,
    message: String,
  },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  /// Download cache root. Defaults to the per-user cache directory.
  pub cache_dir: Option<PathBuf>,
  /// URL the bucket is served from, used by `fetch`.
  pub base_url: Option<String>,
  pub store: StoreConfig,
  pub compile: CompileConfig,
  pub download: DownloadConfig,
  pub matrix: PlatformMatrix,
}

/// Filesystem blob store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
  /// Defaults to `<data_dir>/store`.
  pub root: Option<PathBuf>,
  pub bucket: String,
  pub namespace: String,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      root: None,
      bucket: "artifacts".to_string(),
      namespace: String::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileConfig {
  pub parallelism: usize,
  /// Toolchain binary, `go` unless set.
  pub toolchain: String,
}

impl Default for CompileConfig {
  fn default() -> Self {
    Self {
      parallelism: DEFAULT_PARALLELISM,
      toolchain: "go".to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadConfig {
  pub timeout_secs: u64,
  pub attempt_timeout_secs: u64,
}

impl Default for DownloadConfig {
  fn default() -> Self {
    Self {
      timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
      attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
    }
  }
}

impl DownloadConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn attempt_timeout(&self) -> Duration {
    Duration::from_secs(self.attempt_timeout_secs)
  }
}

impl Config {
  /// Default location of the config file.
  pub fn default_path() -> PathBuf {
    paths::config_dir().join(CONFIG_FILE)
  }

  /// Load the default config file and apply environment overrides.
  pub fn load() -> Result<Self, ConfigError> {
    Self::load_from(&Self::default_path())
  }

  /// Load `path` (missing means defaults) and apply environment overrides.
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let mut config = match std::fs::read_to_string(path) {
      Ok(text) => Self::parse(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
      })?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no config file, using defaults");
        Self::default()
      }
      Err(source) => {
        return Err(ConfigError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };
    config.apply_env()?;
    Ok(config)
  }

  pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(text)
  }

  /// Override fields from `SHIPWRIGHT_*` environment variables.
  pub fn apply_env(&mut self) -> Result<(), ConfigError> {
    if let Some(dir) = env_var(CACHE_DIR_ENV) {
      self.cache_dir = Some(PathBuf::from(dir));
    }
    if let Some(root) = env_var(STORE_ENV) {
      self.store.root = Some(PathBuf::from(root));
    }
    if let Some(url) = env_var(BASE_URL_ENV) {
      self.base_url = Some(url);
    }
    if let Some(value) = env_var(PARALLELISM_ENV) {
      self.compile.parallelism = match value.parse::<usize>() {
        Ok(n) if n > 0 => n,
        Ok(_) => {
          return Err(ConfigError::InvalidEnv {
            var: PARALLELISM_ENV,
            value,
            message: "must be at least 1".to_string(),
          });
        }
        Err(e) => {
          return Err(ConfigError::InvalidEnv {
            var: PARALLELISM_ENV,
            message: e.to_string(),
            value,
          });
        }
      };
    }
    Ok(())
  }

  pub fn cache_dir(&self) -> PathBuf {
    self.cache_dir.clone().unwrap_or_else(paths::cache_dir)
  }

  pub fn store_root(&self) -> PathBuf {
    self
      .store
      .root
      .clone()
      .unwrap_or_else(|| paths::data_dir().join("store"))
  }
}

/// A set, non-empty environment variable.
fn env_var(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|value| !value.is_empty())
}
