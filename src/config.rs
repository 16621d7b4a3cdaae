use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.oluwasetemi.dev";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Number of todos requested per page
  #[serde(default = "default_page_size")]
  pub page_size: u32,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api: ApiConfig::default(),
      cache: CacheConfig::default(),
      page_size: default_page_size(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_api_url")]
  pub url: String,
  /// Per-request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Maximum attempts for read queries (mutations are never retried)
  #[serde(default = "default_read_attempts")]
  pub read_attempts: u32,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_api_url(),
      timeout_secs: default_timeout_secs(),
      read_attempts: default_read_attempts(),
    }
  }
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Minutes before a cached response must be refetched
  #[serde(default = "default_stale_minutes")]
  pub stale_minutes: i64,
  /// Minutes an unused entry is kept before eviction
  #[serde(default = "default_gc_minutes")]
  pub gc_minutes: i64,
  /// Keep the query cache in the state database between runs
  #[serde(default = "default_true")]
  pub persist: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_minutes: default_stale_minutes(),
      gc_minutes: default_gc_minutes(),
      persist: true,
    }
  }
}

fn default_api_url() -> String {
  DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
  10
}

fn default_read_attempts() -> u32 {
  3
}

fn default_stale_minutes() -> i64 {
  5
}

fn default_gc_minutes() -> i64 {
  10
}

fn default_page_size() -> u32 {
  10
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./todoq.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/todoq/config.yaml
  ///
  /// Falls back to defaults when no file exists. `TODOQ_API_URL` overrides
  /// the configured server URL.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(url) = std::env::var("TODOQ_API_URL") {
      config.api.url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("todoq.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("todoq").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get a password from the environment for non-interactive login.
  ///
  /// Checks TODOQ_PASSWORD.
  pub fn get_password() -> Result<String> {
    std::env::var("TODOQ_PASSWORD")
      .map_err(|_| eyre!("Password not found. Set the TODOQ_PASSWORD environment variable."))
  }

  /// Directory holding the state database and logs.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("todoq"))
  }
}
