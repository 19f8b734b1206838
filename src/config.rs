use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const APP_DIR: &str = "definy-sync";
const DEFAULT_API_URL: &str = "https://definy.app/";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Base URL; operations are posted to `<url>/api/<operation>`
  pub url: String,
  /// Per-call timeout. A timed out call counts as a failed fetch.
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: DEFAULT_API_URL.to_string(),
      timeout_secs: 30,
    }
  }
}

impl ApiConfig {
  pub fn base_url(&self) -> Result<Url> {
    // A base without a trailing slash would drop its last segment on join.
    let raw = if self.url.ends_with('/') {
      self.url.clone()
    } else {
      format!("{}/", self.url)
    };
    Url::parse(&raw).map_err(|e| eyre!("Invalid api.url {:?}: {}", self.url, e))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub enabled: bool,
  /// Defaults to `<data_dir>/definy-sync/cache.db`
  pub path: Option<PathBuf>,
  /// How long fetched data counts as fresh
  pub stale_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      stale_secs: 300,
    }
  }
}

impl CacheConfig {
  pub fn resolved_path(&self) -> Option<PathBuf> {
    self
      .path
      .clone()
      .or_else(|| dirs::data_dir().map(|dir| dir.join(APP_DIR).join("cache.db")))
  }

  pub fn stale_time(&self) -> chrono::Duration {
    let secs = i64::try_from(self.stale_secs).unwrap_or(i64::MAX);
    chrono::Duration::seconds(secs.min(i64::MAX / 1000))
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// `EnvFilter` directives, e.g. `info,definy_sync=debug`
  pub filter: Option<String>,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./definy-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/definy-sync/config.yaml
  ///
  /// Falls back to the defaults when no file exists.
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(format!("{APP_DIR}.yaml"));
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_DIR).join("config.yaml");
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

  pub fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty file is a valid, all-default config.
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Get an account token from the environment, if one was supplied.
  ///
  /// Checks DEFINY_ACCOUNT_TOKEN.
  pub fn account_token() -> Option<String> {
    std::env::var("DEFINY_ACCOUNT_TOKEN")
      .ok()
      .filter(|token| !token.trim().is_empty())
  }
}
