use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Upper bound for configured lifetimes (ten years).
pub const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Directory for daily log files (logs go to stderr if not set)
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Root of the content API, e.g. https://content.example.com/api/v1/
  pub base_url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Lifetime of responses that carry no caching headers
  #[serde(default = "default_ttl_secs")]
  pub default_ttl_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// When false, nothing is persisted and every read goes to the network
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Database file (defaults to $XDG_DATA_HOME/content-sync/cache.db)
  pub path: Option<PathBuf>,
  /// Replaces server-declared expiry with a fixed lifetime
  pub ttl_override_secs: Option<i64>,
  /// Request expanded collections and preload their items
  #[serde(default = "default_true")]
  pub preload_collections: bool,
  #[serde(default = "default_page_size")]
  pub page_size: usize,
}

impl RemoteConfig {
  /// Lifetime of responses without caching headers.
  pub fn default_ttl(&self) -> Result<Duration> {
    ttl("remote.default_ttl_secs", self.default_ttl_secs)
  }
}

impl CacheConfig {
  pub fn ttl_override(&self) -> Result<Option<Duration>> {
    self
      .ttl_override_secs
      .map(|secs| ttl("cache.ttl_override_secs", secs))
      .transpose()
  }
}

fn ttl(key: &str, secs: i64) -> Result<Duration> {
  if !(0..=MAX_TTL_SECS).contains(&secs) {
    return Err(eyre!("{} must be between 0 and {}, got {}", key, MAX_TTL_SECS, secs));
  }
  Duration::try_seconds(secs).ok_or_else(|| eyre!("{} is out of range: {}", key, secs))
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      ttl_override_secs: None,
      preload_collections: true,
      page_size: default_page_size(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_ttl_secs() -> i64 {
  300
}

fn default_page_size() -> usize {
  20
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./content-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/content-sync/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/content-sync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("content-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("content-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.cache.page_size == 0 {
      return Err(eyre!("cache.page_size must be greater than zero"));
    }
    config.remote.default_ttl()?;
    config.cache.ttl_override()?;
    Ok(config)
  }

  /// Get the optional bearer token for the content API.
  ///
  /// Reads CONTENT_SYNC_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("CONTENT_SYNC_TOKEN")
      .ok()
      .filter(|token| !token.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("remote:\n  base_url: https://example.com/api/\n").unwrap();
    assert_eq!(config.remote.timeout_secs, 30);
    assert_eq!(config.remote.default_ttl_secs, 300);
    assert!(config.cache.enabled);
    assert!(config.cache.preload_collections);
    assert_eq!(config.cache.page_size, 20);
    assert!(config.log_dir.is_none());
  }

  #[test]
  fn test_cache_section_overrides() {
    let yaml = r#"
remote:
  base_url: https://example.com/api/
cache:
  enabled: false
  ttl_override_secs: 600
  preload_collections: false
  page_size: 50
"#;
    let config = Config::parse(yaml).unwrap();
    assert!(!config.cache.enabled);
    assert_eq!(config.cache.ttl_override_secs, Some(600));
    assert!(!config.cache.preload_collections);
    assert_eq!(config.cache.page_size, 50);
  }

  #[test]
  fn test_zero_page_size_is_rejected() {
    let yaml = "remote:\n  base_url: https://example.com/\ncache:\n  page_size: 0\n";
    assert!(Config::parse(yaml).is_err());
  }

  #[test]
  fn test_out_of_range_ttls_are_rejected() {
    let huge = "remote:\n  base_url: https://example.com/\n  default_ttl_secs: 99999999999999\n";
    assert!(Config::parse(huge).is_err());

    let negative = "remote:\n  base_url: https://example.com/\ncache:\n  ttl_override_secs: -5\n";
    assert!(Config::parse(negative).is_err());

    let ok = "remote:\n  base_url: https://example.com/\ncache:\n  ttl_override_secs: 600\n";
    let config = Config::parse(ok).unwrap();
    assert_eq!(config.cache.ttl_override().unwrap(), Some(Duration::minutes(10)));
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/content-sync.yaml"))).is_err());
  }
}
