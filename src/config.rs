use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::KeyScheme;
use crate::favorites::DEFAULT_PREFIX;
use crate::worker::generation::DEFAULT_GENERATION;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Cache generation label; bump it whenever the offline asset set changes
  pub cache_version: String,
  /// Key prefix of favorite records in the favorites store
  pub favorites_prefix: String,
  pub key_scheme: KeyScheme,
  pub policy: PolicyConfig,
  /// Base for resolving relative favorite URLs
  pub base_url: Option<Url>,
  pub storage: StorageConfig,
  pub network: NetworkConfig,
  pub server: ServerConfig,
  pub log_level: String,
  pub log_file: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      cache_version: DEFAULT_GENERATION.to_string(),
      favorites_prefix: DEFAULT_PREFIX.to_string(),
      key_scheme: KeyScheme::default(),
      policy: PolicyConfig::default(),
      base_url: None,
      storage: StorageConfig::default(),
      network: NetworkConfig::default(),
      server: ServerConfig::default(),
      log_level: "info".to_string(),
      log_file: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
  /// Path segments that mark a resource as offline-critical
  pub segments: Vec<String>,
  /// Suffixes that mark a resource as offline-critical
  pub suffixes: Vec<String>,
}

impl Default for PolicyConfig {
  fn default() -> Self {
    Self {
      segments: vec!["vendor".to_string(), "assets".to_string()],
      suffixes: vec!["/jquery.min.js".to_string()],
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
  #[default]
  Sqlite,
  /// Nothing persists across runs
  Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  pub backend: StorageBackend,
  pub cache_db: Option<PathBuf>,
  pub favorites_db: Option<PathBuf>,
}

impl StorageConfig {
  pub fn cache_db_path(&self) -> Result<PathBuf> {
    match &self.cache_db {
      Some(p) => Ok(p.clone()),
      None => Ok(data_dir()?.join("cache.db")),
    }
  }

  pub fn favorites_db_path(&self) -> Result<PathBuf> {
    match &self.favorites_db {
      Some(p) => Ok(p.clone()),
      None => Ok(data_dir()?.join("favorites.db")),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
  pub user_agent: String,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 30,
      user_agent: concat!("favcache/", env!("CARGO_PKG_VERSION")).to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host: String,
  pub port: u16,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host: "127.0.0.1".to_string(),
      port: 8787,
    }
  }
}

/// Data directory for the default database locations.
fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("favcache"))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./favcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/favcache/config.yaml
  ///
  /// Without a config file the defaults apply.
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
    // Check current directory
    let local = PathBuf::from("favcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("favcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.cache_version, "1.0.0");
    assert_eq!(config.favorites_prefix, "favorites:");
    assert_eq!(config.key_scheme, KeyScheme::Split);
    assert_eq!(config.policy.segments, vec!["vendor", "assets"]);
    assert_eq!(config.storage.backend, StorageBackend::Sqlite);
    assert_eq!(config.server.port, 8787);
  }

  #[test]
  fn test_full_config() {
    let config = Config::from_yaml(
      r#"
cache_version: "2024-06-01"
key_scheme: canonical
base_url: https://example.com/app/
policy:
  segments: [static]
  suffixes: [".woff2"]
storage:
  backend: memory
network:
  timeout_secs: 5
server:
  port: 9000
"#,
    )
    .unwrap();

    assert_eq!(config.cache_version, "2024-06-01");
    assert_eq!(config.key_scheme, KeyScheme::Canonical);
    assert_eq!(
      config.base_url.as_ref().map(Url::as_str),
      Some("https://example.com/app/")
    );
    assert_eq!(config.policy.segments, vec!["static"]);
    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert_eq!(config.network.timeout_secs, 5);
    // Unset fields inside a section keep their defaults.
    assert_eq!(config.server.host, "127.0.0.1");
    assert!(config.network.user_agent.starts_with("favcache/"));
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/favcache.yaml"))).is_err());
  }

  #[test]
  fn test_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("favcache.yaml");
    std::fs::write(&path, "cache_version: v7\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.cache_version, "v7");
  }
}
