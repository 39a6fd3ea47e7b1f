use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::resolve_url;

/// Name of the cache populated by `install`.
pub const CACHE_NAME: &str = "ai-chat-pwa-v1";

/// Assets pre-populated by `install`, in insertion order.
pub const ASSETS: &[&str] = &[
  "/",
  "/index.html",
  "https://cdnjs.cloudflare.com/ajax/libs/tailwindcss/2.2.19/tailwind.min.css",
  "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.3.0/css/all.min.css",
  "https://cdnjs.cloudflare.com/ajax/libs/marked/2.0.3/marked.min.js",
];

/// Origin relative asset paths resolve against.
pub const DEFAULT_ORIGIN: &str = "http://localhost:5000";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  pub cache_name: String,
  pub origin: String,
  pub assets: Vec<String>,
  /// SQLite database path (defaults to $XDG_DATA_HOME/precache/cache.db)
  pub database: Option<PathBuf>,
  /// Network timeout per request, in seconds
  pub timeout_secs: u64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      cache_name: CACHE_NAME.to_string(),
      origin: DEFAULT_ORIGIN.to_string(),
      assets: ASSETS.iter().map(|s| s.to_string()).collect(),
      database: None,
      timeout_secs: DEFAULT_TIMEOUT_SECS,
    }
  }
}

impl Config {
  /// Load configuration.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./precache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/precache/config.yaml
  ///
  /// With no file found the compiled-in defaults apply.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    let config = config.with_origin_override(std::env::var("PRECACHE_ORIGIN").ok());
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("precache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("precache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  fn with_origin_override(self, origin: Option<String>) -> Self {
    match origin {
      Some(origin) if !origin.trim().is_empty() => Self { origin, ..self },
      _ => self,
    }
  }

  fn validate(&self) -> Result<()> {
    if self.cache_name.trim().is_empty() {
      return Err(eyre!("cache_name must not be empty"));
    }
    if self.assets.is_empty() {
      return Err(eyre!("assets must list at least one URL"));
    }
    if self.timeout_secs == 0 {
      return Err(eyre!("timeout_secs must be greater than zero"));
    }
    self.asset_urls()?;
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Asset list with relative entries resolved against the origin.
  pub fn asset_urls(&self) -> Result<Vec<Url>> {
    let origin = self.origin_url()?;
    self
      .assets
      .iter()
      .map(|raw| resolve_url(&origin, raw))
      .collect()
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
  }

  #[test]
  fn test_defaults_match_compiled_constants() {
    let config = Config::default();
    assert_eq!(config.cache_name, "ai-chat-pwa-v1");
    assert_eq!(config.assets.len(), 5);
    config.validate().unwrap();

    let urls = config.asset_urls().unwrap();
    assert_eq!(urls[0].as_str(), "http://localhost:5000/");
    assert_eq!(urls[1].as_str(), "http://localhost:5000/index.html");
    assert_eq!(urls[4].host_str(), Some("cdnjs.cloudflare.com"));
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let file = write_config("cache_name: site-v2\norigin: https://example.org\n");
    let config = Config::load(Some(file.path())).unwrap();

    assert_eq!(config.cache_name, "site-v2");
    assert_eq!(config.assets.len(), ASSETS.len());
    assert_eq!(config.timeout(), Duration::from_secs(30));
    if std::env::var("PRECACHE_ORIGIN").is_err() {
      assert_eq!(
        config.asset_urls().unwrap()[1].as_str(),
        "https://example.org/index.html"
      );
    }
  }

  #[test]
  fn test_missing_explicit_file_is_an_error() {
    let result = Config::load(Some(Path::new("/nonexistent/precache.yaml")));
    assert!(result.is_err());
  }

  #[test]
  fn test_validation() {
    let empty_assets = Config {
      assets: Vec::new(),
      ..Config::default()
    };
    assert!(empty_assets.validate().is_err());

    let empty_name = Config {
      cache_name: " ".into(),
      ..Config::default()
    };
    assert!(empty_name.validate().is_err());

    let bad_origin = Config {
      origin: "not a url".into(),
      ..Config::default()
    };
    assert!(bad_origin.validate().is_err());

    let zero_timeout = Config {
      timeout_secs: 0,
      ..Config::default()
    };
    assert!(zero_timeout.validate().is_err());
  }

  #[test]
  fn test_origin_override() {
    let config = Config::default().with_origin_override(Some("https://cdn.test".into()));
    assert_eq!(config.origin, "https://cdn.test");

    let config = Config::default().with_origin_override(Some("".into()));
    assert_eq!(config.origin, DEFAULT_ORIGIN);

    let config = Config::default().with_origin_override(None);
    assert_eq!(config.origin, DEFAULT_ORIGIN);
  }
}
