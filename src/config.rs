//! Configuration for hostel-sync

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::ValidationRules;
use crate::outbox::DEFAULT_FLUSH_INTERVAL;
use crate::sync::DEFAULT_TIMEOUT;

/// Client and receiver configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the local SQLite file holding collections and queues
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL that relative endpoints are resolved against
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Time allowed for one delivery attempt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Period between retries of pending records
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Require facilities, food and cleanliness ratings on every entry
    #[serde(default)]
    pub require_all_ratings: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path to the SQLite file holding received records
    #[serde(default = "default_server_db")]
    pub database: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("hostel-sync.sqlite")
}

fn default_base_url() -> String {
    "http://127.0.0.1:3030".to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_flush_interval_secs() -> u64 {
    DEFAULT_FLUSH_INTERVAL.as_secs()
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3030
}

fn default_server_db() -> PathBuf {
    PathBuf::from("hostel-sync-server.sqlite")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            database: default_server_db(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    /// Turn an endpoint (absolute URL or path) into an absolute URL
    pub fn resolve(&self, endpoint: &str) -> Result<String> {
        if let Ok(url) = Url::parse(endpoint) {
            return Ok(url.to_string());
        }

        let base = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid remote base_url '{}'", self.base_url))?;
        let url = base
            .join(endpoint)
            .with_context(|| format!("Invalid endpoint '{endpoint}'"))?;
        Ok(url.to_string())
    }
}

impl FeedbackConfig {
    pub fn rules(&self) -> ValidationRules {
        ValidationRules {
            require_all_ratings: self.require_all_ratings,
        }
    }
}

impl Config {
    /// Default config path
    pub fn default_path() -> Result<PathBuf> {
        // Check environment variable first
        if let Ok(env_path) = std::env::var("HOSTEL_SYNC_CONFIG") {
            return Ok(PathBuf::from(env_path));
        }

        // Check for config in current directory
        let local = PathBuf::from("config.toml");
        if local.exists() {
            return Ok(local);
        }

        // Then check XDG config
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("hostel-sync");

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from default path
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save config to specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let with_comments = format!(
            "# hostel-sync configuration\n\n\
             {}\n\n\
             # Endpoints can be overridden per collection with: hostel-sync endpoint set\n",
            content
        );

        std::fs::write(path, with_comments).context("Failed to write config file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.remote.timeout(), Duration::from_millis(8000));
        assert_eq!(cfg.remote.flush_interval(), Duration::from_secs(30));
        assert_eq!(cfg.server.port, 3030);
        assert!(!cfg.feedback.require_all_ratings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [remote]
            timeout_ms = 2500

            [feedback]
            require_all_ratings = true
            "#,
        )
        .unwrap();

        assert_eq!(cfg.remote.timeout_ms, 2500);
        assert_eq!(cfg.remote.base_url, "http://127.0.0.1:3030");
        assert!(cfg.feedback.rules().require_all_ratings);
        assert_eq!(cfg.storage, StorageConfig::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("config.toml");

        let mut cfg = Config::default();
        cfg.remote.base_url = "https://portal.example.edu".to_string();
        cfg.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_resolve_endpoints() {
        let remote = RemoteConfig {
            base_url: "https://portal.example.edu/hostel/".to_string(),
            ..RemoteConfig::default()
        };

        assert_eq!(
            remote.resolve("/api/complaints").unwrap(),
            "https://portal.example.edu/api/complaints"
        );
        assert_eq!(
            remote.resolve("api/feedback").unwrap(),
            "https://portal.example.edu/hostel/api/feedback"
        );
        assert_eq!(
            remote.resolve("http://10.0.0.2:9000/intake").unwrap(),
            "http://10.0.0.2:9000/intake"
        );

        let broken = RemoteConfig {
            base_url: "not a url".to_string(),
            ..RemoteConfig::default()
        };
        assert!(broken.resolve("/api/complaints").is_err());
    }
}
