//! Configuration for the remote store client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Environment variable overriding the API base URL.
pub const API_URL_ENV: &str = "CANVAS_API_URL";

/// Configuration for reaching the remote project store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the project store API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Timeout for ordinary request/response calls (ms). Run streams are
    /// exempt.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Connect timeout for every call, streams included (ms).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ClientConfig {
    /// Config pointing at a specific base URL, other settings default.
    pub fn with_api_url(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    /// Load configuration from disk with environment overrides.
    pub fn load() -> ClientResult<Self> {
        Ok(Self::load_persisted()?.with_env_overrides())
    }

    /// Load only what is saved on disk, falling back to defaults.
    pub fn load_persisted() -> ClientResult<Self> {
        match Self::config_file_path() {
            Some(path) if path.exists() => Self::read_from(&path),
            _ => Ok(Self::default()),
        }
    }

    fn read_from(path: &Path) -> ClientResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Apply `CANVAS_API_URL` when set.
    pub fn with_env_overrides(self) -> Self {
        match std::env::var(API_URL_ENV) {
            Ok(api_url) => Self { api_url, ..self },
            Err(_) => self,
        }
    }

    /// Save configuration to disk.
    pub fn save(&self) -> ClientResult<()> {
        if let Some(path) = Self::config_file_path() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string_pretty(self)?;
            std::fs::write(&path, contents)?;
        }
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_file_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "canvas", "canvas-sync")
            .map(|dirs| dirs.config_dir().join("client.json"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get a configuration value by key.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "api_url" => Some(self.api_url.clone()),
            "request_timeout_ms" => Some(self.request_timeout_ms.to_string()),
            "connect_timeout_ms" => Some(self.connect_timeout_ms.to_string()),
            _ => None,
        }
    }

    /// Set a configuration value by key.
    pub fn set(&mut self, key: &str, value: &str) -> ClientResult<()> {
        match key {
            "api_url" => {
                reqwest::Url::parse(value)
                    .map_err(|e| ClientError::Config(format!("Invalid URL {}: {}", value, e)))?;
                self.api_url = value.to_string();
            }
            "request_timeout_ms" => {
                self.request_timeout_ms = parse_millis(value)?;
            }
            "connect_timeout_ms" => {
                self.connect_timeout_ms = parse_millis(value)?;
            }
            _ => {
                return Err(ClientError::Config(format!("Unknown config key: {}", key)));
            }
        }
        Ok(())
    }
}

fn parse_millis(value: &str) -> ClientResult<u64> {
    value
        .parse()
        .map_err(|_| ClientError::Config(format!("Invalid number: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get_roundtrip() {
        let mut config = ClientConfig::with_api_url("http://localhost:8000");
        config.set("api_url", "http://10.0.0.2:9000").unwrap();
        config.set("request_timeout_ms", "2500").unwrap();

        assert_eq!(config.get("api_url").as_deref(), Some("http://10.0.0.2:9000"));
        assert_eq!(config.request_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_default_ignores_environment() {
        std::env::set_var(API_URL_ENV, "http://10.9.9.9:1");
        let config = ClientConfig::default();
        let overridden = config.clone().with_env_overrides();
        std::env::remove_var(API_URL_ENV);

        assert_eq!(config.api_url, "http://localhost:8000");
        assert_eq!(overridden.api_url, "http://10.9.9.9:1");
    }

    #[test]
    fn test_persisted_file_keeps_saved_values() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(&path, r#"{"api_url":"http://10.0.0.5:8000"}"#).unwrap();

        let config = ClientConfig::read_from(&path).unwrap();

        assert_eq!(config.api_url, "http://10.0.0.5:8000");
        assert_eq!(config.request_timeout_ms, 10_000);
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = ClientConfig::with_api_url("http://localhost:8000");
        assert!(config.set("api_url", "not a url").is_err());
        assert!(config.set("request_timeout_ms", "soon").is_err());
        assert!(config.set("colour", "blue").is_err());
        assert_eq!(config.api_url, "http://localhost:8000");
    }
}
