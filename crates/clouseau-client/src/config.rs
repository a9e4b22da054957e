//! Client configuration.

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_session_channel")]
    pub session_channel: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
    #[serde(default = "default_ping_on_connect")]
    pub ping_on_connect: bool,
}

fn default_url() -> String {
    "ws://127.0.0.1:3000/websocket".to_string()
}

fn default_api_base() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_session_channel() -> String {
    "term".to_string()
}

fn default_request_timeout_ms() -> u64 {
    3000
}

fn default_history_file() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clouseau")
        .join("history.json")
}

fn default_ping_on_connect() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: default_url(),
            api_base: default_api_base(),
            session_channel: default_session_channel(),
            request_timeout_ms: default_request_timeout_ms(),
            history_file: default_history_file(),
            ping_on_connect: default_ping_on_connect(),
        }
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config from config/default.toml or fall back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from("config/default.toml");
        if config_path.exists() {
            return Self::load_from(&config_path);
        }
        Ok(Config::default())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.url, "ws://127.0.0.1:3000/websocket");
        assert_eq!(config.session_channel, "term");
        assert_eq!(config.request_timeout(), Duration::from_millis(3000));
        assert!(config.ping_on_connect);
        assert!(config.history_file.ends_with("clouseau/history.json"));
    }

    #[test]
    fn test_load_from_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(
            &path,
            "url = \"ws://box:8000/websocket\"\nrequest_timeout_ms = 500\nping_on_connect = false\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.url, "ws://box:8000/websocket");
        assert_eq!(config.request_timeout_ms, 500);
        assert!(!config.ping_on_connect);
        assert_eq!(config.api_base, "http://127.0.0.1:3000");
    }

    #[test]
    fn test_load_from_rejects_bad_types() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(&path, "request_timeout_ms = \"soon\"\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
