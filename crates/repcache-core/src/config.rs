//! Application configuration management.
//!
//! Configuration is stored at `<config_dir>/repcache/config.json`. Any field
//! can be overridden from the environment:
//!
//! - `REPCACHE_API_URL`
//! - `REPCACHE_PUSH_URL`
//! - `REPCACHE_DATA_DIR`

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Application name used for config/data directory paths
const APP_NAME: &str = "repcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_URL: &str = "http://localhost:3000/api";
const DEFAULT_PUSH_URL: &str = "ws://localhost:3000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Reconnect behaviour of the push channel: a fixed delay between attempts
/// and a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 3000,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub push_url: String,
    /// Where persisted state lives; defaults to `<data_dir>/repcache`.
    pub data_dir: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub reconnect: ReconnectPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            push_url: DEFAULT_PUSH_URL.to_string(),
            data_dir: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("REPCACHE_API_URL").filter(|v| !v.is_empty()) {
            self.api_base_url = url;
        }
        if let Some(url) = lookup("REPCACHE_PUSH_URL").filter(|v| !v.is_empty()) {
            self.push_url = url;
        }
        if let Some(dir) = lookup("REPCACHE_DATA_DIR").filter(|v| !v.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir =
            dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Directory for rolling log files
    pub fn log_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"apiBaseUrl": "ignored", "reconnect": {"maxAttempts": 2}}"#)
                .unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_URL);
        assert_eq!(config.reconnect.max_attempts, 5);

        let config: Config = serde_json::from_str(
            r#"{"api_base_url": "https://coach.example.com/api", "reconnect": {"max_attempts": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.api_base_url, "https://coach.example.com/api");
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.delay_ms, 3000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("REPCACHE_PUSH_URL", "wss://push.example.com"),
            ("REPCACHE_DATA_DIR", "/tmp/repcache"),
            ("REPCACHE_API_URL", ""),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.api_base_url, DEFAULT_API_URL);
        assert_eq!(config.push_url, "wss://push.example.com");
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/repcache"));
        assert_eq!(config.log_dir().unwrap(), PathBuf::from("/tmp/repcache/logs"));
    }
}
