//! Configuration management for the gem scout.
//!
//! Loads the TOML configuration, validates it, and converts it into the
//! engine's service, location and coordinator settings.

use gem_engine::{CoordinatorConfig, HttpServiceConfig, WatchOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

fn default_base_url() -> String {
    "http://127.0.0.1:5000/api".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_unlock_timeout() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

fn default_location_timeout() -> u64 {
    10_000
}

fn default_replay_interval() -> u64 {
    1_000
}

fn default_store_path() -> String {
    "gem_scout_store.json".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub location: LocationSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Where the gem service lives and how patient to be with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Base URL the endpoint paths are appended to
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Upper bound on one unlock attempt in seconds
    #[serde(default = "default_unlock_timeout")]
    pub unlock_timeout_secs: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_token: None,
            request_timeout_secs: default_request_timeout(),
            unlock_timeout_secs: default_unlock_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSettings {
    #[serde(default = "default_true")]
    pub high_accuracy: bool,
    /// Oldest acceptable cached fix in milliseconds (0 accepts only fresh fixes)
    #[serde(default)]
    pub max_cached_age_ms: u64,
    /// Wait for each fix in milliseconds (0 waits forever)
    #[serde(default = "default_location_timeout")]
    pub timeout_ms: u64,
    /// JSON track to replay; no track means no location source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_file: Option<String>,
    #[serde(default = "default_replay_interval")]
    pub replay_interval_ms: u64,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            max_cached_age_ms: 0,
            timeout_ms: default_location_timeout(),
            track_file: None,
            replay_interval_ms: default_replay_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Local key-value store holding the participant id and journal
    #[serde(default = "default_store_path")]
    pub store_path: String,
    /// Re-fetch an empty catalog this often in seconds (0 disables)
    #[serde(default)]
    pub catalog_retry_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            catalog_retry_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration there and
    /// returns it.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn to_service_config(&self) -> HttpServiceConfig {
        HttpServiceConfig {
            base_url: self.service.base_url.clone(),
            auth_token: self.service.auth_token.clone(),
            request_timeout: Duration::from_secs(self.service.request_timeout_secs),
        }
    }

    pub fn to_watch_options(&self) -> WatchOptions {
        WatchOptions {
            high_accuracy: self.location.high_accuracy,
            max_cached_age: Duration::from_millis(self.location.max_cached_age_ms),
            timeout: Duration::from_millis(self.location.timeout_ms),
        }
    }

    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            unlock_timeout: Duration::from_secs(self.service.unlock_timeout_secs),
            ..CoordinatorConfig::default()
        }
    }

    pub fn track_path(&self) -> Option<PathBuf> {
        self.location.track_file.as_ref().map(PathBuf::from)
    }

    pub fn replay_interval(&self) -> Duration {
        Duration::from_millis(self.location.replay_interval_ms)
    }

    pub fn catalog_retry(&self) -> Duration {
        Duration::from_secs(self.session.catalog_retry_secs)
    }

    /// Checks the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        let url = self.service.base_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!("Invalid service base URL: {url}"));
        }

        if self.service.request_timeout_secs == 0 {
            return Err("Request timeout must be greater than zero".to_string());
        }
        if self.service.unlock_timeout_secs == 0 {
            return Err("Unlock timeout must be greater than zero".to_string());
        }
        if self.location.track_file.is_some() {
            if self.location.replay_interval_ms == 0 {
                return Err("Replay interval must be greater than zero".to_string());
            }
            // Each replayed point must arrive before the per-fix timeout expires
            let timeout = self.location.timeout_ms;
            if timeout != 0 && self.location.replay_interval_ms >= timeout {
                return Err(format!(
                    "Replay interval ({} ms) must be shorter than the location timeout ({} ms), or set timeout_ms = 0",
                    self.location.replay_interval_ms, timeout
                ));
            }
        }

        if self.session.store_path.is_empty() {
            return Err("Session store path cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
