//! Bridge configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `$XDG_CONFIG_HOME/printlink/config.toml` (or `~/.config/...`)
//! - Windows: `%APPDATA%/printlink/config.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use printlink_connection::{EndpointSettings, InfoStore, store};

/// Errors from loading or saving the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("no config directory found")]
    NoConfigDir,
}

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Connect to the test endpoint instead of production.
    #[serde(default = "default_true")]
    pub test_endpoint: bool,

    /// Full websocket URL replacing the computed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Directory holding the persisted printer info.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Host proc-stats sampling interval in seconds.
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u32,
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    store::default_data_dir().unwrap_or_else(|| PathBuf::from(".printlink"))
}

fn default_log_level() -> String {
    "info".into()
}

fn default_sample_interval() -> u32 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            test_endpoint: default_true(),
            url: None,
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            sample_interval_secs: default_sample_interval(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or creates a default file there if
    /// none exists.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Connection settings from this config and the persisted credentials.
    pub fn endpoint_settings(&self, store: &InfoStore) -> EndpointSettings {
        EndpointSettings {
            test: self.test_endpoint,
            url_override: self.url.clone(),
            printer_id: store.printer_id(),
            token: store.printer_token(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    store::config_dir()
        .map(|d| d.join("printlink").join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}
