//! # Configuration Management Module
//!
//! Persistent application settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `[connection]`: transport preference, scan duration, simulated-fallback delay
//! - `[acquisition]`: reading interval
//! - `[remote]`: optional identity service (absent means offline-only mode)
//! - `[location]`: optional fixed coordinates for headless deployments
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/surftrace/config.toml
//! - Linux: ~/.config/surftrace/config.toml
//! - Windows: %APPDATA%\surftrace\config.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Overrides the platform data directory when set.
    pub data_dir: Option<PathBuf>,
    pub connection: ConnectionSettings,
    pub acquisition: AcquisitionSettings,
    /// Identity service; `None` disables all remote sync.
    pub remote: Option<RemoteConfig>,
    /// Fixed geolocation; `None` records sessions without a location.
    pub location: Option<LocationSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub transport: Transport,
    /// How long to scan for candidate devices before giving up on BLE.
    pub scan_seconds: u64,
    /// Delay before a simulated device attaches when BLE is unavailable.
    pub fallback_delay_ms: u64,
}

/// Transport preference. `Auto` tries BLE first and falls back to the
/// simulated device; `Simulated` skips the radio entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Auto,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Target spacing between readings.
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    pub user_id: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocationSettings {
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            connection: ConnectionSettings::default(),
            acquisition: AcquisitionSettings::default(),
            remote: None,
            location: None,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self { transport: Transport::Auto, scan_seconds: 5, fallback_delay_ms: 1000 }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

impl Config {
    /// Get the path to the config file
    fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("surftrace").join("config.toml")
    }

    /// Load config from file, or create default if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();

        match fs::read_to_string(&path) {
            Ok(contents) => {
                let config = toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, create default
                let config = Self::default();
                config.save()?; // Save default config
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(&path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    /// Directory for the local store and downloaded device files.
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("surftrace"),
        }
    }
}
