//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use hrlink_core::{BluetoothAddress, CountdownOptions, MonitorConfig};
use serde::{Deserialize, Serialize};

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Last successfully connected sensor (auto-updated)
    #[serde(default)]
    pub last_device: Option<String>,

    /// Name of the last connected sensor (for display)
    #[serde(default)]
    pub last_device_name: Option<String>,

    /// Reconnect to the last sensor when it is seen again
    #[serde(default = "default_true")]
    pub auto_connect: bool,

    /// Connection timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Length of the auto-connect countdown in seconds
    #[serde(default)]
    pub countdown_seconds: Option<u32>,

    /// Default output format
    #[serde(default)]
    pub format: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            last_device: None,
            last_device_name: None,
            auto_connect: true,
            timeout: None,
            countdown_seconds: None,
            format: None,
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hrlink")
            .join("config.toml")
    }

    /// Load config from the default path, or return default if not found
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`, or return default if missing or invalid
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("Warning: Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    eprintln!("Warning: Failed to read config: {}", e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// The remembered sensor, if the stored address is valid.
    pub fn last_address(&self) -> Option<BluetoothAddress> {
        self.last_device.as_deref().and_then(|s| s.parse().ok())
    }

    /// Remember a sensor as the last connected one.
    pub fn remember_device(&mut self, address: BluetoothAddress, name: Option<&str>) {
        self.last_device = Some(address.to_string());
        self.last_device_name = name.map(|n| n.to_string());
    }

    /// Forget the last connected sensor. Returns `false` if none was stored.
    pub fn forget_device(&mut self) -> bool {
        self.last_device_name = None;
        self.last_device.take().is_some()
    }

    /// Build the monitor configuration from these settings.
    pub fn monitor_config(&self) -> MonitorConfig {
        let mut config = MonitorConfig::default()
            .auto_connect(self.auto_connect)
            .last_connected(self.last_address());
        if let Some(secs) = self.timeout {
            config = config.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(steps) = self.countdown_seconds {
            config = config.countdown(CountdownOptions::new(steps, Duration::from_secs(1)));
        }
        config
    }
}

/// Update the last connected sensor in config.
/// This is called after a successful connection.
pub fn update_last_device(address: BluetoothAddress, name: Option<&str>) -> Result<()> {
    let mut config = Config::load();
    config.remember_device(address, name);
    config.save()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> BluetoothAddress {
        "C0:FF:EE:00:00:01".parse().unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.auto_connect);
        assert!(config.last_address().is_none());

        let monitor = config.monitor_config();
        assert!(monitor.auto_connect);
        assert!(monitor.last_connected.is_none());
        assert!(monitor.validate().is_ok());
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("missing.toml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "auto_connect = \"maybe\"").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config {
            timeout: Some(20),
            format: Some("json".to_string()),
            ..Default::default()
        };
        config.remember_device(address(), Some("Polar H10"));
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path);
        assert_eq!(loaded, config);
        assert_eq!(loaded.last_device.as_deref(), Some("C0:FF:EE:00:00:01"));
        assert_eq!(loaded.last_device_name.as_deref(), Some("Polar H10"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "last_device = \"c0-ff-ee-00-00-01\"\n").unwrap();

        let config = Config::load_from(&path);
        assert!(config.auto_connect);
        assert_eq!(config.last_address(), Some(address()));
    }

    #[test]
    fn test_forget_device() {
        let mut config = Config::default();
        assert!(!config.forget_device());

        config.remember_device(address(), None);
        assert!(config.forget_device());
        assert!(config.last_device.is_none());
    }

    #[test]
    fn test_invalid_stored_address_is_ignored() {
        let config = Config {
            last_device: Some("not-an-address".to_string()),
            ..Default::default()
        };
        assert!(config.last_address().is_none());
        assert!(config.monitor_config().last_connected.is_none());
    }

    #[test]
    fn test_monitor_config_overrides() {
        let mut config = Config {
            auto_connect: false,
            timeout: Some(30),
            countdown_seconds: Some(5),
            ..Default::default()
        };
        config.remember_device(address(), None);

        let monitor = config.monitor_config();
        assert!(!monitor.auto_connect);
        assert_eq!(monitor.connect_timeout, Duration::from_secs(30));
        assert_eq!(monitor.countdown.steps, 5);
        assert_eq!(monitor.last_connected, Some(address()));
    }
}
