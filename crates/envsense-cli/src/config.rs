//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use envsense_core::{ConnectionConfig, PipelineConfig, ScanOptions};

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default device address
    #[serde(default)]
    pub device: Option<String>,

    /// Scan timeout in seconds
    #[serde(default)]
    pub scan_timeout_secs: Option<u64>,

    /// Link establishment timeout in seconds
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    /// Minimum spacing between published readings, in milliseconds
    #[serde(default)]
    pub rate_limit_ms: Option<u64>,

    /// Where the last temperature is persisted
    #[serde(default)]
    pub preferences_path: Option<PathBuf>,
}

impl Config {
    /// Directory holding the config and preference files
    pub fn dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("envsense")
    }

    /// Default config file path
    pub fn path() -> PathBuf {
        Self::dir().join("config.toml")
    }

    /// Load config from `path`. A missing or unreadable file yields defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Failed to parse config: {}", e);
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to read config: {}", e);
            }
        }
        Self::default()
    }

    /// Save config to `path`
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

    /// Path of the preference file
    pub fn preferences_path(&self) -> PathBuf {
        self.preferences_path
            .clone()
            .unwrap_or_else(|| Self::dir().join("preferences.json"))
    }

    /// Scan options, with `timeout` overriding the configured value
    pub fn scan_options(&self, timeout: Option<u64>) -> ScanOptions {
        let options = ScanOptions::default();
        match timeout.or(self.scan_timeout_secs) {
            Some(secs) => options.timeout_secs(secs),
            None => options,
        }
    }

    /// Connection manager configuration
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::default();
        if let Some(secs) = self.connect_timeout_secs {
            config = config.connection_timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = self.rate_limit_ms {
            config = config.pipeline(PipelineConfig::default().window(Duration::from_millis(ms)));
        }
        config
    }
}

/// Resolve the device address: explicit argument first, then config
pub fn resolve_device(device: Option<String>, config: &Config) -> Option<String> {
    device.or_else(|| config.device.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            device: Some("AA:BB:CC:DD:EE:FF".to_string()),
            scan_timeout_secs: Some(8),
            rate_limit_ms: Some(1000),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn test_unparsable_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "scan_timeout_secs = \"soon\"").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }

    #[test]
    fn test_scan_timeout_precedence() {
        let config = Config {
            scan_timeout_secs: Some(8),
            ..Default::default()
        };
        assert_eq!(config.scan_options(Some(2)).timeout, Duration::from_secs(2));
        assert_eq!(config.scan_options(None).timeout, Duration::from_secs(8));
        assert_eq!(
            Config::default().scan_options(None).timeout,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_connection_config_overrides() {
        let config = Config {
            connect_timeout_secs: Some(30),
            rate_limit_ms: Some(250),
            ..Default::default()
        };
        let connection = config.connection_config();
        assert_eq!(connection.connection_timeout, Duration::from_secs(30));
        assert_eq!(connection.pipeline.window, Duration::from_millis(250));
        assert!(connection.validate().is_ok());
    }

    #[test]
    fn test_resolve_device_prefers_arg() {
        let config = Config {
            device: Some("config-device".to_string()),
            ..Default::default()
        };
        assert_eq!(
            resolve_device(Some("arg-device".to_string()), &config),
            Some("arg-device".to_string())
        );
        assert_eq!(resolve_device(None, &config), Some("config-device".to_string()));
        assert_eq!(resolve_device(None, &Config::default()), None);
    }
}
