// Configuration management for the sensegate CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/sensegate/config.json
// - Linux: ~/.config/sensegate/config.json
// - Windows: %APPDATA%\sensegate\config.json

use anyhow::{Context, Result};
use sensegate_core::settings::DEFAULT_DETECTION_INTERVAL_MS;
use sensegate_core::BridgeSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// sled database directory; defaults to the data dir
    pub storage_path: Option<String>,

    /// OS version reported by the simulated device
    pub os_version: u32,

    /// Activity classification interval in milliseconds
    pub detection_interval_ms: u64,

    /// Give up on permission dialogs after this many seconds
    pub permission_request_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: None,
            os_version: 30,
            detection_interval_ms: DEFAULT_DETECTION_INTERVAL_MS,
            permission_request_timeout_secs: None,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("sensegate");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("sensegate");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value in memory; call `save` to keep it
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "storage_path" => {
                self.storage_path = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "os_version" => {
                self.os_version = value.parse().context("Invalid OS version")?;
            }
            "detection_interval_ms" => {
                let interval: u64 = value.parse().context("Invalid number")?;
                if interval == 0 {
                    anyhow::bail!("detection_interval_ms must be greater than 0");
                }
                self.detection_interval_ms = interval;
            }
            "permission_request_timeout_secs" => {
                self.permission_request_timeout_secs = if value.is_empty() || value == "none" {
                    None
                } else {
                    let secs: u64 = value.parse().context("Invalid number")?;
                    if secs == 0 {
                        anyhow::bail!("Use \"none\" to disable the permission timeout");
                    }
                    Some(secs)
                };
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "storage_path" => self.storage_path.clone(),
            "os_version" => Some(self.os_version.to_string()),
            "detection_interval_ms" => Some(self.detection_interval_ms.to_string()),
            "permission_request_timeout_secs" => Some(
                self.permission_request_timeout_secs
                    .map_or_else(|| "none".to_string(), |s| s.to_string()),
            ),
            _ => None,
        }
    }

    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            (
                "storage_path".to_string(),
                self.storage_path
                    .clone()
                    .unwrap_or_else(|| "(auto)".to_string()),
            ),
            ("os_version".to_string(), self.os_version.to_string()),
            (
                "detection_interval_ms".to_string(),
                format!("{}ms", self.detection_interval_ms),
            ),
            (
                "permission_request_timeout_secs".to_string(),
                self.permission_request_timeout_secs
                    .map_or_else(|| "none".to_string(), |s| format!("{}s", s)),
            ),
        ]
    }

    /// Core settings, with the store under `data_dir` unless overridden
    pub fn bridge_settings(&self, data_dir: &Path) -> BridgeSettings {
        let storage_path = self.storage_path.clone().unwrap_or_else(|| {
            data_dir
                .join("store")
                .to_string_lossy()
                .into_owned()
        });
        BridgeSettings {
            storage_path: Some(storage_path),
            detection_interval_ms: self.detection_interval_ms,
            permission_request_timeout_secs: self.permission_request_timeout_secs,
            ..BridgeSettings::default()
        }
    }
}
