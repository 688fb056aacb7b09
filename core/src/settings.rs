//! Bridge settings
//!
//! Serialized to/from JSON. Every entry point that accepts settings runs
//! `validate` first.

use crate::permission::PermissionPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// How often the OS is asked to classify activity
pub const DEFAULT_DETECTION_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// sled database directory; in-memory store when unset
    pub storage_path: Option<String>,

    /// Activity classification interval in milliseconds
    pub detection_interval_ms: u64,

    /// Give up on permission dialogs after this many seconds.
    /// Unset waits forever.
    pub permission_request_timeout_secs: Option<u64>,

    pub permission_policy: PermissionPolicy,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            storage_path: None,
            detection_interval_ms: DEFAULT_DETECTION_INTERVAL_MS,
            permission_request_timeout_secs: None,
            permission_policy: PermissionPolicy::default(),
        }
    }
}

impl BridgeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings backed by a sled database at `path`
    pub fn persistent(path: impl Into<String>) -> Self {
        Self {
            storage_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.detection_interval_ms == 0 {
            return Err(SettingsError::ConfigError(
                "detection_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.permission_request_timeout_secs == Some(0) {
            return Err(SettingsError::ConfigError(
                "permission_request_timeout_secs cannot be 0; leave it unset to wait forever"
                    .to_string(),
            ));
        }

        if matches!(&self.storage_path, Some(path) if path.trim().is_empty()) {
            return Err(SettingsError::ConfigError(
                "storage_path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms)
    }

    pub fn permission_request_timeout(&self) -> Option<Duration> {
        self.permission_request_timeout_secs.map(Duration::from_secs)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_string(&content)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SettingsError> {
        let json = self.to_json_string()?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn to_json_string(&self) -> Result<String, SettingsError> {
        self.validate()?;
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_string(json: &str) -> Result<Self, SettingsError> {
        let settings: BridgeSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }
}
