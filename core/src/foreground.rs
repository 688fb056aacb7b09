//! Long-running background service control
//!
//! Keeps the host's sensing service alive while the app is not in front.
//! Notification content is passed through to the host untouched.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// First OS version that needs the foreground start variant
pub const FOREGROUND_SERVICE_MIN_OS_VERSION: u32 = 26;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Platform bridge error: {0}")]
    PlatformBridgeError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationOptions {
    pub notification_channel_id: String,
    pub notification_channel_name: String,
    pub notification_content_title: String,
    pub notification_content_text: String,
}

impl Default for NotificationOptions {
    fn default() -> Self {
        Self {
            notification_channel_id: "sensegate".to_string(),
            notification_channel_name: "sensegate".to_string(),
            notification_content_title: "SenseGate Service".to_string(),
            notification_content_text: "Tap to return to the app using the service.".to_string(),
        }
    }
}

impl NotificationOptions {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.notification_channel_id.trim().is_empty() {
            return Err(ServiceError::ConfigError(
                "notificationChannelId cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Host side of the background service
pub trait ForegroundServiceHost: Send + Sync {
    fn start_service(
        &self,
        options: &NotificationOptions,
        as_foreground: bool,
    ) -> Result<(), String>;
    fn stop_service(&self) -> Result<(), String>;
    /// Send the app task to the background; false if the host refused
    fn move_task_to_back(&self) -> bool;
}

pub struct ForegroundServiceManager {
    host: Arc<dyn ForegroundServiceHost>,
    os_version: u32,
    running: RwLock<bool>,
}

impl ForegroundServiceManager {
    pub fn new(host: Arc<dyn ForegroundServiceHost>, os_version: u32) -> Self {
        Self {
            host,
            os_version,
            running: RwLock::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    pub fn start_service(&self, options: &NotificationOptions) -> Result<(), ServiceError> {
        options.validate()?;

        let as_foreground = self.os_version >= FOREGROUND_SERVICE_MIN_OS_VERSION;
        self.host
            .start_service(options, as_foreground)
            .map_err(ServiceError::PlatformBridgeError)?;

        *self.running.write() = true;
        tracing::info!(
            "Foreground service started (channel {}, foreground start: {})",
            options.notification_channel_id,
            as_foreground
        );
        Ok(())
    }

    pub fn stop_service(&self) -> Result<(), ServiceError> {
        self.host
            .stop_service()
            .map_err(ServiceError::PlatformBridgeError)?;

        *self.running.write() = false;
        tracing::info!("Foreground service stopped");
        Ok(())
    }

    pub fn minimize_app(&self) -> bool {
        let moved = self.host.move_task_to_back();
        if !moved {
            tracing::warn!("Host refused to move task to back");
        }
        moved
    }
}
