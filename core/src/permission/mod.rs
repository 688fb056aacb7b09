//! Runtime permission model
//!
//! Checks and requests OS-gated capabilities, reconciling the asynchronous
//! OS dialog outcome with the results persisted in [`PermissionStore`].
//!
//! [`PermissionStore`]: crate::store::PermissionStore

pub mod manager;
pub mod policy;

pub use manager::{PendingRequest, PermissionManager, RequestOutcome};
pub use policy::PermissionPolicy;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const ACTIVITY_RECOGNITION: &str = "android.permission.ACTIVITY_RECOGNITION";
pub const ACCESS_FINE_LOCATION: &str = "android.permission.ACCESS_FINE_LOCATION";
pub const ACCESS_BACKGROUND_LOCATION: &str = "android.permission.ACCESS_BACKGROUND_LOCATION";

/// Request code used for the activity recognition permission dialog
pub const ACTIVITY_RECOGNITION_REQUEST_CODE: i32 = 200;

/// Tri-state outcome of a permission check or request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionResult {
    Granted,
    Denied,
    /// The OS will no longer show a request dialog
    PermanentlyDenied,
}

impl PermissionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionResult::Granted => "GRANTED",
            PermissionResult::Denied => "DENIED",
            PermissionResult::PermanentlyDenied => "PERMANENTLY_DENIED",
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionResult::Granted)
    }
}

impl std::fmt::Display for PermissionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GRANTED" => Ok(PermissionResult::Granted),
            "DENIED" => Ok(PermissionResult::Denied),
            "PERMANENTLY_DENIED" => Ok(PermissionResult::PermanentlyDenied),
            other => Err(format!("unknown permission result: {}", other)),
        }
    }
}

/// Per-permission answer delivered by the OS dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantResult {
    Granted,
    Denied,
}

/// OS-side permission facilities, provided by the foreground context
#[cfg_attr(test, mockall::automock)]
pub trait PermissionHost: Send + Sync {
    /// Platform API level
    fn os_version(&self) -> u32;
    fn is_granted(&self, permission: &str) -> bool;
    /// Whether the OS would show a rationale before asking again
    fn should_show_rationale(&self, permission: &str) -> bool;
    /// Show the OS dialog. The outcome arrives later through
    /// [`PermissionManager::on_request_permissions_result`].
    fn launch_request_dialog(&self, permissions: &[String], request_code: i32)
        -> Result<(), String>;
}
