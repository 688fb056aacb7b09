// SenseGate Core: permission-gated sensing bridge
//
// Activity classification and location availability for a host app, gated
// by runtime permissions, with a background producer that hands results to
// the foreground through a persisted mailbox.

pub mod activity;
pub mod channel;
pub mod foreground;
pub mod location;
pub mod mailbox;
pub mod permission;
pub mod settings;
pub mod store;
pub mod worker;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

pub use activity::{
    ActivityConfidence, ActivityData, ActivityRecognitionHost, ActivityRecognitionWorker,
    ActivitySessionManager, ActivityType, AckCallback, RawActivitySample, SessionCallbacks,
    SessionState,
};
pub use foreground::{
    ForegroundServiceHost, ForegroundServiceManager, NotificationOptions, ServiceError,
};
pub use location::{
    LocationProvider, LocationProviderHost, LocationProviderStatusWatcher,
    LocationSettingsStates, LocationStatusWorker,
};
pub use mailbox::{Mailbox, MailboxValue};
pub use permission::{
    GrantResult, PendingRequest, PermissionHost, PermissionManager, PermissionPolicy,
    PermissionResult, RequestOutcome,
};
pub use settings::{BridgeSettings, SettingsError};
pub use store::{MemoryStorage, PermissionStore, SledStorage, StorageBackend, StoreError};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Failure kinds reported across the boundary surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No foreground context is attached
    ActivityNotRegistered,
    ActivityDataEncodingFailed,
    ActivityUpdatesRequestFailed,
    ActivityUpdatesRemoveFailed,
    PermissionRequestCancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ActivityNotRegistered => "ACTIVITY_NOT_REGISTERED",
            ErrorCode::ActivityDataEncodingFailed => "ACTIVITY_DATA_ENCODING_FAILED",
            ErrorCode::ActivityUpdatesRequestFailed => "ACTIVITY_UPDATES_REQUEST_FAILED",
            ErrorCode::ActivityUpdatesRemoveFailed => "ACTIVITY_UPDATES_REMOVE_FAILED",
            ErrorCode::PermissionRequestCancelled => "PERMISSION_REQUEST_CANCELLED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVITY_NOT_REGISTERED" => Ok(ErrorCode::ActivityNotRegistered),
            "ACTIVITY_DATA_ENCODING_FAILED" => Ok(ErrorCode::ActivityDataEncodingFailed),
            "ACTIVITY_UPDATES_REQUEST_FAILED" => Ok(ErrorCode::ActivityUpdatesRequestFailed),
            "ACTIVITY_UPDATES_REMOVE_FAILED" => Ok(ErrorCode::ActivityUpdatesRemoveFailed),
            "PERMISSION_REQUEST_CANCELLED" => Ok(ErrorCode::PermissionRequestCancelled),
            other => Err(format!("unknown error code: {}", other)),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("No foreground context attached")]
    NotRegistered,
    #[error("Permission not granted: {0}")]
    PermissionNotGranted(PermissionResult),
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("Platform error: {0}")]
    Platform(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Closest boundary error code
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::NotRegistered => ErrorCode::ActivityNotRegistered,
            CoreError::Storage(StoreError::Serialization(_)) => {
                ErrorCode::ActivityDataEncodingFailed
            }
            CoreError::PermissionNotGranted(_)
            | CoreError::Storage(_)
            | CoreError::Platform(_)
            | CoreError::Config(_) => ErrorCode::ActivityUpdatesRequestFailed,
        }
    }
}

impl From<SettingsError> for CoreError {
    fn from(err: SettingsError) -> Self {
        CoreError::Config(err.to_string())
    }
}

impl From<ServiceError> for CoreError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::ConfigError(msg) => CoreError::Config(msg),
            ServiceError::PlatformBridgeError(msg) => CoreError::Platform(msg),
        }
    }
}

// ============================================================================
// LOGGING
// ============================================================================

/// Install the default fmt subscriber. Safe to call more than once.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

// ============================================================================
// PLATFORM HANDLES
// ============================================================================

/// Host facilities available while a foreground context is attached
#[derive(Clone)]
pub struct PlatformHandles {
    pub permission: Arc<dyn PermissionHost>,
    pub activity: Arc<dyn ActivityRecognitionHost>,
    pub location: Arc<dyn LocationProviderHost>,
    pub foreground: Arc<dyn ForegroundServiceHost>,
}

impl PlatformHandles {
    /// Handles backed by one object implementing every host trait
    pub fn from_bridge<T>(bridge: Arc<T>) -> Self
    where
        T: PermissionHost
            + ActivityRecognitionHost
            + LocationProviderHost
            + ForegroundServiceHost
            + 'static,
    {
        Self {
            permission: bridge.clone(),
            activity: bridge.clone(),
            location: bridge.clone(),
            foreground: bridge,
        }
    }
}

struct ForegroundContext {
    location_host: Arc<dyn LocationProviderHost>,
    permissions: PermissionManager,
    activity: ActivitySessionManager,
    location_worker: Arc<LocationStatusWorker>,
    location_watcher: LocationProviderStatusWatcher,
    foreground: ForegroundServiceManager,
}

impl ForegroundContext {
    fn shutdown(&self) {
        self.permissions.cancel_in_flight();
        self.activity.stop_service(SessionCallbacks::silent());
        self.location_watcher.stop();
    }
}

// ============================================================================
// SENSING CORE
// ============================================================================

pub struct SensingCore {
    settings: BridgeSettings,
    backend: Arc<dyn StorageBackend>,
    context: RwLock<Option<Arc<ForegroundContext>>>,
}

impl SensingCore {
    /// Open the store named by `settings`. A store that cannot be opened is
    /// replaced by an in-memory one.
    pub fn new(settings: BridgeSettings) -> Result<Self, CoreError> {
        init_logging();
        settings.validate()?;

        let backend: Arc<dyn StorageBackend> = match &settings.storage_path {
            Some(path) => match SledStorage::new(path) {
                Ok(storage) => {
                    tracing::info!("Opened sensing store at {}", path);
                    Arc::new(storage)
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to open store at {}: {}. Falling back to memory",
                        path,
                        e
                    );
                    Arc::new(MemoryStorage::new())
                }
            },
            None => Arc::new(MemoryStorage::new()),
        };

        Ok(Self {
            settings,
            backend,
            context: RwLock::new(None),
        })
    }

    pub fn with_backend(
        settings: BridgeSettings,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self, CoreError> {
        settings.validate()?;
        Ok(Self {
            settings,
            backend,
            context: RwLock::new(None),
        })
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        self.backend.clone()
    }

    /// Background producer for activity results. Needs no foreground context.
    pub fn activity_worker(&self) -> ActivityRecognitionWorker {
        ActivityRecognitionWorker::new(self.backend.clone())
    }

    // ------------------------------------------------------------------------
    // Foreground context
    // ------------------------------------------------------------------------

    /// Attach a foreground context, replacing any previous one
    pub fn attach(&self, handles: PlatformHandles) -> Result<(), CoreError> {
        self.detach();

        let os_version = handles.permission.os_version();
        let permissions = PermissionManager::new(
            handles.permission,
            PermissionStore::persistent(self.backend.clone()),
            self.settings.permission_policy.clone(),
        )
        .with_request_timeout(self.settings.permission_request_timeout());

        let activity = ActivitySessionManager::new(
            handles.activity,
            self.backend.clone(),
            self.settings.detection_interval(),
        );

        let location_worker = Arc::new(
            LocationStatusWorker::new(handles.location.clone(), self.backend.clone())
                .map_err(|e| CoreError::Platform(format!("location worker: {}", e)))?,
        );
        let location_watcher = LocationProviderStatusWatcher::new(
            handles.location.clone(),
            self.backend.clone(),
            location_worker.clone(),
        );

        let context = ForegroundContext {
            location_host: handles.location,
            permissions,
            activity,
            location_worker,
            location_watcher,
            foreground: ForegroundServiceManager::new(handles.foreground, os_version),
        };

        *self.context.write() = Some(Arc::new(context));
        tracing::info!("Foreground context attached (OS version {})", os_version);
        Ok(())
    }

    /// Drop the foreground context, stopping anything it started
    pub fn detach(&self) {
        let previous = self.context.write().take();
        if let Some(context) = previous {
            context.shutdown();
            tracing::info!("Foreground context detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.context.read().is_some()
    }

    fn context(&self) -> Result<Arc<ForegroundContext>, CoreError> {
        self.context.read().clone().ok_or(CoreError::NotRegistered)
    }

    // ------------------------------------------------------------------------
    // Permissions
    // ------------------------------------------------------------------------

    pub fn check_permission(&self, permission: &str) -> Result<PermissionResult, CoreError> {
        Ok(self.context()?.permissions.check(permission))
    }

    pub fn request_permission(
        &self,
        permission: &str,
        request_code: i32,
    ) -> Result<PendingRequest, CoreError> {
        Ok(self.context()?.permissions.request(permission, request_code))
    }

    /// Dialog completion hook; false when nothing was waiting for `request_code`
    pub fn on_request_permissions_result(
        &self,
        request_code: i32,
        permissions: &[String],
        grant_results: &[GrantResult],
    ) -> bool {
        match self.context() {
            Ok(context) => context.permissions.on_request_permissions_result(
                request_code,
                permissions,
                grant_results,
            ),
            Err(_) => false,
        }
    }

    // ------------------------------------------------------------------------
    // Activity updates
    // ------------------------------------------------------------------------

    /// Start the activity session. Refused without ever touching the OS
    /// subscription when activity recognition is not granted.
    pub fn start_activity_updates(&self, callbacks: SessionCallbacks) -> Result<(), CoreError> {
        let context = self.context()?;

        let result = context.permissions.check(permission::ACTIVITY_RECOGNITION);
        if !result.is_granted() {
            tracing::warn!("Activity updates refused: permission {}", result);
            return Err(CoreError::PermissionNotGranted(result));
        }

        context.activity.start_service(callbacks);
        Ok(())
    }

    pub fn stop_activity_updates(&self, callbacks: SessionCallbacks) -> Result<(), CoreError> {
        self.context()?.activity.stop_service(callbacks);
        Ok(())
    }

    pub fn activity_state(&self) -> SessionState {
        self.context()
            .map(|context| context.activity.state())
            .unwrap_or(SessionState::Stopped)
    }

    // ------------------------------------------------------------------------
    // Location status
    // ------------------------------------------------------------------------

    pub fn is_location_service_enabled(&self) -> Result<bool, CoreError> {
        let context = self.context()?;
        Ok(location::is_location_service_enabled(
            context.location_host.as_ref(),
        ))
    }

    pub fn start_location_status<F>(&self, listener: F) -> Result<(), CoreError>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.context()?.location_watcher.start(listener)
    }

    pub fn stop_location_status(&self) -> Result<(), CoreError> {
        self.context()?.location_watcher.stop();
        Ok(())
    }

    pub fn location_status_worker(&self) -> Result<Arc<LocationStatusWorker>, CoreError> {
        Ok(self.context()?.location_worker.clone())
    }

    // ------------------------------------------------------------------------
    // Foreground service
    // ------------------------------------------------------------------------

    pub fn start_foreground_service(&self, options: &NotificationOptions) -> Result<(), CoreError> {
        Ok(self.context()?.foreground.start_service(options)?)
    }

    pub fn stop_foreground_service(&self) -> Result<(), CoreError> {
        Ok(self.context()?.foreground.stop_service()?)
    }

    pub fn minimize_app(&self) -> Result<bool, CoreError> {
        Ok(self.context()?.foreground.minimize_app())
    }
}

impl Drop for SensingCore {
    fn drop(&mut self) {
        self.detach();
    }
}
