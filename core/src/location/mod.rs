//! Location provider availability
//!
//! Whether any location source is usable, evaluated from the host's settings
//! service when it has one and from individual providers otherwise.

pub mod watcher;
pub mod worker;

pub use watcher::LocationProviderStatusWatcher;
pub use worker::LocationStatusWorker;

use std::sync::Arc;
use tracing::{debug, warn};

pub const LOCATION_STATUS_NAMESPACE: &str = "LOCATION_SERVICE_STATUS";
pub const LOCATION_STATUS_KEY: &str = "LOCATION_SERVICE_STATUS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationProvider {
    Gps,
    Network,
}

impl std::fmt::Display for LocationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocationProvider::Gps => write!(f, "gps"),
            LocationProvider::Network => write!(f, "network"),
        }
    }
}

/// Answer from the platform location-settings service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocationSettingsStates {
    pub gps_usable: bool,
    pub network_location_usable: bool,
}

/// Invoked by the host whenever the set of enabled providers changes
pub type BroadcastReceiver = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiverId(pub u64);

pub trait LocationProviderHost: Send + Sync {
    fn register_providers_changed(&self, receiver: BroadcastReceiver)
        -> Result<ReceiverId, String>;
    fn unregister_providers_changed(&self, id: ReceiverId);

    /// Whether the platform location-settings service is installed
    fn has_settings_service(&self) -> bool;
    fn check_location_settings(&self) -> Result<Option<LocationSettingsStates>, String>;

    fn is_provider_enabled(&self, provider: LocationProvider) -> bool;
}

/// True when at least one location source can produce a fix
pub fn is_location_service_enabled(host: &dyn LocationProviderHost) -> bool {
    if host.has_settings_service() {
        return match host.check_location_settings() {
            Ok(Some(states)) => states.gps_usable || states.network_location_usable,
            Ok(None) => {
                debug!("Location settings check returned no states");
                false
            }
            Err(e) => {
                warn!("Location settings check failed: {}", e);
                false
            }
        };
    }

    host.is_provider_enabled(LocationProvider::Gps)
        || host.is_provider_enabled(LocationProvider::Network)
}
