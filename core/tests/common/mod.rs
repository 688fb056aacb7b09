// Shared fakes for integration tests: one object standing in for every host
// facility, with knobs for the failure paths.
#![allow(dead_code)]

use parking_lot::Mutex;
use sensegate_core::activity::AckCallback;
use sensegate_core::location::{BroadcastReceiver, ReceiverId};
use sensegate_core::{
    ActivityRecognitionHost, BridgeSettings, ForegroundServiceHost, LocationProvider,
    LocationProviderHost, LocationSettingsStates, MemoryStorage, NotificationOptions,
    PermissionHost, PlatformHandles, SensingCore, StorageBackend,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(2);

pub struct FakePlatform {
    os_version: u32,

    // permissions
    granted: Mutex<HashSet<String>>,
    rationale: Mutex<HashSet<String>>,
    pub dialogs: Mutex<Vec<(Vec<String>, i32)>>,
    pub fail_dialog: AtomicBool,

    // activity recognition
    pub activity_requests: AtomicU32,
    pub activity_removals: AtomicU32,
    pub fail_activity_request: AtomicBool,
    pub fail_activity_remove: AtomicBool,
    pub defer_acks: AtomicBool,
    deferred: Mutex<Vec<AckCallback>>,
    last_interval: Mutex<Option<Duration>>,

    // location
    receivers: Mutex<HashMap<u64, BroadcastReceiver>>,
    next_receiver: AtomicU64,
    pub registrations: AtomicU32,
    settings_service: Mutex<Option<LocationSettingsStates>>,
    gps: AtomicBool,
    network: AtomicBool,

    // foreground service
    pub service_starts: Mutex<Vec<(NotificationOptions, bool)>>,
    pub service_stops: AtomicU32,
}

impl FakePlatform {
    pub fn new(os_version: u32) -> Arc<Self> {
        Arc::new(Self {
            os_version,
            granted: Mutex::new(HashSet::new()),
            rationale: Mutex::new(HashSet::new()),
            dialogs: Mutex::new(Vec::new()),
            fail_dialog: AtomicBool::new(false),
            activity_requests: AtomicU32::new(0),
            activity_removals: AtomicU32::new(0),
            fail_activity_request: AtomicBool::new(false),
            fail_activity_remove: AtomicBool::new(false),
            defer_acks: AtomicBool::new(false),
            deferred: Mutex::new(Vec::new()),
            last_interval: Mutex::new(None),
            receivers: Mutex::new(HashMap::new()),
            next_receiver: AtomicU64::new(1),
            registrations: AtomicU32::new(0),
            settings_service: Mutex::new(None),
            gps: AtomicBool::new(true),
            network: AtomicBool::new(true),
            service_starts: Mutex::new(Vec::new()),
            service_stops: AtomicU32::new(0),
        })
    }

    pub fn grant(&self, permission: &str) {
        self.granted.lock().insert(permission.to_string());
    }

    pub fn revoke(&self, permission: &str) {
        self.granted.lock().remove(permission);
    }

    pub fn set_rationale(&self, permission: &str, show: bool) {
        if show {
            self.rationale.lock().insert(permission.to_string());
        } else {
            self.rationale.lock().remove(permission);
        }
    }

    pub fn dialog_count(&self) -> usize {
        self.dialogs.lock().len()
    }

    /// Acknowledge every deferred activity call with `result`
    pub fn release_acks(&self, result: Result<(), String>) {
        let acks: Vec<AckCallback> = self.deferred.lock().drain(..).collect();
        for ack in acks {
            ack(result.clone());
        }
    }

    pub fn last_interval(&self) -> Option<Duration> {
        *self.last_interval.lock()
    }

    pub fn set_providers(&self, gps: bool, network: bool) {
        self.gps.store(gps, Ordering::SeqCst);
        self.network.store(network, Ordering::SeqCst);
    }

    pub fn install_settings_service(&self, states: LocationSettingsStates) {
        *self.settings_service.lock() = Some(states);
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.lock().len()
    }

    /// Deliver the providers-changed broadcast to every registered receiver
    pub fn broadcast_providers_changed(&self) {
        let receivers: Vec<BroadcastReceiver> = self.receivers.lock().values().cloned().collect();
        for receiver in receivers {
            receiver();
        }
    }

    fn ack(&self, ack: AckCallback, fail: bool) {
        if self.defer_acks.load(Ordering::SeqCst) {
            self.deferred.lock().push(ack);
        } else if fail {
            ack(Err("host refused".to_string()));
        } else {
            ack(Ok(()));
        }
    }
}

impl PermissionHost for FakePlatform {
    fn os_version(&self) -> u32 {
        self.os_version
    }

    fn is_granted(&self, permission: &str) -> bool {
        self.granted.lock().contains(permission)
    }

    fn should_show_rationale(&self, permission: &str) -> bool {
        self.rationale.lock().contains(permission)
    }

    fn launch_request_dialog(&self, permissions: &[String], request_code: i32) -> Result<(), String> {
        if self.fail_dialog.load(Ordering::SeqCst) {
            return Err("no activity to host the dialog".to_string());
        }
        self.dialogs.lock().push((permissions.to_vec(), request_code));
        Ok(())
    }
}

impl ActivityRecognitionHost for FakePlatform {
    fn request_activity_updates(&self, interval: Duration, ack: AckCallback) {
        self.activity_requests.fetch_add(1, Ordering::SeqCst);
        *self.last_interval.lock() = Some(interval);
        let fail = self.fail_activity_request.load(Ordering::SeqCst);
        self.ack(ack, fail);
    }

    fn remove_activity_updates(&self, ack: AckCallback) {
        self.activity_removals.fetch_add(1, Ordering::SeqCst);
        let fail = self.fail_activity_remove.load(Ordering::SeqCst);
        self.ack(ack, fail);
    }
}

impl LocationProviderHost for FakePlatform {
    fn register_providers_changed(&self, receiver: BroadcastReceiver) -> Result<ReceiverId, String> {
        let id = self.next_receiver.fetch_add(1, Ordering::SeqCst);
        self.receivers.lock().insert(id, receiver);
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(ReceiverId(id))
    }

    fn unregister_providers_changed(&self, id: ReceiverId) {
        self.receivers.lock().remove(&id.0);
    }

    fn has_settings_service(&self) -> bool {
        self.settings_service.lock().is_some()
    }

    fn check_location_settings(&self) -> Result<Option<LocationSettingsStates>, String> {
        Ok(*self.settings_service.lock())
    }

    fn is_provider_enabled(&self, provider: LocationProvider) -> bool {
        match provider {
            LocationProvider::Gps => self.gps.load(Ordering::SeqCst),
            LocationProvider::Network => self.network.load(Ordering::SeqCst),
        }
    }
}

impl ForegroundServiceHost for FakePlatform {
    fn start_service(&self, options: &NotificationOptions, as_foreground: bool) -> Result<(), String> {
        self.service_starts
            .lock()
            .push((options.clone(), as_foreground));
        Ok(())
    }

    fn stop_service(&self) -> Result<(), String> {
        self.service_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn move_task_to_back(&self) -> bool {
        true
    }
}

/// Core over an in-memory store with `platform` attached
pub fn attached_core(platform: &Arc<FakePlatform>) -> Arc<SensingCore> {
    attached_core_with(platform, BridgeSettings::default(), Arc::new(MemoryStorage::new()))
}

pub fn attached_core_with(
    platform: &Arc<FakePlatform>,
    settings: BridgeSettings,
    backend: Arc<dyn StorageBackend>,
) -> Arc<SensingCore> {
    let core = SensingCore::with_backend(settings, backend).unwrap();
    core.attach(PlatformHandles::from_bridge(platform.clone()))
        .unwrap();
    Arc::new(core)
}

/// Poll `condition` until it holds or `WAIT` passes
pub fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
