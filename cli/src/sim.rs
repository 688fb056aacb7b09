// Simulated device for driving the core from a terminal
//
// Stands in for every host facility. OS-side permission state is seeded from
// the persisted permission results, so a grant made in one run is still
// granted in the next.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use sensegate_core::activity::{raw, AckCallback};
use sensegate_core::location::{BroadcastReceiver, ReceiverId};
use sensegate_core::{
    ActivityRecognitionHost, ActivityType, ForegroundServiceHost, GrantResult, LocationProvider,
    LocationProviderHost, LocationSettingsStates, NotificationOptions, PermissionHost,
    PermissionResult, PermissionStore, RawActivitySample,
};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// How the simulated user answers a permission dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogOutcome {
    Grant,
    Deny,
    /// Deny and tick "don't ask again"
    DenyForever,
    /// Close the dialog without deciding
    Dismiss,
}

impl FromStr for DialogOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grant" => Ok(DialogOutcome::Grant),
            "deny" => Ok(DialogOutcome::Deny),
            "deny-forever" => Ok(DialogOutcome::DenyForever),
            "dismiss" => Ok(DialogOutcome::Dismiss),
            other => Err(format!(
                "unknown outcome {} (expected grant, deny, deny-forever or dismiss)",
                other
            )),
        }
    }
}

impl DialogOutcome {
    /// Grant results the OS would report for this answer
    pub fn grant_results(&self) -> Vec<GrantResult> {
        match self {
            DialogOutcome::Grant => vec![GrantResult::Granted],
            DialogOutcome::Deny | DialogOutcome::DenyForever => vec![GrantResult::Denied],
            DialogOutcome::Dismiss => Vec::new(),
        }
    }
}

pub struct SimulatedPlatform {
    os_version: u32,
    granted: Mutex<HashSet<String>>,
    no_rationale: Mutex<HashSet<String>>,
    receivers: Mutex<HashMap<u64, BroadcastReceiver>>,
    next_receiver: AtomicU64,
    gps: AtomicBool,
    network: AtomicBool,
    settings_service: Mutex<Option<LocationSettingsStates>>,
}

impl SimulatedPlatform {
    pub fn new(os_version: u32) -> Self {
        Self {
            os_version,
            granted: Mutex::new(HashSet::new()),
            no_rationale: Mutex::new(HashSet::new()),
            receivers: Mutex::new(HashMap::new()),
            next_receiver: AtomicU64::new(1),
            gps: AtomicBool::new(true),
            network: AtomicBool::new(true),
            settings_service: Mutex::new(None),
        }
    }

    /// Restore OS-side permission state from earlier runs
    pub fn seed_from(&self, store: &PermissionStore) -> Result<()> {
        let entries = store.list().context("Failed to read permission results")?;
        for (permission, result) in entries {
            match result {
                PermissionResult::Granted => {
                    self.granted.lock().insert(permission);
                }
                PermissionResult::PermanentlyDenied => {
                    self.no_rationale.lock().insert(permission);
                }
                PermissionResult::Denied => {}
            }
        }
        Ok(())
    }

    /// Apply what the user chose in the dialog to the simulated OS
    pub fn answer_dialog(&self, permission: &str, outcome: DialogOutcome) {
        match outcome {
            DialogOutcome::Grant => {
                self.granted.lock().insert(permission.to_string());
                self.no_rationale.lock().remove(permission);
            }
            DialogOutcome::Deny => {
                self.granted.lock().remove(permission);
                self.no_rationale.lock().remove(permission);
            }
            DialogOutcome::DenyForever => {
                self.granted.lock().remove(permission);
                self.no_rationale.lock().insert(permission.to_string());
            }
            DialogOutcome::Dismiss => {}
        }
    }

    pub fn grant(&self, permission: &str) {
        self.granted.lock().insert(permission.to_string());
    }

    pub fn set_providers(&self, gps: bool, network: bool) {
        self.gps.store(gps, Ordering::SeqCst);
        self.network.store(network, Ordering::SeqCst);
    }

    pub fn install_settings_service(&self, states: LocationSettingsStates) {
        *self.settings_service.lock() = Some(states);
    }

    pub fn broadcast_providers_changed(&self) {
        let receivers: Vec<BroadcastReceiver> = self.receivers.lock().values().cloned().collect();
        debug!("Broadcasting providers changed to {} receivers", receivers.len());
        for receiver in receivers {
            receiver();
        }
    }
}

impl PermissionHost for SimulatedPlatform {
    fn os_version(&self) -> u32 {
        self.os_version
    }

    fn is_granted(&self, permission: &str) -> bool {
        self.granted.lock().contains(permission)
    }

    fn should_show_rationale(&self, permission: &str) -> bool {
        !self.no_rationale.lock().contains(permission)
    }

    fn launch_request_dialog(&self, permissions: &[String], request_code: i32) -> Result<(), String> {
        info!("Permission dialog for {:?} (request code {})", permissions, request_code);
        Ok(())
    }
}

impl ActivityRecognitionHost for SimulatedPlatform {
    fn request_activity_updates(&self, interval: Duration, ack: AckCallback) {
        info!("Activity updates requested every {:?}", interval);
        ack(Ok(()));
    }

    fn remove_activity_updates(&self, ack: AckCallback) {
        info!("Activity updates removed");
        ack(Ok(()));
    }
}

impl LocationProviderHost for SimulatedPlatform {
    fn register_providers_changed(&self, receiver: BroadcastReceiver) -> Result<ReceiverId, String> {
        let id = self.next_receiver.fetch_add(1, Ordering::SeqCst);
        self.receivers.lock().insert(id, receiver);
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

impl ForegroundServiceHost for SimulatedPlatform {
    fn start_service(&self, options: &NotificationOptions, as_foreground: bool) -> Result<(), String> {
        info!(
            "Service started on channel {} (foreground: {})",
            options.notification_channel_id, as_foreground
        );
        Ok(())
    }

    fn stop_service(&self) -> Result<(), String> {
        info!("Service stopped");
        Ok(())
    }

    fn move_task_to_back(&self) -> bool {
        true
    }
}

const KNOWN_TYPES: [i32; 8] = [
    raw::IN_VEHICLE,
    raw::ON_BICYCLE,
    raw::ON_FOOT,
    raw::STILL,
    raw::UNKNOWN,
    raw::TILTING,
    raw::WALKING,
    raw::RUNNING,
];

/// Parse `TYPE:CONFIDENCE`, where TYPE is a raw code or a name like RUNNING
pub fn parse_sample(s: &str) -> Result<RawActivitySample> {
    let (kind, confidence) = s
        .split_once(':')
        .with_context(|| format!("Expected TYPE:CONFIDENCE, got {}", s))?;

    let activity_type = match kind.parse::<i32>() {
        Ok(code) => code,
        Err(_) => {
            let name = kind.to_ascii_uppercase();
            KNOWN_TYPES
                .iter()
                .copied()
                .find(|code| ActivityType::from_raw(*code).as_str() == name)
                .with_context(|| format!("Unknown activity type {}", kind))?
        }
    };
    let confidence: i32 = confidence
        .parse()
        .with_context(|| format!("Invalid confidence {}", confidence))?;

    Ok(RawActivitySample::new(activity_type, confidence))
}

/// Samples used by `simulate` when none are given
pub fn default_script() -> Vec<Vec<RawActivitySample>> {
    vec![
        vec![
            RawActivitySample::new(raw::STILL, 90),
            RawActivitySample::new(raw::TILTING, 10),
        ],
        vec![RawActivitySample::new(raw::STILL, 92)],
        vec![
            RawActivitySample::new(raw::ON_FOOT, 70),
            RawActivitySample::new(raw::WALKING, 65),
        ],
        vec![RawActivitySample::new(raw::RUNNING, 80)],
        vec![RawActivitySample::new(raw::IN_VEHICLE, 45)],
    ]
}
