//! Permission manager
//!
//! Owns at most one in-flight OS permission request. The dialog outcome is
//! delivered out of band by the host through
//! [`PermissionManager::on_request_permissions_result`], correlated by the
//! caller's request code, and handed back over a single-shot channel.

use super::{GrantResult, PermissionHost, PermissionPolicy, PermissionResult};
use crate::store::PermissionStore;
use crate::ErrorCode;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Final answer for one request
pub type RequestOutcome = Result<PermissionResult, ErrorCode>;

struct InFlightRequest {
    id: u64,
    permission: String,
    request_code: i32,
    responder: oneshot::Sender<RequestOutcome>,
}

type RequestSlot = Arc<Mutex<Option<InFlightRequest>>>;

/// Handle to a request started with [`PermissionManager::request`]
pub struct PendingRequest {
    id: u64,
    request_code: i32,
    receiver: oneshot::Receiver<RequestOutcome>,
    slot: RequestSlot,
    timeout: Option<Duration>,
}

impl PendingRequest {
    pub fn request_code(&self) -> i32 {
        self.request_code
    }

    /// Non-blocking poll; `None` while the dialog is still open
    pub fn try_outcome(&mut self) -> Option<RequestOutcome> {
        self.receiver.try_recv().ok()
    }

    /// Wait for the OS to answer
    pub async fn outcome(self) -> RequestOutcome {
        let PendingRequest {
            id,
            request_code,
            receiver,
            slot,
            timeout,
        } = self;

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(received) => received,
                Err(_) => {
                    release_slot(&slot, id);
                    warn!(
                        "Permission request {} timed out after {:?}",
                        request_code, limit
                    );
                    return Err(ErrorCode::PermissionRequestCancelled);
                }
            },
            None => receiver.await,
        };

        // Responder dropped without an answer
        received.unwrap_or(Err(ErrorCode::PermissionRequestCancelled))
    }
}

/// Drop the in-flight request if it is still the one identified by `id`,
/// resolving it as cancelled.
fn release_slot(slot: &RequestSlot, id: u64) {
    let mut guard = slot.lock();
    if guard.as_ref().map(|r| r.id) == Some(id) {
        if let Some(request) = guard.take() {
            let _ = request
                .responder
                .send(Err(ErrorCode::PermissionRequestCancelled));
        }
    }
}

pub struct PermissionManager {
    host: Arc<dyn PermissionHost>,
    store: PermissionStore,
    policy: PermissionPolicy,
    request_timeout: Option<Duration>,
    in_flight: RequestSlot,
    next_id: AtomicU64,
}

impl PermissionManager {
    pub fn new(
        host: Arc<dyn PermissionHost>,
        store: PermissionStore,
        policy: PermissionPolicy,
    ) -> Self {
        Self {
            host,
            store,
            policy,
            request_timeout: None,
            in_flight: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Give up on dialogs that never answer
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    /// Current state of `permission`, without showing any dialog
    pub fn check(&self, permission: &str) -> PermissionResult {
        let os_version = self.host.os_version();
        if self.policy.is_implicitly_granted(permission, os_version) {
            return PermissionResult::Granted;
        }

        if self.host.is_granted(permission) {
            return PermissionResult::Granted;
        }

        if self.policy.supports_rationale(os_version) {
            let previous = self.store.get(permission).unwrap_or_else(|e| {
                warn!("Permission store unreadable for {}: {}", permission, e);
                None
            });
            if previous == Some(PermissionResult::PermanentlyDenied)
                && !self.host.should_show_rationale(permission)
            {
                return PermissionResult::PermanentlyDenied;
            }
        }

        PermissionResult::Denied
    }

    /// Ask the OS for `permission`.
    ///
    /// A request still waiting for its dialog is superseded: it resolves with
    /// `PERMISSION_REQUEST_CANCELLED` before this one takes the slot.
    pub fn request(&self, permission: &str, request_code: i32) -> PendingRequest {
        let (responder, receiver) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = PendingRequest {
            id,
            request_code,
            receiver,
            slot: self.in_flight.clone(),
            timeout: self.request_timeout,
        };

        if self
            .policy
            .is_implicitly_granted(permission, self.host.os_version())
        {
            debug!("{} is not gated on this OS version", permission);
            let _ = responder.send(Ok(PermissionResult::Granted));
            return pending;
        }

        let superseded = self.in_flight.lock().replace(InFlightRequest {
            id,
            permission: permission.to_string(),
            request_code,
            responder,
        });
        if let Some(previous) = superseded {
            warn!(
                "Permission request {} ({}) superseded by request {}",
                previous.request_code, previous.permission, request_code
            );
            let _ = previous
                .responder
                .send(Err(ErrorCode::PermissionRequestCancelled));
        }

        info!(
            "Requesting {} (request code {})",
            permission, request_code
        );
        if let Err(e) = self
            .host
            .launch_request_dialog(&[permission.to_string()], request_code)
        {
            error!("Failed to launch permission dialog: {}", e);
            release_slot(&self.in_flight, id);
        }

        pending
    }

    /// Completion hook invoked by the host when the dialog closes.
    ///
    /// Returns `false` when no in-flight request matches `request_code`.
    pub fn on_request_permissions_result(
        &self,
        request_code: i32,
        permissions: &[String],
        grant_results: &[GrantResult],
    ) -> bool {
        let request = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(r) if r.request_code == request_code => slot.take(),
                _ => None,
            }
        };
        let Some(request) = request else {
            debug!("No pending permission request for code {}", request_code);
            return false;
        };

        if grant_results.is_empty() {
            // Interrupted, not decided: stored state stays as it was
            warn!("Permission request {} was cancelled", request_code);
            let _ = request
                .responder
                .send(Err(ErrorCode::PermissionRequestCancelled));
            return true;
        }

        let granted = permissions
            .iter()
            .position(|p| p == &request.permission)
            .and_then(|index| grant_results.get(index))
            == Some(&GrantResult::Granted);

        let result = if granted {
            PermissionResult::Granted
        } else if self.policy.supports_rationale(self.host.os_version())
            && !self.host.should_show_rationale(&request.permission)
        {
            PermissionResult::PermanentlyDenied
        } else {
            PermissionResult::Denied
        };

        if let Err(e) = self.store.put(&request.permission, result) {
            warn!("Could not persist {} for {}: {}", result, request.permission, e);
        }

        info!("{} resolved as {}", request.permission, result);
        let _ = request.responder.send(Ok(result));
        true
    }

    pub fn has_in_flight_request(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Resolve the in-flight request, if any, as cancelled
    pub fn cancel_in_flight(&self) {
        if let Some(request) = self.in_flight.lock().take() {
            warn!(
                "Permission request {} ({}) cancelled",
                request.request_code, request.permission
            );
            let _ = request
                .responder
                .send(Err(ErrorCode::PermissionRequestCancelled));
        }
    }
}

impl Drop for PermissionManager {
    fn drop(&mut self) {
        self.cancel_in_flight();
    }
}
