//! Activity recognition session lifecycle
//!
//! One session is one span of a recurring OS classification subscription.
//! Results never reach the session by direct call: the OS wakes a background
//! [`super::ActivityRecognitionWorker`], which publishes into the activity
//! mailbox, and the session forwards mailbox changes to the callbacks of the
//! start call that owns the current session.

use super::{ACTIVITY_DATA_KEY, ACTIVITY_ERROR_KEY, ACTIVITY_NAMESPACE};
use crate::mailbox::{Mailbox, MailboxValue};
use crate::store::{StorageBackend, StoreError};
use crate::ErrorCode;
use parking_lot::{Mutex, ReentrantMutex};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Stopped => write!(f, "Stopped"),
            SessionState::Starting => write!(f, "Starting"),
            SessionState::Running => write!(f, "Running"),
        }
    }
}

/// Completion of an OS subscription call. May be invoked on any thread,
/// including synchronously from inside the host call.
pub type AckCallback = Box<dyn FnOnce(Result<(), String>) + Send>;

/// The OS recurring-classification facility
pub trait ActivityRecognitionHost: Send + Sync {
    fn request_activity_updates(&self, interval: Duration, ack: AckCallback);
    fn remove_activity_updates(&self, ack: AckCallback);
}

/// Callbacks owned by a single start or stop call
#[derive(Clone)]
pub struct SessionCallbacks {
    pub on_update: Arc<dyn Fn(String) + Send + Sync>,
    pub on_success: Arc<dyn Fn() + Send + Sync>,
    pub on_error: Arc<dyn Fn(ErrorCode) + Send + Sync>,
}

impl SessionCallbacks {
    pub fn new<U, S, E>(on_update: U, on_success: S, on_error: E) -> Self
    where
        U: Fn(String) + Send + Sync + 'static,
        S: Fn() + Send + Sync + 'static,
        E: Fn(ErrorCode) + Send + Sync + 'static,
    {
        Self {
            on_update: Arc::new(on_update),
            on_success: Arc::new(on_success),
            on_error: Arc::new(on_error),
        }
    }

    /// Swallows everything
    pub fn silent() -> Self {
        Self::new(|_| {}, || {}, |_| {})
    }
}

struct SessionContext {
    id: u64,
    callbacks: SessionCallbacks,
}

struct SessionSlot {
    state: SessionState,
    active: Option<SessionContext>,
}

struct SessionInner {
    host: Arc<dyn ActivityRecognitionHost>,
    mailbox: Mailbox,
    interval: Duration,
    slot: Mutex<SessionSlot>,
    // Held across a whole start or stop so OS calls never interleave.
    // Reentrant because acks may run synchronously inside the host call.
    lifecycle: ReentrantMutex<()>,
    next_id: AtomicU64,
}

impl SessionInner {
    /// Callbacks of session `id`, if it is still the live one
    fn live_callbacks(&self, id: u64) -> Option<SessionCallbacks> {
        let slot = self.slot.lock();
        if slot.state == SessionState::Stopped {
            return None;
        }
        slot.active
            .as_ref()
            .filter(|ctx| ctx.id == id)
            .map(|ctx| ctx.callbacks.clone())
    }

    fn release_listeners(&self) {
        self.mailbox.unsubscribe(ACTIVITY_DATA_KEY);
        self.mailbox.unsubscribe(ACTIVITY_ERROR_KEY);
    }

    fn on_data(&self, id: u64, value: MailboxValue) {
        let Some(callbacks) = self.live_callbacks(id) else {
            debug!("Dropping activity data for stale session {}", id);
            return;
        };
        match value {
            MailboxValue::Text(json) => (callbacks.on_update)(json),
            other => {
                warn!("Activity data is not text: {:?}", other);
                (callbacks.on_error)(ErrorCode::ActivityDataEncodingFailed);
            }
        }
    }

    fn on_error(&self, id: u64, value: MailboxValue) {
        let Some(callbacks) = self.live_callbacks(id) else {
            return;
        };
        let code = value
            .as_text()
            .and_then(|s| ErrorCode::from_str(s).ok())
            .unwrap_or(ErrorCode::ActivityDataEncodingFailed);
        (callbacks.on_error)(code);
    }

    fn on_request_ack(&self, id: u64, result: Result<(), String>) {
        let callbacks = {
            let mut slot = self.slot.lock();
            let current = slot.active.as_ref().map(|ctx| ctx.id) == Some(id);
            if !current || slot.state != SessionState::Starting {
                debug!("Ignoring ack for superseded session {}", id);
                return;
            }
            match &result {
                Ok(()) => {
                    slot.state = SessionState::Running;
                    slot.active.as_ref().map(|ctx| ctx.callbacks.clone())
                }
                Err(_) => {
                    slot.state = SessionState::Stopped;
                    slot.active.take().map(|ctx| ctx.callbacks)
                }
            }
        };

        match result {
            Ok(()) => {
                info!("Activity updates running (session {})", id);
                if let Some(callbacks) = callbacks {
                    (callbacks.on_success)();
                }
            }
            Err(e) => {
                error!("Activity updates request failed: {}", e);
                self.release_listeners();
                if let Some(callbacks) = callbacks {
                    (callbacks.on_error)(ErrorCode::ActivityUpdatesRequestFailed);
                }
            }
        }
    }
}

/// Starts and stops the activity subscription; at most one at a time
#[derive(Clone)]
pub struct ActivitySessionManager {
    inner: Arc<SessionInner>,
}

impl ActivitySessionManager {
    pub fn new(
        host: Arc<dyn ActivityRecognitionHost>,
        backend: Arc<dyn StorageBackend>,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                host,
                mailbox: Mailbox::open(backend, ACTIVITY_NAMESPACE),
                interval,
                slot: Mutex::new(SessionSlot {
                    state: SessionState::Stopped,
                    active: None,
                }),
                lifecycle: ReentrantMutex::new(()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.slot.lock().state
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Listeners currently registered on the activity mailbox
    pub fn listener_count(&self) -> usize {
        self.inner.mailbox.listener_count(ACTIVITY_DATA_KEY)
            + self.inner.mailbox.listener_count(ACTIVITY_ERROR_KEY)
    }

    /// Begin a new session owned by `callbacks`.
    ///
    /// A live session is stopped first, without reporting to anyone, so the
    /// OS never holds two subscriptions for this process.
    pub fn start_service(&self, callbacks: SessionCallbacks) {
        let _lifecycle = self.inner.lifecycle.lock();

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = {
            let mut slot = self.inner.slot.lock();
            let previous = slot.state;
            slot.state = SessionState::Starting;
            slot.active = Some(SessionContext {
                id,
                callbacks: callbacks.clone(),
            });
            previous
        };

        if previous != SessionState::Stopped {
            debug!("Activity updates already {}, restarting", previous);
            self.inner.release_listeners();
            self.inner.host.remove_activity_updates(Box::new(|result| {
                if let Err(e) = result {
                    debug!("Removing the replaced subscription failed: {}", e);
                }
            }));
        }

        // Listen before asking the OS, so the first result cannot slip past
        if let Err(e) = self.subscribe(id) {
            error!("Failed to listen for activity results: {}", e);
            self.inner.release_listeners();
            {
                let mut slot = self.inner.slot.lock();
                slot.state = SessionState::Stopped;
                slot.active = None;
            }
            (callbacks.on_error)(ErrorCode::ActivityUpdatesRequestFailed);
            return;
        }

        info!(
            "Requesting activity updates every {:?} (session {})",
            self.inner.interval, id
        );
        let weak = Arc::downgrade(&self.inner);
        self.inner.host.request_activity_updates(
            self.inner.interval,
            Box::new(move |result| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_request_ack(id, result);
                }
            }),
        );
    }

    fn subscribe(&self, id: u64) -> Result<(), StoreError> {
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        self.inner.mailbox.subscribe(ACTIVITY_DATA_KEY, move |value| {
            if let Some(inner) = weak.upgrade() {
                inner.on_data(id, value);
            }
        })?;

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        self.inner.mailbox.subscribe(ACTIVITY_ERROR_KEY, move |value| {
            if let Some(inner) = weak.upgrade() {
                inner.on_error(id, value);
            }
        })
    }

    /// End the current session. The state is STOPPED when this returns even
    /// if the OS later reports that removal failed.
    pub fn stop_service(&self, callbacks: SessionCallbacks) {
        let _lifecycle = self.inner.lifecycle.lock();

        let previous = {
            let mut slot = self.inner.slot.lock();
            let previous = slot.state;
            slot.state = SessionState::Stopped;
            slot.active = None;
            previous
        };

        self.inner.release_listeners();

        if previous == SessionState::Stopped {
            debug!("Activity updates not running");
            (callbacks.on_success)();
            return;
        }

        info!("Removing activity updates");
        self.inner.host.remove_activity_updates(Box::new(move |result| match result {
            Ok(()) => (callbacks.on_success)(),
            Err(e) => {
                warn!("Activity updates removal failed: {}", e);
                (callbacks.on_error)(ErrorCode::ActivityUpdatesRemoveFailed);
            }
        }));
    }
}
