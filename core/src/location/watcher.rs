//! Foreground watcher for location service status
//!
//! Wires the providers-changed broadcast to the background worker and the
//! status mailbox back to a listener. The listener only hears transitions.

use super::worker::LocationStatusWorker;
use super::{LocationProviderHost, ReceiverId, LOCATION_STATUS_KEY, LOCATION_STATUS_NAMESPACE};
use crate::mailbox::Mailbox;
use crate::store::StorageBackend;
use crate::CoreError;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct LocationProviderStatusWatcher {
    host: Arc<dyn LocationProviderHost>,
    worker: Arc<LocationStatusWorker>,
    mailbox: Mailbox,
    receiver: Mutex<Option<ReceiverId>>,
    // Serializes start and stop
    lifecycle: Mutex<()>,
}

impl LocationProviderStatusWatcher {
    pub fn new(
        host: Arc<dyn LocationProviderHost>,
        backend: Arc<dyn StorageBackend>,
        worker: Arc<LocationStatusWorker>,
    ) -> Self {
        Self {
            host,
            worker,
            mailbox: Mailbox::open(backend, LOCATION_STATUS_NAMESPACE),
            receiver: Mutex::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.receiver.lock().is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.mailbox.listener_count(LOCATION_STATUS_KEY)
    }

    /// Start delivering status transitions to `listener`.
    ///
    /// A second start replaces the first; the broadcast is never registered
    /// twice.
    pub fn start<F>(&self, listener: F) -> Result<(), CoreError>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let _lifecycle = self.lifecycle.lock();
        if self.is_running() {
            debug!("Location status watcher already running, restarting");
            self.stop_locked();
        }

        // A value left over from an earlier run is not news
        self.mailbox.clear(LOCATION_STATUS_KEY)?;
        self.mailbox.subscribe(LOCATION_STATUS_KEY, move |value| {
            match value.as_bool() {
                Some(enabled) => listener(enabled),
                None => warn!("Ignoring non-boolean location status {:?}", value),
            }
        })?;

        let worker = Arc::downgrade(&self.worker);
        let registered = self.host.register_providers_changed(Arc::new(move || {
            if let Some(worker) = worker.upgrade() {
                worker.enqueue();
            }
        }));

        match registered {
            Ok(id) => {
                *self.receiver.lock() = Some(id);
                info!("Location status watcher started");
                Ok(())
            }
            Err(e) => {
                self.mailbox.unsubscribe(LOCATION_STATUS_KEY);
                Err(CoreError::Platform(format!(
                    "register providers-changed receiver: {}",
                    e
                )))
            }
        }
    }

    /// No listener call starts after this returns
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        self.stop_locked();
    }

    fn stop_locked(&self) {
        let receiver = self.receiver.lock().take();
        if let Some(id) = receiver {
            self.host.unregister_providers_changed(id);
        }
        self.mailbox.unsubscribe(LOCATION_STATUS_KEY);
        if receiver.is_some() {
            info!("Location status watcher stopped");
        }
    }
}

impl Drop for LocationProviderStatusWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
