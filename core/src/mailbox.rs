//! Cross-context status mailbox
//!
//! A persisted latest-value-wins slot per key, plus change notification. A
//! producer running in a background context publishes; a consumer holding its
//! own `Mailbox` handle subscribes and is called back on a dispatcher thread
//! owned by that handle, never on the writer's thread.
//!
//! Writes that reproduce the stored value are dropped before they reach the
//! backend, so subscribers only ever see real changes.

use crate::store::{Change, FeedEvent, StorageBackend, StoreError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// How long a dispatcher waits before re-checking for cancellation
const DISPATCH_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum MailboxValue {
    Bool(bool),
    Text(String),
}

impl MailboxValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MailboxValue::Bool(b) => Some(*b),
            MailboxValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MailboxValue::Text(s) => Some(s),
            MailboxValue::Bool(_) => None,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

impl std::fmt::Display for MailboxValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailboxValue::Bool(b) => write!(f, "{}", b),
            MailboxValue::Text(s) => f.write_str(s),
        }
    }
}

pub type MailboxListener = Arc<dyn Fn(MailboxValue) + Send + Sync>;

struct Subscription {
    active: Arc<AtomicBool>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Stop delivery. Once this returns no further callback will start,
    /// unless it is called from the listener itself.
    fn cancel(mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(handle) = self.dispatcher.take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// One consumer's view of a mailbox namespace
pub struct Mailbox {
    namespace: String,
    backend: Arc<dyn StorageBackend>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

impl Mailbox {
    pub fn open(backend: Arc<dyn StorageBackend>, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            backend,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Overwrite `key` with `value`.
    ///
    /// Returns `Ok(false)` when `value` equals what is already stored; in that
    /// case nothing is written and no subscriber is notified.
    pub fn publish(&self, key: &str, value: MailboxValue) -> Result<bool, StoreError> {
        let encoded = value.encode()?;
        loop {
            let current = self.backend.get(&self.namespace, key.as_bytes())?;
            if current.as_deref() == Some(encoded.as_slice()) {
                debug!("{}/{} unchanged, not publishing", self.namespace, key);
                return Ok(false);
            }
            if self.backend.compare_and_swap(
                &self.namespace,
                key.as_bytes(),
                current.as_deref(),
                &encoded,
            )? {
                self.backend.flush()?;
                debug!("{}/{} <- {}", self.namespace, key, value);
                return Ok(true);
            }
            // Another context won the race; compare against its value
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<MailboxValue>, StoreError> {
        match self.backend.get(&self.namespace, key.as_bytes())? {
            Some(bytes) => MailboxValue::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Forget the stored value without notifying subscribers
    pub fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.backend.remove(&self.namespace, key.as_bytes())?;
        self.backend.flush()
    }

    /// Deliver every future change of `key` to `listener`.
    ///
    /// Replaces any listener this handle already has on `key`. The change
    /// feed is registered before this returns, so writes made afterwards are
    /// never missed.
    pub fn subscribe<F>(&self, key: &str, listener: F) -> Result<(), StoreError>
    where
        F: Fn(MailboxValue) + Send + Sync + 'static,
    {
        self.unsubscribe(key);

        let mut feed = self.backend.watch(&self.namespace)?;
        let active = Arc::new(AtomicBool::new(true));
        let listener: MailboxListener = Arc::new(listener);

        let thread_active = active.clone();
        let watched_key = key.as_bytes().to_vec();
        let label = format!("{}/{}", self.namespace, key);
        let dispatcher = std::thread::Builder::new()
            .name(format!("mailbox-{}", key.to_lowercase()))
            .spawn(move || {
                while thread_active.load(Ordering::Acquire) {
                    match feed.next_timeout(DISPATCH_POLL_INTERVAL) {
                        FeedEvent::Change(Change::Inserted { key, value }) if key == watched_key => {
                            match MailboxValue::decode(&value) {
                                Ok(value) => {
                                    if thread_active.load(Ordering::Acquire) {
                                        listener(value);
                                    }
                                }
                                Err(e) => warn!("Undecodable value on {}: {}", label, e),
                            }
                        }
                        FeedEvent::Change(_) | FeedEvent::Idle => {}
                        FeedEvent::Closed => break,
                    }
                }
                debug!("Dispatcher for {} exited", label);
            })
            .map_err(|e| StoreError::Backend(format!("spawn dispatcher: {}", e)))?;

        self.subscriptions.lock().insert(
            key.to_string(),
            Subscription {
                active,
                dispatcher: Some(dispatcher),
            },
        );
        Ok(())
    }

    pub fn unsubscribe(&self, key: &str) {
        // Release the map lock before joining; the listener may call back in
        let removed = self.subscriptions.lock().remove(key);
        if let Some(subscription) = removed {
            subscription.cancel();
        }
    }

    pub fn unsubscribe_all(&self) {
        let drained: Vec<Subscription> = self
            .subscriptions
            .lock()
            .drain()
            .map(|(_, subscription)| subscription)
            .collect();
        for subscription in drained {
            subscription.cancel();
        }
    }

    /// Active listeners this handle holds on `key` (0 or 1)
    pub fn listener_count(&self, key: &str) -> usize {
        usize::from(self.subscriptions.lock().contains_key(key))
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}
