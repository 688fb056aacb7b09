//! Background evaluation of provider availability

use super::{is_location_service_enabled, LocationProviderHost};
use super::{LOCATION_STATUS_KEY, LOCATION_STATUS_NAMESPACE};
use crate::mailbox::{Mailbox, MailboxValue};
use crate::store::{StorageBackend, StoreError};
use crate::worker::BackgroundQueue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

struct StatusEvaluator {
    host: Arc<dyn LocationProviderHost>,
    mailbox: Mailbox,
}

impl StatusEvaluator {
    fn evaluate(&self) -> Result<bool, StoreError> {
        let enabled = is_location_service_enabled(self.host.as_ref());

        // Nothing stored yet reads as "enabled"
        let previous = self
            .mailbox
            .get(LOCATION_STATUS_KEY)?
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        if previous == enabled {
            debug!("Location service status unchanged ({})", enabled);
            return Ok(false);
        }

        info!("Location service status changed to {}", enabled);
        self.mailbox
            .publish(LOCATION_STATUS_KEY, MailboxValue::Bool(enabled))
    }
}

/// Re-evaluates availability on a serial background queue each time the
/// providers-changed broadcast arrives
pub struct LocationStatusWorker {
    evaluator: Arc<StatusEvaluator>,
    queue: BackgroundQueue,
}

impl LocationStatusWorker {
    pub fn new(
        host: Arc<dyn LocationProviderHost>,
        backend: Arc<dyn StorageBackend>,
    ) -> std::io::Result<Self> {
        Ok(Self {
            evaluator: Arc::new(StatusEvaluator {
                host,
                mailbox: Mailbox::open(backend, LOCATION_STATUS_NAMESPACE),
            }),
            queue: BackgroundQueue::new("location-status")?,
        })
    }

    /// Schedule one evaluation; never runs on the caller's thread
    pub fn enqueue(&self) -> bool {
        let evaluator = self.evaluator.clone();
        self.queue.enqueue(move || {
            if let Err(e) = evaluator.evaluate() {
                error!("Failed to publish location service status: {}", e);
            }
        })
    }

    /// Evaluate now and publish if the status changed.
    /// Returns whether a new value was published.
    pub fn handle_providers_changed(&self) -> Result<bool, StoreError> {
        self.evaluator.evaluate()
    }

    /// Wait for queued evaluations to finish
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.queue.wait_idle(timeout)
    }
}
