//! Background side of activity recognition
//!
//! Runs in whatever context the OS wakes with a classification result. It
//! knows nothing about sessions or callbacks; it only writes to the mailbox.

use super::{ActivityData, RawActivitySample};
use super::{ACTIVITY_DATA_KEY, ACTIVITY_ERROR_KEY, ACTIVITY_NAMESPACE};
use crate::mailbox::{Mailbox, MailboxValue};
use crate::store::{StorageBackend, StoreError};
use crate::ErrorCode;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ActivityRecognitionWorker {
    mailbox: Mailbox,
}

impl ActivityRecognitionWorker {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            mailbox: Mailbox::open(backend, ACTIVITY_NAMESPACE),
        }
    }

    /// Relay the most probable activity of one OS result.
    ///
    /// Returns whether anything new was written; an empty result or a
    /// repeat of the last classification writes nothing.
    pub fn handle_result(&self, samples: &[RawActivitySample]) -> Result<bool, StoreError> {
        let Some(data) = ActivityData::most_probable(samples) else {
            debug!("Activity result without probable activities");
            return Ok(false);
        };

        match serde_json::to_string(&data) {
            Ok(json) => self
                .mailbox
                .publish(ACTIVITY_DATA_KEY, MailboxValue::Text(json)),
            Err(e) => {
                warn!("Failed to encode activity data: {}", e);
                self.mailbox.publish(
                    ACTIVITY_ERROR_KEY,
                    MailboxValue::Text(ErrorCode::ActivityDataEncodingFailed.to_string()),
                )
            }
        }
    }

    /// Last relayed classification, if any
    pub fn last_data(&self) -> Result<Option<ActivityData>, StoreError> {
        let Some(value) = self.mailbox.get(ACTIVITY_DATA_KEY)? else {
            return Ok(None);
        };
        match value.as_text() {
            Some(json) => serde_json::from_str(json)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{raw, ActivityConfidence, ActivityType};
    use crate::store::MemoryStorage;

    #[test]
    fn test_publishes_most_probable_as_json() {
        let backend = Arc::new(MemoryStorage::new());
        let worker = ActivityRecognitionWorker::new(backend.clone());

        let written = worker
            .handle_result(&[
                RawActivitySample::new(raw::STILL, 20),
                RawActivitySample::new(raw::RUNNING, 80),
            ])
            .unwrap();
        assert!(written);

        let mailbox = Mailbox::open(backend, ACTIVITY_NAMESPACE);
        assert_eq!(
            mailbox.get(ACTIVITY_DATA_KEY).unwrap(),
            Some(MailboxValue::Text(
                r#"{"type":"RUNNING","confidence":"HIGH"}"#.into()
            ))
        );

        let last = worker.last_data().unwrap().unwrap();
        assert_eq!(last.activity_type, ActivityType::Running);
        assert_eq!(last.confidence, ActivityConfidence::High);
    }

    #[test]
    fn test_repeat_and_empty_results_write_nothing() {
        let backend = Arc::new(MemoryStorage::new());
        let worker = ActivityRecognitionWorker::new(backend);

        assert!(!worker.handle_result(&[]).unwrap());
        assert!(worker
            .handle_result(&[RawActivitySample::new(raw::WALKING, 55)])
            .unwrap());
        assert!(!worker
            .handle_result(&[RawActivitySample::new(raw::WALKING, 60)])
            .unwrap());
    }
}
