//! Event streams
//!
//! Each stream starts its underlying source when the consumer listens and
//! stops it on cancel. Without a foreground context both are silent no-ops.

use super::{EventSink, EventSinkRef};
use crate::activity::SessionCallbacks;
use crate::{CoreError, ErrorCode, SensingCore};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct ActivityUpdatesStream {
    core: Arc<SensingCore>,
}

impl ActivityUpdatesStream {
    pub fn new(core: Arc<SensingCore>) -> Self {
        Self { core }
    }

    pub fn on_listen(&self, sink: EventSinkRef) {
        let updates = sink.clone();
        let errors = sink.clone();
        let callbacks = SessionCallbacks::new(
            move |json| match serde_json::from_str::<Value>(&json) {
                Ok(event) => updates.success(event),
                Err(e) => {
                    warn!("Activity data is not valid JSON: {}", e);
                    updates.error(ErrorCode::ActivityDataEncodingFailed);
                }
            },
            || debug!("Activity updates stream is live"),
            move |code| errors.error(code),
        );

        match self.core.start_activity_updates(callbacks) {
            Ok(()) => {}
            Err(CoreError::NotRegistered) => {
                debug!("Activity updates requested without a foreground context");
            }
            Err(e) => {
                warn!("Activity updates not started: {}", e);
                sink.error(e.code());
            }
        }
    }

    pub fn on_cancel(&self) {
        let callbacks = SessionCallbacks::new(
            |_| {},
            || debug!("Activity updates stream closed"),
            |code| warn!("Closing activity updates reported {}", code),
        );
        if let Err(CoreError::NotRegistered) = self.core.stop_activity_updates(callbacks) {
            debug!("Activity updates cancelled without a foreground context");
        }
    }
}

pub struct LocationStatusStream {
    core: Arc<SensingCore>,
}

impl LocationStatusStream {
    pub fn new(core: Arc<SensingCore>) -> Self {
        Self { core }
    }

    pub fn on_listen(&self, sink: EventSinkRef) {
        let result = self
            .core
            .start_location_status(move |enabled| sink.success(Value::Bool(enabled)));
        match result {
            Ok(()) => {}
            Err(CoreError::NotRegistered) => {
                debug!("Location status requested without a foreground context");
            }
            Err(e) => error!("Location status stream not started: {}", e),
        }
    }

    pub fn on_cancel(&self) {
        let _ = self.core.stop_location_status();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    Success(Value),
    Error(ErrorCode),
}

/// Sink that keeps everything it receives
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn success(&self, event: Value) {
        self.events.lock().push(RecordedEvent::Success(event));
    }

    fn error(&self, code: ErrorCode) {
        self.events.lock().push(RecordedEvent::Error(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BridgeSettings, MemoryStorage};

    #[test]
    fn test_streams_are_silent_without_foreground() {
        let core = Arc::new(
            SensingCore::with_backend(BridgeSettings::default(), Arc::new(MemoryStorage::new()))
                .unwrap(),
        );
        let sink = Arc::new(RecordingSink::new());

        let activity = ActivityUpdatesStream::new(core.clone());
        activity.on_listen(sink.clone());
        activity.on_cancel();

        let location = LocationStatusStream::new(core);
        location.on_listen(sink.clone());
        location.on_cancel();

        assert!(sink.is_empty());
    }
}
