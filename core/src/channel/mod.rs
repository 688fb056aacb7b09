//! Boundary surface towards the embedding application
//!
//! Transport-agnostic: the host's command channel hands us a [`MethodCall`]
//! and relays the [`MethodResponse`]; its event channels drive the streams in
//! [`events`] through `on_listen`/`on_cancel` and an [`EventSink`].

pub mod events;
pub mod methods;

pub use events::{ActivityUpdatesStream, LocationStatusStream, RecordedEvent, RecordingSink};
pub use methods::MethodCallHandler;

use crate::ErrorCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const METHOD_CHANNEL: &str = "sensegate/method";
pub const ACTIVITY_UPDATES_CHANNEL: &str = "sensegate/activity_updates";
pub const LOCATION_SERVICE_STATUS_CHANNEL: &str = "sensegate/location_service_status";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl MethodCall {
    pub fn new(method: &str, arguments: serde_json::Value) -> Self {
        Self {
            method: method.to_string(),
            arguments,
        }
    }

    /// String argument `name`, if present
    pub fn argument_str(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).and_then(|v| v.as_str())
    }

    pub fn argument_i64(&self, name: &str) -> Option<i64> {
        self.arguments.get(name).and_then(|v| v.as_i64())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MethodResponse {
    Success(serde_json::Value),
    /// A failure from the closed error-code set
    Error {
        code: ErrorCode,
        message: Option<String>,
    },
    /// Bad arguments or a host refusal with no error code of its own
    Failure(String),
    NotImplemented,
}

impl MethodResponse {
    pub fn error(code: ErrorCode) -> Self {
        MethodResponse::Error {
            code,
            message: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, MethodResponse::Success(_))
    }
}

/// Receiving end of one event stream subscription
pub trait EventSink: Send + Sync {
    fn success(&self, event: serde_json::Value);
    fn error(&self, code: ErrorCode);
}

pub type EventSinkRef = Arc<dyn EventSink>;
