//! Command dispatch

use super::{MethodCall, MethodResponse};
use crate::foreground::NotificationOptions;
use crate::permission::{ACTIVITY_RECOGNITION, ACTIVITY_RECOGNITION_REQUEST_CODE};
use crate::{CoreError, ErrorCode, SensingCore};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub struct MethodCallHandler {
    core: Arc<SensingCore>,
}

impl MethodCallHandler {
    pub fn new(core: Arc<SensingCore>) -> Self {
        Self { core }
    }

    /// Answer one command. `requestPermission` resolves only once the host
    /// reports the dialog outcome.
    pub async fn handle(&self, call: MethodCall) -> MethodResponse {
        if !self.core.is_attached() {
            return MethodResponse::error(ErrorCode::ActivityNotRegistered);
        }

        debug!("Method call: {}", call.method);
        match call.method.as_str() {
            "checkPermission" => {
                let permission = call.argument_str("permission").unwrap_or(ACTIVITY_RECOGNITION);
                match self.core.check_permission(permission) {
                    Ok(result) => MethodResponse::Success(json!({ "status": result.as_str() })),
                    Err(e) => core_error(e),
                }
            }
            "requestPermission" => self.request_permission(&call).await,
            "isLocationServiceEnabled" => match self.core.is_location_service_enabled() {
                Ok(enabled) => MethodResponse::Success(Value::Bool(enabled)),
                Err(e) => core_error(e),
            },
            "startForegroundService" => {
                let options = if call.arguments.is_null() {
                    NotificationOptions::default()
                } else {
                    match serde_json::from_value::<NotificationOptions>(call.arguments.clone()) {
                        Ok(options) => options,
                        Err(e) => {
                            return MethodResponse::Failure(format!(
                                "invalid notification options: {}",
                                e
                            ))
                        }
                    }
                };
                match self.core.start_foreground_service(&options) {
                    Ok(()) => MethodResponse::Success(Value::Bool(true)),
                    Err(e) => core_error(e),
                }
            }
            "stopForegroundService" => match self.core.stop_foreground_service() {
                Ok(()) => MethodResponse::Success(Value::Bool(true)),
                Err(e) => core_error(e),
            },
            "minimizeApp" => match self.core.minimize_app() {
                Ok(moved) => MethodResponse::Success(Value::Bool(moved)),
                Err(e) => core_error(e),
            },
            _ => MethodResponse::NotImplemented,
        }
    }

    async fn request_permission(&self, call: &MethodCall) -> MethodResponse {
        let permission = call.argument_str("permission").unwrap_or(ACTIVITY_RECOGNITION);
        let request_code = match call.argument_i64("requestCode") {
            None => ACTIVITY_RECOGNITION_REQUEST_CODE,
            Some(code) => match i32::try_from(code) {
                Ok(code) => code,
                Err(_) => {
                    return MethodResponse::Failure(format!("requestCode out of range: {}", code))
                }
            },
        };

        let pending = match self.core.request_permission(permission, request_code) {
            Ok(pending) => pending,
            Err(e) => return core_error(e),
        };
        match pending.outcome().await {
            Ok(result) => MethodResponse::Success(json!({ "status": result.as_str() })),
            Err(code) => MethodResponse::error(code),
        }
    }
}

fn core_error(err: CoreError) -> MethodResponse {
    match err {
        CoreError::Config(msg) | CoreError::Platform(msg) => MethodResponse::Failure(msg),
        other => MethodResponse::Error {
            code: other.code(),
            message: Some(other.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BridgeSettings, MemoryStorage};

    #[tokio::test]
    async fn test_unattached_answers_not_registered() {
        let core = SensingCore::with_backend(
            BridgeSettings::default(),
            Arc::new(MemoryStorage::new()),
        )
        .unwrap();
        let handler = MethodCallHandler::new(Arc::new(core));

        for method in ["checkPermission", "minimizeApp", "somethingElse"] {
            let response = handler.handle(MethodCall::new(method, Value::Null)).await;
            assert_eq!(
                response,
                MethodResponse::error(ErrorCode::ActivityNotRegistered)
            );
        }
    }

    #[test]
    fn test_config_errors_become_failures() {
        assert_eq!(
            core_error(CoreError::Config("empty channel".into())),
            MethodResponse::Failure("empty channel".into())
        );
        assert!(matches!(
            core_error(CoreError::NotRegistered),
            MethodResponse::Error {
                code: ErrorCode::ActivityNotRegistered,
                ..
            }
        ));
    }
}
