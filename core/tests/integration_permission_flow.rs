// Integration test: permission check/request through the command surface
//
// The OS dialog answers out of band via on_request_permissions_result while
// the requestPermission call is still waiting.

mod common;

use common::{attached_core, attached_core_with, wait_until, FakePlatform};
use sensegate_core::channel::{MethodCall, MethodCallHandler, MethodResponse};
use sensegate_core::permission::{
    ACCESS_FINE_LOCATION, ACTIVITY_RECOGNITION, ACTIVITY_RECOGNITION_REQUEST_CODE,
};
use sensegate_core::{
    BridgeSettings, ErrorCode, GrantResult, MemoryStorage, PermissionResult, PermissionStore,
    PlatformHandles,
};
use serde_json::json;
use std::sync::Arc;

fn status(result: PermissionResult) -> MethodResponse {
    MethodResponse::Success(json!({ "status": result.as_str() }))
}

#[tokio::test]
async fn test_check_permission_command() {
    let platform = FakePlatform::new(30);
    let handler = MethodCallHandler::new(attached_core(&platform));

    let response = handler
        .handle(MethodCall::new(
            "checkPermission",
            json!({ "permission": ACTIVITY_RECOGNITION }),
        ))
        .await;
    assert_eq!(response, status(PermissionResult::Denied));

    platform.grant(ACTIVITY_RECOGNITION);
    let response = handler
        .handle(MethodCall::new("checkPermission", serde_json::Value::Null))
        .await;
    assert_eq!(response, status(PermissionResult::Granted));
}

#[tokio::test]
async fn test_gated_permission_on_old_os_skips_dialog() {
    let platform = FakePlatform::new(28);
    let core = attached_core(&platform);
    let handler = MethodCallHandler::new(core.clone());

    assert_eq!(
        core.check_permission(ACTIVITY_RECOGNITION),
        Ok(PermissionResult::Granted)
    );
    let response = handler
        .handle(MethodCall::new(
            "requestPermission",
            json!({ "permission": ACTIVITY_RECOGNITION, "requestCode": 200 }),
        ))
        .await;

    assert_eq!(response, status(PermissionResult::Granted));
    assert_eq!(platform.dialog_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_resolved_by_dialog_result() {
    let platform = FakePlatform::new(30);
    let backend = Arc::new(MemoryStorage::new());
    let core = attached_core_with(&platform, BridgeSettings::default(), backend.clone());
    let handler = MethodCallHandler::new(core.clone());

    let call = tokio::spawn(async move {
        handler
            .handle(MethodCall::new("requestPermission", json!({})))
            .await
    });

    let dialog_platform = platform.clone();
    assert!(wait_until(move || dialog_platform.dialog_count() == 1));
    assert_eq!(
        platform.dialogs.lock()[0],
        (
            vec![ACTIVITY_RECOGNITION.to_string()],
            ACTIVITY_RECOGNITION_REQUEST_CODE
        )
    );

    platform.grant(ACTIVITY_RECOGNITION);
    assert!(core.on_request_permissions_result(
        ACTIVITY_RECOGNITION_REQUEST_CODE,
        &[ACTIVITY_RECOGNITION.to_string()],
        &[GrantResult::Granted],
    ));

    assert_eq!(call.await.unwrap(), status(PermissionResult::Granted));
    assert_eq!(
        PermissionStore::persistent(backend)
            .get(ACTIVITY_RECOGNITION)
            .unwrap(),
        Some(PermissionResult::Granted)
    );
}

#[tokio::test]
async fn test_denial_without_rationale_becomes_permanent() {
    let platform = FakePlatform::new(30);
    let core = attached_core(&platform);

    let pending = core.request_permission(ACCESS_FINE_LOCATION, 7).unwrap();
    assert!(core.on_request_permissions_result(
        7,
        &[ACCESS_FINE_LOCATION.to_string()],
        &[GrantResult::Denied],
    ));
    assert_eq!(pending.outcome().await, Ok(PermissionResult::PermanentlyDenied));

    // The OS still refuses a rationale, so the stored history sticks
    assert_eq!(
        core.check_permission(ACCESS_FINE_LOCATION),
        Ok(PermissionResult::PermanentlyDenied)
    );

    // Once the OS offers a rationale again it is a plain denial
    platform.set_rationale(ACCESS_FINE_LOCATION, true);
    assert_eq!(
        core.check_permission(ACCESS_FINE_LOCATION),
        Ok(PermissionResult::Denied)
    );
}

#[tokio::test]
async fn test_interrupted_request_leaves_store_untouched() {
    let platform = FakePlatform::new(30);
    let backend = Arc::new(MemoryStorage::new());
    let store = PermissionStore::persistent(backend.clone());
    store
        .put(ACTIVITY_RECOGNITION, PermissionResult::Denied)
        .unwrap();
    let core = attached_core_with(&platform, BridgeSettings::default(), backend);

    let pending = core.request_permission(ACTIVITY_RECOGNITION, 200).unwrap();
    assert!(core.on_request_permissions_result(200, &[], &[]));

    assert_eq!(
        pending.outcome().await,
        Err(ErrorCode::PermissionRequestCancelled)
    );
    assert_eq!(
        store.get(ACTIVITY_RECOGNITION).unwrap(),
        Some(PermissionResult::Denied)
    );
}

#[tokio::test]
async fn test_superseded_request_is_cancelled_not_lost() {
    let platform = FakePlatform::new(30);
    let core = attached_core(&platform);

    let first = core.request_permission(ACTIVITY_RECOGNITION, 200).unwrap();
    let second = core.request_permission(ACCESS_FINE_LOCATION, 201).unwrap();

    assert_eq!(first.outcome().await, Err(ErrorCode::PermissionRequestCancelled));

    // The stale code no longer matches anything
    assert!(!core.on_request_permissions_result(
        200,
        &[ACTIVITY_RECOGNITION.to_string()],
        &[GrantResult::Granted],
    ));
    assert!(core.on_request_permissions_result(
        201,
        &[ACCESS_FINE_LOCATION.to_string()],
        &[GrantResult::Granted],
    ));
    assert_eq!(second.outcome().await, Ok(PermissionResult::Granted));
}

#[tokio::test]
async fn test_detach_cancels_open_request() {
    let platform = FakePlatform::new(30);
    let core = attached_core(&platform);

    let pending = core.request_permission(ACTIVITY_RECOGNITION, 200).unwrap();
    core.detach();

    let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), pending.outcome())
        .await
        .expect("request left unresolved after detach");
    assert_eq!(outcome, Err(ErrorCode::PermissionRequestCancelled));
}

#[tokio::test]
async fn test_reattach_cancels_open_request() {
    let platform = FakePlatform::new(30);
    let core = attached_core(&platform);

    let pending = core.request_permission(ACTIVITY_RECOGNITION, 200).unwrap();
    core.attach(PlatformHandles::from_bridge(platform.clone()))
        .unwrap();

    let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), pending.outcome())
        .await
        .expect("request left unresolved after re-attach");
    assert_eq!(outcome, Err(ErrorCode::PermissionRequestCancelled));

    // The new context has nothing waiting on the old code
    assert!(!core.on_request_permissions_result(
        200,
        &[ACTIVITY_RECOGNITION.to_string()],
        &[GrantResult::Granted],
    ));
}

#[tokio::test]
async fn test_request_times_out_when_configured() {
    let platform = FakePlatform::new(30);
    let settings = BridgeSettings {
        permission_request_timeout_secs: Some(1),
        ..Default::default()
    };
    let core = attached_core_with(&platform, settings, Arc::new(MemoryStorage::new()));

    let pending = core.request_permission(ACTIVITY_RECOGNITION, 200).unwrap();
    assert_eq!(
        pending.outcome().await,
        Err(ErrorCode::PermissionRequestCancelled)
    );
    assert!(!core.on_request_permissions_result(
        200,
        &[ACTIVITY_RECOGNITION.to_string()],
        &[GrantResult::Granted],
    ));
}

#[tokio::test]
async fn test_other_commands() {
    let platform = FakePlatform::new(30);
    let handler = MethodCallHandler::new(attached_core(&platform));

    assert_eq!(
        handler
            .handle(MethodCall::new("isLocationServiceEnabled", serde_json::Value::Null))
            .await,
        MethodResponse::Success(json!(true))
    );

    let response = handler
        .handle(MethodCall::new(
            "startForegroundService",
            json!({ "notificationChannelId": "tracking", "notificationContentTitle": "On" }),
        ))
        .await;
    assert!(response.is_success());
    {
        let starts = platform.service_starts.lock();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].0.notification_channel_id, "tracking");
        assert!(starts[0].1);
    }

    let response = handler
        .handle(MethodCall::new(
            "startForegroundService",
            json!({ "notificationChannelId": "" }),
        ))
        .await;
    assert!(matches!(response, MethodResponse::Failure(_)));

    assert!(handler
        .handle(MethodCall::new("stopForegroundService", serde_json::Value::Null))
        .await
        .is_success());
    assert_eq!(
        handler
            .handle(MethodCall::new("minimizeApp", serde_json::Value::Null))
            .await,
        MethodResponse::Success(json!(true))
    );
    assert_eq!(
        handler
            .handle(MethodCall::new("getGeofences", serde_json::Value::Null))
            .await,
        MethodResponse::NotImplemented
    );
}
