//! Deprovisioning stories

use std::time::Duration;

use serde_json::json;

use hb_broker::LastOperationRequest;
use hb_common::{OperationState, OperationType, ReleaseName};

use super::helpers::*;

/// Story: the platform removes an instance the broker never provisioned
///
/// The broker answers "gone" and records nothing.
#[tokio::test]
async fn story_unknown_instance_is_gone() {
    let tb = TestBroker::new(FakeInstaller::default(), false);

    let err = tb
        .broker
        .deprovision(&osb_context(), deprovision_request("i-404"))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(tb.dispatch_count(), 0);
    assert!(tb.installer.deletes.lock().unwrap().is_empty());
}

/// Story: full lifecycle from provision to removal
///
/// After deprovisioning, the release is deleted, the credentials are gone,
/// the newest operation is the removal, and repeating the removal is a
/// synchronous no-op.
#[tokio::test]
async fn story_provision_then_deprovision() {
    let tb = TestBroker::new(FakeInstaller::default(), true);

    let created = tb
        .broker
        .provision(&osb_context(), provision_request("i-1", json!({})))
        .await
        .unwrap()
        .operation_key
        .unwrap();
    tb.wait_for_terminal("i-1", &created).await;
    assert!(tb.storage.bind_data.get(&"i-1".into()).await.is_ok());

    let resp = tb
        .broker
        .deprovision(&osb_context(), deprovision_request("i-1"))
        .await
        .unwrap();
    assert!(resp.is_async);
    let removed = resp.operation_key.unwrap();
    assert_ne!(removed, created);

    let last = tb.wait_for_terminal("i-1", &removed).await;
    assert_eq!(last.state, OperationState::Succeeded);
    assert_eq!(last.description.as_deref(), Some("deprovisioning succeeded"));
    assert_eq!(
        tb.installer.deletes.lock().unwrap().as_slice(),
        &[ReleaseName::new("hb-redis-micro-i-1")]
    );
    assert!(tb
        .storage
        .bind_data
        .get(&"i-1".into())
        .await
        .unwrap_err()
        .is_not_found());

    // Polling without a key reports the newest operation.
    let latest = tb
        .broker
        .last_operation(
            &osb_context(),
            LastOperationRequest {
                instance_id: "i-1".into(),
                operation_key: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(latest, last);
    let history = tb.storage.operations.get_all(&"i-1".into()).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history
        .iter()
        .any(|op| op.type_ == OperationType::Remove && op.operation_id == removed));

    let again = tb
        .broker
        .deprovision(&osb_context(), deprovision_request("i-1"))
        .await
        .unwrap();
    assert!(!again.is_async);
    assert_eq!(tb.dispatch_count(), 2);
}

/// Story: shutting down waits for installs that are already running
#[tokio::test]
async fn story_shutdown_drains_in_flight_operations() {
    let tb = TestBroker::new(
        FakeInstaller {
            delay: Duration::from_millis(50),
            ..Default::default()
        },
        false,
    );

    let created = tb
        .broker
        .provision(&osb_context(), provision_request("i-1", json!({})))
        .await
        .unwrap()
        .operation_key
        .unwrap();
    assert_eq!(tb.dispatcher().in_flight(), 1);

    assert!(tb.broker.shutdown().await);
    let op = tb
        .storage
        .operations
        .get(&"i-1".into(), &created)
        .await
        .unwrap();
    assert_eq!(op.state, OperationState::Succeeded);
}

/// Story: an instance is deprovisioned and later provisioned again under the same ID
#[tokio::test]
async fn story_reprovision_after_deprovision() {
    let tb = TestBroker::new(FakeInstaller::default(), false);

    for _ in 0..2 {
        let created = tb
            .broker
            .provision(&osb_context(), provision_request("i-1", json!({})))
            .await
            .unwrap()
            .operation_key
            .expect("instance is not provisioned, so the request is accepted");
        assert_eq!(
            tb.wait_for_terminal("i-1", &created).await.state,
            OperationState::Succeeded
        );

        let removed = tb
            .broker
            .deprovision(&osb_context(), deprovision_request("i-1"))
            .await
            .unwrap()
            .operation_key
            .unwrap();
        assert_eq!(
            tb.wait_for_terminal("i-1", &removed).await.state,
            OperationState::Succeeded
        );
    }

    assert_eq!(tb.installer.install_count(), 2);
    assert_eq!(tb.installer.deletes.lock().unwrap().len(), 2);
    assert_eq!(tb.storage.instances.get_all().await.unwrap().len(), 1);
}
