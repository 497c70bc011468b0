//! Provisioning stories
//!
//! A platform asks for an instance, polls until the install finished, and
//! sometimes asks again: on a retry, after a timeout, or from several
//! controllers at once.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Notify;

use hb_common::{ErrorKind, OperationState};

use super::helpers::*;

// =============================================================================
// Story: provision, poll, repeat
// =============================================================================

/// Story: the platform provisions a bindable redis and reads its credentials
///
/// The request is accepted asynchronously, the install runs in the
/// background, and polling eventually reports success. The bind data holds
/// credentials rendered from the release and read from its secret.
#[tokio::test]
async fn story_provision_poll_and_repeat() {
    let tb = TestBroker::new(FakeInstaller::default(), true);

    let resp = tb
        .broker
        .provision(&osb_context(), provision_request("i-1", json!({"port": 7000})))
        .await
        .unwrap();
    assert!(resp.is_async);
    let operation_id = resp.operation_key.expect("async provisioning returns a key");

    let last = tb.wait_for_terminal("i-1", &operation_id).await;
    assert_eq!(last.state, OperationState::Succeeded);
    assert_eq!(last.description.as_deref(), Some("provisioning succeeded"));

    let (release, namespace, values) = tb.installer.installs.lock().unwrap()[0].clone();
    assert_eq!(release.as_str(), "hb-redis-micro-i-1");
    assert_eq!(namespace.as_str(), TEST_NAMESPACE);
    assert_eq!(values["port"], 7000);
    assert_eq!(values["persistence"]["enabled"], false);
    assert_eq!(
        values["addonsRepositoryURL"],
        "https://addons.example.com/index.yaml"
    );

    let bind = tb.storage.bind_data.get(&"i-1".into()).await.unwrap();
    assert_eq!(
        bind.credentials["HOST"],
        "hb-redis-micro-i-1.team-a.svc.cluster.local"
    );
    assert_eq!(bind.credentials["PORT"], "7000");
    assert_eq!(bind.credentials["PASSWORD"], "s3cr3t");

    // Same request again: nothing new happens.
    let again = tb
        .broker
        .provision(&osb_context(), provision_request("i-1", json!({"port": 7000})))
        .await
        .unwrap();
    assert!(!again.is_async);
    assert_eq!(again.operation_key, None);
    assert_eq!(tb.installer.install_count(), 1);
    assert_eq!(tb.dispatch_count(), 1);
}

/// Story: a non-bindable bundle succeeds without bind data
#[tokio::test]
async fn story_non_bindable_instance_has_no_credentials() {
    let tb = TestBroker::new(FakeInstaller::default(), false);

    let resp = tb
        .broker
        .provision(&osb_context(), provision_request("i-2", json!({})))
        .await
        .unwrap();
    let last = tb
        .wait_for_terminal("i-2", &resp.operation_key.unwrap())
        .await;

    assert_eq!(last.state, OperationState::Succeeded);
    assert!(tb
        .storage
        .bind_data
        .get(&"i-2".into())
        .await
        .unwrap_err()
        .is_not_found());
}

/// Story: an application binds to the instance once provisioning finished
///
/// Before the install completes there is nothing to hand out; afterwards
/// every binding receives the credentials resolved at provisioning time.
#[tokio::test]
async fn story_bind_after_provisioning() {
    let tb = TestBroker::new(FakeInstaller::default(), true);

    let resp = tb
        .broker
        .provision(&osb_context(), provision_request("i-1", json!({})))
        .await
        .unwrap();
    tb.wait_for_terminal("i-1", &resp.operation_key.unwrap()).await;

    let binding = tb
        .broker
        .bind(&osb_context(), bind_request("i-1", "b-1"))
        .await
        .unwrap();
    assert_eq!(
        binding.credentials["HOST"],
        "hb-redis-micro-i-1.team-a.svc.cluster.local"
    );
    assert_eq!(binding.credentials["PASSWORD"], "s3cr3t");

    let again = tb
        .broker
        .bind(&osb_context(), bind_request("i-1", "b-2"))
        .await
        .unwrap();
    assert_eq!(again, binding);
}

/// Story: an instance of a non-bindable plan refuses bindings
#[tokio::test]
async fn story_non_bindable_instance_refuses_bindings() {
    let tb = TestBroker::new(FakeInstaller::default(), false);

    let resp = tb
        .broker
        .provision(&osb_context(), provision_request("i-2", json!({})))
        .await
        .unwrap();
    tb.wait_for_terminal("i-2", &resp.operation_key.unwrap()).await;

    let err = tb
        .broker
        .bind(&osb_context(), bind_request("i-2", "b-1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

// =============================================================================
// Story: concurrent requests converge
// =============================================================================

/// Story: several controllers provision the same instance at once
///
/// Exactly one operation is created and dispatched; every caller gets its
/// key while the install is still running.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn story_concurrent_requests_converge_on_one_operation() {
    let gate = Arc::new(Notify::new());
    let tb = TestBroker::new(
        FakeInstaller {
            gate: Some(gate.clone()),
            ..Default::default()
        },
        false,
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let broker = tb.broker.clone();
        handles.push(tokio::spawn(async move {
            broker
                .provision(&osb_context(), provision_request("i-1", json!({"a": 1})))
                .await
        }));
    }

    let mut keys = Vec::new();
    for handle in handles {
        let resp = handle.await.unwrap().unwrap();
        assert!(resp.is_async);
        keys.push(resp.operation_key.unwrap());
    }
    keys.dedup();
    assert_eq!(keys.len(), 1);
    assert_eq!(tb.dispatch_count(), 1);

    gate.notify_one();
    let last = tb.wait_for_terminal("i-1", &keys[0]).await;
    assert_eq!(last.state, OperationState::Succeeded);
    assert_eq!(tb.installer.install_count(), 1);
}

/// Story: retrying with different parameters is refused
#[tokio::test]
async fn story_changed_parameters_conflict() {
    let tb = TestBroker::new(FakeInstaller::default(), false);

    let resp = tb
        .broker
        .provision(&osb_context(), provision_request("i-1", json!({"size": "s"})))
        .await
        .unwrap();
    tb.wait_for_terminal("i-1", &resp.operation_key.unwrap())
        .await;

    let err = tb
        .broker
        .provision(&osb_context(), provision_request("i-1", json!({"size": "xl"})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(tb.dispatch_count(), 1);
}

// =============================================================================
// Story: failures are reported through polling
// =============================================================================

/// Story: a failed install is visible to the poller, not the requester
#[tokio::test]
async fn story_install_failure_is_reported_by_last_operation() {
    let tb = TestBroker::new(
        FakeInstaller {
            install_error: Some("timed out waiting for the condition".to_string()),
            ..Default::default()
        },
        true,
    );

    let resp = tb
        .broker
        .provision(&osb_context(), provision_request("i-1", json!({})))
        .await
        .unwrap();
    let last = tb
        .wait_for_terminal("i-1", &resp.operation_key.unwrap())
        .await;

    assert_eq!(last.state, OperationState::Failed);
    assert_eq!(
        last.description.as_deref(),
        Some("provisioning failed on error: while installing helm release: chart error [hb-redis-micro-i-1]: timed out waiting for the condition")
    );
}

/// Story: a bind template pointing at a missing secret fails provisioning
#[tokio::test]
async fn story_missing_credential_secret_fails_provisioning() {
    let tb = TestBroker::new(FakeInstaller::default(), true);

    // Only i-1 has a secret in the credential source.
    let resp = tb
        .broker
        .provision(&osb_context(), provision_request("i-9", json!({})))
        .await
        .unwrap();
    let last = tb
        .wait_for_terminal("i-9", &resp.operation_key.unwrap())
        .await;

    assert_eq!(last.state, OperationState::Failed);
    let description = last.description.unwrap();
    assert!(description.starts_with("resolving bind data failed with error: while resolving bind yaml values"));
    assert!(description.contains("hb-redis-micro-i-9-auth"));
}

/// Story: an unknown plan is refused before anything is recorded
#[tokio::test]
async fn story_unknown_plan_leaves_no_operation() {
    let tb = TestBroker::new(FakeInstaller::default(), false);
    let mut req = provision_request("i-1", json!({}));
    req.plan_id = "plan-enterprise".into();

    let err = tb.broker.provision(&osb_context(), req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert!(tb
        .storage
        .operations
        .get_all(&"i-1".into())
        .await
        .unwrap_err()
        .is_not_found());
    assert_eq!(tb.dispatch_count(), 0);
}

/// Story: the platform retries after a failed install and gets its instance
///
/// The failed create stays in the history; the retry reuses the instance
/// record of the first attempt and ends with credentials in place.
#[tokio::test]
async fn story_failed_install_then_retry_succeeds() {
    let tb = TestBroker::new(
        FakeInstaller {
            failing_installs: AtomicUsize::new(1),
            ..Default::default()
        },
        true,
    );

    let first = tb
        .broker
        .provision(&osb_context(), provision_request("i-1", json!({"port": 7000})))
        .await
        .unwrap()
        .operation_key
        .unwrap();
    let last = tb.wait_for_terminal("i-1", &first).await;
    assert_eq!(last.state, OperationState::Failed);

    let retry = tb
        .broker
        .provision(&osb_context(), provision_request("i-1", json!({"port": 7000})))
        .await
        .unwrap();
    assert!(retry.is_async);
    let second = retry.operation_key.unwrap();
    assert_ne!(second, first);

    let last = tb.wait_for_terminal("i-1", &second).await;
    assert_eq!(last.state, OperationState::Succeeded);
    assert_eq!(tb.installer.install_count(), 2);

    let history = tb.storage.operations.get_all(&"i-1".into()).await.unwrap();
    let states: Vec<_> = history.iter().map(|op| op.state).collect();
    assert_eq!(states, [OperationState::Failed, OperationState::Succeeded]);
    assert_eq!(tb.storage.instances.get_all().await.unwrap().len(), 1);
    let bind = tb.storage.bind_data.get(&"i-1".into()).await.unwrap();
    assert_eq!(bind.credentials["PASSWORD"], "s3cr3t");

    // Now provisioned: the next identical request is a synchronous no-op.
    let again = tb
        .broker
        .provision(&osb_context(), provision_request("i-1", json!({"port": 7000})))
        .await
        .unwrap();
    assert!(!again.is_async);
}
