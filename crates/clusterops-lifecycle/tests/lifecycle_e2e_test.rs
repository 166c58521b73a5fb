// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests: runtime, queues, pipelines and the mock provisioner.

mod common;

use std::time::Duration;

use clusterops_core::persistence::{OperationStore, OrchestrationStore};
use clusterops_core::{Operation, OperationState, OperationType, Orchestration, OrchestrationState};
use clusterops_lifecycle::provisioner::{MockProvisioner, ProvisionerClient, ProvisionerError};
use clusterops_lifecycle::runtime::LifecycleRuntime;
use serde_json::json;

use common::{TestRuntime, fast_config, provision_operation, runtime_operation, wait_finished};

#[tokio::test]
async fn test_provision_runs_to_success() {
    let rt = TestRuntime::start(MockProvisioner::new().with_polls_until_done(2)).await;

    let id = rt.runtime.submit(provision_operation("instance-1")).await.unwrap();
    let op = rt.wait_finished(&id).await;

    assert_eq!(op.state, OperationState::Succeeded);
    assert!(op.runtime_id.as_deref().unwrap().starts_with("runtime-"));
    assert!(op.runtime_operation_id.is_some());
    assert_eq!(rt.provisioner.call_count("provision_runtime").await, 1);
    assert_eq!(rt.provisioner.call_count("runtime_operation_status").await, 3);

    rt.shutdown().await;
}

#[tokio::test]
async fn test_every_runtime_operation_type_succeeds() {
    let rt = TestRuntime::start(MockProvisioner::new()).await;

    let mut ids = Vec::new();
    for (i, t) in [
        OperationType::Upgrade,
        OperationType::UpgradeShoot,
        OperationType::Hibernate,
        OperationType::ReconnectAgent,
        OperationType::Deprovision,
    ]
    .into_iter()
    .enumerate()
    {
        // Separate instances so the operations do not wait for each other.
        let op = runtime_operation(&format!("instance-{}", i), t);
        ids.push(rt.runtime.submit(op).await.unwrap());
    }

    let finished = futures::future::join_all(ids.iter().map(|id| rt.wait_finished(id))).await;
    assert!(finished.iter().all(|op| op.state == OperationState::Succeeded));
    for method in [
        "upgrade_runtime",
        "upgrade_shoot",
        "hibernate_runtime",
        "reconnect_runtime_agent",
        "deprovision_runtime",
    ] {
        assert_eq!(rt.provisioner.call_count(method).await, 1, "{}", method);
    }

    rt.shutdown().await;
}

#[tokio::test]
async fn test_backend_failure_fails_operation() {
    let rt = TestRuntime::start(MockProvisioner::failing()).await;

    let id = rt
        .runtime
        .submit(runtime_operation("instance-1", OperationType::Hibernate))
        .await
        .unwrap();
    let op = rt.wait_finished(&id).await;

    assert_eq!(op.state, OperationState::Failed);
    assert!(op.description.starts_with("provisioner operation failed"));

    rt.shutdown().await;
}

#[tokio::test]
async fn test_rejected_request_fails_operation() {
    let rt = TestRuntime::start(MockProvisioner::new()).await;
    rt.provisioner
        .fail_next(
            "provision_runtime",
            ProvisionerError::Permanent("plan not available in region".to_string()),
        )
        .await;

    let id = rt.runtime.submit(provision_operation("instance-1")).await.unwrap();
    let op = rt.wait_finished(&id).await;

    assert_eq!(op.state, OperationState::Failed);
    assert!(op.description.contains("plan not available in region"));
    assert_eq!(rt.provisioner.call_count("runtime_operation_status").await, 0);

    rt.shutdown().await;
}

#[tokio::test]
async fn test_temporary_errors_are_retried() {
    let rt = TestRuntime::start(MockProvisioner::new()).await;
    for _ in 0..2 {
        rt.provisioner
            .fail_next(
                "hibernate_runtime",
                ProvisionerError::Temporary("connection reset".to_string()),
            )
            .await;
    }

    let id = rt
        .runtime
        .submit(runtime_operation("instance-1", OperationType::Hibernate))
        .await
        .unwrap();
    let op = rt.wait_finished(&id).await;

    assert_eq!(op.state, OperationState::Succeeded);
    assert_eq!(rt.provisioner.call_count("hibernate_runtime").await, 3);

    rt.shutdown().await;
}

#[tokio::test]
async fn test_retry_window_exhaustion_fails_operation() {
    let config = fast_config().with_max_retry_window(OperationType::ReconnectAgent, Duration::ZERO);
    let rt = TestRuntime::start_with(MockProvisioner::new(), config, |b| b.sweeper(false)).await;
    for _ in 0..5 {
        rt.provisioner
            .fail_next(
                "reconnect_runtime_agent",
                ProvisionerError::Temporary("503".to_string()),
            )
            .await;
    }

    let id = rt
        .runtime
        .submit(runtime_operation("instance-1", OperationType::ReconnectAgent))
        .await
        .unwrap();
    let op = rt.wait_finished(&id).await;

    assert_eq!(op.state, OperationState::Failed);
    assert!(op.description.contains("gave up"));
    assert_eq!(rt.provisioner.call_count("reconnect_runtime_agent").await, 2);

    rt.shutdown().await;
}

#[tokio::test]
async fn test_invalid_parameters_fail_without_provisioner_call() {
    let rt = TestRuntime::start(MockProvisioner::new()).await;

    let op = Operation::new("instance-1", OperationType::Provision)
        .with_parameters(json!({"global_account_id": "ga-1"}));
    let id = rt.runtime.submit(op).await.unwrap();
    let op = rt.wait_finished(&id).await;

    assert_eq!(op.state, OperationState::Failed);
    assert!(op.description.contains("subaccount_id"));
    assert!(rt.provisioner.calls().await.is_empty());

    rt.shutdown().await;
}

#[tokio::test]
async fn test_canceled_orchestration_cancels_operation() {
    let rt = TestRuntime::start(MockProvisioner::new()).await;
    let orchestration = Orchestration::new();
    rt.store.insert_orchestration(&orchestration).await.unwrap();
    rt.store
        .update_orchestration_state(&orchestration.id, OrchestrationState::Canceled, "stopped")
        .await
        .unwrap();

    let op = runtime_operation("instance-1", OperationType::Upgrade)
        .with_orchestration(&orchestration.id);
    let id = rt.runtime.submit(op).await.unwrap();
    let op = rt.wait_finished(&id).await;

    assert_eq!(op.state, OperationState::Canceled);
    assert!(rt.provisioner.calls().await.is_empty());

    rt.shutdown().await;
}

#[tokio::test]
async fn test_operation_waits_for_concurrent_operation_on_instance() {
    let rt = TestRuntime::start(MockProvisioner::new()).await;

    let running = runtime_operation("instance-1", OperationType::Upgrade)
        .with_state(OperationState::InProgress);
    rt.store.insert_operation(&running).await.unwrap();

    let id = rt
        .runtime
        .submit(runtime_operation("instance-1", OperationType::Hibernate))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    let waiting = rt.runtime.operation(&id).await.unwrap();
    assert_eq!(waiting.state, OperationState::Pending);
    assert!(rt.provisioner.calls().await.is_empty());

    let mut done = running.clone();
    done.state = OperationState::Succeeded;
    rt.store.update_operation(done).await.unwrap();

    let op = rt.wait_finished(&id).await;
    assert_eq!(op.state, OperationState::Succeeded);
    assert_eq!(rt.provisioner.call_count("hibernate_runtime").await, 1);

    rt.shutdown().await;
}

#[tokio::test]
async fn test_deprovision_without_runtime_succeeds_without_backend_call() {
    let rt = TestRuntime::start(MockProvisioner::new()).await;

    let op = Operation::new("instance-1", OperationType::Deprovision)
        .with_parameters(json!({"global_account_id": "ga-1"}));
    let id = rt.runtime.submit(op).await.unwrap();
    let op = rt.wait_finished(&id).await;

    assert_eq!(op.state, OperationState::Succeeded);
    assert!(rt.provisioner.calls().await.is_empty());

    rt.shutdown().await;
}

#[tokio::test]
async fn test_resumed_operation_does_not_restart_backend_operation() {
    let rt = TestRuntime::start(MockProvisioner::new().with_polls_until_done(1)).await;

    // State left behind by a worker that died after starting the backend operation.
    let started = rt.provisioner.hibernate_runtime("ga-1", "rt-1").await.unwrap();
    let mut op = runtime_operation("instance-1", OperationType::Hibernate)
        .with_state(OperationState::InProgress);
    op.runtime_operation_id = Some(started.id);
    rt.store.insert_operation(&op).await.unwrap();

    assert!(rt.runtime.enqueue(OperationType::Hibernate, &op.id).unwrap());
    let finished = rt.wait_finished(&op.id).await;

    assert_eq!(finished.state, OperationState::Succeeded);
    assert_eq!(rt.provisioner.call_count("hibernate_runtime").await, 1);

    rt.shutdown().await;
}

#[tokio::test]
async fn test_sweeper_resumes_operation_that_was_never_queued() {
    let rt = TestRuntime::start_with(MockProvisioner::new(), fast_config(), |b| b.sweeper(true)).await;

    let op = runtime_operation("instance-1", OperationType::UpgradeShoot);
    rt.store.insert_operation(&op).await.unwrap();

    let finished = rt.wait_finished(&op.id).await;
    assert_eq!(finished.state, OperationState::Succeeded);
    assert_eq!(rt.provisioner.call_count("upgrade_shoot").await, 1);

    rt.shutdown().await;
}

#[tokio::test]
async fn test_submit_duplicate_operation_is_rejected() {
    let rt = TestRuntime::start(MockProvisioner::new()).await;
    let op = runtime_operation("instance-1", OperationType::Hibernate);

    rt.runtime.submit(op.clone()).await.unwrap();
    let err = rt.runtime.submit(op).await.unwrap_err();
    assert_eq!(err.error_code(), "ALREADY_EXISTS");

    rt.shutdown().await;
}

#[tokio::test]
async fn test_sqlite_backed_runtime() {
    common::init_test_tracing();
    let runtime = LifecycleRuntime::builder()
        .database_url("sqlite::memory:")
        .provisioner(std::sync::Arc::new(MockProvisioner::new()))
        .workers(2)
        .conflict_retry_interval(Duration::from_millis(10))
        .lifecycle_config(fast_config())
        .sweeper(false)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    let id = runtime.submit(provision_operation("instance-1")).await.unwrap();
    let op = wait_finished(runtime.stores().operations.as_ref(), &id).await;

    assert_eq!(op.state, OperationState::Succeeded);
    assert!(op.runtime_id.is_some());

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_file_backed_sqlite_runtime_keeps_operations_across_restarts() {
    common::init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("ops.db").display());

    let start = |url: String| async move {
        LifecycleRuntime::builder()
            .database_url(url)
            .provisioner(std::sync::Arc::new(MockProvisioner::new()))
            .workers(1)
            .lifecycle_config(fast_config())
            .sweeper(false)
            .build()
            .unwrap()
            .start()
            .await
            .unwrap()
    };

    let first = start(url.clone()).await;
    let id = first
        .submit(runtime_operation("instance-1", OperationType::Hibernate))
        .await
        .unwrap();
    wait_finished(first.stores().operations.as_ref(), &id).await;
    first.shutdown().await.unwrap();

    let second = start(url).await;
    let op = second.operation(&id).await.unwrap();
    assert_eq!(op.state, OperationState::Succeeded);
    second.shutdown().await.unwrap();
}
