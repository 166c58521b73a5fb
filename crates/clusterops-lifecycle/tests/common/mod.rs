// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared test infrastructure for clusterops-lifecycle integration tests.
//!
//! Starts a runtime over an in-memory store and the mock provisioner, with
//! millisecond intervals so full pipelines finish quickly.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use clusterops_core::persistence::{MemoryStore, OperationStore};
use clusterops_core::{Operation, OperationType};
use clusterops_lifecycle::LifecycleConfig;
use clusterops_lifecycle::provisioner::MockProvisioner;
use clusterops_lifecycle::runtime::{LifecycleRuntime, LifecycleRuntimeBuilder};
use serde_json::json;

/// Initialize tracing for tests (only once).
pub fn init_test_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("clusterops_lifecycle=debug".parse().unwrap())
                    .add_directive("clusterops_core=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Intervals short enough for tests.
pub fn fast_config() -> LifecycleConfig {
    LifecycleConfig {
        step_retry_interval: Duration::from_millis(20),
        status_check_interval: Duration::from_millis(20),
        sweep_interval: Duration::from_millis(50),
        sweep_min_age: Duration::ZERO,
        ..Default::default()
    }
}

/// Runtime plus the store and provisioner behind it.
pub struct TestRuntime {
    pub runtime: LifecycleRuntime,
    pub store: Arc<MemoryStore>,
    pub provisioner: Arc<MockProvisioner>,
}

impl TestRuntime {
    pub async fn start(provisioner: MockProvisioner) -> Self {
        Self::start_with(provisioner, fast_config(), |b| b.sweeper(false)).await
    }

    pub async fn start_with(
        provisioner: MockProvisioner,
        config: LifecycleConfig,
        customize: impl FnOnce(LifecycleRuntimeBuilder) -> LifecycleRuntimeBuilder,
    ) -> Self {
        init_test_tracing();
        let store = Arc::new(MemoryStore::new());
        let provisioner = Arc::new(provisioner);

        let builder = LifecycleRuntime::builder()
            .store(store.clone())
            .provisioner(provisioner.clone())
            .workers(4)
            .conflict_retry_interval(Duration::from_millis(10))
            .lifecycle_config(config);
        let runtime = customize(builder)
            .build()
            .expect("Failed to build runtime")
            .start()
            .await
            .expect("Failed to start runtime");

        Self {
            runtime,
            store,
            provisioner,
        }
    }

    /// Poll the store until the operation is terminal.
    pub async fn wait_finished(&self, operation_id: &str) -> Operation {
        wait_finished(self.store.as_ref(), operation_id).await
    }

    pub async fn shutdown(self) {
        self.runtime
            .shutdown()
            .await
            .expect("Failed to shut down runtime");
    }
}

/// Poll `store` until the operation is terminal, failing the test after 10s.
pub async fn wait_finished(store: &dyn OperationStore, operation_id: &str) -> Operation {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let op = store
                .get_operation_by_id(operation_id)
                .await
                .expect("Failed to load operation");
            if op.is_finished() {
                return op;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Operation did not finish in time")
}

pub fn provision_operation(instance_id: &str) -> Operation {
    Operation::new(instance_id, OperationType::Provision).with_parameters(json!({
        "global_account_id": "ga-1",
        "subaccount_id": "sa-1",
        "region": "eu-west-1",
        "plan_id": "standard",
    }))
}

/// Operation of `operation_type` on an existing runtime.
pub fn runtime_operation(instance_id: &str, operation_type: OperationType) -> Operation {
    Operation::new(instance_id, operation_type)
        .with_runtime_id("rt-1")
        .with_parameters(json!({"global_account_id": "ga-1"}))
}
