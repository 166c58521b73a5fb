// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Poll the backend operation started by a trigger step.

use async_trait::async_trait;
use clusterops_core::process::{Step, StepResult};
use clusterops_core::Operation;
use tracing::{debug, info};

use super::{ProvisioningParameters, StepContext, step_failed};
use crate::provisioner::RuntimeOperationState;

/// Wait until the recorded backend operation succeeds or fails.
///
/// Operations without a backend operation advance immediately.
pub struct CheckRuntimeOperationStep {
    context: StepContext,
}

impl CheckRuntimeOperationStep {
    /// Create the step.
    pub fn new(context: StepContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Step for CheckRuntimeOperationStep {
    fn name(&self) -> &str {
        "check_runtime_operation"
    }

    async fn run(&self, operation: Operation) -> StepResult {
        let Some(runtime_operation_id) = operation.runtime_operation_id.clone() else {
            return StepResult::advance(operation);
        };

        let manager = &self.context.operation_manager;
        let window = self.context.max_retry_window(&operation);

        let params = match ProvisioningParameters::from_operation(&operation) {
            Ok(params) => params,
            Err(e) => {
                return manager
                    .operation_failed(operation, "invalid operation parameters", Some(e))
                    .await;
            }
        };

        let status = match self
            .context
            .provisioner
            .runtime_operation_status(&params.global_account_id, &runtime_operation_id)
            .await
        {
            Ok(status) => status,
            Err(e) if e.is_temporary() => {
                let message = format!("failed to read provisioner operation status: {}", e);
                return manager
                    .retry_operation(
                        operation,
                        &message,
                        self.context.config.step_retry_interval,
                        window,
                    )
                    .await;
            }
            Err(e) => {
                return manager
                    .operation_failed(
                        operation,
                        "provisioner operation status unavailable",
                        Some(step_failed(self.name(), &e)),
                    )
                    .await;
            }
        };

        match status.state {
            RuntimeOperationState::Pending | RuntimeOperationState::InProgress => {
                debug!(
                    %runtime_operation_id,
                    state = %status.state,
                    "Provisioner operation still running"
                );
                let message = format!("waiting for provisioner operation: {}", status.message);
                manager
                    .retry_operation(
                        operation,
                        &message,
                        self.context.config.status_check_interval,
                        window,
                    )
                    .await
            }
            RuntimeOperationState::Succeeded => {
                info!(%runtime_operation_id, "Provisioner operation succeeded");
                match status.runtime_id {
                    Some(runtime_id) if operation.runtime_id.as_deref() != Some(runtime_id.as_str()) => {
                        let (operation, delay) = manager
                            .update_operation(operation, |op| op.runtime_id = Some(runtime_id))
                            .await;
                        StepResult::retry(operation, delay)
                    }
                    _ => StepResult::advance(operation),
                }
            }
            RuntimeOperationState::Failed => {
                let message = format!("provisioner operation failed: {}", status.message);
                manager.operation_failed(operation, &message, None).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use clusterops_core::persistence::{MemoryStore, OperationStore};
    use clusterops_core::process::OperationManager;
    use clusterops_core::{OperationState, OperationType};
    use serde_json::json;

    use crate::config::LifecycleConfig;
    use crate::provisioner::{MockProvisioner, ProvisionerClient, ProvisionerError};

    struct Fixture {
        store: Arc<MemoryStore>,
        provisioner: Arc<MockProvisioner>,
        step: CheckRuntimeOperationStep,
    }

    fn fixture(provisioner: MockProvisioner) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let provisioner = Arc::new(provisioner);
        let config = LifecycleConfig {
            status_check_interval: Duration::from_millis(40),
            step_retry_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let context = StepContext::new(
            OperationManager::new(store.clone()),
            store.clone(),
            provisioner.clone(),
            config,
        );
        Fixture {
            store,
            provisioner,
            step: CheckRuntimeOperationStep::new(context),
        }
    }

    async fn started_hibernation(fixture: &Fixture) -> Operation {
        let status = fixture
            .provisioner
            .hibernate_runtime("ga-1", "rt-1")
            .await
            .unwrap();
        let mut op = Operation::new("i-1", OperationType::Hibernate)
            .with_state(OperationState::InProgress)
            .with_runtime_id("rt-1")
            .with_parameters(json!({"global_account_id": "ga-1"}));
        op.runtime_operation_id = Some(status.id);
        fixture.store.insert_operation(&op).await.unwrap();
        op
    }

    #[tokio::test]
    async fn test_no_backend_operation_advances() {
        let fixture = fixture(MockProvisioner::new());
        let op = Operation::new("i-1", OperationType::Deprovision);

        let result = fixture.step.run(op).await;

        assert!(result.is_advance());
        assert!(fixture.provisioner.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_polls_until_succeeded() {
        let fixture = fixture(MockProvisioner::new().with_polls_until_done(1));
        let op = started_hibernation(&fixture).await;

        let first = fixture.step.run(op).await;
        assert_eq!(first.delay, Duration::from_millis(40));
        assert!(first.operation.description.starts_with("waiting for provisioner operation"));

        let second = fixture.step.run(first.operation).await;
        assert!(second.is_advance());
        assert_eq!(
            fixture.provisioner.call_count("runtime_operation_status").await,
            2
        );
    }

    #[tokio::test]
    async fn test_backend_failure_fails_operation() {
        let fixture = fixture(MockProvisioner::failing());
        let op = started_hibernation(&fixture).await;

        let result = fixture.step.run(op).await;

        assert!(result.error.is_some());
        assert_eq!(result.operation.state, OperationState::Failed);
        assert!(result.operation.description.starts_with("provisioner operation failed"));
    }

    #[tokio::test]
    async fn test_temporary_status_error_retries_with_step_interval() {
        let fixture = fixture(MockProvisioner::new());
        let op = started_hibernation(&fixture).await;
        fixture
            .provisioner
            .fail_next(
                "runtime_operation_status",
                ProvisionerError::Temporary("timeout".to_string()),
            )
            .await;

        let result = fixture.step.run(op).await;

        assert!(result.error.is_none());
        assert_eq!(result.delay, Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_success_records_assigned_runtime() {
        let fixture = fixture(MockProvisioner::new());
        let status = fixture
            .provisioner
            .provision_runtime(
                "ga-1",
                "sa-1",
                &crate::provisioner::ProvisionRuntimeInput {
                    instance_id: "i-1".to_string(),
                    cluster_name: "c-i1".to_string(),
                    region: "eu-west-1".to_string(),
                    plan_id: "standard".to_string(),
                    kubernetes_version: None,
                    machine_type: None,
                },
            )
            .await
            .unwrap();
        let mut op = Operation::new("i-1", OperationType::Provision)
            .with_state(OperationState::InProgress)
            .with_parameters(json!({
                "global_account_id": "ga-1",
                "subaccount_id": "sa-1",
                "region": "eu-west-1",
                "plan_id": "standard",
            }));
        op.runtime_operation_id = Some(status.id);
        fixture.store.insert_operation(&op).await.unwrap();

        let result = fixture.step.run(op).await;

        assert!(result.is_advance());
        assert_eq!(result.operation.runtime_id, status.runtime_id);
        let stored = fixture.store.get_operation_by_id(&result.operation.id).await.unwrap();
        assert_eq!(stored.runtime_id, status.runtime_id);
    }
}
