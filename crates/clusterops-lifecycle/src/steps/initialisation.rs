// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! First step of every pipeline.

use async_trait::async_trait;
use clusterops_core::process::{Step, StepResult};
use clusterops_core::{Operation, OperationState, OperationType};
use tracing::{debug, info, warn};

use super::StepContext;

/// Gate an operation before any backend work starts.
///
/// A Pending operation is canceled when its orchestration was canceled, waits
/// while another operation on the same instance is in progress, and is
/// refused when the instance is being or has been deprovisioned. Otherwise
/// it moves to InProgress. Operations already in progress pass through.
pub struct InitialisationStep {
    context: StepContext,
}

impl InitialisationStep {
    /// Create the step.
    pub fn new(context: StepContext) -> Self {
        Self { context }
    }

    async fn orchestration_canceled(&self, operation: &Operation) -> clusterops_core::Result<bool> {
        let Some(orchestration_id) = &operation.orchestration_id else {
            return Ok(false);
        };
        match self
            .context
            .orchestrations
            .get_orchestration_by_id(orchestration_id)
            .await
        {
            Ok(orchestration) => Ok(orchestration.state.is_canceled()),
            Err(e) if e.is_not_found() => {
                warn!(%orchestration_id, "Orchestration not found, treating as active");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Step for InitialisationStep {
    fn name(&self) -> &str {
        "initialisation"
    }

    async fn run(&self, operation: Operation) -> StepResult {
        if operation.is_finished() || operation.state != OperationState::Pending {
            return StepResult::advance(operation);
        }

        let manager = &self.context.operation_manager;
        let retry_interval = self.context.config.step_retry_interval;
        let window = self.context.max_retry_window(&operation);

        match self.orchestration_canceled(&operation).await {
            Ok(true) => {
                info!(operation_id = %operation.id, "Orchestration canceled, skipping operation");
                return manager
                    .operation_canceled(operation, "orchestration was canceled")
                    .await;
            }
            Ok(false) => {}
            Err(e) => {
                let message = format!("failed to read orchestration: {}", e);
                return manager
                    .retry_operation(operation, &message, retry_interval, window)
                    .await;
            }
        }

        let last = match manager.store().get_last_operation(&operation.instance_id).await {
            Ok(last) if last.id != operation.id => Some(last),
            Ok(_) => None,
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                let message = format!("failed to check concurrent operations: {}", e);
                return manager
                    .retry_operation(operation, &message, retry_interval, window)
                    .await;
            }
        };

        if let Some(last) = last {
            let deprovisioning = last.operation_type == OperationType::Deprovision
                && operation.operation_type != OperationType::Deprovision;

            if deprovisioning && last.state == OperationState::Succeeded {
                return manager
                    .operation_failed(operation, "instance was deprovisioned", None)
                    .await;
            }

            if !last.is_finished() {
                if deprovisioning {
                    let message = format!("instance is being deprovisioned by operation {}", last.id);
                    return if operation.orchestration_id.is_some() {
                        manager.operation_canceled(operation, &message).await
                    } else {
                        manager.operation_failed(operation, &message, None).await
                    };
                }

                debug!(
                    operation_id = %operation.id,
                    blocking_operation_id = %last.id,
                    blocking_type = %last.operation_type,
                    "Waiting for concurrent operation"
                );
                return StepResult::retry(operation, self.context.config.status_check_interval);
            }
        }

        manager
            .operation_in_progress(operation, "operation started")
            .await
    }
}
