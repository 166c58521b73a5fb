// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock provisioner for testing.
//!
//! Accepts every request, assigns backend operation IDs, and reports each
//! operation in progress for a configurable number of status polls before
//! settling on a final state.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::traits::*;

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerCall {
    /// Trait method name, e.g. `"provision_runtime"`.
    pub method: &'static str,
    /// Subaccount, runtime, or backend operation the call targeted.
    pub target: String,
}

#[derive(Debug)]
struct MockOperation {
    runtime_id: Option<String>,
    polls_left: usize,
    final_state: RuntimeOperationState,
}

#[derive(Debug, Default)]
struct MockState {
    operations: HashMap<String, MockOperation>,
    calls: Vec<ProvisionerCall>,
    injected: HashMap<&'static str, VecDeque<ProvisionerError>>,
}

/// Mock provisioner for testing.
pub struct MockProvisioner {
    state: Arc<Mutex<MockState>>,
    /// Status polls answered with InProgress before the final state.
    pub polls_until_done: usize,
    /// State reported once the polls are used up.
    pub final_state: RuntimeOperationState,
}

impl Default for MockProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvisioner {
    /// Create a mock whose operations succeed on the first poll.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            polls_until_done: 0,
            final_state: RuntimeOperationState::Succeeded,
        }
    }

    /// Create a mock whose operations fail on the first poll.
    pub fn failing() -> Self {
        Self {
            final_state: RuntimeOperationState::Failed,
            ..Self::new()
        }
    }

    /// Report operations in progress for `polls` status polls first.
    pub fn with_polls_until_done(mut self, polls: usize) -> Self {
        self.polls_until_done = polls;
        self
    }

    /// Make the next call to `method` return `error`. Errors queue up per method.
    pub async fn fail_next(&self, method: &'static str, error: ProvisionerError) {
        self.state
            .lock()
            .await
            .injected
            .entry(method)
            .or_default()
            .push_back(error);
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<ProvisionerCall> {
        self.state.lock().await.calls.clone()
    }

    /// Number of calls made to `method`.
    pub async fn call_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Settle a backend operation immediately with `state`.
    pub async fn complete_operation(&self, operation_id: &str, state: RuntimeOperationState) {
        if let Some(op) = self.state.lock().await.operations.get_mut(operation_id) {
            op.polls_left = 0;
            op.final_state = state;
        }
    }

    async fn record(&self, method: &'static str, target: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(ProvisionerCall {
            method,
            target: target.to_string(),
        });
        match state.injected.get_mut(method).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn start_operation(
        &self,
        method: &'static str,
        target: &str,
        runtime_id: Option<String>,
    ) -> Result<RuntimeOperationStatus> {
        self.record(method, target).await?;

        let id = format!("op-{}", Uuid::new_v4());
        self.state.lock().await.operations.insert(
            id.clone(),
            MockOperation {
                runtime_id: runtime_id.clone(),
                polls_left: self.polls_until_done,
                final_state: self.final_state,
            },
        );

        Ok(RuntimeOperationStatus {
            id,
            state: RuntimeOperationState::Pending,
            message: format!("{} accepted", method),
            runtime_id,
        })
    }
}

#[async_trait]
impl ProvisionerClient for MockProvisioner {
    async fn provision_runtime(
        &self,
        _global_account_id: &str,
        subaccount_id: &str,
        _input: &ProvisionRuntimeInput,
    ) -> Result<RuntimeOperationStatus> {
        let runtime_id = format!("runtime-{}", Uuid::new_v4());
        self.start_operation("provision_runtime", subaccount_id, Some(runtime_id))
            .await
    }

    async fn upgrade_runtime(
        &self,
        _global_account_id: &str,
        runtime_id: &str,
        _input: &UpgradeRuntimeInput,
    ) -> Result<RuntimeOperationStatus> {
        self.start_operation("upgrade_runtime", runtime_id, Some(runtime_id.to_string()))
            .await
    }

    async fn upgrade_shoot(
        &self,
        _global_account_id: &str,
        runtime_id: &str,
        _input: &UpgradeRuntimeInput,
    ) -> Result<RuntimeOperationStatus> {
        self.start_operation("upgrade_shoot", runtime_id, Some(runtime_id.to_string()))
            .await
    }

    async fn deprovision_runtime(
        &self,
        _global_account_id: &str,
        runtime_id: &str,
    ) -> Result<RuntimeOperationStatus> {
        self.start_operation(
            "deprovision_runtime",
            runtime_id,
            Some(runtime_id.to_string()),
        )
        .await
    }

    async fn hibernate_runtime(
        &self,
        _global_account_id: &str,
        runtime_id: &str,
    ) -> Result<RuntimeOperationStatus> {
        self.start_operation("hibernate_runtime", runtime_id, Some(runtime_id.to_string()))
            .await
    }

    async fn reconnect_runtime_agent(
        &self,
        _global_account_id: &str,
        runtime_id: &str,
    ) -> Result<RuntimeOperationStatus> {
        self.start_operation(
            "reconnect_runtime_agent",
            runtime_id,
            Some(runtime_id.to_string()),
        )
        .await
    }

    async fn runtime_operation_status(
        &self,
        _global_account_id: &str,
        operation_id: &str,
    ) -> Result<RuntimeOperationStatus> {
        self.record("runtime_operation_status", operation_id).await?;

        let mut state = self.state.lock().await;
        let op = state.operations.get_mut(operation_id).ok_or_else(|| {
            ProvisionerError::Permanent(format!("unknown operation '{}'", operation_id))
        })?;

        let (op_state, message) = if op.polls_left > 0 {
            op.polls_left -= 1;
            (RuntimeOperationState::InProgress, "in progress".to_string())
        } else {
            (op.final_state, format!("operation {}", op.final_state))
        };

        Ok(RuntimeOperationStatus {
            id: operation_id.to_string(),
            state: op_state,
            message,
            runtime_id: op.runtime_id.clone(),
        })
    }
}
