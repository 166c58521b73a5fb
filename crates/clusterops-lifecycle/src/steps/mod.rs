// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle steps.
//!
//! Every pipeline is built from the same three stages:
//!
//! | Weight | Step | Work |
//! |--------|------|------|
//! | 1 | [`InitialisationStep`] | cancellation and concurrency checks, Pending -> InProgress |
//! | 2 | one trigger step | start the backend operation, record its ID |
//! | 3 | [`CheckRuntimeOperationStep`] | poll the backend operation until it settles |

mod check_runtime_operation;
mod initialisation;
mod trigger;

pub use check_runtime_operation::CheckRuntimeOperationStep;
pub use initialisation::InitialisationStep;
pub use trigger::{
    CreateRuntimeStep, DeprovisionRuntimeStep, HibernateRuntimeStep, ReconnectAgentStep,
    UpgradeRuntimeStep, UpgradeShootStep,
};

use std::sync::Arc;

use clusterops_core::error::{Error, Result};
use clusterops_core::persistence::OrchestrationStore;
use clusterops_core::process::OperationManager;
use clusterops_core::{Operation, OperationType};
use serde::{Deserialize, Serialize};

use crate::config::LifecycleConfig;
use crate::provisioner::{ProvisionerClient, ProvisionerError};

/// Dependencies shared by every lifecycle step.
#[derive(Clone)]
pub struct StepContext {
    /// Conflict-tolerant operation writes.
    pub operation_manager: OperationManager,
    /// Orchestration lookups for cancellation checks.
    pub orchestrations: Arc<dyn OrchestrationStore>,
    /// Provisioning backend.
    pub provisioner: Arc<dyn ProvisionerClient>,
    /// Retry intervals and windows.
    pub config: Arc<LifecycleConfig>,
}

impl StepContext {
    /// Bundle step dependencies.
    pub fn new(
        operation_manager: OperationManager,
        orchestrations: Arc<dyn OrchestrationStore>,
        provisioner: Arc<dyn ProvisionerClient>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            operation_manager,
            orchestrations,
            provisioner,
            config: Arc::new(config),
        }
    }

    /// Retry window for the type of `operation`.
    pub(crate) fn max_retry_window(&self, operation: &Operation) -> std::time::Duration {
        self.config.max_retry_window(operation.operation_type)
    }
}

/// Input carried in [`Operation::parameters`].
///
/// Missing fields deserialize as empty and are reported by
/// [`validate_for`](Self::validate_for), so the error names the field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningParameters {
    /// Global account that owns the cluster.
    #[serde(default)]
    pub global_account_id: String,
    /// Subaccount the cluster is provisioned into.
    #[serde(default)]
    pub subaccount_id: String,
    /// Cloud region.
    #[serde(default)]
    pub region: String,
    /// Service plan.
    #[serde(default)]
    pub plan_id: String,
    /// Requested Kubernetes version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,
    /// Requested worker machine type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
}

impl ProvisioningParameters {
    /// Read and validate the parameters of `operation`.
    pub fn from_operation(operation: &Operation) -> Result<Self> {
        let params: Self =
            serde_json::from_value(operation.parameters.clone()).map_err(|e| Error::Validation {
                field: "parameters".to_string(),
                message: e.to_string(),
            })?;
        params.validate_for(operation.operation_type)?;
        Ok(params)
    }

    /// Check the fields `operation_type` needs.
    pub fn validate_for(&self, operation_type: OperationType) -> Result<()> {
        require("global_account_id", &self.global_account_id)?;
        if operation_type == OperationType::Provision {
            require("subaccount_id", &self.subaccount_id)?;
            require("region", &self.region)?;
            require("plan_id", &self.plan_id)?;
        }
        Ok(())
    }

    /// Serialize into an operation parameter object.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation {
            field: field.to_string(),
            message: "must not be empty".to_string(),
        });
    }
    Ok(())
}

/// The runtime an operation targets. Missing for anything but provisioning is invalid.
pub(crate) fn required_runtime_id(operation: &Operation) -> Result<&str> {
    operation
        .runtime_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Validation {
            field: "runtime_id".to_string(),
            message: format!(
                "{} operation '{}' has no runtime",
                operation.operation_type, operation.id
            ),
        })
}

/// Wrap a rejected provisioner call as the failure of `step`.
pub(crate) fn step_failed(step: &str, err: &ProvisionerError) -> Error {
    Error::StepFailed {
        step: step.to_string(),
        message: err.to_string(),
    }
}
