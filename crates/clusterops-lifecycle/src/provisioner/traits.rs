// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioner client trait definitions.
//!
//! Defines the abstract interface to the infrastructure-provisioning backend.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from provisioner calls.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ProvisionerError {
    /// The call may succeed if repeated (network failure, 5xx, throttling).
    #[error("temporary provisioner error: {0}")]
    Temporary(String),

    /// The call will keep failing (rejected input, unknown runtime).
    #[error("provisioner rejected the request: {0}")]
    Permanent(String),
}

impl ProvisionerError {
    /// True for errors worth retrying.
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }
}

/// Result type for provisioner calls.
pub type Result<T> = std::result::Result<T, ProvisionerError>;

/// State of an operation running on the provisioning backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeOperationState {
    /// Accepted, not started.
    Pending,
    /// Running.
    InProgress,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
}

impl RuntimeOperationState {
    /// True for Succeeded and Failed.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for RuntimeOperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status of a backend operation, as returned by every provisioner call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeOperationStatus {
    /// Backend operation ID.
    pub id: String,
    /// Current state.
    pub state: RuntimeOperationState,
    /// Human-readable progress text.
    pub message: String,
    /// Runtime the operation acts on, once the backend assigned one.
    pub runtime_id: Option<String>,
}

/// Input for creating a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRuntimeInput {
    /// Broker-side instance the runtime belongs to.
    pub instance_id: String,
    /// Cluster name requested on the backend.
    pub cluster_name: String,
    /// Cloud region.
    pub region: String,
    /// Service plan the cluster is sized from.
    pub plan_id: String,
    /// Kubernetes version; backend default when `None`.
    pub kubernetes_version: Option<String>,
    /// Worker machine type; plan default when `None`.
    pub machine_type: Option<String>,
}

/// Input for upgrading the cluster runtime or its shoot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRuntimeInput {
    /// Target Kubernetes version.
    pub kubernetes_version: Option<String>,
    /// Target worker machine type.
    pub machine_type: Option<String>,
}

/// Client for the infrastructure-provisioning backend.
///
/// Every mutating call starts an asynchronous backend operation and returns
/// its initial status; progress is then polled with
/// [`runtime_operation_status`](Self::runtime_operation_status).
#[async_trait]
pub trait ProvisionerClient: Send + Sync {
    /// Start creating a runtime.
    async fn provision_runtime(
        &self,
        global_account_id: &str,
        subaccount_id: &str,
        input: &ProvisionRuntimeInput,
    ) -> Result<RuntimeOperationStatus>;

    /// Start upgrading the cluster runtime components.
    async fn upgrade_runtime(
        &self,
        global_account_id: &str,
        runtime_id: &str,
        input: &UpgradeRuntimeInput,
    ) -> Result<RuntimeOperationStatus>;

    /// Start upgrading the underlying shoot cluster.
    async fn upgrade_shoot(
        &self,
        global_account_id: &str,
        runtime_id: &str,
        input: &UpgradeRuntimeInput,
    ) -> Result<RuntimeOperationStatus>;

    /// Start deleting a runtime.
    async fn deprovision_runtime(
        &self,
        global_account_id: &str,
        runtime_id: &str,
    ) -> Result<RuntimeOperationStatus>;

    /// Start hibernating a runtime.
    async fn hibernate_runtime(
        &self,
        global_account_id: &str,
        runtime_id: &str,
    ) -> Result<RuntimeOperationStatus>;

    /// Start reconnecting the in-cluster agent of a runtime.
    async fn reconnect_runtime_agent(
        &self,
        global_account_id: &str,
        runtime_id: &str,
    ) -> Result<RuntimeOperationStatus>;

    /// Read the status of a backend operation.
    async fn runtime_operation_status(
        &self,
        global_account_id: &str,
        operation_id: &str,
    ) -> Result<RuntimeOperationStatus>;
}
