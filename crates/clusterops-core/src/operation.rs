// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operation and orchestration records.
//!
//! An [`Operation`] is one asynchronous lifecycle action on one cluster
//! instance. It is created by an external trigger, mutated only by steps, and
//! kept as an audit record once it reaches a terminal state.
//!
//! # Operation State Machine
//!
//! ```text
//!        ┌─────────┐
//!        │ PENDING │──────────────────────────┐
//!        └────┬────┘                          │
//!             │ no blocking concurrent op     │ orchestration canceled
//!             ▼                               │
//!      ┌─────────────┐                        │
//!      │ IN_PROGRESS │────────────────────────┤
//!      └──────┬──────┘                        │
//!        ┌────┴──────────┐                    │
//!   all steps ok     step error /             │
//!        │           window exhausted         │
//!        ▼               ▼                    ▼
//!  ┌───────────┐    ┌────────┐         ┌──────────┐
//!  │ SUCCEEDED │    │ FAILED │         │ CANCELED │
//!  └───────────┘    └────────┘         └──────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Kind of lifecycle action an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Create a new cluster.
    Provision,
    /// Remove a cluster.
    Deprovision,
    /// Upgrade the managed runtime components of a cluster.
    Upgrade,
    /// Upgrade the underlying shoot (infrastructure) of a cluster.
    UpgradeShoot,
    /// Put a cluster to sleep.
    Hibernate,
    /// Reconnect the in-cluster agent to the control plane.
    ReconnectAgent,
}

impl OperationType {
    /// Every operation type, in declaration order.
    pub const ALL: [OperationType; 6] = [
        OperationType::Provision,
        OperationType::Deprovision,
        OperationType::Upgrade,
        OperationType::UpgradeShoot,
        OperationType::Hibernate,
        OperationType::ReconnectAgent,
    ];

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::Deprovision => "deprovision",
            Self::Upgrade => "upgrade",
            Self::UpgradeShoot => "upgrade_shoot",
            Self::Hibernate => "hibernate",
            Self::ReconnectAgent => "reconnect_agent",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Validation {
                field: "operation_type".to_string(),
                message: format!("unknown operation type '{}'", s),
            })
    }
}

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Created, no step has claimed it yet.
    Pending,
    /// Steps are working on it.
    InProgress,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Abandoned because its owning orchestration was canceled.
    Canceled,
}

impl OperationState {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Succeeded, Failed and Canceled are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Succeeded | Self::Failed | Self::Canceled => 2,
        }
    }

    /// Whether a stored operation in `self` may be written with state `next`.
    ///
    /// States only move forward; a terminal state accepts nothing.
    pub fn can_transition_to(&self, next: OperationState) -> bool {
        if self.is_terminal() {
            return false;
        }
        *self == next || next.rank() > self.rank()
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(Error::Validation {
                field: "state".to_string(),
                message: format!("unknown operation state '{}'", other),
            }),
        }
    }
}

/// One asynchronous lifecycle action on one cluster instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique identifier, assigned at creation.
    pub id: String,
    /// The cluster instance this operation acts on.
    pub instance_id: String,
    /// What the operation does.
    pub operation_type: OperationType,
    /// Current lifecycle state.
    pub state: OperationState,
    /// Optimistic concurrency counter; bumped by the store on every update.
    pub version: i64,
    /// Human-readable progress text.
    pub description: String,
    /// When the operation was created.
    pub created_at: DateTime<Utc>,
    /// When the operation was last persisted.
    pub updated_at: DateTime<Utc>,
    /// Parent orchestration, for operations scheduled in bulk.
    pub orchestration_id: Option<String>,
    /// Identifier of the provisioned runtime, once known.
    pub runtime_id: Option<String>,
    /// Identifier of the operation started on the provisioning backend.
    pub runtime_operation_id: Option<String>,
    /// When the step currently being retried first asked for a retry.
    pub retry_started_at: Option<DateTime<Utc>>,
    /// Type-specific input (provisioning parameters, builder state).
    pub parameters: serde_json::Value,
}

impl Operation {
    /// Create a pending operation with a fresh ID.
    pub fn new(instance_id: impl Into<String>, operation_type: OperationType) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            instance_id: instance_id.into(),
            operation_type,
            state: OperationState::Pending,
            version: 0,
            description: String::new(),
            created_at: now,
            updated_at: now,
            orchestration_id: None,
            runtime_id: None,
            runtime_operation_id: None,
            retry_started_at: None,
            parameters: serde_json::Value::Object(Default::default()),
        }
    }

    /// Use a caller-chosen ID instead of a generated one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach the operation to an orchestration.
    pub fn with_orchestration(mut self, orchestration_id: impl Into<String>) -> Self {
        self.orchestration_id = Some(orchestration_id.into());
        self
    }

    /// Set the known runtime ID.
    pub fn with_runtime_id(mut self, runtime_id: impl Into<String>) -> Self {
        self.runtime_id = Some(runtime_id.into());
        self
    }

    /// Set the type-specific parameters.
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Start in a specific state (triggers may create operations in progress).
    pub fn with_state(mut self, state: OperationState) -> Self {
        self.state = state;
        self
    }

    /// True once the operation reached Succeeded, Failed or Canceled.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Read a string parameter.
    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }
}

/// State of an orchestration (a batch of scheduled operations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationState {
    /// Scheduled, not started.
    Pending,
    /// Operations are being dispatched.
    InProgress,
    /// Cancellation requested; operations that have not started must stop.
    Canceling,
    /// Cancellation completed.
    Canceled,
    /// All operations finished.
    Succeeded,
    /// At least one operation failed.
    Failed,
}

impl OrchestrationState {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Canceling and Canceled both stop operations that have not started.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceling | Self::Canceled)
    }
}

impl fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrchestrationState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "canceling" => Ok(Self::Canceling),
            "canceled" => Ok(Self::Canceled),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Validation {
                field: "state".to_string(),
                message: format!("unknown orchestration state '{}'", other),
            }),
        }
    }
}

/// A batch of operations scheduled together, owning a cancellation flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Orchestration {
    /// Unique identifier.
    pub id: String,
    /// Current state.
    pub state: OrchestrationState,
    /// Human-readable progress text.
    pub description: String,
    /// When the orchestration was created.
    pub created_at: DateTime<Utc>,
    /// When the orchestration was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Orchestration {
    /// Create a pending orchestration with a fresh ID.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: OrchestrationState::Pending,
            description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for Orchestration {
    fn default() -> Self {
        Self::new()
    }
}
