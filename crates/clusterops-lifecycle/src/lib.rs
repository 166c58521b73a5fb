// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Clusterops Lifecycle - Managed Cluster Pipelines
//!
//! This crate wires the clusterops-core engine to an infrastructure
//! provisioning backend. It defines the lifecycle steps, builds one pipeline
//! per operation type, and runs them behind deduplicating queues.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                  Triggers (broker, orchestrations)                   │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                  │ submit / enqueue
//!                                  ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                 clusterops-lifecycle (This Crate)                    │
//! │  ┌───────────┐ ┌───────────┐ ┌───────────┐       ┌───────────────┐   │
//! │  │ provision │ │  upgrade  │ │ hibernate │  ...  │    Resume     │   │
//! │  │   queue   │ │   queue   │ │   queue   │       │    Sweeper    │   │
//! │  └─────┬─────┘ └─────┬─────┘ └─────┬─────┘       └───────────────┘   │
//! │        ▼             ▼             ▼                                 │
//! │  ┌────────────────────────────────────────┐                          │
//! │  │ Manager: init -> trigger -> check      │                          │
//! │  └────────────────────────────────────────┘                          │
//! └──────────────────────────────────────────────────────────────────────┘
//!              │                                  │
//!              ▼                                  ▼
//! ┌──────────────────────────┐      ┌──────────────────────────────────┐
//! │  Operation store          │      │  Provisioner backend              │
//! │  (PostgreSQL / SQLite /   │      │  (ProvisionerClient)              │
//! │   in-memory)              │      │                                   │
//! └──────────────────────────┘      └──────────────────────────────────┘
//! ```
//!
//! # Pipelines
//!
//! | Operation type | Trigger step | Provisioner call |
//! |----------------|--------------|------------------|
//! | `provision` | `create_runtime` | `provision_runtime` |
//! | `deprovision` | `deprovision_runtime` | `deprovision_runtime` (skipped without a runtime) |
//! | `upgrade` | `upgrade_runtime` | `upgrade_runtime` |
//! | `upgrade_shoot` | `upgrade_shoot` | `upgrade_shoot` |
//! | `hibernate` | `hibernate_runtime` | `hibernate_runtime` |
//! | `reconnect_agent` | `reconnect_agent` | `reconnect_runtime_agent` |
//!
//! Every pipeline starts with `initialisation` (weight 1) and ends with
//! `check_runtime_operation` (weight 3).
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables, on top of the engine
//! variables read by `clusterops_core::config::Config`:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CLUSTEROPS_STEP_RETRY_INTERVAL_SECS` | No | `10` | Delay after a temporary provisioner error |
//! | `CLUSTEROPS_STATUS_CHECK_INTERVAL_SECS` | No | `60` | Delay between status polls |
//! | `CLUSTEROPS_<TYPE>_MAX_RETRY_WINDOW_SECS` | No | `7200` / `3600` / `1800` | Retry window per operation type |
//! | `CLUSTEROPS_SWEEP_INTERVAL_SECS` | No | `300` | Resume sweeper period |
//! | `CLUSTEROPS_SWEEP_MIN_AGE_SECS` | No | `600` | Idle time before an operation is re-queued |
//!
//! # Modules
//!
//! - [`config`]: Step and sweeper configuration from environment variables
//! - [`error`]: Error types for lifecycle operations
//! - [`pipelines`]: One manager per operation type
//! - [`provisioner`]: Provisioning backend client trait and mock
//! - [`resume_sweeper`]: Re-queuing of stalled operations
//! - [`runtime`]: Embeddable runtime
//! - [`steps`]: Lifecycle steps

#![deny(missing_docs)]

/// Step and sweeper configuration loaded from environment variables.
pub mod config;

/// Error types for lifecycle operations.
pub mod error;

/// Pipeline wiring.
pub mod pipelines;

/// Provisioning backend client.
pub mod provisioner;

/// Background task re-queuing stalled operations.
pub mod resume_sweeper;

/// Embeddable runtime for clusterops-lifecycle.
pub mod runtime;

/// Lifecycle steps.
pub mod steps;

pub use config::LifecycleConfig;
pub use error::Error;
pub use runtime::LifecycleRuntime;
pub use steps::ProvisioningParameters;
