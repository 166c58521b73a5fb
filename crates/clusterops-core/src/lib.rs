// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Clusterops Core - Durable Operation Engine
//!
//! This crate drives long-running lifecycle operations (provision, upgrade,
//! hibernate, deprovision) on managed clusters through pipelines of
//! idempotent steps, persisting every state change with optimistic
//! concurrency so a crash or restart never loses or duplicates work.
//!
//! # Architecture
//!
//! ```text
//!   trigger (broker, sweeper, webhook)
//!            │ insert operation, add(id)
//!            ▼
//! ┌─────────────────────┐
//! │        Queue        │  dedup by ID, N worker tasks
//! └──────────┬──────────┘
//!            │ execute(id)
//!            ▼
//! ┌─────────────────────┐     ┌────────────────────┐
//! │      Manager        │────►│ Step (weight 1..n) │
//! │  weighted buckets   │◄────│ (op, delay, error) │
//! └──────────┬──────────┘     └─────────┬──────────┘
//!            │ finalize                 │ writes via
//!            ▼                          ▼
//! ┌─────────────────────────────────────────────────┐
//! │  OperationManager  ──►  OperationStore          │
//! │  (retry window,         (memory, SQLite,        │
//! │   conflict reload)       PostgreSQL)            │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Operation State Machine
//!
//! ```text
//!                ┌─────────┐
//!                │ PENDING │─────────────┐
//!                └────┬────┘             │
//!                     │ first step       │ orchestration canceled
//!                     ▼                  │
//!              ┌─────────────┐           │
//!        ┌─────│ IN_PROGRESS │─────┐     │
//!        │     └──────┬──────┘     │     │
//!   all steps    step error,   canceled  │
//!    advanced    timeout, or       │     │
//!        │       retry window      │     │
//!        ▼            ▼            ▼     ▼
//!  ┌───────────┐ ┌────────┐    ┌──────────┐
//!  │ SUCCEEDED │ │ FAILED │    │ CANCELED │
//!  └───────────┘ └────────┘    └──────────┘
//! ```
//!
//! Terminal operations are never written again; the stores reject such
//! updates with [`Error::OperationFinished`](error::Error::OperationFinished).
//!
//! # Step Protocol
//!
//! | Step returns | Manager does |
//! |--------------|--------------|
//! | error | marks the operation Failed (unless the step already did), stops |
//! | terminal operation | stops, success |
//! | delay > 0 | sleeps, runs the same step again |
//! | delay == 0 | clears the retry window, moves to the next step |
//!
//! Each step has a wall-clock budget measured from its first run within one
//! `execute` call. Exceeding it fails the operation.
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CLUSTEROPS_DATABASE_URL` | No | in-memory | PostgreSQL or SQLite connection string |
//! | `CLUSTEROPS_WORKERS` | No | `20` | Worker tasks per queue (one queue per operation type) |
//! | `CLUSTEROPS_STEP_TIMEOUT_SECS` | No | `10800` | Per-step timeout |
//! | `CLUSTEROPS_CONFLICT_RETRY_MS` | No | `1000` | Delay after a lost optimistic write |
//!
//! # Modules
//!
//! - [`config`]: Engine configuration from environment variables
//! - [`error`]: Error type shared by stores and the engine
//! - [`migrations`]: Embedded PostgreSQL and SQLite schemas
//! - [`operation`]: Operation and orchestration records
//! - [`persistence`]: Store traits and backends
//! - [`process`]: Steps, managers, the operation manager, and queues

#![deny(missing_docs)]

/// Engine configuration loaded from environment variables.
pub mod config;

/// Error type shared by stores, managers, and queues.
pub mod error;

/// Embedded database migrations.
pub mod migrations;

/// Operation and orchestration records.
pub mod operation;

/// Store traits with in-memory, SQLite, and PostgreSQL backends.
pub mod persistence;

/// Step pipelines, conflict-tolerant state transitions, and worker queues.
pub mod process;

pub use error::{Error, Result};
pub use operation::{Operation, OperationState, OperationType, Orchestration, OrchestrationState};
