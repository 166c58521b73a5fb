// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared test infrastructure for clusterops-core integration tests.
//!
//! Provides a store-backed TestContext and instrumented steps.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use clusterops_core::error::Error;
use clusterops_core::operation::{Operation, OperationType};
use clusterops_core::persistence::{MemoryStore, OperationStore};
use clusterops_core::process::{ManagerBuilder, OperationManager, Step, StepResult};

/// Store plus operation manager wired together.
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub operation_manager: OperationManager,
}

impl TestContext {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let operation_manager = OperationManager::new(store.clone())
            .with_conflict_retry_interval(Duration::from_millis(10));
        Self {
            store,
            operation_manager,
        }
    }

    pub fn manager(&self, name: &str) -> ManagerBuilder {
        ManagerBuilder::new(name, self.operation_manager.clone())
    }

    /// Insert a pending operation and return it.
    pub async fn insert(&self, instance_id: &str, operation_type: OperationType) -> Operation {
        let op = Operation::new(instance_id, operation_type);
        self.store
            .insert_operation(&op)
            .await
            .expect("Failed to insert operation");
        op
    }

    pub async fn reload(&self, id: &str) -> Operation {
        self.store
            .get_operation_by_id(id)
            .await
            .expect("Failed to load operation")
    }
}

/// Shared, ordered log of step invocations.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, name: &str) {
        self.0.lock().unwrap().push(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|n| *n == name).count()
    }
}

/// Advances immediately, recording each call.
pub struct RecordingStep {
    pub name: String,
    pub log: CallLog,
}

impl RecordingStep {
    pub fn new(name: &str, log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: log.clone(),
        })
    }
}

#[async_trait]
impl Step for RecordingStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, operation: Operation) -> StepResult {
        self.log.record(&self.name);
        StepResult::advance(operation)
    }
}

/// Asks for a retry `failures` times before advancing.
pub struct FlakyStep {
    pub name: String,
    pub log: CallLog,
    pub failures: usize,
    pub delay: Duration,
    attempts: AtomicUsize,
}

impl FlakyStep {
    pub fn new(name: &str, log: &CallLog, failures: usize, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: log.clone(),
            failures,
            delay,
            attempts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Step for FlakyStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, operation: Operation) -> StepResult {
        self.log.record(&self.name);
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            StepResult::retry(operation, self.delay)
        } else {
            StepResult::advance(operation)
        }
    }
}

/// Fails on every call.
pub struct FailingStep {
    pub name: String,
    pub log: CallLog,
    pub message: String,
}

impl FailingStep {
    pub fn new(name: &str, log: &CallLog, message: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: log.clone(),
            message: message.to_string(),
        })
    }
}

#[async_trait]
impl Step for FailingStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, operation: Operation) -> StepResult {
        self.log.record(&self.name);
        StepResult::fail(
            operation,
            Error::StepFailed {
                step: self.name.clone(),
                message: self.message.clone(),
            },
        )
    }
}

/// Always asks for a retry; used to exercise the step timeout.
pub struct StuckStep {
    pub delay: Duration,
}

#[async_trait]
impl Step for StuckStep {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn run(&self, operation: Operation) -> StepResult {
        StepResult::retry(operation, self.delay)
    }
}
