// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Weighted step pipeline for one operation type.
//!
//! Steps are grouped into buckets by weight. Buckets run in ascending order,
//! steps within a bucket in registration order:
//!
//! ```text
//!   weight 1          weight 2            weight 10
//! ┌──────────┐    ┌──────────────┐    ┌───────────────┐
//! │ init     │ -> │ create       │ -> │ check status  │ -> Succeeded
//! └──────────┘    │ configure    │    └───────────────┘
//!                 └──────────────┘
//! ```
//!
//! A step asking for a delay is re-run on the same operation after sleeping,
//! so the calling worker stays busy until the step advances or fails.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::{Error, Result};
use crate::operation::{Operation, OperationState};
use crate::process::operation_manager::OperationManager;
use crate::process::queue::Executor;
use crate::process::step::{Step, StepResult};

/// Default wall-clock budget of a single step.
///
/// Longer than the largest default retry window of the lifecycle pipelines,
/// so a polling step gives up through its window rather than the timeout.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(3 * 3600);

/// Attempts at persisting the final state before giving up.
const FINALIZE_ATTEMPTS: usize = 5;

/// What happened after a step settled.
enum StepOutcome {
    /// Continue with the next step.
    Advanced(Operation),
    /// The step left the operation in a terminal state.
    Finished,
}

/// Collects steps before building an immutable [`Manager`].
pub struct ManagerBuilder {
    name: String,
    operation_manager: OperationManager,
    step_timeout: Duration,
    buckets: BTreeMap<u32, Vec<Arc<dyn Step>>>,
}

impl ManagerBuilder {
    /// Start a pipeline named `name` writing through `operation_manager`.
    pub fn new(name: impl Into<String>, operation_manager: OperationManager) -> Self {
        Self {
            name: name.into(),
            operation_manager,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            buckets: BTreeMap::new(),
        }
    }

    /// Set the per-step wall-clock budget.
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Register a step in the first bucket.
    pub fn init_step(self, step: Arc<dyn Step>) -> Self {
        self.add_step(0, step)
    }

    /// Register a step in bucket `weight`. Non-positive weights go to bucket 1.
    pub fn add_step(mut self, weight: i32, step: Arc<dyn Step>) -> Self {
        let weight = u32::try_from(weight).unwrap_or(0).max(1);
        self.buckets.entry(weight).or_default().push(step);
        self
    }

    /// Freeze the registry.
    pub fn build(self) -> Manager {
        Manager {
            name: self.name,
            operation_manager: self.operation_manager,
            step_timeout: self.step_timeout,
            buckets: self.buckets.into_iter().collect(),
        }
    }
}

/// Drives operations of one type through their step pipeline.
pub struct Manager {
    name: String,
    operation_manager: OperationManager,
    step_timeout: Duration,
    buckets: Vec<(u32, Vec<Arc<dyn Step>>)>,
}

impl Manager {
    /// Start building a manager.
    pub fn builder(name: impl Into<String>, operation_manager: OperationManager) -> ManagerBuilder {
        ManagerBuilder::new(name, operation_manager)
    }

    /// Pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registered steps as `(weight, name)` in execution order.
    pub fn steps(&self) -> Vec<(u32, String)> {
        self.buckets
            .iter()
            .flat_map(|(weight, steps)| {
                steps
                    .iter()
                    .map(move |step| (*weight, step.name().to_string()))
            })
            .collect()
    }

    /// Load the operation and run it through every bucket.
    ///
    /// Returns `Ok` when the operation ends Succeeded, or when a step left it
    /// in any terminal state. A step error or timeout marks it Failed and is
    /// returned. Already-terminal operations are left untouched.
    pub async fn execute(&self, operation_id: &str) -> Result<()> {
        let operation = self
            .operation_manager
            .store()
            .get_operation_by_id(operation_id)
            .await?;

        if operation.is_finished() {
            debug!(
                operation_id = %operation_id,
                state = %operation.state,
                "Operation already finished, nothing to do"
            );
            return Ok(());
        }

        let span = info_span!(
            "operation",
            operation_id = %operation.id,
            instance_id = %operation.instance_id,
            pipeline = %self.name,
        );
        self.run_pipeline(operation).instrument(span).await
    }

    async fn run_pipeline(&self, mut operation: Operation) -> Result<()> {
        info!(state = %operation.state, "Executing operation");

        for (weight, steps) in &self.buckets {
            for step in steps {
                let span = info_span!("step", step = %step.name(), weight = *weight);
                match self.run_step(step.as_ref(), operation).instrument(span).await? {
                    StepOutcome::Advanced(next) => operation = next,
                    StepOutcome::Finished => return Ok(()),
                }
            }
        }

        let operation = self
            .finalize(operation, OperationState::Succeeded, "operation succeeded")
            .await?;
        info!(state = %operation.state, "Operation completed");
        Ok(())
    }

    async fn run_step(&self, step: &dyn Step, mut operation: Operation) -> Result<StepOutcome> {
        let started = Instant::now();

        loop {
            let remaining = self.step_timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(self.fail_on_timeout(step, operation).await);
            }

            let StepResult {
                operation: returned,
                delay,
                error,
            } = match tokio::time::timeout(remaining, step.run(operation.clone())).await {
                Ok(result) => result,
                Err(_) => return Err(self.fail_on_timeout(step, operation).await),
            };
            operation = returned;

            if let Some(err) = error {
                error!(error = %err, "Step failed");
                if !operation.is_finished() {
                    self.finalize(operation, OperationState::Failed, &err.to_string())
                        .await?;
                }
                return Err(err);
            }

            if operation.is_finished() {
                info!(state = %operation.state, "Step finished the operation");
                return Ok(StepOutcome::Finished);
            }

            if delay.is_zero() {
                debug!("Step advanced");
                operation.retry_started_at = None;
                return Ok(StepOutcome::Advanced(operation));
            }

            debug!(delay_ms = delay.as_millis() as u64, "Step asked for retry");
            // The step budget also bounds the pause before the next attempt.
            let remaining = self.step_timeout.saturating_sub(started.elapsed());
            tokio::time::sleep(delay.min(remaining)).await;
        }
    }

    async fn fail_on_timeout(&self, step: &dyn Step, operation: Operation) -> Error {
        let err = Error::StepTimeout {
            step: step.name().to_string(),
            timeout: self.step_timeout,
        };
        warn!(timeout_secs = self.step_timeout.as_secs(), "Step timed out");
        if let Err(persist_err) = self
            .finalize(operation, OperationState::Failed, &err.to_string())
            .await
        {
            error!(error = %persist_err, "Failed to mark timed out operation as failed");
        }
        err
    }

    /// Persist a terminal state, reloading and reapplying on conflicts.
    async fn finalize(
        &self,
        mut operation: Operation,
        state: OperationState,
        description: &str,
    ) -> Result<Operation> {
        for attempt in 1..=FINALIZE_ATTEMPTS {
            if operation.is_finished() {
                return Ok(operation);
            }

            let (returned, delay) = self
                .operation_manager
                .update_operation(operation, |op| {
                    op.state = state;
                    op.description = description.to_string();
                })
                .await;
            if delay.is_zero() {
                return Ok(returned);
            }

            warn!(
                attempt,
                target_state = %state,
                "Could not persist final state, retrying"
            );
            operation = returned;
            tokio::time::sleep(delay).await;
        }

        Err(Error::Database {
            operation: "finalize".to_string(),
            details: format!(
                "could not persist state '{}' for operation '{}' after {} attempts",
                state, operation.id, FINALIZE_ATTEMPTS
            ),
        })
    }
}

#[async_trait]
impl Executor for Manager {
    async fn execute(&self, operation_id: &str) -> Result<()> {
        Manager::execute(self, operation_id).await
    }
}
