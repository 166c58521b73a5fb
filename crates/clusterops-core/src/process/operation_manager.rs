// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! State transitions shared by every step.
//!
//! All writes go through [`OperationManager::update_operation`], which turns a
//! lost optimistic write into a short retry instead of an error. Steps return
//! whatever the helpers give back; the manager then either advances, sleeps,
//! or stops.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::operation::{Operation, OperationState};
use crate::persistence::OperationStore;
use crate::process::step::StepResult;

/// Default delay after a lost optimistic write.
pub const DEFAULT_CONFLICT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Standardized, conflict-tolerant operation updates.
#[derive(Clone)]
pub struct OperationManager {
    store: Arc<dyn OperationStore>,
    conflict_retry_interval: Duration,
}

impl OperationManager {
    /// Create a manager writing to `store`.
    pub fn new(store: Arc<dyn OperationStore>) -> Self {
        Self {
            store,
            conflict_retry_interval: DEFAULT_CONFLICT_RETRY_INTERVAL,
        }
    }

    /// Override the delay returned after a lost write.
    pub fn with_conflict_retry_interval(mut self, interval: Duration) -> Self {
        self.conflict_retry_interval = interval;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn OperationStore> {
        &self.store
    }

    /// The delay returned after a lost write.
    pub fn conflict_retry_interval(&self) -> Duration {
        self.conflict_retry_interval
    }

    /// Apply `mutate` to a copy of `operation` and persist it.
    ///
    /// Returns the persisted copy and a zero delay on success. When the write
    /// lost against a concurrent one, returns the freshly loaded stored copy
    /// with the conflict delay, or a zero delay if that copy is already
    /// terminal. Any other failure returns `operation` unchanged with the
    /// conflict delay.
    pub async fn update_operation<F>(&self, operation: Operation, mutate: F) -> (Operation, Duration)
    where
        F: FnOnce(&mut Operation),
    {
        let mut updated = operation.clone();
        mutate(&mut updated);

        match self.store.update_operation(updated).await {
            Ok(persisted) => (persisted, Duration::ZERO),
            Err(e) if e.is_stale_write() => {
                debug!(
                    operation_id = %operation.id,
                    version = operation.version,
                    error = %e,
                    "Lost optimistic write, reloading operation"
                );
                match self.store.get_operation_by_id(&operation.id).await {
                    Ok(stored) if stored.is_finished() => (stored, Duration::ZERO),
                    Ok(stored) => (stored, self.conflict_retry_interval),
                    Err(reload_err) => {
                        warn!(
                            operation_id = %operation.id,
                            error = %reload_err,
                            "Failed to reload operation after conflict"
                        );
                        (operation, self.conflict_retry_interval)
                    }
                }
            }
            Err(e) => {
                warn!(
                    operation_id = %operation.id,
                    error = %e,
                    "Failed to persist operation"
                );
                (operation, self.conflict_retry_interval)
            }
        }
    }

    /// Ask for another attempt after `retry_interval`, unless the retry
    /// window has run out.
    ///
    /// The window starts at `retry_started_at`, which is set on the first
    /// retry of a step. Once more than `max_retry_window` has elapsed the
    /// operation is failed with `message`.
    pub async fn retry_operation(
        &self,
        operation: Operation,
        message: &str,
        retry_interval: Duration,
        max_retry_window: Duration,
    ) -> StepResult {
        let now = Utc::now();
        let window_start = operation.retry_started_at.unwrap_or(now);
        let elapsed = (now - window_start).to_std().unwrap_or(Duration::ZERO);

        if elapsed > max_retry_window {
            info!(
                operation_id = %operation.id,
                elapsed_secs = elapsed.as_secs(),
                max_retry_window_secs = max_retry_window.as_secs(),
                "Retry window exhausted"
            );
            return self
                .operation_failed(
                    operation,
                    &format!(
                        "{} (gave up after {}s of retries)",
                        message,
                        max_retry_window.as_secs()
                    ),
                    None,
                )
                .await;
        }

        let description = message.to_string();
        let (operation, delay) = self
            .update_operation(operation, |op| {
                op.description = description;
                op.retry_started_at = Some(window_start);
            })
            .await;

        if delay.is_zero() && !operation.is_finished() {
            debug!(
                operation_id = %operation.id,
                delay_ms = retry_interval.as_millis() as u64,
                "Scheduling step retry"
            );
            StepResult::retry(operation, retry_interval)
        } else {
            StepResult::retry(operation, delay)
        }
    }

    /// Move the operation from Pending to InProgress.
    pub async fn operation_in_progress(&self, operation: Operation, message: &str) -> StepResult {
        let description = message.to_string();
        let (operation, delay) = self
            .update_operation(operation, |op| {
                op.state = OperationState::InProgress;
                op.description = description;
            })
            .await;
        StepResult::retry(operation, delay)
    }

    /// Mark the operation Succeeded.
    pub async fn operation_succeeded(&self, operation: Operation, message: &str) -> StepResult {
        self.finish(operation, OperationState::Succeeded, message.to_string())
            .await
    }

    /// Mark the operation Canceled.
    pub async fn operation_canceled(&self, operation: Operation, message: &str) -> StepResult {
        self.finish(operation, OperationState::Canceled, message.to_string())
            .await
    }

    /// Mark the operation Failed.
    ///
    /// The description is `message`, followed by `cause` when one is given.
    /// Returns a failing [`StepResult`] once persisted; if the write could not
    /// be persisted the step is asked to run again instead.
    pub async fn operation_failed(
        &self,
        operation: Operation,
        message: &str,
        cause: Option<Error>,
    ) -> StepResult {
        let description = match &cause {
            Some(cause) => format!("{}: {}", message, cause),
            None => message.to_string(),
        };

        let result = self
            .finish(operation, OperationState::Failed, description.clone())
            .await;
        // Unpersisted, or finished concurrently in another state.
        if !result.delay.is_zero() || result.operation.state != OperationState::Failed {
            return result;
        }

        let error = cause.unwrap_or_else(|| Error::OperationFailed {
            id: result.operation.id.clone(),
            message: description,
        });
        StepResult::fail(result.operation, error)
    }

    async fn finish(
        &self,
        operation: Operation,
        state: OperationState,
        description: String,
    ) -> StepResult {
        let (operation, delay) = self
            .update_operation(operation, |op| {
                op.state = state;
                op.description = description;
            })
            .await;

        if delay.is_zero() {
            info!(
                operation_id = %operation.id,
                state = %operation.state,
                description = %operation.description,
                "Operation finished"
            );
        }
        StepResult::retry(operation, delay)
    }
}
