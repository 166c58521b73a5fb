// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The unit of work executed by a [`Manager`](super::Manager).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Error;
use crate::operation::Operation;

/// Outcome of one [`Step::run`] invocation.
///
/// | `error` | `delay` | Meaning |
/// |---------|---------|---------|
/// | `Some` | any | fail the operation |
/// | `None` | zero | step done, advance |
/// | `None` | > zero | sleep `delay`, run the same step again |
#[derive(Debug)]
pub struct StepResult {
    /// The operation as the step left it.
    pub operation: Operation,
    /// How long to wait before running the step again.
    pub delay: Duration,
    /// Failure that ends the operation.
    pub error: Option<Error>,
}

impl StepResult {
    /// The step finished its work.
    pub fn advance(operation: Operation) -> Self {
        Self {
            operation,
            delay: Duration::ZERO,
            error: None,
        }
    }

    /// The step wants to be invoked again after `delay`.
    pub fn retry(operation: Operation, delay: Duration) -> Self {
        Self {
            operation,
            delay,
            error: None,
        }
    }

    /// The step failed permanently.
    pub fn fail(operation: Operation, error: Error) -> Self {
        Self {
            operation,
            delay: Duration::ZERO,
            error: Some(error),
        }
    }

    /// True when the step neither failed nor asked for another round.
    pub fn is_advance(&self) -> bool {
        self.error.is_none() && self.delay.is_zero()
    }
}

/// A named, stateless unit of work.
///
/// Steps must be idempotent: after a crash the same step runs again on the
/// last persisted copy of the operation. A step that changes the operation
/// persists the change itself, normally through an
/// [`OperationManager`](super::OperationManager), and returns the persisted copy.
#[async_trait]
pub trait Step: Send + Sync {
    /// Name used in logs and failure descriptions.
    fn name(&self) -> &str;

    /// Run the step against `operation`.
    async fn run(&self, operation: Operation) -> StepResult;
}
