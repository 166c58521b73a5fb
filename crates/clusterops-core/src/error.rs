// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for clusterops-core.
//!
//! A single error type is shared by the stores and the process engine so that
//! steps can inspect store failures (conflicts in particular) without
//! unwrapping nested errors.

use std::time::Duration;

use thiserror::Error;

use crate::operation::OperationState;

/// Result type using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by stores, managers, and queues.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// Record was not found.
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Kind of record ("operation", "orchestration").
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A record with the same identifier already exists.
    #[error("{entity} '{id}' already exists")]
    AlreadyExists {
        /// Kind of record ("operation", "orchestration").
        entity: &'static str,
        /// The colliding identifier.
        id: String,
    },

    /// Optimistic concurrency check failed: the stored version moved on.
    #[error("operation '{id}' version conflict: expected {expected}, stored {actual}")]
    Conflict {
        /// Operation ID.
        id: String,
        /// Version carried by the rejected update.
        expected: i64,
        /// Version currently stored.
        actual: i64,
    },

    /// The stored operation is terminal and can no longer be updated.
    #[error("operation '{id}' is already finished with state '{state}'")]
    OperationFinished {
        /// Operation ID.
        id: String,
        /// Terminal state of the stored operation.
        state: OperationState,
    },

    /// The update would move the operation state backwards.
    #[error("operation '{id}' cannot move from '{from}' to '{to}'")]
    InvalidStateTransition {
        /// Operation ID.
        id: String,
        /// Stored state.
        from: OperationState,
        /// Requested state.
        to: OperationState,
    },

    /// Input validation failed.
    #[error("validation error for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// A step reported a failure.
    #[error("step '{step}' failed: {message}")]
    StepFailed {
        /// Name of the failing step.
        step: String,
        /// Failure message.
        message: String,
    },

    /// The operation was marked failed.
    #[error("operation '{id}' failed: {message}")]
    OperationFailed {
        /// Operation ID.
        id: String,
        /// Description stored on the operation.
        message: String,
    },

    /// A step exceeded its wall-clock budget.
    #[error("step '{step}' exceeded its timeout of {}s", timeout.as_secs())]
    StepTimeout {
        /// Name of the step.
        step: String,
        /// The configured budget.
        timeout: Duration,
    },

    /// Database operation failed.
    #[error("database error during '{operation}': {details}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl Error {
    /// Shorthand for a missing operation.
    pub fn operation_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "operation",
            id: id.into(),
        }
    }

    /// Shorthand for a missing orchestration.
    pub fn orchestration_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "orchestration",
            id: id.into(),
        }
    }

    /// Get the machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::Conflict { .. } => "CONFLICT",
            Self::OperationFinished { .. } => "OPERATION_FINISHED",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::StepFailed { .. } => "STEP_FAILED",
            Self::OperationFailed { .. } => "OPERATION_FAILED",
            Self::StepTimeout { .. } => "STEP_TIMEOUT",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }

    /// True for [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for [`Error::AlreadyExists`].
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// True for [`Error::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// True when the update was rejected because the stored copy moved on,
    /// either to a newer version or to a terminal state.
    pub fn is_stale_write(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::OperationFinished { .. }
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::Database {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Database {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
