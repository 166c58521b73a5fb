// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for clusterops-lifecycle.

use thiserror::Error;

/// Lifecycle errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Engine or store operation failed.
    #[error("Core error: {0}")]
    Core(#[from] clusterops_core::Error),

    /// Provisioner call failed.
    #[error("Provisioner error: {0}")]
    Provisioner(#[from] crate::provisioner::ProvisionerError),

    /// Database connection or migration failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No queue serves the requested operation type.
    #[error("No pipeline registered for operation type '{0}'")]
    UnknownOperationType(clusterops_core::OperationType),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Get the machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Core(e) => e.error_code(),
            Self::Provisioner(e) if e.is_temporary() => "PROVISIONER_UNAVAILABLE",
            Self::Provisioner(_) => "PROVISIONER_REJECTED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::UnknownOperationType(_) => "UNKNOWN_OPERATION_TYPE",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }
}

/// Result type using lifecycle Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::ProvisionerError;
    use clusterops_core::OperationType;

    #[test]
    fn test_error_codes() {
        let core: Error = clusterops_core::Error::operation_not_found("op-1").into();
        assert_eq!(core.error_code(), "NOT_FOUND");

        let temporary: Error = ProvisionerError::Temporary("503".to_string()).into();
        assert_eq!(temporary.error_code(), "PROVISIONER_UNAVAILABLE");

        let permanent: Error = ProvisionerError::Permanent("bad plan".to_string()).into();
        assert_eq!(permanent.error_code(), "PROVISIONER_REJECTED");

        assert_eq!(
            Error::UnknownOperationType(OperationType::Hibernate).error_code(),
            "UNKNOWN_OPERATION_TYPE"
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::UnknownOperationType(OperationType::UpgradeShoot);
        assert_eq!(
            err.to_string(),
            "No pipeline registered for operation type 'upgrade_shoot'"
        );
    }
}
