// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for clusterops-core.
//!
//! Every backend implements the same optimistic concurrency contract for
//! [`OperationStore::update_operation`]:
//!
//! | Stored row | Incoming version | Result |
//! |------------|------------------|--------|
//! | missing | any | `NotFound` |
//! | terminal | any | `OperationFinished` |
//! | non-terminal | != stored | `Conflict` |
//! | non-terminal | == stored, state moves backwards | `InvalidStateTransition` |
//! | non-terminal | == stored | stored with `version + 1` |

pub mod memory;
pub mod postgres;
pub mod sqlite;

pub use self::memory::MemoryStore;
pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::operation::{Operation, OperationState, OperationType, Orchestration, OrchestrationState};

/// Storage for [`Operation`] records.
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Insert a new operation. Fails with `AlreadyExists` if the ID is taken.
    async fn insert_operation(&self, operation: &Operation) -> Result<()>;

    /// Load an operation by ID. Fails with `NotFound`.
    async fn get_operation_by_id(&self, id: &str) -> Result<Operation>;

    /// Load the most recently created operation of `operation_type` for an instance.
    async fn get_operation_by_instance_id(
        &self,
        instance_id: &str,
        operation_type: OperationType,
    ) -> Result<Operation>;

    /// Persist `operation` if its version matches the stored one.
    ///
    /// Returns the persisted copy, carrying `version + 1` and a fresh
    /// `updated_at`.
    async fn update_operation(&self, operation: Operation) -> Result<Operation>;

    /// Load the most recently created operation of any type for an instance
    /// that has left the Pending state.
    async fn get_last_operation(&self, instance_id: &str) -> Result<Operation>;

    /// List every operation for an instance, oldest first.
    async fn list_operations_by_instance_id(&self, instance_id: &str) -> Result<Vec<Operation>>;

    /// IDs of non-terminal operations of a type not updated since `updated_before`.
    async fn list_unfinished_operation_ids(
        &self,
        operation_type: OperationType,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<String>>;
}

/// Storage for [`Orchestration`] records.
#[async_trait]
pub trait OrchestrationStore: Send + Sync {
    /// Insert a new orchestration. Fails with `AlreadyExists` if the ID is taken.
    async fn insert_orchestration(&self, orchestration: &Orchestration) -> Result<()>;

    /// Load an orchestration by ID. Fails with `NotFound`.
    async fn get_orchestration_by_id(&self, id: &str) -> Result<Orchestration>;

    /// Overwrite the orchestration state and description.
    async fn update_orchestration_state(
        &self,
        id: &str,
        state: OrchestrationState,
        description: &str,
    ) -> Result<Orchestration>;
}

/// Explain why a conditional update matched no row.
///
/// `stored` is the row as read after the update was rejected.
pub(crate) fn rejected_update_error(stored: Option<&Operation>, incoming: &Operation) -> Error {
    let Some(stored) = stored else {
        return Error::operation_not_found(&incoming.id);
    };

    if stored.state.is_terminal() {
        return Error::OperationFinished {
            id: stored.id.clone(),
            state: stored.state,
        };
    }

    if stored.version != incoming.version {
        return Error::Conflict {
            id: stored.id.clone(),
            expected: incoming.version,
            actual: stored.version,
        };
    }

    Error::InvalidStateTransition {
        id: stored.id.clone(),
        from: stored.state,
        to: incoming.state,
    }
}

/// Check an update against the stored copy. Used by backends that can read
/// and write under one lock.
pub(crate) fn check_update(stored: &Operation, incoming: &Operation) -> Result<()> {
    if stored.state.is_terminal()
        || stored.version != incoming.version
        || !stored.state.can_transition_to(incoming.state)
    {
        return Err(rejected_update_error(Some(stored), incoming));
    }
    Ok(())
}

/// Operation row as stored by the SQL backends.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct OperationRow {
    pub id: String,
    pub instance_id: String,
    pub operation_type: String,
    pub state: String,
    pub version: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub orchestration_id: Option<String>,
    pub runtime_id: Option<String>,
    pub runtime_operation_id: Option<String>,
    pub retry_started_at: Option<DateTime<Utc>>,
    pub parameters: String,
}

impl TryFrom<OperationRow> for Operation {
    type Error = Error;

    fn try_from(row: OperationRow) -> Result<Self> {
        Ok(Operation {
            id: row.id,
            instance_id: row.instance_id,
            operation_type: row.operation_type.parse()?,
            state: row.state.parse()?,
            version: row.version,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
            orchestration_id: row.orchestration_id,
            runtime_id: row.runtime_id,
            runtime_operation_id: row.runtime_operation_id,
            retry_started_at: row.retry_started_at,
            parameters: serde_json::from_str(&row.parameters)?,
        })
    }
}

/// Orchestration row as stored by the SQL backends.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct OrchestrationRow {
    pub id: String,
    pub state: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<OrchestrationRow> for Orchestration {
    type Error = Error;

    fn try_from(row: OrchestrationRow) -> Result<Self> {
        Ok(Orchestration {
            id: row.id,
            state: row.state.parse()?,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Map a unique-key violation on insert to `AlreadyExists`.
pub(crate) fn map_insert_error(err: sqlx::Error, entity: &'static str, id: &str) -> Error {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Error::AlreadyExists {
            entity,
            id: id.to_string(),
        },
        _ => Error::from(err),
    }
}

/// Rows are converted one by one; a single malformed row fails the whole read.
pub(crate) fn rows_to_operations(rows: Vec<OperationRow>) -> Result<Vec<Operation>> {
    rows.into_iter().map(Operation::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(state: OperationState, version: i64) -> Operation {
        let mut op = Operation::new("instance", OperationType::Provision).with_id("op-1");
        op.state = state;
        op.version = version;
        op
    }

    #[test]
    fn test_rejected_update_missing_row() {
        let incoming = stored(OperationState::InProgress, 1);
        assert!(rejected_update_error(None, &incoming).is_not_found());
    }

    #[test]
    fn test_rejected_update_terminal_wins_over_version() {
        let row = stored(OperationState::Succeeded, 5);
        let incoming = stored(OperationState::InProgress, 1);
        assert!(matches!(
            rejected_update_error(Some(&row), &incoming),
            Error::OperationFinished {
                state: OperationState::Succeeded,
                ..
            }
        ));
    }

    #[test]
    fn test_rejected_update_stale_version() {
        let row = stored(OperationState::InProgress, 2);
        let incoming = stored(OperationState::InProgress, 1);
        assert!(matches!(
            rejected_update_error(Some(&row), &incoming),
            Error::Conflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_check_update_rejects_backwards_move() {
        let row = stored(OperationState::InProgress, 2);
        let incoming = stored(OperationState::Pending, 2);
        assert!(matches!(
            check_update(&row, &incoming),
            Err(Error::InvalidStateTransition { .. })
        ));
        assert!(check_update(&row, &stored(OperationState::Failed, 2)).is_ok());
    }
}
