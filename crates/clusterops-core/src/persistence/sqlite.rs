// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.
//!
//! Timestamps are stored as RFC 3339 text whose fractional precision varies,
//! so ordering and age filters are applied after decoding rather than in SQL.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use super::{
    OperationRow, OperationStore, OrchestrationRow, OrchestrationStore, map_insert_error,
    rejected_update_error, rows_to_operations,
};
use crate::error::{Error, Result};
use crate::operation::{Operation, OperationState, OperationType, Orchestration, OrchestrationState};

const OPERATION_COLUMNS: &str = "id, instance_id, operation_type, state, version, description, \
     created_at, updated_at, orchestration_id, runtime_id, runtime_operation_id, \
     retry_started_at, parameters";

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a store from a file path.
    ///
    /// Creates parent directories and the database file when missing, then
    /// runs all migrations.
    ///
    /// ```ignore
    /// let store = SqliteStore::from_path(".data/operations.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| Error::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        crate::migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// Create an in-memory database with migrations applied.
    ///
    /// The pool holds a single connection so every query sees the same database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        crate::migrations::run_sqlite(&pool).await?;
        Ok(Self { pool })
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_operation(&self, id: &str) -> Result<Option<Operation>> {
        let sql = format!("SELECT {} FROM operations WHERE id = ?", OPERATION_COLUMNS);
        let row = sqlx::query_as::<_, OperationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Operation::try_from).transpose()
    }

    async fn fetch_instance_operations(&self, instance_id: &str) -> Result<Vec<Operation>> {
        let sql = format!(
            "SELECT {} FROM operations WHERE instance_id = ? ORDER BY seq",
            OPERATION_COLUMNS
        );
        let rows = sqlx::query_as::<_, OperationRow>(&sql)
            .bind(instance_id)
            .fetch_all(&self.pool)
            .await?;
        let mut ops = rows_to_operations(rows)?;
        // Stable sort keeps insertion order among equal timestamps.
        ops.sort_by_key(|op| op.created_at);
        Ok(ops)
    }
}

#[async_trait]
impl OperationStore for SqliteStore {
    async fn insert_operation(&self, operation: &Operation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO operations (id, instance_id, operation_type, state, version, description,
                                    created_at, updated_at, orchestration_id, runtime_id,
                                    runtime_operation_id, retry_started_at, parameters)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&operation.id)
        .bind(&operation.instance_id)
        .bind(operation.operation_type.as_str())
        .bind(operation.state.as_str())
        .bind(operation.version)
        .bind(&operation.description)
        .bind(operation.created_at)
        .bind(operation.updated_at)
        .bind(&operation.orchestration_id)
        .bind(&operation.runtime_id)
        .bind(&operation.runtime_operation_id)
        .bind(operation.retry_started_at)
        .bind(serde_json::to_string(&operation.parameters)?)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "operation", &operation.id))?;

        Ok(())
    }

    async fn get_operation_by_id(&self, id: &str) -> Result<Operation> {
        self.fetch_operation(id)
            .await?
            .ok_or_else(|| Error::operation_not_found(id))
    }

    async fn get_operation_by_instance_id(
        &self,
        instance_id: &str,
        operation_type: OperationType,
    ) -> Result<Operation> {
        self.fetch_instance_operations(instance_id)
            .await?
            .into_iter()
            .rev()
            .find(|op| op.operation_type == operation_type)
            .ok_or_else(|| Error::operation_not_found(format!("{}/{}", instance_id, operation_type)))
    }

    async fn update_operation(&self, operation: Operation) -> Result<Operation> {
        let sql = format!(
            r#"
            UPDATE operations
            SET state = ?, description = ?, orchestration_id = ?, runtime_id = ?,
                runtime_operation_id = ?, retry_started_at = ?, parameters = ?,
                version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
              AND state NOT IN ('succeeded', 'failed', 'canceled')
              AND (? <> 'pending' OR state = 'pending')
            RETURNING {}
            "#,
            OPERATION_COLUMNS
        );

        let row = sqlx::query_as::<_, OperationRow>(&sql)
            .bind(operation.state.as_str())
            .bind(&operation.description)
            .bind(&operation.orchestration_id)
            .bind(&operation.runtime_id)
            .bind(&operation.runtime_operation_id)
            .bind(operation.retry_started_at)
            .bind(serde_json::to_string(&operation.parameters)?)
            .bind(Utc::now())
            .bind(&operation.id)
            .bind(operation.version)
            .bind(operation.state.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Operation::try_from(row),
            None => {
                let stored = self.fetch_operation(&operation.id).await?;
                Err(rejected_update_error(stored.as_ref(), &operation))
            }
        }
    }

    async fn get_last_operation(&self, instance_id: &str) -> Result<Operation> {
        self.fetch_instance_operations(instance_id)
            .await?
            .into_iter()
            .rev()
            .find(|op| op.state != OperationState::Pending)
            .ok_or_else(|| Error::operation_not_found(instance_id))
    }

    async fn list_operations_by_instance_id(&self, instance_id: &str) -> Result<Vec<Operation>> {
        self.fetch_instance_operations(instance_id).await
    }

    async fn list_unfinished_operation_ids(
        &self,
        operation_type: OperationType,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let sql = format!(
            r#"
            SELECT {} FROM operations
            WHERE operation_type = ?
              AND state NOT IN ('succeeded', 'failed', 'canceled')
            ORDER BY seq
            "#,
            OPERATION_COLUMNS
        );
        let rows = sqlx::query_as::<_, OperationRow>(&sql)
            .bind(operation_type.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut ops = rows_to_operations(rows)?;
        ops.retain(|op| op.updated_at < updated_before);
        ops.sort_by_key(|op| op.created_at);
        Ok(ops.into_iter().map(|op| op.id).collect())
    }
}

#[async_trait]
impl OrchestrationStore for SqliteStore {
    async fn insert_orchestration(&self, orchestration: &Orchestration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orchestrations (id, state, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&orchestration.id)
        .bind(orchestration.state.as_str())
        .bind(&orchestration.description)
        .bind(orchestration.created_at)
        .bind(orchestration.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "orchestration", &orchestration.id))?;

        Ok(())
    }

    async fn get_orchestration_by_id(&self, id: &str) -> Result<Orchestration> {
        let row = sqlx::query_as::<_, OrchestrationRow>(
            r#"
            SELECT id, state, description, created_at, updated_at
            FROM orchestrations
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Orchestration::try_from)
            .transpose()?
            .ok_or_else(|| Error::orchestration_not_found(id))
    }

    async fn update_orchestration_state(
        &self,
        id: &str,
        state: OrchestrationState,
        description: &str,
    ) -> Result<Orchestration> {
        let row = sqlx::query_as::<_, OrchestrationRow>(
            r#"
            UPDATE orchestrations
            SET state = ?, description = ?, updated_at = ?
            WHERE id = ?
            RETURNING id, state, description, created_at, updated_at
            "#,
        )
        .bind(state.as_str())
        .bind(description)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Orchestration::try_from)
            .transpose()?
            .ok_or_else(|| Error::orchestration_not_found(id))
    }
}
