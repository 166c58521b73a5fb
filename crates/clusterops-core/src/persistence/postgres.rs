// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed persistence implementation.
//!
//! The optimistic update is one conditional `UPDATE ... RETURNING`; when it
//! matches no row the stored copy is read back to report why.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{
    OperationRow, OperationStore, OrchestrationRow, OrchestrationStore, map_insert_error,
    rejected_update_error, rows_to_operations,
};
use crate::error::{Error, Result};
use crate::operation::{Operation, OperationType, Orchestration, OrchestrationState};

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store from an existing pool. Run
    /// [`migrations::run_postgres`](crate::migrations::run_postgres) first.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_operation(&self, id: &str) -> Result<Option<Operation>> {
        let row = sqlx::query_as::<_, OperationRow>(
            r#"
            SELECT id, instance_id, operation_type, state, version, description,
                   created_at, updated_at, orchestration_id, runtime_id,
                   runtime_operation_id, retry_started_at, parameters
            FROM operations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Operation::try_from).transpose()
    }
}

#[async_trait]
impl OperationStore for PostgresStore {
    async fn insert_operation(&self, operation: &Operation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO operations (id, instance_id, operation_type, state, version, description,
                                    created_at, updated_at, orchestration_id, runtime_id,
                                    runtime_operation_id, retry_started_at, parameters)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
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
        let row = sqlx::query_as::<_, OperationRow>(
            r#"
            SELECT id, instance_id, operation_type, state, version, description,
                   created_at, updated_at, orchestration_id, runtime_id,
                   runtime_operation_id, retry_started_at, parameters
            FROM operations
            WHERE instance_id = $1 AND operation_type = $2
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(instance_id)
        .bind(operation_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Operation::try_from)
            .transpose()?
            .ok_or_else(|| Error::operation_not_found(format!("{}/{}", instance_id, operation_type)))
    }

    async fn update_operation(&self, operation: Operation) -> Result<Operation> {
        let row = sqlx::query_as::<_, OperationRow>(
            r#"
            UPDATE operations
            SET state = $3, description = $4, orchestration_id = $5, runtime_id = $6,
                runtime_operation_id = $7, retry_started_at = $8, parameters = $9,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
              AND state NOT IN ('succeeded', 'failed', 'canceled')
              AND ($3::text <> 'pending' OR state = 'pending')
            RETURNING id, instance_id, operation_type, state, version, description,
                      created_at, updated_at, orchestration_id, runtime_id,
                      runtime_operation_id, retry_started_at, parameters
            "#,
        )
        .bind(&operation.id)
        .bind(operation.version)
        .bind(operation.state.as_str())
        .bind(&operation.description)
        .bind(&operation.orchestration_id)
        .bind(&operation.runtime_id)
        .bind(&operation.runtime_operation_id)
        .bind(operation.retry_started_at)
        .bind(serde_json::to_string(&operation.parameters)?)
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
        let row = sqlx::query_as::<_, OperationRow>(
            r#"
            SELECT id, instance_id, operation_type, state, version, description,
                   created_at, updated_at, orchestration_id, runtime_id,
                   runtime_operation_id, retry_started_at, parameters
            FROM operations
            WHERE instance_id = $1 AND state <> 'pending'
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Operation::try_from)
            .transpose()?
            .ok_or_else(|| Error::operation_not_found(instance_id))
    }

    async fn list_operations_by_instance_id(&self, instance_id: &str) -> Result<Vec<Operation>> {
        let rows = sqlx::query_as::<_, OperationRow>(
            r#"
            SELECT id, instance_id, operation_type, state, version, description,
                   created_at, updated_at, orchestration_id, runtime_id,
                   runtime_operation_id, retry_started_at, parameters
            FROM operations
            WHERE instance_id = $1
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        rows_to_operations(rows)
    }

    async fn list_unfinished_operation_ids(
        &self,
        operation_type: OperationType,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM operations
            WHERE operation_type = $1
              AND state NOT IN ('succeeded', 'failed', 'canceled')
              AND updated_at < $2
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(operation_type.as_str())
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl OrchestrationStore for PostgresStore {
    async fn insert_orchestration(&self, orchestration: &Orchestration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orchestrations (id, state, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
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
            WHERE id = $1
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
            SET state = $2, description = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING id, state, description, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(state.as_str())
        .bind(description)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Orchestration::try_from)
            .transpose()?
            .ok_or_else(|| Error::orchestration_not_found(id))
    }
}
