// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory persistence, for tests and single-process embedding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{OperationStore, OrchestrationStore, check_update};
use crate::error::{Error, Result};
use crate::operation::{Operation, OperationState, OperationType, Orchestration, OrchestrationState};

#[derive(Debug, Default)]
struct MemoryState {
    /// Operation plus its insertion sequence, used to break created_at ties.
    operations: HashMap<String, (u64, Operation)>,
    orchestrations: HashMap<String, Orchestration>,
    next_seq: u64,
}

impl MemoryState {
    fn latest_for_instance<F>(&self, instance_id: &str, filter: F) -> Option<Operation>
    where
        F: Fn(&Operation) -> bool,
    {
        self.operations
            .values()
            .filter(|(_, op)| op.instance_id == instance_id && filter(op))
            .max_by_key(|(seq, op)| (op.created_at, *seq))
            .map(|(_, op)| op.clone())
    }
}

/// Thread-safe in-memory store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored operations.
    pub async fn operation_count(&self) -> usize {
        self.state.read().await.operations.len()
    }
}

#[async_trait]
impl OperationStore for MemoryStore {
    async fn insert_operation(&self, operation: &Operation) -> Result<()> {
        let mut state = self.state.write().await;
        if state.operations.contains_key(&operation.id) {
            return Err(Error::AlreadyExists {
                entity: "operation",
                id: operation.id.clone(),
            });
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state
            .operations
            .insert(operation.id.clone(), (seq, operation.clone()));
        Ok(())
    }

    async fn get_operation_by_id(&self, id: &str) -> Result<Operation> {
        self.state
            .read()
            .await
            .operations
            .get(id)
            .map(|(_, op)| op.clone())
            .ok_or_else(|| Error::operation_not_found(id))
    }

    async fn get_operation_by_instance_id(
        &self,
        instance_id: &str,
        operation_type: OperationType,
    ) -> Result<Operation> {
        self.state
            .read()
            .await
            .latest_for_instance(instance_id, |op| op.operation_type == operation_type)
            .ok_or_else(|| Error::operation_not_found(format!("{}/{}", instance_id, operation_type)))
    }

    async fn update_operation(&self, operation: Operation) -> Result<Operation> {
        let mut state = self.state.write().await;
        let Some((_, stored)) = state.operations.get_mut(&operation.id) else {
            return Err(Error::operation_not_found(&operation.id));
        };

        check_update(stored, &operation)?;

        let mut persisted = operation;
        persisted.version = stored.version + 1;
        persisted.updated_at = Utc::now();
        // Identity fields are fixed at insert time.
        persisted.instance_id = stored.instance_id.clone();
        persisted.operation_type = stored.operation_type;
        persisted.created_at = stored.created_at;

        *stored = persisted.clone();
        Ok(persisted)
    }

    async fn get_last_operation(&self, instance_id: &str) -> Result<Operation> {
        self.state
            .read()
            .await
            .latest_for_instance(instance_id, |op| op.state != OperationState::Pending)
            .ok_or_else(|| Error::operation_not_found(instance_id))
    }

    async fn list_operations_by_instance_id(&self, instance_id: &str) -> Result<Vec<Operation>> {
        let state = self.state.read().await;
        let mut ops: Vec<_> = state
            .operations
            .values()
            .filter(|(_, op)| op.instance_id == instance_id)
            .collect();
        ops.sort_by_key(|(seq, op)| (op.created_at, *seq));
        Ok(ops.into_iter().map(|(_, op)| op.clone()).collect())
    }

    async fn list_unfinished_operation_ids(
        &self,
        operation_type: OperationType,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut ops: Vec<_> = state
            .operations
            .values()
            .filter(|(_, op)| {
                op.operation_type == operation_type
                    && !op.is_finished()
                    && op.updated_at < updated_before
            })
            .collect();
        ops.sort_by_key(|(seq, op)| (op.created_at, *seq));
        Ok(ops.into_iter().map(|(_, op)| op.id.clone()).collect())
    }
}

#[async_trait]
impl OrchestrationStore for MemoryStore {
    async fn insert_orchestration(&self, orchestration: &Orchestration) -> Result<()> {
        let mut state = self.state.write().await;
        if state.orchestrations.contains_key(&orchestration.id) {
            return Err(Error::AlreadyExists {
                entity: "orchestration",
                id: orchestration.id.clone(),
            });
        }
        state
            .orchestrations
            .insert(orchestration.id.clone(), orchestration.clone());
        Ok(())
    }

    async fn get_orchestration_by_id(&self, id: &str) -> Result<Orchestration> {
        self.state
            .read()
            .await
            .orchestrations
            .get(id)
            .cloned()
            .ok_or_else(|| Error::orchestration_not_found(id))
    }

    async fn update_orchestration_state(
        &self,
        id: &str,
        new_state: OrchestrationState,
        description: &str,
    ) -> Result<Orchestration> {
        let mut state = self.state.write().await;
        let orchestration = state
            .orchestrations
            .get_mut(id)
            .ok_or_else(|| Error::orchestration_not_found(id))?;
        orchestration.state = new_state;
        orchestration.description = description.to_string();
        orchestration.updated_at = Utc::now();
        Ok(orchestration.clone())
    }
}
