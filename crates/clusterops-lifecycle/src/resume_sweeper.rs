// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resume sweeper for stalled operations.
//!
//! Periodically lists operations that are neither finished nor updated
//! recently and adds them back to the queue of their type. This picks up
//! operations whose worker died, and operations that were dropped after an
//! executor error. The queue deduplicates IDs, so sweeping an operation that
//! is still being worked on is harmless.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clusterops_core::OperationType;
use clusterops_core::persistence::OperationStore;
use clusterops_core::process::Queue;
use tokio::sync::Notify;
use tracing::{debug, error, info};

/// Resume sweeper configuration.
#[derive(Debug, Clone)]
pub struct ResumeSweeperConfig {
    /// How often to look for stalled operations.
    pub poll_interval: Duration,
    /// Operations updated more recently than this are left alone.
    pub min_age: Duration,
}

impl Default for ResumeSweeperConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            min_age: Duration::from_secs(600),
        }
    }
}

/// Resume sweeper that runs as a background task.
pub struct ResumeSweeper {
    store: Arc<dyn OperationStore>,
    queues: HashMap<OperationType, Arc<Queue>>,
    config: ResumeSweeperConfig,
    shutdown: Arc<Notify>,
}

impl ResumeSweeper {
    /// Create a sweeper feeding `queues`.
    pub fn new(
        store: Arc<dyn OperationStore>,
        queues: HashMap<OperationType, Arc<Queue>>,
        config: ResumeSweeperConfig,
    ) -> Self {
        Self {
            store,
            queues,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweeper loop.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            min_age_secs = self.config.min_age.as_secs(),
            "Resume sweeper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Resume sweeper shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// Re-queue every stalled operation once. Returns how many IDs were newly queued.
    pub async fn sweep_once(&self) -> usize {
        let cutoff = chrono::Duration::from_std(self.config.min_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut queued = 0;
        for (operation_type, queue) in &self.queues {
            let ids = match self
                .store
                .list_unfinished_operation_ids(*operation_type, cutoff)
                .await
            {
                Ok(ids) => ids,
                Err(e) => {
                    error!(operation_type = %operation_type, error = %e, "Failed to list stalled operations");
                    continue;
                }
            };

            for id in ids {
                if queue.add(id.clone()) {
                    debug!(operation_id = %id, operation_type = %operation_type, "Re-queued stalled operation");
                    queued += 1;
                }
            }
        }

        if queued > 0 {
            info!(count = queued, "Resumed stalled operations");
        }
        queued
    }
}
