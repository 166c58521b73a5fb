// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for clusterops-lifecycle.
//!
//! [`LifecycleRuntime`] runs one queue per operation type, each feeding the
//! pipeline for that type, plus the resume sweeper, inside an existing tokio
//! application.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use clusterops_core::{Operation, OperationType};
//! use clusterops_lifecycle::runtime::LifecycleRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provisioner = Arc::new(MyProvisioner::connect("https://provisioner").await?);
//!
//!     let runtime = LifecycleRuntime::builder()
//!         .database_url("postgres://...")
//!         .provisioner(provisioner)
//!         .workers(20)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let operation = Operation::new("instance-1", OperationType::Provision)
//!         .with_parameters(serde_json::json!({
//!             "global_account_id": "ga",
//!             "subaccount_id": "sa",
//!             "region": "eu-west-1",
//!             "plan_id": "standard",
//!         }));
//!     runtime.submit(operation).await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clusterops_core::config::Config;
use clusterops_core::migrations;
use clusterops_core::persistence::{
    MemoryStore, OperationStore, OrchestrationStore, PostgresStore, SqliteStore,
};
use clusterops_core::process::{
    DEFAULT_CONFLICT_RETRY_INTERVAL, DEFAULT_STEP_TIMEOUT, Executor, OperationManager, Queue,
    QueueHandle,
};
use clusterops_core::{Operation, OperationType};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{ConfigError, LifecycleConfig};
use crate::error::Error;
use crate::pipelines::build_managers;
use crate::provisioner::ProvisionerClient;
use crate::resume_sweeper::{ResumeSweeper, ResumeSweeperConfig};
use crate::steps::StepContext;

/// Operation and orchestration stores backed by the same database.
#[derive(Clone)]
pub struct Stores {
    /// Operation records.
    pub operations: Arc<dyn OperationStore>,
    /// Orchestration records.
    pub orchestrations: Arc<dyn OrchestrationStore>,
}

impl Stores {
    /// Use one store for both record kinds.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: OperationStore + OrchestrationStore + 'static,
    {
        Self {
            operations: store.clone(),
            orchestrations: store,
        }
    }
}

/// Open the stores for a connection URL, running migrations.
///
/// `None` selects the in-memory store. `postgres://` and `postgresql://` URLs
/// select PostgreSQL, `sqlite:` URLs SQLite.
pub async fn open_stores(database_url: Option<&str>) -> crate::error::Result<Stores> {
    let Some(url) = database_url else {
        info!("No database configured, using in-memory store");
        return Ok(Stores::shared(Arc::new(MemoryStore::new())));
    };

    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        migrations::run_postgres(&pool)
            .await
            .map_err(clusterops_core::Error::from)?;
        info!("Connected to PostgreSQL store");
        return Ok(Stores::shared(Arc::new(PostgresStore::new(pool))));
    }

    if url.starts_with("sqlite:") {
        // Every connection to an in-memory database opens a fresh one.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        migrations::run_sqlite(&pool)
            .await
            .map_err(clusterops_core::Error::from)?;
        info!("Connected to SQLite store");
        return Ok(Stores::shared(Arc::new(SqliteStore::new(pool))));
    }

    Err(Error::InvalidRequest(
        "database URL must start with postgres://, postgresql:// or sqlite:".to_string(),
    ))
}

/// Builder for creating a [`LifecycleRuntime`].
pub struct LifecycleRuntimeBuilder {
    stores: Option<Stores>,
    database_url: Option<String>,
    provisioner: Option<Arc<dyn ProvisionerClient>>,
    workers: usize,
    step_timeout: Duration,
    conflict_retry_interval: Duration,
    lifecycle_config: LifecycleConfig,
    sweeper_enabled: bool,
}

impl Default for LifecycleRuntimeBuilder {
    fn default() -> Self {
        Self {
            stores: None,
            database_url: None,
            provisioner: None,
            workers: 20,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            conflict_retry_interval: DEFAULT_CONFLICT_RETRY_INTERVAL,
            lifecycle_config: LifecycleConfig::default(),
            sweeper_enabled: true,
        }
    }
}

impl LifecycleRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder from `CLUSTEROPS_*` environment variables.
    ///
    /// The provisioner still has to be set.
    pub fn from_env() -> crate::error::Result<Self> {
        let engine = Config::from_env().map_err(ConfigError::from)?;
        let lifecycle = LifecycleConfig::from_env()?;
        Ok(Self::new().engine_config(&engine).lifecycle_config(lifecycle))
    }

    /// Apply engine settings: database URL, workers, step timeout, conflict delay.
    pub fn engine_config(mut self, config: &Config) -> Self {
        self.database_url = config.database_url.clone();
        self.workers = config.workers;
        self.step_timeout = config.step_timeout;
        self.conflict_retry_interval = config.conflict_retry_interval;
        self
    }

    /// Use an already opened store for operations and orchestrations.
    ///
    /// Takes precedence over [`database_url`](Self::database_url).
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: OperationStore + OrchestrationStore + 'static,
    {
        self.stores = Some(Stores::shared(store));
        self
    }

    /// Use separately opened stores.
    pub fn stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    /// Open stores from a connection URL at start.
    ///
    /// Default: in-memory store
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Set the provisioning backend client (required).
    pub fn provisioner(mut self, provisioner: Arc<dyn ProvisionerClient>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Set the number of workers per operation type.
    ///
    /// Each operation type has its own queue, so up to `workers` times the
    /// number of types run at once.
    ///
    /// Default: 20
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the per-step wall-clock budget.
    ///
    /// Must leave room for the longest retry window, see
    /// [`LifecycleConfig::min_step_timeout`].
    ///
    /// Default: 3 hours
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Set the delay after a lost optimistic write.
    ///
    /// Default: 1 second
    pub fn conflict_retry_interval(mut self, interval: Duration) -> Self {
        self.conflict_retry_interval = interval;
        self
    }

    /// Set step retry intervals, retry windows, and sweeper timing.
    pub fn lifecycle_config(mut self, config: LifecycleConfig) -> Self {
        self.lifecycle_config = config;
        self
    }

    /// Enable or disable the resume sweeper.
    ///
    /// Default: enabled
    pub fn sweeper(mut self, enabled: bool) -> Self {
        self.sweeper_enabled = enabled;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing, or if the step
    /// timeout would cut a step off before its retry window runs out.
    pub fn build(self) -> Result<LifecycleRuntimeConfig> {
        let provisioner = self
            .provisioner
            .ok_or_else(|| anyhow::anyhow!("provisioner is required"))?;
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        for operation_type in OperationType::ALL {
            let needed = self.lifecycle_config.min_step_timeout(operation_type);
            if self.step_timeout < needed {
                anyhow::bail!(
                    "step timeout of {}s is shorter than the {}s a {} step may retry for",
                    self.step_timeout.as_secs(),
                    needed.as_secs(),
                    operation_type
                );
            }
        }

        Ok(LifecycleRuntimeConfig {
            stores: self.stores,
            database_url: self.database_url,
            provisioner,
            workers: self.workers,
            step_timeout: self.step_timeout,
            conflict_retry_interval: self.conflict_retry_interval,
            lifecycle_config: self.lifecycle_config,
            sweeper_enabled: self.sweeper_enabled,
        })
    }
}

/// Configuration for a [`LifecycleRuntime`].
pub struct LifecycleRuntimeConfig {
    stores: Option<Stores>,
    database_url: Option<String>,
    provisioner: Arc<dyn ProvisionerClient>,
    workers: usize,
    step_timeout: Duration,
    conflict_retry_interval: Duration,
    lifecycle_config: LifecycleConfig,
    sweeper_enabled: bool,
}

impl LifecycleRuntimeConfig {
    /// Start the runtime, spawning the queue workers and the resume sweeper.
    pub async fn start(self) -> Result<LifecycleRuntime> {
        let stores = match self.stores {
            Some(stores) => stores,
            None => open_stores(self.database_url.as_deref()).await?,
        };

        let operation_manager = OperationManager::new(stores.operations.clone())
            .with_conflict_retry_interval(self.conflict_retry_interval);
        let sweeper_config = ResumeSweeperConfig {
            poll_interval: self.lifecycle_config.sweep_interval,
            min_age: self.lifecycle_config.sweep_min_age,
        };
        let context = StepContext::new(
            operation_manager,
            stores.orchestrations.clone(),
            self.provisioner,
            self.lifecycle_config,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut queues = HashMap::new();
        let mut queue_handles = Vec::new();
        for (operation_type, manager) in build_managers(&context, self.step_timeout) {
            let executor: Arc<dyn Executor> = manager;
            let queue = Queue::new(operation_type.as_str(), executor);
            queue_handles.push(queue.run(shutdown_rx.clone(), self.workers));
            queues.insert(operation_type, queue);
        }

        let sweeper = if self.sweeper_enabled {
            let sweeper =
                ResumeSweeper::new(stores.operations.clone(), queues.clone(), sweeper_config);
            let shutdown = sweeper.shutdown_handle();
            let handle = tokio::spawn(async move {
                sweeper.run().await;
            });
            Some((handle, shutdown))
        } else {
            None
        };

        info!(
            workers = self.workers,
            queues = queues.len(),
            sweeper = sweeper.is_some(),
            "LifecycleRuntime started"
        );

        Ok(LifecycleRuntime {
            stores,
            queues,
            queue_handles,
            shutdown_tx,
            sweeper,
        })
    }
}

/// A running lifecycle engine that can be embedded in an application.
///
/// The runtime manages:
/// - one deduplicating queue and worker pool per operation type
/// - the resume sweeper re-queuing stalled operations (optional)
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct LifecycleRuntime {
    stores: Stores,
    queues: HashMap<OperationType, Arc<Queue>>,
    queue_handles: Vec<QueueHandle>,
    shutdown_tx: watch::Sender<bool>,
    sweeper: Option<(JoinHandle<()>, Arc<Notify>)>,
}

impl LifecycleRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> LifecycleRuntimeBuilder {
        LifecycleRuntimeBuilder::new()
    }

    /// Persist a new operation and queue it for processing.
    ///
    /// Returns the operation ID.
    pub async fn submit(&self, operation: Operation) -> crate::error::Result<String> {
        if !self.queues.contains_key(&operation.operation_type) {
            return Err(Error::UnknownOperationType(operation.operation_type));
        }
        self.stores.operations.insert_operation(&operation).await?;
        info!(
            operation_id = %operation.id,
            instance_id = %operation.instance_id,
            operation_type = %operation.operation_type,
            "Operation submitted"
        );
        self.enqueue(operation.operation_type, &operation.id)?;
        Ok(operation.id)
    }

    /// Queue an existing operation. Returns `false` if it was already waiting.
    pub fn enqueue(&self, operation_type: OperationType, operation_id: &str) -> crate::error::Result<bool> {
        let queue = self
            .queues
            .get(&operation_type)
            .ok_or(Error::UnknownOperationType(operation_type))?;
        Ok(queue.add(operation_id))
    }

    /// Load an operation.
    pub async fn operation(&self, operation_id: &str) -> crate::error::Result<Operation> {
        Ok(self.stores.operations.get_operation_by_id(operation_id).await?)
    }

    /// Get the stores the runtime writes to.
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Get the queue serving `operation_type`.
    pub fn queue(&self, operation_type: OperationType) -> Option<&Arc<Queue>> {
        self.queues.get(&operation_type)
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops accepting new items, lets the workers drain their queues, and
    /// stops the resume sweeper.
    pub async fn shutdown(self) -> Result<()> {
        info!("LifecycleRuntime shutting down...");

        let _ = self.shutdown_tx.send(true);
        if let Some((_, shutdown)) = &self.sweeper {
            shutdown.notify_one();
        }

        if let Some((handle, _)) = self.sweeper
            && let Err(e) = handle.await
        {
            error!("Resume sweeper task panicked: {}", e);
        }

        for handle in self.queue_handles {
            handle.wait().await;
        }

        info!("LifecycleRuntime shutdown complete");
        Ok(())
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        let sweeper_running = self
            .sweeper
            .as_ref()
            .is_none_or(|(handle, _)| !handle.is_finished());
        sweeper_running && self.queue_handles.iter().all(|h| !h.is_finished())
    }
}
