// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

use crate::process::DEFAULT_STEP_TIMEOUT;

/// Engine configuration shared by every operation type.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Worker tasks per queue.
    ///
    /// Bounds concurrently in-progress operations of one type. A runtime with
    /// one queue per operation type runs up to `workers` times the number of
    /// types at once.
    pub workers: usize,
    /// Wall-clock budget of a single step within one `execute` call.
    pub step_timeout: Duration,
    /// Delay returned by the operation manager after a lost optimistic write.
    pub conflict_retry_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            workers: 20,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            conflict_retry_interval: Duration::from_millis(1000),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `CLUSTEROPS_DATABASE_URL`: PostgreSQL or SQLite connection string (default: in-memory)
    /// - `CLUSTEROPS_WORKERS`: Worker tasks per queue (default: 20)
    /// - `CLUSTEROPS_STEP_TIMEOUT_SECS`: Per-step timeout (default: 10800)
    /// - `CLUSTEROPS_CONFLICT_RETRY_MS`: Retry delay after a version conflict (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("CLUSTEROPS_DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let workers: usize = std::env::var("CLUSTEROPS_WORKERS")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("CLUSTEROPS_WORKERS", "must be a positive integer"))?;
        if workers == 0 {
            return Err(ConfigError::Invalid(
                "CLUSTEROPS_WORKERS",
                "must be a positive integer",
            ));
        }

        let step_timeout = match std::env::var("CLUSTEROPS_STEP_TIMEOUT_SECS") {
            Ok(secs) => Duration::from_secs(secs.parse().map_err(|_| {
                ConfigError::Invalid("CLUSTEROPS_STEP_TIMEOUT_SECS", "must be a number of seconds")
            })?),
            Err(_) => DEFAULT_STEP_TIMEOUT,
        };

        let conflict_retry_ms: u64 = std::env::var("CLUSTEROPS_CONFLICT_RETRY_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "CLUSTEROPS_CONFLICT_RETRY_MS",
                    "must be a number of milliseconds",
                )
            })?;

        Ok(Self {
            database_url,
            workers,
            step_timeout,
            conflict_retry_interval: Duration::from_millis(conflict_retry_ms),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
