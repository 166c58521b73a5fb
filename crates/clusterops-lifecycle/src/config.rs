// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for clusterops-lifecycle.

use std::collections::HashMap;
use std::time::Duration;

use clusterops_core::OperationType;

/// Default maximum retry window for an operation type.
pub fn default_max_retry_window(operation_type: OperationType) -> Duration {
    match operation_type {
        OperationType::Provision
        | OperationType::Deprovision
        | OperationType::Upgrade
        | OperationType::UpgradeShoot => Duration::from_secs(7200),
        OperationType::Hibernate => Duration::from_secs(3600),
        OperationType::ReconnectAgent => Duration::from_secs(1800),
    }
}

/// Lifecycle step and sweeper configuration.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Delay between attempts of a provisioner call that failed temporarily.
    pub step_retry_interval: Duration,
    /// Delay between polls of a backend operation or a blocking operation.
    pub status_check_interval: Duration,
    /// How long a step may keep retrying, per operation type.
    pub max_retry_windows: HashMap<OperationType, Duration>,
    /// How often the resume sweeper looks for stalled operations.
    pub sweep_interval: Duration,
    /// How long an unfinished operation must sit untouched before it is re-queued.
    pub sweep_min_age: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            step_retry_interval: Duration::from_secs(10),
            status_check_interval: Duration::from_secs(60),
            max_retry_windows: OperationType::ALL
                .into_iter()
                .map(|t| (t, default_max_retry_window(t)))
                .collect(),
            sweep_interval: Duration::from_secs(300),
            sweep_min_age: Duration::from_secs(600),
        }
    }
}

impl LifecycleConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `CLUSTEROPS_STEP_RETRY_INTERVAL_SECS` (default: 10)
    /// - `CLUSTEROPS_STATUS_CHECK_INTERVAL_SECS` (default: 60)
    /// - `CLUSTEROPS_<TYPE>_MAX_RETRY_WINDOW_SECS`, where `<TYPE>` is one of
    ///   `PROVISION`, `DEPROVISION`, `UPGRADE`, `UPGRADE_SHOOT`, `HIBERNATE`,
    ///   `RECONNECT_AGENT` (defaults: 7200, hibernate 3600, reconnect 1800)
    /// - `CLUSTEROPS_SWEEP_INTERVAL_SECS` (default: 300)
    /// - `CLUSTEROPS_SWEEP_MIN_AGE_SECS` (default: 600)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut max_retry_windows = HashMap::new();
        for operation_type in OperationType::ALL {
            let key = max_retry_window_var(operation_type);
            let window = secs_var(&key, default_max_retry_window(operation_type))?;
            max_retry_windows.insert(operation_type, window);
        }

        Ok(Self {
            step_retry_interval: secs_var(
                "CLUSTEROPS_STEP_RETRY_INTERVAL_SECS",
                defaults.step_retry_interval,
            )?,
            status_check_interval: secs_var(
                "CLUSTEROPS_STATUS_CHECK_INTERVAL_SECS",
                defaults.status_check_interval,
            )?,
            max_retry_windows,
            sweep_interval: secs_var("CLUSTEROPS_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            sweep_min_age: secs_var("CLUSTEROPS_SWEEP_MIN_AGE_SECS", defaults.sweep_min_age)?,
        })
    }

    /// Maximum retry window for `operation_type`.
    pub fn max_retry_window(&self, operation_type: OperationType) -> Duration {
        self.max_retry_windows
            .get(&operation_type)
            .copied()
            .unwrap_or_else(|| default_max_retry_window(operation_type))
    }

    /// Override the retry window of one operation type.
    pub fn with_max_retry_window(mut self, operation_type: OperationType, window: Duration) -> Self {
        self.max_retry_windows.insert(operation_type, window);
        self
    }

    /// Shortest step timeout that lets a step of `operation_type` use up its
    /// retry window.
    ///
    /// The window is only checked when the step runs again, so the step needs
    /// one more retry interval on top of it.
    pub fn min_step_timeout(&self, operation_type: OperationType) -> Duration {
        self.max_retry_window(operation_type)
            + self.step_retry_interval.max(self.status_check_interval)
    }
}

fn max_retry_window_var(operation_type: OperationType) -> String {
    format!(
        "CLUSTEROPS_{}_MAX_RETRY_WINDOW_SECS",
        operation_type.as_str().to_uppercase()
    )
}

fn secs_var(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid(key.to_string(), "must be a number of seconds")),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(String, &'static str),

    /// Engine configuration failed to load.
    #[error(transparent)]
    Core(#[from] clusterops_core::config::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }

        fn clear_all(&mut self) {
            for key in [
                "CLUSTEROPS_STEP_RETRY_INTERVAL_SECS",
                "CLUSTEROPS_STATUS_CHECK_INTERVAL_SECS",
                "CLUSTEROPS_SWEEP_INTERVAL_SECS",
                "CLUSTEROPS_SWEEP_MIN_AGE_SECS",
            ] {
                self.remove(key);
            }
            for operation_type in OperationType::ALL {
                self.remove(&max_retry_window_var(operation_type));
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.clear_all();

        let config = LifecycleConfig::from_env().unwrap();

        assert_eq!(config.step_retry_interval, Duration::from_secs(10));
        assert_eq!(config.status_check_interval, Duration::from_secs(60));
        assert_eq!(
            config.max_retry_window(OperationType::Provision),
            Duration::from_secs(7200)
        );
        assert_eq!(
            config.max_retry_window(OperationType::Hibernate),
            Duration::from_secs(3600)
        );
        assert_eq!(
            config.max_retry_window(OperationType::ReconnectAgent),
            Duration::from_secs(1800)
        );
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.sweep_min_age, Duration::from_secs(600));
    }

    #[test]
    fn test_per_type_retry_window_override() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.clear_all();

        guard.set("CLUSTEROPS_UPGRADE_SHOOT_MAX_RETRY_WINDOW_SECS", "900");
        guard.set("CLUSTEROPS_STATUS_CHECK_INTERVAL_SECS", "5");

        let config = LifecycleConfig::from_env().unwrap();

        assert_eq!(
            config.max_retry_window(OperationType::UpgradeShoot),
            Duration::from_secs(900)
        );
        assert_eq!(
            config.max_retry_window(OperationType::Upgrade),
            Duration::from_secs(7200)
        );
        assert_eq!(config.status_check_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_value_names_the_variable() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.clear_all();

        guard.set("CLUSTEROPS_HIBERNATE_MAX_RETRY_WINDOW_SECS", "an hour");

        let err = LifecycleConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("CLUSTEROPS_HIBERNATE_MAX_RETRY_WINDOW_SECS"));
    }

    #[test]
    fn test_min_step_timeout_covers_window_and_one_poll() {
        let config = LifecycleConfig::default();
        assert_eq!(
            config.min_step_timeout(OperationType::Provision),
            Duration::from_secs(7260)
        );
        assert!(
            OperationType::ALL
                .into_iter()
                .all(|t| config.min_step_timeout(t) <= clusterops_core::process::DEFAULT_STEP_TIMEOUT)
        );
    }

    #[test]
    fn test_with_max_retry_window() {
        let config = LifecycleConfig::default()
            .with_max_retry_window(OperationType::Deprovision, Duration::from_secs(1));
        assert_eq!(
            config.max_retry_window(OperationType::Deprovision),
            Duration::from_secs(1)
        );
    }
}
