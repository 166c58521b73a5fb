// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One [`Manager`] per operation type.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clusterops_core::OperationType;
use clusterops_core::process::{Manager, Step};

use crate::steps::{
    CheckRuntimeOperationStep, CreateRuntimeStep, DeprovisionRuntimeStep, HibernateRuntimeStep,
    InitialisationStep, ReconnectAgentStep, StepContext, UpgradeRuntimeStep, UpgradeShootStep,
};

/// Weight of the initialisation step.
pub const INITIALISATION_WEIGHT: i32 = 1;
/// Weight of the step that starts the backend operation.
pub const TRIGGER_WEIGHT: i32 = 2;
/// Weight of the step that waits for the backend operation.
pub const CHECK_WEIGHT: i32 = 3;

fn trigger_step(operation_type: OperationType, context: &StepContext) -> Arc<dyn Step> {
    let context = context.clone();
    match operation_type {
        OperationType::Provision => Arc::new(CreateRuntimeStep::new(context)),
        OperationType::Deprovision => Arc::new(DeprovisionRuntimeStep::new(context)),
        OperationType::Upgrade => Arc::new(UpgradeRuntimeStep::new(context)),
        OperationType::UpgradeShoot => Arc::new(UpgradeShootStep::new(context)),
        OperationType::Hibernate => Arc::new(HibernateRuntimeStep::new(context)),
        OperationType::ReconnectAgent => Arc::new(ReconnectAgentStep::new(context)),
    }
}

/// Build the pipeline for one operation type.
pub fn build_manager(
    operation_type: OperationType,
    context: &StepContext,
    step_timeout: Duration,
) -> Manager {
    Manager::builder(operation_type.as_str(), context.operation_manager.clone())
        .step_timeout(step_timeout)
        .add_step(
            INITIALISATION_WEIGHT,
            Arc::new(InitialisationStep::new(context.clone())),
        )
        .add_step(TRIGGER_WEIGHT, trigger_step(operation_type, context))
        .add_step(
            CHECK_WEIGHT,
            Arc::new(CheckRuntimeOperationStep::new(context.clone())),
        )
        .build()
}

/// Build the pipelines for every operation type.
pub fn build_managers(
    context: &StepContext,
    step_timeout: Duration,
) -> HashMap<OperationType, Arc<Manager>> {
    OperationType::ALL
        .into_iter()
        .map(|t| (t, Arc::new(build_manager(t, context, step_timeout))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterops_core::persistence::{MemoryStore, OperationStore};
    use clusterops_core::process::OperationManager;
    use clusterops_core::{Operation, OperationState};

    use crate::config::LifecycleConfig;
    use crate::provisioner::MockProvisioner;

    fn context() -> StepContext {
        let store = Arc::new(MemoryStore::new());
        StepContext::new(
            OperationManager::new(store.clone()),
            store,
            Arc::new(MockProvisioner::new()),
            LifecycleConfig::default(),
        )
    }

    #[test]
    fn test_every_type_has_a_pipeline() {
        let managers = build_managers(&context(), Duration::from_secs(60));
        assert_eq!(managers.len(), OperationType::ALL.len());
        for t in OperationType::ALL {
            assert_eq!(managers[&t].name(), t.as_str());
        }
    }

    #[test]
    fn test_pipeline_layout() {
        let manager = build_manager(OperationType::UpgradeShoot, &context(), Duration::from_secs(60));
        assert_eq!(
            manager.steps(),
            vec![
                (1, "initialisation".to_string()),
                (2, "upgrade_shoot".to_string()),
                (3, "check_runtime_operation".to_string()),
            ]
        );

        let provision = build_manager(OperationType::Provision, &context(), Duration::from_secs(60));
        assert_eq!(provision.steps()[1].1, "create_runtime");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provisioning_outlasts_an_hour_with_defaults() {
        let store = Arc::new(MemoryStore::new());
        // 80 polls at the default 60s check interval.
        let provisioner = Arc::new(MockProvisioner::new().with_polls_until_done(80));
        let context = StepContext::new(
            OperationManager::new(store.clone()),
            store.clone(),
            provisioner.clone(),
            LifecycleConfig::default(),
        );
        let manager = build_manager(
            OperationType::Provision,
            &context,
            clusterops_core::process::DEFAULT_STEP_TIMEOUT,
        );

        let op = Operation::new("i-1", OperationType::Provision).with_parameters(serde_json::json!({
            "global_account_id": "ga-1",
            "subaccount_id": "sa-1",
            "region": "eu-west-1",
            "plan_id": "standard",
        }));
        store.insert_operation(&op).await.unwrap();

        let started = tokio::time::Instant::now();
        manager.execute(&op.id).await.unwrap();

        assert!(started.elapsed() > Duration::from_secs(3600));
        let stored = store.get_operation_by_id(&op.id).await.unwrap();
        assert_eq!(stored.state, OperationState::Succeeded);
        assert_eq!(provisioner.call_count("runtime_operation_status").await, 81);
    }
}
