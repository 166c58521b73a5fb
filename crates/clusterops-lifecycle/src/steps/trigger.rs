// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Steps that start a backend operation.
//!
//! Each trigger step calls one provisioner method and records the returned
//! backend operation ID on the operation. A recorded ID means the call was
//! already made, so a re-run after a crash does not start a second one.

use async_trait::async_trait;
use clusterops_core::process::{Step, StepResult};
use clusterops_core::Operation;
use tracing::{info, warn};

use super::{ProvisioningParameters, StepContext, required_runtime_id, step_failed};
use crate::provisioner::{
    ProvisionRuntimeInput, ProvisionerClient, ProvisionerError, RuntimeOperationStatus,
    UpgradeRuntimeInput,
};

/// What a trigger step decided to do with a validated operation.
enum Call {
    /// Nothing to start on the backend.
    Skip(&'static str),
    /// Backend call result.
    Started(Result<RuntimeOperationStatus, ProvisionerError>),
}

/// One provisioner call.
#[async_trait]
trait Trigger: Send + Sync {
    async fn call(
        &self,
        provisioner: &dyn ProvisionerClient,
        operation: &Operation,
        params: &ProvisioningParameters,
    ) -> clusterops_core::Result<Call>;
}

async fn run_trigger(
    context: &StepContext,
    step_name: &str,
    trigger: &dyn Trigger,
    operation: Operation,
) -> StepResult {
    if operation.runtime_operation_id.is_some() {
        return StepResult::advance(operation);
    }

    let manager = &context.operation_manager;

    let call = match ProvisioningParameters::from_operation(&operation) {
        Ok(params) => {
            trigger
                .call(context.provisioner.as_ref(), &operation, &params)
                .await
        }
        Err(e) => Err(e),
    };

    let status = match call {
        Ok(Call::Started(Ok(status))) => status,
        Ok(Call::Skip(reason)) => {
            info!(operation_id = %operation.id, reason, "Nothing to start on the provisioner");
            return StepResult::advance(operation);
        }
        Ok(Call::Started(Err(e))) if e.is_temporary() => {
            warn!(operation_id = %operation.id, error = %e, "Provisioner call failed, will retry");
            let message = format!("{}: {}", step_name, e);
            let window = context.max_retry_window(&operation);
            return manager
                .retry_operation(
                    operation,
                    &message,
                    context.config.step_retry_interval,
                    window,
                )
                .await;
        }
        Ok(Call::Started(Err(e))) => {
            return manager
                .operation_failed(
                    operation,
                    "provisioner rejected the request",
                    Some(step_failed(step_name, &e)),
                )
                .await;
        }
        Err(e) => {
            return manager
                .operation_failed(operation, "invalid operation parameters", Some(e))
                .await;
        }
    };

    info!(
        operation_id = %operation.id,
        runtime_operation_id = %status.id,
        "Provisioner operation started"
    );

    let description = format!("{}: {}", step_name, status.message);
    let (operation, delay) = manager
        .update_operation(operation, |op| {
            op.runtime_operation_id = Some(status.id);
            if let Some(runtime_id) = status.runtime_id {
                op.runtime_id = Some(runtime_id);
            }
            op.description = description;
        })
        .await;

    StepResult::retry(operation, delay)
}

fn cluster_name(instance_id: &str) -> String {
    let suffix: String = instance_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(9)
        .collect::<String>()
        .to_ascii_lowercase();
    format!("c-{}", suffix)
}

fn upgrade_input(params: &ProvisioningParameters) -> UpgradeRuntimeInput {
    UpgradeRuntimeInput {
        kubernetes_version: params.kubernetes_version.clone(),
        machine_type: params.machine_type.clone(),
    }
}

macro_rules! trigger_step {
    ($(#[$doc:meta])* $ty:ident, $name:literal) => {
        $(#[$doc])*
        pub struct $ty {
            context: StepContext,
        }

        impl $ty {
            /// Create the step.
            pub fn new(context: StepContext) -> Self {
                Self { context }
            }
        }

        #[async_trait]
        impl Step for $ty {
            fn name(&self) -> &str {
                $name
            }

            async fn run(&self, operation: Operation) -> StepResult {
                run_trigger(&self.context, $name, self, operation).await
            }
        }
    };
}

trigger_step!(
    /// Start creating the runtime of a provisioning operation.
    CreateRuntimeStep,
    "create_runtime"
);

trigger_step!(
    /// Start upgrading the runtime components.
    UpgradeRuntimeStep,
    "upgrade_runtime"
);

trigger_step!(
    /// Start upgrading the shoot cluster.
    UpgradeShootStep,
    "upgrade_shoot"
);

trigger_step!(
    /// Start removing the runtime. Instances that never got a runtime are skipped.
    DeprovisionRuntimeStep,
    "deprovision_runtime"
);

trigger_step!(
    /// Start hibernating the runtime.
    HibernateRuntimeStep,
    "hibernate_runtime"
);

trigger_step!(
    /// Start reconnecting the in-cluster agent.
    ReconnectAgentStep,
    "reconnect_agent"
);

#[async_trait]
impl Trigger for CreateRuntimeStep {
    async fn call(
        &self,
        provisioner: &dyn ProvisionerClient,
        operation: &Operation,
        params: &ProvisioningParameters,
    ) -> clusterops_core::Result<Call> {
        let input = ProvisionRuntimeInput {
            instance_id: operation.instance_id.clone(),
            cluster_name: cluster_name(&operation.instance_id),
            region: params.region.clone(),
            plan_id: params.plan_id.clone(),
            kubernetes_version: params.kubernetes_version.clone(),
            machine_type: params.machine_type.clone(),
        };
        Ok(Call::Started(
            provisioner
                .provision_runtime(&params.global_account_id, &params.subaccount_id, &input)
                .await,
        ))
    }
}

#[async_trait]
impl Trigger for UpgradeRuntimeStep {
    async fn call(
        &self,
        provisioner: &dyn ProvisionerClient,
        operation: &Operation,
        params: &ProvisioningParameters,
    ) -> clusterops_core::Result<Call> {
        let runtime_id = required_runtime_id(operation)?;
        Ok(Call::Started(
            provisioner
                .upgrade_runtime(&params.global_account_id, runtime_id, &upgrade_input(params))
                .await,
        ))
    }
}

#[async_trait]
impl Trigger for UpgradeShootStep {
    async fn call(
        &self,
        provisioner: &dyn ProvisionerClient,
        operation: &Operation,
        params: &ProvisioningParameters,
    ) -> clusterops_core::Result<Call> {
        let runtime_id = required_runtime_id(operation)?;
        Ok(Call::Started(
            provisioner
                .upgrade_shoot(&params.global_account_id, runtime_id, &upgrade_input(params))
                .await,
        ))
    }
}

#[async_trait]
impl Trigger for DeprovisionRuntimeStep {
    async fn call(
        &self,
        provisioner: &dyn ProvisionerClient,
        operation: &Operation,
        params: &ProvisioningParameters,
    ) -> clusterops_core::Result<Call> {
        let Ok(runtime_id) = required_runtime_id(operation) else {
            return Ok(Call::Skip("instance has no runtime"));
        };
        Ok(Call::Started(
            provisioner
                .deprovision_runtime(&params.global_account_id, runtime_id)
                .await,
        ))
    }
}

#[async_trait]
impl Trigger for HibernateRuntimeStep {
    async fn call(
        &self,
        provisioner: &dyn ProvisionerClient,
        operation: &Operation,
        params: &ProvisioningParameters,
    ) -> clusterops_core::Result<Call> {
        let runtime_id = required_runtime_id(operation)?;
        Ok(Call::Started(
            provisioner
                .hibernate_runtime(&params.global_account_id, runtime_id)
                .await,
        ))
    }
}

#[async_trait]
impl Trigger for ReconnectAgentStep {
    async fn call(
        &self,
        provisioner: &dyn ProvisionerClient,
        operation: &Operation,
        params: &ProvisioningParameters,
    ) -> clusterops_core::Result<Call> {
        let runtime_id = required_runtime_id(operation)?;
        Ok(Call::Started(
            provisioner
                .reconnect_runtime_agent(&params.global_account_id, runtime_id)
                .await,
        ))
    }
}
