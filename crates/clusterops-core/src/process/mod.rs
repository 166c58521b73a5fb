// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Step pipelines and the workers that run them.

pub mod manager;
pub mod operation_manager;
pub mod queue;
pub mod step;

pub use self::manager::{DEFAULT_STEP_TIMEOUT, Manager, ManagerBuilder};
pub use self::operation_manager::{DEFAULT_CONFLICT_RETRY_INTERVAL, OperationManager};
pub use self::queue::{Executor, Queue, QueueHandle};
pub use self::step::{Step, StepResult};
