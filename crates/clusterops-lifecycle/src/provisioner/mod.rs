// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioner module - the infrastructure-provisioning backend seam.

pub mod mock;
mod traits;

pub use mock::{MockProvisioner, ProvisionerCall};
pub use traits::*;
