// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resource types and the status contract.

pub mod dos;
pub mod key;
pub mod status;
pub mod virtual_server;
pub mod virtual_server_route;

pub use dos::{DosLogConf, DosPolicy, DosProtectedResource};
pub use key::{ResourceKey, ResourceKind};
pub use status::{Reason, ReconciliationOutcome, ResourceStatus, State};
pub use virtual_server::VirtualServer;
pub use virtual_server_route::VirtualServerRoute;
