// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Distribution of generated configuration and reporting of resource status.

pub mod files;
pub mod manager;
pub mod reload;
pub mod status;

pub use files::ConfigFiles;
pub use manager::{SyncEvent, SyncManager, SyncManagerHandle, WatchedResource};
pub use reload::{NginxReloader, ReloadRecord, ReloadResults, Reloader};
pub use status::{KubeStatusWriter, ObservedState, StatusReporter, StatusWriter};
