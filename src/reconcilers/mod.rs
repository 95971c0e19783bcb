// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Watchers that feed custom resource events to the SyncManager.

pub mod watcher;

pub use watcher::{ResourceWatcher, Watched};
