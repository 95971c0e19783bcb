// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery and retrying API calls.

pub mod crd;
pub mod retry;

pub use crd::{wait_for_crds, CrdRef};
pub use retry::{retry_with_backoff, RetryConfig};
