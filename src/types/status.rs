// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Status subresource shared by every watched kind.

use crate::error::VsGateError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `status.state`; the exact strings are part of the public contract.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, schemars::JsonSchema)]
pub enum State {
    Valid,
    Warning,
    Invalid,
}

/// `status.reason`; the exact strings are part of the public contract.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, schemars::JsonSchema)]
pub enum Reason {
    AddedOrUpdated,
    AddedOrUpdatedWithWarning,
    Invalid,
    /// The host is held by an older VirtualServer
    Rejected,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Valid => "Valid",
            State::Warning => "Warning",
            State::Invalid => "Invalid",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reason::AddedOrUpdated => "AddedOrUpdated",
            Reason::AddedOrUpdatedWithWarning => "AddedOrUpdatedWithWarning",
            Reason::Invalid => "Invalid",
            Reason::Rejected => "Rejected",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    pub state: State,
    pub reason: Reason,
    #[serde(default)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ResourceStatus {
    /// Same visible outcome, ignoring the generation it was computed from
    pub fn same_outcome(&self, other: &ResourceStatus) -> bool {
        self.state == other.state && self.reason == other.reason && self.message == other.message
    }
}

/// Result of validating and compiling one resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    Valid,
    Warning(String),
    Invalid(String),
}

impl ReconciliationOutcome {
    pub fn from_warnings(warnings: &[String]) -> Self {
        if warnings.is_empty() {
            ReconciliationOutcome::Valid
        } else {
            ReconciliationOutcome::Warning(warnings.join("; "))
        }
    }

    pub fn state(&self) -> State {
        match self {
            ReconciliationOutcome::Valid => State::Valid,
            ReconciliationOutcome::Warning(_) => State::Warning,
            ReconciliationOutcome::Invalid(_) => State::Invalid,
        }
    }

    /// Outcome for a resource that failed with `error`. Unresolved references
    /// still serve what they can, everything else is rejected.
    pub fn from_error(error: &VsGateError) -> Self {
        match error {
            VsGateError::ReferenceUnresolved(detail) => ReconciliationOutcome::Warning(detail.clone()),
            VsGateError::SpecInvalid(detail) => ReconciliationOutcome::Invalid(detail.clone()),
            other => ReconciliationOutcome::Invalid(other.to_string()),
        }
    }

    /// Build the status written for the resource `namespace/name`
    pub fn to_status(&self, kind: &str, namespace: &str, name: &str, generation: Option<i64>) -> ResourceStatus {
        let (state, reason, message) = match self {
            ReconciliationOutcome::Valid => (
                State::Valid,
                Reason::AddedOrUpdated,
                format!("Configuration for {}/{} was added or updated", namespace, name),
            ),
            ReconciliationOutcome::Warning(detail) => (
                State::Warning,
                Reason::AddedOrUpdatedWithWarning,
                format!(
                    "Configuration for {}/{} was added or updated ; with warning(s): {}",
                    namespace, name, detail
                ),
            ),
            ReconciliationOutcome::Invalid(detail) => (
                State::Invalid,
                Reason::Invalid,
                format!("{} {}/{} was rejected with error: {}", kind, namespace, name, detail),
            ),
        };

        ResourceStatus {
            state,
            reason,
            message,
            observed_generation: generation,
        }
    }
}
