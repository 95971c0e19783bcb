// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    VirtualServer,
    VirtualServerRoute,
    DosPolicy,
    DosLogConf,
    DosProtectedResource,
}

impl ResourceKind {
    /// Kind name as served by the API server
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::VirtualServer => "VirtualServer",
            ResourceKind::VirtualServerRoute => "VirtualServerRoute",
            ResourceKind::DosPolicy => "APDosPolicy",
            ResourceKind::DosLogConf => "APDosLogConf",
            ResourceKind::DosProtectedResource => "DosProtectedResource",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a watched object: `(kind, namespace, name)`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `namespace/name` without the kind
    pub fn object_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Resolve a `name` or `namespace/name` reference relative to `default_namespace`
pub fn resolve_reference(reference: &str, default_namespace: &str) -> (String, String) {
    match reference.split_once('/') {
        Some((ns, name)) => (ns.to_string(), name.to_string()),
        None => (default_namespace.to_string(), reference.to_string()),
    }
}
