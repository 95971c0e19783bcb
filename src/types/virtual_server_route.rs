// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::types::key::{ResourceKey, ResourceKind};
use crate::types::status::ResourceStatus;
use crate::types::virtual_server::{Route, Upstream};
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[kube(group = "k8s.nginx.org", version = "v1", kind = "VirtualServerRoute")]
#[kube(namespaced, shortname = "vsr")]
#[kube(status = "ResourceStatus")]
#[kube(printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"Host", "type":"string", "jsonPath":".spec.host"}"#)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServerRouteSpec {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    #[serde(default)]
    pub upstreams: Vec<Upstream>,
    #[serde(default)]
    pub subroutes: Vec<Route>,
}

impl VirtualServerRoute {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(
            ResourceKind::VirtualServerRoute,
            self.namespace().unwrap_or_default(),
            self.name_any(),
        )
    }

    pub fn has_ingress_class(&self, class: &str) -> bool {
        self.spec
            .ingress_class_name
            .as_deref()
            .map_or(true, |c| c.is_empty() || c == class)
    }
}
