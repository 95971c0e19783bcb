// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::types::key::{ResourceKey, ResourceKind};
use crate::types::status::ResourceStatus;
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[kube(group = "k8s.nginx.org", version = "v1", kind = "VirtualServer")]
#[kube(namespaced, shortname = "vs")]
#[kube(status = "ResourceStatus")]
#[kube(printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"Host", "type":"string", "jsonPath":".spec.host"}"#)]
#[kube(printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServerSpec {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    /// Reference (`name` or `namespace/name`) to a DosProtectedResource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dos: Option<String>,
    #[serde(default)]
    pub upstreams: Vec<Upstream>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    pub name: String,
    pub service: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lb_method: Option<String>,
}

/// A route of a VirtualServer or a subroute of a VirtualServerRoute.
/// `route` is only meaningful on VirtualServer routes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    /// Reference to a VirtualServerRoute claimed by this route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    #[serde(rename = "return", default, skip_serializing_if = "Option::is_none")]
    pub return_: Option<ActionReturn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<ActionRedirect>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionReturn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    pub body: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionRedirect {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

impl VirtualServer {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(
            ResourceKind::VirtualServer,
            self.namespace().unwrap_or_default(),
            self.name_any(),
        )
    }

    /// Resources without an explicit class are handled by every controller
    pub fn has_ingress_class(&self, class: &str) -> bool {
        self.spec
            .ingress_class_name
            .as_deref()
            .map_or(true, |c| c.is_empty() || c == class)
    }
}
