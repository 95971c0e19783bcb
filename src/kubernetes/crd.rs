// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking utilities

use crate::constants::crd::{POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS};
use crate::constants::groups;
use crate::error::Result;
use kube::{discovery::Discovery, Client};
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// A custom resource definition identified by group, version and kind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CrdRef {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
}

impl CrdRef {
    pub const fn new(group: &'static str, version: &'static str, kind: &'static str) -> Self {
        Self { group, version, kind }
    }
}

impl fmt::Display for CrdRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.kind, self.group, self.version)
    }
}

pub const VIRTUAL_SERVER: CrdRef = CrdRef::new(groups::NGINX, "v1", "VirtualServer");
pub const VIRTUAL_SERVER_ROUTE: CrdRef = CrdRef::new(groups::NGINX, "v1", "VirtualServerRoute");
pub const DOS_POLICY: CrdRef = CrdRef::new(groups::DOS, "v1beta1", "APDosPolicy");
pub const DOS_LOG_CONF: CrdRef = CrdRef::new(groups::DOS, "v1beta1", "APDosLogConf");
pub const DOS_PROTECTED_RESOURCE: CrdRef = CrdRef::new(groups::DOS, "v1beta1", "DosProtectedResource");

/// Wait until every CRD in `required` is served by the API server.
/// Polls with exponential backoff starting at POLL_INTERVAL_SECS seconds.
pub async fn wait_for_crds(client: &Client, required: &[CrdRef]) -> Result<()> {
    let mut interval = POLL_INTERVAL_SECS;

    loop {
        match missing_crds(client, required).await {
            Ok(missing) if missing.is_empty() => {
                info!(count = required.len(), "All required CRDs are available");
                return Ok(());
            }
            Ok(missing) => {
                let names: Vec<String> = missing.iter().map(|c| c.to_string()).collect();
                info!(
                    "CRDs not yet available: {}, waiting {} seconds...",
                    names.join(", "),
                    interval
                );
            }
            Err(e) => {
                warn!(
                    "Error checking for CRDs: {}, retrying in {} seconds...",
                    e, interval
                );
            }
        }

        sleep(Duration::from_secs(interval)).await;

        interval = (interval * 2).min(POLL_MAX_INTERVAL_SECS);
    }
}

/// CRDs from `required` that discovery does not report
async fn missing_crds(client: &Client, required: &[CrdRef]) -> Result<Vec<CrdRef>> {
    let mut group_names: Vec<&str> = required.iter().map(|c| c.group).collect();
    group_names.sort_unstable();
    group_names.dedup();

    let discovery = Discovery::new(client.clone()).filter(&group_names).run().await?;

    let mut served = Vec::new();
    for group in discovery.groups() {
        for version in group.versions() {
            for (ar, _) in group.versioned_resources(version) {
                served.push((group.name().to_string(), ar.version.clone(), ar.kind.clone()));
            }
        }
    }

    Ok(required
        .iter()
        .filter(|crd| {
            !served
                .iter()
                .any(|(g, v, k)| g == crd.group && v == crd.version && k == crd.kind)
        })
        .copied()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockService;
    use serde_json::json;

    fn api_group_list() -> String {
        json!({
            "kind": "APIGroupList",
            "apiVersion": "v1",
            "groups": [{
                "name": "k8s.nginx.org",
                "versions": [{ "groupVersion": "k8s.nginx.org/v1", "version": "v1" }],
                "preferredVersion": { "groupVersion": "k8s.nginx.org/v1", "version": "v1" }
            }]
        })
        .to_string()
    }

    fn resource_list() -> String {
        json!({
            "kind": "APIResourceList",
            "apiVersion": "v1",
            "groupVersion": "k8s.nginx.org/v1",
            "resources": [
                {
                    "name": "virtualservers",
                    "singularName": "virtualserver",
                    "namespaced": true,
                    "kind": "VirtualServer",
                    "verbs": ["get", "list", "watch", "patch"]
                },
                {
                    "name": "virtualservers/status",
                    "singularName": "",
                    "namespaced": true,
                    "kind": "VirtualServer",
                    "verbs": ["get", "patch", "update"]
                }
            ]
        })
        .to_string()
    }

    fn mock() -> MockService {
        MockService::new()
            .on_get("/apis", 200, &api_group_list())
            .on_get("/apis/k8s.nginx.org/v1", 200, &resource_list())
    }

    #[tokio::test]
    async fn test_served_crd_is_not_missing() {
        let client = mock().client();
        let missing = missing_crds(&client, &[VIRTUAL_SERVER]).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_unserved_crd_is_missing() {
        let client = mock().client();
        let missing = missing_crds(&client, &[VIRTUAL_SERVER, VIRTUAL_SERVER_ROUTE, DOS_POLICY])
            .await
            .unwrap();
        assert_eq!(missing, vec![VIRTUAL_SERVER_ROUTE, DOS_POLICY]);
    }

    #[test]
    fn test_display() {
        assert_eq!(DOS_POLICY.to_string(), "APDosPolicy (appprotectdos.f5.com/v1beta1)");
    }
}
