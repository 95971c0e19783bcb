// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! DoS protection resources: policy, log configuration and protected resource binding.

use crate::types::key::{ResourceKey, ResourceKind};
use crate::types::status::ResourceStatus;
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[kube(group = "appprotectdos.f5.com", version = "v1beta1", kind = "APDosPolicy")]
#[kube(root = "DosPolicy", namespaced, shortname = "apdospol")]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "snake_case")]
pub struct DosPolicySpec {
    /// `standard`, `conservative` or `none`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mitigation_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signatures: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bad_actors: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation_tools_detection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_fingerprint: Option<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[kube(group = "appprotectdos.f5.com", version = "v1beta1", kind = "APDosLogConf")]
#[kube(root = "DosLogConf", namespaced, shortname = "apdoslogconf")]
#[kube(status = "ResourceStatus")]
pub struct DosLogConfSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<DosLogFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<DosLogContent>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct DosLogFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_mitigation_stats: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bad_actors: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack_signatures: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
pub struct DosLogContent {
    /// `splunk`, `arcsight` or `user-defined`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_size: Option<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[kube(group = "appprotectdos.f5.com", version = "v1beta1", kind = "DosProtectedResource")]
#[kube(namespaced, shortname = "pr")]
#[kube(status = "ResourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct DosProtectedResourceSpec {
    #[serde(default)]
    pub enable: bool,
    /// Name reported as `vs_name` together with the namespace and resource name
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ap_dos_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ap_dos_monitor: Option<DosMonitor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dos_access_log_dest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dos_security_log: Option<DosSecurityLog>,
    #[serde(default)]
    pub allow_list: Vec<AllowListEntry>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DosMonitor {
    pub uri: String,
    /// `http1`, `http2`, `grpc` or `websocket`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DosSecurityLog {
    #[serde(default)]
    pub enable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ap_dos_log_conf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dos_log_dest: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AllowListEntry {
    pub ip_with_mask: String,
}

impl DosPolicy {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(ResourceKind::DosPolicy, self.namespace().unwrap_or_default(), self.name_any())
    }
}

impl DosLogConf {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(ResourceKind::DosLogConf, self.namespace().unwrap_or_default(), self.name_any())
    }
}

impl DosProtectedResource {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(
            ResourceKind::DosProtectedResource,
            self.namespace().unwrap_or_default(),
            self.name_any(),
        )
    }

    /// Value of `app_protect_dos_name` and of the `vs_name` log field
    pub fn dos_name(&self) -> String {
        format!(
            "{}/{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any(),
            self.spec.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_protected_resource() {
        let pr: DosProtectedResource = serde_yaml::from_str(
            r#"
apiVersion: appprotectdos.f5.com/v1beta1
kind: DosProtectedResource
metadata:
  name: dos-protected
  namespace: test-ns
spec:
  enable: true
  name: "name"
  apDosMonitor:
    uri: "dos.example.com"
    protocol: "http1"
    timeout: 5
  apDosPolicy: "dospolicy"
  dosAccessLogDest: "accesslog-svc.nginx-ingress.svc.cluster.local:514"
  dosSecurityLog:
    enable: true
    apDosLogConf: "doslogconf"
    dosLogDest: "syslog-svc.nginx-ingress.svc.cluster.local:514"
  allowList:
  - ipWithMask: "10.0.0.0/8"
"#,
        )
        .unwrap();

        assert!(pr.spec.enable);
        assert_eq!(pr.dos_name(), "test-ns/dos-protected/name");
        assert_eq!(pr.spec.ap_dos_monitor.as_ref().unwrap().timeout, Some(5));
        assert_eq!(
            pr.spec.dos_security_log.as_ref().unwrap().ap_dos_log_conf.as_deref(),
            Some("doslogconf")
        );
        assert_eq!(pr.spec.allow_list[0].ip_with_mask, "10.0.0.0/8");
        assert_eq!(pr.key().to_string(), "DosProtectedResource/test-ns/dos-protected");
    }

    #[test]
    fn test_parse_policy_and_logconf() {
        let pol: DosPolicy = serde_yaml::from_str(
            r#"
apiVersion: appprotectdos.f5.com/v1beta1
kind: APDosPolicy
metadata:
  name: dospolicy
  namespace: test-ns
spec:
  mitigation_mode: "standard"
  signatures: "on"
  bad_actors: "on"
  automation_tools_detection: "on"
  tls_fingerprint: "on"
"#,
        )
        .unwrap();
        assert_eq!(pol.spec.mitigation_mode.as_deref(), Some("standard"));
        assert_eq!(pol.key().to_string(), "APDosPolicy/test-ns/dospolicy");

        let log: DosLogConf = serde_yaml::from_str(
            r#"
apiVersion: appprotectdos.f5.com/v1beta1
kind: APDosLogConf
metadata:
  name: doslogconf
  namespace: test-ns
spec:
  filter:
    traffic-mitigation-stats: all
    bad-actors: top 10
    attack-signatures: top 10
  content:
    format: splunk
    max_message_size: 64k
"#,
        )
        .unwrap();
        let filter = log.spec.filter.as_ref().unwrap();
        assert_eq!(filter.bad_actors.as_deref(), Some("top 10"));
        assert_eq!(log.spec.content.as_ref().unwrap().max_message_size.as_deref(), Some("64k"));
    }
}
