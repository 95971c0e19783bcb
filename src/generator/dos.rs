// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! DoS protection directives and the JSON artifacts they point at.

use super::Paths;
use crate::configuration::DosBinding;
use crate::error::Result;
use crate::types::{DosLogConf, DosPolicy, DosProtectedResource};
use kube::ResourceExt;
use serde_json::json;

/// Directives for the `server` block, in the order the data plane expects.
/// A directive whose artifact is unavailable is left out.
pub fn render_directives(binding: &DosBinding, paths: &Paths) -> Vec<String> {
    let protected = &binding.protected;
    let spec = &protected.spec;

    if !spec.enable {
        return vec!["app_protect_dos_enable off;".to_string()];
    }

    let namespace = protected.namespace().unwrap_or_default();
    let mut directives = vec![
        "app_protect_dos_enable on;".to_string(),
        format!("app_protect_dos_name \"{}\";", protected.dos_name()),
    ];

    if let Some(monitor) = &spec.ap_dos_monitor {
        let mut directive = format!("app_protect_dos_monitor uri={}", monitor.uri);
        if let Some(protocol) = &monitor.protocol {
            directive.push_str(&format!(" protocol={}", protocol));
        }
        if let Some(timeout) = monitor.timeout {
            directive.push_str(&format!(" timeout={}", timeout));
        }
        directive.push(';');
        directives.push(directive);
    }

    if !spec.allow_list.is_empty() {
        directives.push(format!(
            "app_protect_dos_access_file \"{}\";",
            paths.dos_allow_list(&namespace, &protected.name_any()).display()
        ));
    }

    if let Some(policy) = &binding.policy {
        directives.push(format!(
            "app_protect_dos_policy_file {};",
            paths
                .dos_policy(&policy.namespace().unwrap_or_default(), &policy.name_any())
                .display()
        ));
    }

    // the data plane rejects security logging without a log destination
    if let Some(log) = spec.dos_security_log.as_ref().filter(|l| l.enable) {
        if let (Some(log_conf), Some(dest)) = (&binding.log_conf, &log.dos_log_dest) {
            directives.push("app_protect_dos_security_log_enable on;".to_string());
            directives.push(format!(
                "app_protect_dos_security_log {} syslog:server={};",
                paths
                    .dos_log_conf(&log_conf.namespace().unwrap_or_default(), &log_conf.name_any())
                    .display(),
                dest
            ));
        }
    }

    if let Some(dest) = &spec.dos_access_log_dest {
        directives.push("set $loggable '0';".to_string());
        directives.push(format!("access_log syslog:server={} log_dos if=$loggable;", dest));
    }

    directives
}

pub fn policy_json(policy: &DosPolicy) -> Result<String> {
    let artifact = json!({ "policy": policy.spec });
    Ok(serde_json::to_string_pretty(&artifact)?)
}

pub fn log_conf_json(log_conf: &DosLogConf) -> Result<String> {
    let artifact = json!({
        "filter": log_conf.spec.filter,
        "content": log_conf.spec.content,
    });
    Ok(serde_json::to_string_pretty(&artifact)?)
}

/// `None` when the resource has no allow list
pub fn allow_list_json(protected: &DosProtectedResource) -> Result<Option<String>> {
    if protected.spec.allow_list.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string_pretty(&protected.spec.allow_list)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "test-ns";

    fn binding() -> DosBinding {
        let protected: DosProtectedResource = serde_yaml::from_str(
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
  dosAccessLogDest: "syslog-svc.nginx-ingress.svc.cluster.local:514"
  dosSecurityLog:
    enable: true
    apDosLogConf: "doslogconf"
    dosLogDest: "syslog-svc.nginx-ingress.svc.cluster.local:514"
  allowList:
  - ipWithMask: "10.0.0.0/8"
"#,
        )
        .unwrap();
        let policy: DosPolicy = serde_yaml::from_str(
            r#"
apiVersion: appprotectdos.f5.com/v1beta1
kind: APDosPolicy
metadata:
  name: dospolicy
  namespace: test-ns
spec:
  mitigation_mode: "standard"
  signatures: "on"
"#,
        )
        .unwrap();
        let log_conf: DosLogConf = serde_yaml::from_str(
            r#"
apiVersion: appprotectdos.f5.com/v1beta1
kind: APDosLogConf
metadata:
  name: doslogconf
  namespace: test-ns
spec:
  filter:
    traffic-mitigation-stats: all
  content:
    format: splunk
    max_message_size: 64k
"#,
        )
        .unwrap();

        DosBinding {
            protected,
            policy: Some(policy),
            log_conf: Some(log_conf),
        }
    }

    #[test]
    fn test_directives_in_order() {
        let directives = render_directives(&binding(), &Paths::new("/etc/nginx"));

        assert_eq!(
            directives,
            vec![
                "app_protect_dos_enable on;".to_string(),
                format!("app_protect_dos_name \"{}/dos-protected/name\";", NS),
                "app_protect_dos_monitor uri=dos.example.com protocol=http1 timeout=5;".to_string(),
                format!("app_protect_dos_access_file \"/etc/nginx/dos/allowlist/{}_dos-protected.json\";", NS),
                format!("app_protect_dos_policy_file /etc/nginx/dos/policies/{}_dospolicy.json;", NS),
                "app_protect_dos_security_log_enable on;".to_string(),
                format!(
                    "app_protect_dos_security_log /etc/nginx/dos/logconfs/{}_doslogconf.json syslog:server=syslog-svc.nginx-ingress.svc.cluster.local:514;",
                    NS
                ),
                "set $loggable '0';".to_string(),
                "access_log syslog:server=syslog-svc.nginx-ingress.svc.cluster.local:514 log_dos if=$loggable;"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn test_missing_artifacts_are_omitted() {
        let mut binding = binding();
        binding.policy = None;
        binding.log_conf = None;

        let directives = render_directives(&binding, &Paths::new("/etc/nginx"));

        assert!(!directives.iter().any(|d| d.starts_with("app_protect_dos_policy_file")));
        assert!(!directives.iter().any(|d| d.starts_with("app_protect_dos_security_log")));
    }

    #[test]
    fn test_security_log_needs_destination() {
        let mut binding = binding();
        if let Some(log) = binding.protected.spec.dos_security_log.as_mut() {
            log.dos_log_dest = None;
        }

        let directives = render_directives(&binding, &Paths::new("/etc/nginx"));

        assert!(!directives.iter().any(|d| d.starts_with("app_protect_dos_security_log")));
        assert!(directives.contains(&"set $loggable '0';".to_string()));
    }

    #[test]
    fn test_disabled_protection() {
        let mut binding = binding();
        binding.protected.spec.enable = false;

        assert_eq!(
            render_directives(&binding, &Paths::new("/etc/nginx")),
            vec!["app_protect_dos_enable off;".to_string()]
        );
    }

    #[test]
    fn test_artifacts() {
        let binding = binding();

        let policy: serde_json::Value = serde_json::from_str(&policy_json(binding.policy.as_ref().unwrap()).unwrap()).unwrap();
        assert_eq!(policy["policy"]["mitigation_mode"], "standard");
        assert!(policy["policy"].get("bad_actors").is_none());

        let log: serde_json::Value = serde_json::from_str(&log_conf_json(binding.log_conf.as_ref().unwrap()).unwrap()).unwrap();
        assert_eq!(log["filter"]["traffic-mitigation-stats"], "all");
        assert_eq!(log["content"]["max_message_size"], "64k");

        let allow = allow_list_json(&binding.protected).unwrap().unwrap();
        assert!(allow.contains("\"ipWithMask\": \"10.0.0.0/8\""));
    }

    #[test]
    fn test_empty_allow_list_has_no_artifact() {
        let mut binding = binding();
        binding.protected.spec.allow_list.clear();

        assert_eq!(allow_list_json(&binding.protected).unwrap(), None);
        assert!(!render_directives(&binding, &Paths::new("/etc/nginx"))
            .iter()
            .any(|d| d.starts_with("app_protect_dos_access_file")));
    }
}
