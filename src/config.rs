// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::{arbitrator, paths};
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Controller configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Restrict watches to one namespace; `None` watches all namespaces
    pub watch_namespace: Option<String>,
    /// Resources naming a different `ingressClassName` are ignored
    pub ingress_class: String,
    /// Root directory that receives generated configuration files
    pub conf_root: PathBuf,
    /// Binary invoked with `-s reload` after a batch of changes
    pub nginx_binary: PathBuf,
    pub dos: DosConfig,
    /// Hostname reported as `unit_hostname` in security log records
    pub unit_hostname: String,
}

#[derive(Debug, Clone)]
pub struct DosConfig {
    pub enabled: bool,
    pub arbitrator_service: String,
    /// Namespace of the arbitrator service. Must be set explicitly when it
    /// differs from the controller namespace.
    pub arbitrator_namespace: Option<String>,
    pub arbitrator_port: u16,
    pub sync_interval: Duration,
    /// `host:port` of the syslog server receiving learning-state records
    pub security_log_destination: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let enabled = match non_empty("ENABLE_APP_PROTECT_DOS") {
            Some(v) => v
                .parse::<bool>()
                .with_context(|| format!("ENABLE_APP_PROTECT_DOS must be true or false, got '{}'", v))?,
            None => false,
        };

        let arbitrator_port = match non_empty("DOS_ARBITRATOR_PORT") {
            Some(v) => v
                .parse::<u16>()
                .with_context(|| format!("DOS_ARBITRATOR_PORT is not a valid port: '{}'", v))?,
            None => arbitrator::DEFAULT_PORT,
        };

        let sync_secs = match non_empty("DOS_ARBITRATOR_SYNC_SECS") {
            Some(v) => v
                .parse::<u64>()
                .with_context(|| format!("DOS_ARBITRATOR_SYNC_SECS is not a number: '{}'", v))?,
            None => arbitrator::DEFAULT_SYNC_SECS,
        };

        let unit_hostname = non_empty("POD_NAME")
            .or_else(|| non_empty("HOSTNAME"))
            .unwrap_or_else(|| "vsgate".to_string());

        Ok(Config {
            watch_namespace: non_empty("WATCH_NAMESPACE"),
            ingress_class: non_empty("INGRESS_CLASS").unwrap_or_else(|| "nginx".to_string()),
            conf_root: non_empty("NGINX_CONF_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(paths::DEFAULT_ROOT)),
            nginx_binary: non_empty("NGINX_BINARY")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("nginx")),
            dos: DosConfig {
                enabled,
                arbitrator_service: non_empty("DOS_ARBITRATOR_SERVICE")
                    .unwrap_or_else(|| arbitrator::DEFAULT_SERVICE.to_string()),
                arbitrator_namespace: non_empty("DOS_ARBITRATOR_NAMESPACE"),
                arbitrator_port,
                sync_interval: Duration::from_secs(sync_secs.max(1)),
                security_log_destination: non_empty("DOS_SECURITY_LOG_DESTINATION"),
            },
            unit_hostname,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.watch_namespace, None);
        assert_eq!(config.ingress_class, "nginx");
        assert_eq!(config.conf_root, PathBuf::from("/etc/nginx"));
        assert_eq!(config.nginx_binary, PathBuf::from("nginx"));
        assert!(!config.dos.enabled);
        assert_eq!(config.dos.arbitrator_service, "svc-appprotect-dos-arb");
        assert_eq!(config.dos.arbitrator_namespace, None);
        assert_eq!(config.dos.arbitrator_port, 3000);
        assert_eq!(config.dos.sync_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("WATCH_NAMESPACE", "team-a"),
            ("NGINX_CONF_ROOT", "/tmp/nginx"),
            ("ENABLE_APP_PROTECT_DOS", "true"),
            ("DOS_ARBITRATOR_NAMESPACE", "arb-ns"),
            ("DOS_ARBITRATOR_PORT", "3100"),
            ("POD_NAME", "nginx-ingress-abc"),
        ])
        .unwrap();

        assert_eq!(config.watch_namespace.as_deref(), Some("team-a"));
        assert_eq!(config.conf_root, PathBuf::from("/tmp/nginx"));
        assert!(config.dos.enabled);
        assert_eq!(config.dos.arbitrator_namespace.as_deref(), Some("arb-ns"));
        assert_eq!(config.dos.arbitrator_port, 3100);
        assert_eq!(config.unit_hostname, "nginx-ingress-abc");
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let config = load(&[("WATCH_NAMESPACE", "  ")]).unwrap();
        assert_eq!(config.watch_namespace, None);
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let err = load(&[("DOS_ARBITRATOR_PORT", "ninety")]).unwrap_err();
        assert!(err.to_string().contains("DOS_ARBITRATOR_PORT"));
    }

    #[test]
    fn test_invalid_bool_is_rejected() {
        assert!(load(&[("ENABLE_APP_PROTECT_DOS", "yes please")]).is_err());
    }
}
