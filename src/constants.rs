// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// The field manager name used for status patches
pub const OPERATOR_NAME: &str = "vsgate";

/// API groups of the watched custom resources
pub mod groups {
    pub const NGINX: &str = "k8s.nginx.org";
    pub const DOS: &str = "appprotectdos.f5.com";
}

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRDs
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

/// Status write retry configuration
pub mod status {
    pub const RETRY_INITIAL_MILLIS: u64 = 200;
    pub const RETRY_MAX_SECS: u64 = 30;
    pub const RETRY_MAX_ATTEMPTS: u32 = 8;
}

/// Arbitrator defaults
pub mod arbitrator {
    pub const DEFAULT_SERVICE: &str = "svc-appprotect-dos-arb";
    pub const DEFAULT_PORT: u16 = 3000;
    pub const DEFAULT_SYNC_SECS: u64 = 10;
    /// Cap for the backoff used while the arbitrator is unreachable
    pub const MAX_BACKOFF_SECS: u64 = 120;
}

/// Layout of generated files below the configuration root
pub mod paths {
    pub const DEFAULT_ROOT: &str = "/etc/nginx";
    pub const MAIN_CONF: &str = "nginx.conf";
    pub const CONF_DIR: &str = "conf.d";
    pub const DOS_POLICIES_DIR: &str = "dos/policies";
    pub const DOS_LOGCONFS_DIR: &str = "dos/logconfs";
    pub const DOS_ALLOWLIST_DIR: &str = "dos/allowlist";
}

/// Main configuration settings
pub mod nginx {
    /// Port of the status server that also exposes the DoS API and dashboard
    pub const STATUS_PORT: u16 = 8080;
    pub const DOS_MODULE: &str = "modules/ngx_http_app_protect_dos_module.so";
    pub const DASHBOARD_ROOT: &str = "/usr/share/nginx/html";
}
