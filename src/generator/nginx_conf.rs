// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The main `nginx.conf`, which includes every generated server file.

use super::{Block, Paths};
use crate::constants::{nginx, paths};

/// Format referenced by the `access_log ... log_dos` directive of protected servers
const LOG_DOS_FORMAT: &str = "', vs_name_al=$app_protect_dos_vs_name, ip=$remote_addr, \
tls_fp=$app_protect_dos_tls_fp, outcome=$app_protect_dos_outcome, \
reason=$app_protect_dos_outcome_reason, ip_tls=$remote_addr:$app_protect_dos_tls_fp, '";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainConfig {
    pub status_port: u16,
    /// Arbitrator host name; set only when DoS protection is enabled
    pub dos_arbitrator: Option<String>,
}

pub fn render_main_config(main: &MainConfig, paths: &Paths) -> String {
    let root = paths.root().display();
    let mut b = Block::new();

    b.line("# main configuration generated by vsgate");
    b.blank();
    b.line("worker_processes auto;");
    if main.dos_arbitrator.is_some() {
        b.line(format!("load_module {};", nginx::DOS_MODULE));
    }
    b.blank();
    b.open("events");
    b.line("worker_connections 1024;");
    b.close();
    b.blank();

    b.open("http");
    b.line(format!("include {}/mime.types;", root));
    b.line("default_type application/octet-stream;");
    b.line("sendfile on;");
    b.line("keepalive_timeout 65;");

    if let Some(arbitrator) = &main.dos_arbitrator {
        b.blank();
        b.line(format!("app_protect_dos_arb_fqdn {};", arbitrator));
        b.line(format!("log_format log_dos {};", LOG_DOS_FORMAT));
    }

    b.blank();
    b.open("server");
    b.line(format!("listen {};", main.status_port));
    b.line("access_log off;");
    b.blank();
    b.open("location /stub_status");
    b.line("stub_status;");
    b.close();
    if main.dos_arbitrator.is_some() {
        b.blank();
        b.open("location /api");
        b.line("app_protect_dos_api on;");
        b.close();
        b.blank();
        b.open("location = /dashboard-dos.html");
        b.line(format!("root {};", nginx::DASHBOARD_ROOT));
        b.close();
    }
    b.close();

    b.blank();
    b.line(format!("include {}/{}/*.conf;", root, paths::CONF_DIR));
    b.close();
    b.out
}
