// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Static validation of watched resources.
//!
//! Schema violations are returned as a [`ValidationError`] and make the resource
//! `Invalid`. Spec combinations that are well formed but cannot be fully served
//! (an action passing to an undeclared upstream) come back as warnings.

use crate::types::dos::{DosLogConfSpec, DosPolicySpec, DosProtectedResourceSpec};
use crate::types::virtual_server::{Action, Route, Upstream};
use crate::types::{VirtualServer, VirtualServerRoute};
use ipnet::IpNet;
use std::collections::HashSet;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every field error found in one resource
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        f.write_str(&joined.join("; "))
    }
}

impl std::error::Error for ValidationError {}

#[derive(Default)]
struct Collector {
    errors: Vec<FieldError>,
    warnings: Vec<String>,
}

impl Collector {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, field: &str, message: impl fmt::Display) {
        self.warnings.push(format!("{}: {}", field, message));
    }

    fn finish(self) -> Result<Vec<String>, ValidationError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(ValidationError { errors: self.errors })
        }
    }
}

/// Validate a VirtualServer. Returns the warnings when the spec is acceptable.
pub fn validate_virtual_server(vs: &VirtualServer) -> Result<Vec<String>, ValidationError> {
    let mut c = Collector::default();
    let spec = &vs.spec;

    validate_host(&mut c, "spec.host", &spec.host);

    if let Some(dos) = &spec.dos {
        validate_reference(&mut c, "spec.dos", dos);
    }

    let upstreams = validate_upstreams(&mut c, &spec.upstreams);

    let mut paths = HashSet::new();
    for (i, route) in spec.routes.iter().enumerate() {
        let field = format!("spec.routes[{}]", i);
        validate_path(&mut c, &format!("{}.path", field), &route.path);
        if !paths.insert(route.path.as_str()) {
            c.error(format!("{}.path", field), format!("duplicate path '{}'", route.path));
        }

        match (&route.action, &route.route) {
            (Some(action), None) => validate_action(&mut c, &format!("{}.action", field), action, &upstreams),
            (None, Some(reference)) => validate_reference(&mut c, &format!("{}.route", field), reference),
            (Some(_), Some(_)) => c.error(field, "must specify exactly one of action or route"),
            (None, None) => c.error(field, "must specify action or route"),
        }
    }

    c.finish()
}

/// Validate a VirtualServerRoute on its own, without the VirtualServer that claims it.
pub fn validate_virtual_server_route(vsr: &VirtualServerRoute) -> Result<Vec<String>, ValidationError> {
    let mut c = Collector::default();
    let spec = &vsr.spec;

    validate_host(&mut c, "spec.host", &spec.host);
    let upstreams = validate_upstreams(&mut c, &spec.upstreams);

    let mut paths = HashSet::new();
    for (i, subroute) in spec.subroutes.iter().enumerate() {
        validate_subroute(&mut c, i, subroute, &upstreams, &mut paths);
    }

    c.finish()
}

fn validate_subroute<'a>(
    c: &mut Collector,
    index: usize,
    subroute: &'a Route,
    upstreams: &HashSet<&str>,
    paths: &mut HashSet<&'a str>,
) {
    let field = format!("spec.subroutes[{}]", index);
    validate_path(c, &format!("{}.path", field), &subroute.path);
    if !paths.insert(subroute.path.as_str()) {
        c.error(format!("{}.path", field), format!("duplicate path '{}'", subroute.path));
    }
    if subroute.route.is_some() {
        c.error(format!("{}.route", field), "subroutes cannot reference other routes");
    }
    match &subroute.action {
        Some(action) => validate_action(c, &format!("{}.action", field), action, upstreams),
        None => c.error(format!("{}.action", field), "Required value"),
    }
}

/// Check that a VirtualServerRoute fits the VirtualServer route that claims it.
pub fn validate_route_for_virtual_server(
    vsr: &VirtualServerRoute,
    vs_host: &str,
    path_prefix: &str,
) -> Result<(), ValidationError> {
    let mut c = Collector::default();

    if vsr.spec.host != vs_host {
        c.error(
            "spec.host",
            format!("must be equal to the host of the VirtualServer '{}'", vs_host),
        );
    }

    for (i, subroute) in vsr.spec.subroutes.iter().enumerate() {
        if !subroute.path.starts_with(path_prefix) {
            c.error(
                format!("spec.subroutes[{}].path", i),
                format!("must start with '{}'", path_prefix),
            );
        }
    }

    c.finish().map(|_| ())
}

pub fn validate_dos_protected(spec: &DosProtectedResourceSpec) -> Result<Vec<String>, ValidationError> {
    let mut c = Collector::default();

    if spec.name.trim().is_empty() {
        c.error("spec.name", "Required value");
    } else {
        validate_token(&mut c, "spec.name", &spec.name);
    }
    if let Some(policy) = &spec.ap_dos_policy {
        validate_reference(&mut c, "spec.apDosPolicy", policy);
    }
    if let Some(monitor) = &spec.ap_dos_monitor {
        if monitor.uri.trim().is_empty() {
            c.error("spec.apDosMonitor.uri", "Required value");
        } else {
            validate_token(&mut c, "spec.apDosMonitor.uri", &monitor.uri);
        }
        if let Some(protocol) = &monitor.protocol {
            if !["http1", "http2", "grpc", "websocket"].contains(&protocol.as_str()) {
                c.error("spec.apDosMonitor.protocol", format!("unsupported protocol '{}'", protocol));
            }
        }
        if monitor.timeout == Some(0) {
            c.error("spec.apDosMonitor.timeout", "must be greater than 0");
        }
    }
    if let Some(dest) = &spec.dos_access_log_dest {
        validate_log_destination(&mut c, "spec.dosAccessLogDest", dest);
    }
    if let Some(log) = &spec.dos_security_log {
        if let Some(conf) = &log.ap_dos_log_conf {
            validate_reference(&mut c, "spec.dosSecurityLog.apDosLogConf", conf);
        }
        match &log.dos_log_dest {
            Some(dest) => validate_log_destination(&mut c, "spec.dosSecurityLog.dosLogDest", dest),
            None if log.enable => c.error("spec.dosSecurityLog.dosLogDest", "Required value"),
            None => {}
        }
    }
    for (i, entry) in spec.allow_list.iter().enumerate() {
        if entry.ip_with_mask.parse::<IpNet>().is_err() {
            c.error(
                format!("spec.allowList[{}].ipWithMask", i),
                format!("'{}' is not a valid CIDR", entry.ip_with_mask),
            );
        }
    }

    c.finish()
}

pub fn validate_dos_policy(spec: &DosPolicySpec) -> Result<Vec<String>, ValidationError> {
    let mut c = Collector::default();

    if let Some(mode) = &spec.mitigation_mode {
        if !["standard", "conservative", "none"].contains(&mode.as_str()) {
            c.error("spec.mitigation_mode", format!("unsupported value '{}'", mode));
        }
    }
    let toggles = [
        ("spec.signatures", &spec.signatures),
        ("spec.bad_actors", &spec.bad_actors),
        ("spec.automation_tools_detection", &spec.automation_tools_detection),
        ("spec.tls_fingerprint", &spec.tls_fingerprint),
    ];
    for (field, value) in toggles {
        if let Some(v) = value {
            if v != "on" && v != "off" {
                c.error(field, format!("must be 'on' or 'off', got '{}'", v));
            }
        }
    }

    c.finish()
}

pub fn validate_dos_log_conf(spec: &DosLogConfSpec) -> Result<Vec<String>, ValidationError> {
    let mut c = Collector::default();

    if let Some(filter) = &spec.filter {
        if let Some(v) = &filter.traffic_mitigation_stats {
            if v != "all" && v != "none" {
                c.error("spec.filter.traffic-mitigation-stats", format!("unsupported value '{}'", v));
            }
        }
        for (field, value) in [
            ("spec.filter.bad-actors", &filter.bad_actors),
            ("spec.filter.attack-signatures", &filter.attack_signatures),
        ] {
            if let Some(v) = value {
                if !is_top_filter(v) {
                    c.error(field, format!("must be 'all', 'none' or 'top N', got '{}'", v));
                }
            }
        }
    }
    if let Some(content) = &spec.content {
        if let Some(format) = &content.format {
            if !["splunk", "arcsight", "user-defined"].contains(&format.as_str()) {
                c.error("spec.content.format", format!("unsupported format '{}'", format));
            }
        }
        if let Some(size) = &content.max_message_size {
            let valid = size
                .strip_suffix('k')
                .and_then(|n| n.parse::<u32>().ok())
                .is_some_and(|n| (1..=64).contains(&n));
            if !valid {
                c.error("spec.content.max_message_size", format!("must be between 1k and 64k, got '{}'", size));
            }
        }
    }

    c.finish()
}

fn is_top_filter(value: &str) -> bool {
    match value {
        "all" | "none" => true,
        other => other
            .strip_prefix("top ")
            .and_then(|n| n.parse::<u32>().ok())
            .is_some_and(|n| n > 0),
    }
}

fn validate_upstreams<'a>(c: &mut Collector, upstreams: &'a [Upstream]) -> HashSet<&'a str> {
    let mut names = HashSet::new();
    for (i, upstream) in upstreams.iter().enumerate() {
        let field = format!("spec.upstreams[{}]", i);
        if !is_dns1035_label(&upstream.name) {
            c.error(format!("{}.name", field), format!("'{}' is not a valid upstream name", upstream.name));
        } else if !names.insert(upstream.name.as_str()) {
            c.error(format!("{}.name", field), format!("duplicate upstream '{}'", upstream.name));
        }
        if !is_dns1123_label(&upstream.service) {
            c.error(format!("{}.service", field), format!("'{}' is not a valid service name", upstream.service));
        }
        if upstream.port == 0 {
            c.error(format!("{}.port", field), "must be between 1 and 65535");
        }
        if let Some(method) = &upstream.lb_method {
            if !is_lb_method(method) {
                c.error(format!("{}.lbMethod", field), format!("unsupported method '{}'", method));
            }
        }
    }
    names
}

fn validate_action(c: &mut Collector, field: &str, action: &Action, upstreams: &HashSet<&str>) {
    let set = [action.pass.is_some(), action.return_.is_some(), action.redirect.is_some()]
        .iter()
        .filter(|s| **s)
        .count();
    if set != 1 {
        c.error(field, "must specify exactly one of pass, return or redirect");
        return;
    }

    if let Some(pass) = &action.pass {
        if !is_dns1035_label(pass) {
            c.error(format!("{}.pass", field), format!("'{}' is not a valid upstream name", pass));
        } else if !upstreams.contains(pass.as_str()) {
            c.warn(&format!("{}.pass", field), format_args!("upstream '{}' is not defined", pass));
        }
    }
    if let Some(ret) = &action.return_ {
        if let Some(code) = ret.code {
            if !(200..=599).contains(&code) {
                c.error(format!("{}.return.code", field), "must be between 200 and 599");
            }
        }
        if let Some(content_type) = &ret.type_ {
            if !is_mime_type(content_type) {
                c.error(format!("{}.return.type", field), format!("'{}' is not a valid MIME type", content_type));
            }
        }
    }
    if let Some(redirect) = &action.redirect {
        let url_field = format!("{}.redirect.url", field);
        if !(redirect.url.starts_with("http://") || redirect.url.starts_with("https://") || redirect.url.starts_with('$')) {
            c.error(url_field, "must be an absolute http(s) URL or a variable");
        } else {
            validate_token(c, &url_field, &redirect.url);
        }
        if let Some(code) = redirect.code {
            if ![301, 302, 307, 308].contains(&code) {
                c.error(format!("{}.redirect.code", field), "must be one of 301, 302, 307, 308");
            }
        }
    }
}

fn validate_path(c: &mut Collector, field: &str, path: &str) {
    if !(path.starts_with('/') || path.starts_with('~') || path.starts_with('=')) {
        c.error(field, "must start with '/', '~' or '='");
        return;
    }
    // regex locations escape with backslashes; a trailing one would escape the brace that follows
    if path.chars().any(|ch| ch != '\\' && is_directive_char(ch)) || path.ends_with('\\') {
        c.error(field, "must not contain whitespace, quotes, ';', '{', '}' or end with a backslash");
    }
}

/// Characters that end or open an nginx directive, or start a quoted string
fn is_directive_char(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, ';' | '{' | '}' | '"' | '\'' | '\\')
}

/// Values rendered as a single nginx argument
fn validate_token(c: &mut Collector, field: &str, value: &str) {
    if value.chars().any(is_directive_char) {
        c.error(field, "must not contain whitespace, quotes, backslashes, ';', '{' or '}'");
    }
}

/// `hash` takes one key of variables, optionally followed by `consistent`
fn is_lb_method(method: &str) -> bool {
    const FIXED: [&str; 6] = [
        "round_robin",
        "least_conn",
        "ip_hash",
        "random",
        "random two",
        "random two least_conn",
    ];
    if FIXED.contains(&method) {
        return true;
    }

    let mut args = method.split(' ');
    if args.next() != Some("hash") {
        return false;
    }
    let is_key = |key: &str| {
        key.starts_with('$')
            && key
                .split('$')
                .skip(1)
                .all(|var| !var.is_empty() && var.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_'))
    };
    match (args.next(), args.next(), args.next()) {
        (Some(key), None, None) => is_key(key),
        (Some(key), Some("consistent"), None) => is_key(key),
        _ => false,
    }
}

fn is_mime_type(value: &str) -> bool {
    let is_token = |s: &str| {
        !s.is_empty() && s.chars().all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '!' | '#' | '$' | '&' | '^' | '_' | '.' | '+' | '-'))
    };
    value.split_once('/').is_some_and(|(kind, subtype)| is_token(kind) && is_token(subtype))
}

fn validate_host(c: &mut Collector, field: &str, host: &str) {
    if host.is_empty() {
        c.error(field, "Required value");
        return;
    }
    let name = host.strip_prefix("*.").unwrap_or(host);
    if !is_dns1123_subdomain(name) {
        c.error(field, format!("'{}' is not a valid hostname", host));
    }
}

fn validate_reference(c: &mut Collector, field: &str, reference: &str) {
    let parts: Vec<&str> = reference.split('/').collect();
    let valid = match parts.as_slice() {
        [name] => is_dns1123_subdomain(name),
        [ns, name] => is_dns1123_label(ns) && is_dns1123_subdomain(name),
        _ => false,
    };
    if !valid {
        c.error(field, format!("'{}' must be 'name' or 'namespace/name'", reference));
    }
}

fn validate_log_destination(c: &mut Collector, field: &str, dest: &str) {
    let valid = dest
        .rsplit_once(':')
        .is_some_and(|(host, port)| is_destination_host(host) && port.parse::<u16>().is_ok_and(|p| p > 0));
    if !valid {
        c.error(field, format!("'{}' must be host:port with a DNS name or IP address", dest));
    }
}

fn is_destination_host(host: &str) -> bool {
    if let Some(v6) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        return v6.parse::<Ipv6Addr>().is_ok();
    }
    host.parse::<Ipv4Addr>().is_ok() || is_dns1123_subdomain(host)
}

fn is_dns1123_label(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 63
        && s.chars().all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}

fn is_dns1035_label(s: &str) -> bool {
    is_dns1123_label(s) && s.starts_with(|ch: char| ch.is_ascii_lowercase())
}

fn is_dns1123_subdomain(s: &str) -> bool {
    !s.is_empty() && s.len() <= 253 && s.split('.').all(is_dns1123_label)
}
