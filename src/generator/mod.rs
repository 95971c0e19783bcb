// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Renders proxy configuration for a [`VirtualServerConfiguration`].
//!
//! Rendering is pure: the same configuration always produces byte-identical
//! text, so an unchanged resource never causes a reload.

pub mod dos;
pub mod nginx_conf;

use crate::configuration::VirtualServerConfiguration;
use crate::constants::paths;
use crate::types::key::resolve_reference;
use crate::types::virtual_server::{Action, Route, Upstream};
use crate::types::ResourceKey;
use kube::ResourceExt;
use std::path::{Path, PathBuf};

/// File layout below the configuration root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn main_conf(&self) -> PathBuf {
        self.root.join(paths::MAIN_CONF)
    }

    pub fn virtual_server_conf(&self, namespace: &str, name: &str) -> PathBuf {
        self.root
            .join(paths::CONF_DIR)
            .join(format!("vs_{}_{}.conf", namespace, name))
    }

    pub fn dos_policy(&self, namespace: &str, name: &str) -> PathBuf {
        self.root
            .join(paths::DOS_POLICIES_DIR)
            .join(format!("{}_{}.json", namespace, name))
    }

    pub fn dos_log_conf(&self, namespace: &str, name: &str) -> PathBuf {
        self.root
            .join(paths::DOS_LOGCONFS_DIR)
            .join(format!("{}_{}.json", namespace, name))
    }

    pub fn dos_allow_list(&self, namespace: &str, protected_name: &str) -> PathBuf {
        self.root
            .join(paths::DOS_ALLOWLIST_DIR)
            .join(format!("{}_{}.json", namespace, protected_name))
    }
}

/// Rendered configuration of one owner, written to a single file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledConfig {
    pub owner: ResourceKey,
    pub path: PathBuf,
    pub rendered: String,
    pub generation: Option<i64>,
}

pub fn compile(config: &VirtualServerConfiguration, paths: &Paths) -> CompiledConfig {
    let owner = config.key();
    CompiledConfig {
        path: paths.virtual_server_conf(&owner.namespace, &owner.name),
        rendered: render_virtual_server(config, paths),
        generation: config.virtual_server.metadata.generation,
        owner,
    }
}

/// Indentation-aware line buffer
struct Block {
    out: String,
    indent: usize,
}

impl Block {
    fn new() -> Self {
        Self {
            out: String::new(),
            indent: 0,
        }
    }

    fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn open(&mut self, header: impl AsRef<str>) {
        self.line(format!("{} {{", header.as_ref()));
        self.indent += 1;
    }

    fn close(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.line("}");
    }
}

/// Upstreams of one resource, named with a common prefix
struct UpstreamScope<'a> {
    prefix: String,
    namespace: String,
    declared: &'a [Upstream],
}

impl UpstreamScope<'_> {
    fn name(&self, upstream: &str) -> String {
        format!("{}_{}", self.prefix, upstream)
    }

    fn resolve(&self, upstream: &str) -> Option<String> {
        self.declared
            .iter()
            .any(|u| u.name == upstream)
            .then(|| self.name(upstream))
    }
}

pub fn render_virtual_server(config: &VirtualServerConfiguration, paths: &Paths) -> String {
    let vs = &config.virtual_server;
    let namespace = vs.namespace().unwrap_or_default();
    let name = vs.name_any();

    let vs_scope = UpstreamScope {
        prefix: format!("vs_{}_{}", namespace, name),
        namespace: namespace.clone(),
        declared: &vs.spec.upstreams,
    };
    let route_scopes: Vec<(String, UpstreamScope, &[Route])> = config
        .routes
        .iter()
        .map(|vsr| {
            let vsr_namespace = vsr.namespace().unwrap_or_default();
            let vsr_name = vsr.name_any();
            (
                format!("{}/{}", vsr_namespace, vsr_name),
                UpstreamScope {
                    prefix: format!("vs_{}_{}_vsr_{}_{}", namespace, name, vsr_namespace, vsr_name),
                    namespace: vsr_namespace,
                    declared: &vsr.spec.upstreams,
                },
                vsr.spec.subroutes.as_slice(),
            )
        })
        .collect();

    let mut b = Block::new();
    b.line(format!("# configuration for VirtualServer {}/{}", namespace, name));
    b.blank();

    render_upstreams(&mut b, &vs_scope);
    for (_, scope, _) in &route_scopes {
        render_upstreams(&mut b, scope);
    }

    b.open("server");
    b.line("listen 80;");
    b.line("listen [::]:80;");
    b.line(format!("server_name {};", vs.spec.host));

    if let Some(binding) = &config.dos {
        b.blank();
        for directive in dos::render_directives(binding, paths) {
            b.line(directive);
        }
    }

    for route in &vs.spec.routes {
        match (&route.action, &route.route) {
            (Some(action), _) => render_location(&mut b, &route.path, action, &vs_scope),
            (None, Some(reference)) => {
                // skipped claims have no entry and render nothing
                let (ns, vsr_name) = resolve_reference(reference, &namespace);
                let vsr_key = format!("{}/{}", ns, vsr_name);
                let Some((_, scope, subroutes)) = route_scopes.iter().find(|(key, _, _)| *key == vsr_key) else {
                    continue;
                };
                for subroute in subroutes.iter() {
                    if let Some(action) = &subroute.action {
                        render_location(&mut b, &subroute.path, action, scope);
                    }
                }
            }
            (None, None) => {}
        }
    }

    b.close();
    b.out
}

fn render_upstreams(b: &mut Block, scope: &UpstreamScope) {
    for upstream in scope.declared {
        let name = scope.name(&upstream.name);
        b.open(format!("upstream {}", name));
        b.line(format!("zone {} 256k;", name));
        if let Some(method) = upstream.lb_method.as_deref().filter(|m| *m != "round_robin") {
            b.line(format!("{};", method));
        }
        b.line(format!(
            "server {}.{}.svc.cluster.local:{};",
            upstream.service, scope.namespace, upstream.port
        ));
        b.close();
        b.blank();
    }
}

fn location_header(path: &str) -> String {
    for modifier in ["~*", "~", "="] {
        if let Some(rest) = path.strip_prefix(modifier) {
            return format!("location {} {}", modifier, rest.trim_start());
        }
    }
    format!("location {}", path)
}

fn render_location(b: &mut Block, path: &str, action: &Action, scope: &UpstreamScope) {
    b.blank();
    b.open(location_header(path));

    if let Some(pass) = &action.pass {
        match scope.resolve(pass) {
            Some(upstream) => {
                b.line("proxy_http_version 1.1;");
                b.line("proxy_set_header Host $host;");
                b.line(format!("proxy_pass http://{};", upstream));
            }
            None => b.line("return 502;"),
        }
    } else if let Some(ret) = &action.return_ {
        b.line(format!(
            "default_type {};",
            ret.type_.as_deref().unwrap_or("text/plain")
        ));
        b.line(format!("return {} {};", ret.code.unwrap_or(200), quote(&ret.body)));
    } else if let Some(redirect) = &action.redirect {
        b.line(format!("return {} {};", redirect.code.unwrap_or(301), redirect.url));
    }

    b.close();
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
