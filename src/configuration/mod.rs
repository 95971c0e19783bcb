// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! In-memory model of every valid resource the controller handles.
//!
//! Each add, update or delete rebuilds the host table from scratch and
//! reports what changed relative to the previous table:
//! - [`ResourceChange`]s for VirtualServers whose generated configuration has
//!   to be written or removed, deletes always ordered first;
//! - [`ConfigurationProblem`]s for resources whose status changes without a
//!   configuration of their own (host taken, orphaned routes, rejections).
//!
//! The model is owned by the sync manager and mutated from a single task.

pub mod validation;

use crate::types::key::resolve_reference;
use crate::types::{
    DosLogConf, DosPolicy, DosProtectedResource, Reason, ReconciliationOutcome, ResourceKey, ResourceKind,
    ResourceStatus, State, VirtualServer, VirtualServerRoute,
};
use crate::error::{Result, VsGateError};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::debug;
use validation::ValidationError;

/// A resource that passed validation, with the warnings it produced
#[derive(Clone, Debug)]
struct Validated<T> {
    resource: T,
    warnings: Vec<String>,
}

/// DoS resources resolved for one VirtualServer.
/// `policy` and `log_conf` are `None` when the reference is missing or invalid.
#[derive(Clone, Debug)]
pub struct DosBinding {
    pub protected: DosProtectedResource,
    pub policy: Option<DosPolicy>,
    pub log_conf: Option<DosLogConf>,
}

impl DosBinding {
    fn is_equal(&self, other: &DosBinding) -> bool {
        same_meta(&self.protected.metadata, &other.protected.metadata)
            && same_optional_meta(self.policy.as_ref().map(|p| &p.metadata), other.policy.as_ref().map(|p| &p.metadata))
            && same_optional_meta(
                self.log_conf.as_ref().map(|l| &l.metadata),
                other.log_conf.as_ref().map(|l| &l.metadata),
            )
    }
}

/// A VirtualServer together with the routes it claims and its DoS binding
#[derive(Clone, Debug)]
pub struct VirtualServerConfiguration {
    pub virtual_server: VirtualServer,
    pub routes: Vec<VirtualServerRoute>,
    pub dos: Option<DosBinding>,
    pub warnings: Vec<String>,
}

impl VirtualServerConfiguration {
    pub fn key(&self) -> ResourceKey {
        self.virtual_server.key()
    }

    pub fn host(&self) -> &str {
        &self.virtual_server.spec.host
    }

    /// Whether this configuration wins the host over `other`: the older
    /// resource wins, ties go to the larger UID.
    pub fn wins(&self, other: &VirtualServerConfiguration) -> bool {
        let mine = &self.virtual_server.metadata;
        let theirs = &other.virtual_server.metadata;
        let mine_created = mine.creation_timestamp.as_ref().map(|t| t.0);
        let theirs_created = theirs.creation_timestamp.as_ref().map(|t| t.0);

        if mine_created == theirs_created {
            return mine.uid > theirs.uid;
        }
        mine_created < theirs_created
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    /// Same resources at the same generations, so the rendered output is unchanged
    pub fn is_equal(&self, other: &VirtualServerConfiguration) -> bool {
        if !same_meta(&self.virtual_server.metadata, &other.virtual_server.metadata) {
            return false;
        }
        if self.routes.len() != other.routes.len()
            || !self
                .routes
                .iter()
                .zip(&other.routes)
                .all(|(a, b)| same_meta(&a.metadata, &b.metadata))
        {
            return false;
        }
        let dos_equal = match (&self.dos, &other.dos) {
            (None, None) => true,
            (Some(a), Some(b)) => a.is_equal(b),
            _ => false,
        };
        dos_equal && self.warnings == other.warnings
    }

    /// Outcome reported on the VirtualServer when this configuration is applied
    pub fn outcome(&self) -> ReconciliationOutcome {
        ReconciliationOutcome::from_warnings(&self.warnings)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Delete,
    AddOrUpdate,
}

/// A VirtualServer configuration that must be written or removed
#[derive(Clone, Debug)]
pub struct ResourceChange {
    pub op: Operation,
    pub config: VirtualServerConfiguration,
}

/// A status-worthy condition of a resource that has no change of its own
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigurationProblem {
    pub key: ResourceKey,
    pub generation: Option<i64>,
    /// Errors set the resource `Invalid`, everything else `Warning`
    pub is_error: bool,
    pub reason: Reason,
    pub message: String,
}

impl ConfigurationProblem {
    fn from_error(key: ResourceKey, generation: Option<i64>, error: &VsGateError) -> Self {
        let status =
            ReconciliationOutcome::from_error(error).to_status(key.kind.as_str(), &key.namespace, &key.name, generation);
        Self {
            key,
            generation,
            is_error: status.state == State::Invalid,
            reason: status.reason,
            message: status.message,
        }
    }

    pub fn to_status(&self) -> ResourceStatus {
        ResourceStatus {
            state: if self.is_error { State::Invalid } else { State::Warning },
            reason: self.reason,
            message: self.message.clone(),
            observed_generation: self.generation,
        }
    }

    fn same_as(&self, other: &ConfigurationProblem) -> bool {
        self.is_error == other.is_error
            && self.reason == other.reason
            && self.message == other.message
            && self.generation == other.generation
    }
}

/// Result of applying one event to the [`Configuration`]
#[derive(Clone, Debug, Default)]
pub struct ConfigurationDelta {
    pub changes: Vec<ResourceChange>,
    pub problems: Vec<ConfigurationProblem>,
}

impl ConfigurationDelta {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.problems.is_empty()
    }

    /// The problem reported for `key`, if any
    pub fn problem_for(&self, key: &ResourceKey) -> Option<&ConfigurationProblem> {
        self.problems.iter().find(|p| &p.key == key)
    }
}

pub struct Configuration {
    ingress_class: String,
    dos_enabled: bool,

    virtual_servers: BTreeMap<String, Validated<VirtualServer>>,
    virtual_server_routes: BTreeMap<String, Validated<VirtualServerRoute>>,
    dos_policies: BTreeMap<String, DosPolicy>,
    dos_log_confs: BTreeMap<String, DosLogConf>,
    dos_protected: BTreeMap<String, DosProtectedResource>,

    hosts: BTreeMap<String, VirtualServerConfiguration>,
    host_problems: BTreeMap<ResourceKey, ConfigurationProblem>,
}

impl Configuration {
    pub fn new(ingress_class: impl Into<String>, dos_enabled: bool) -> Self {
        Self {
            ingress_class: ingress_class.into(),
            dos_enabled,
            virtual_servers: BTreeMap::new(),
            virtual_server_routes: BTreeMap::new(),
            dos_policies: BTreeMap::new(),
            dos_log_confs: BTreeMap::new(),
            dos_protected: BTreeMap::new(),
            hosts: BTreeMap::new(),
            host_problems: BTreeMap::new(),
        }
    }

    /// Configurations currently holding a host, ordered by host
    pub fn virtual_server_configurations(&self) -> impl Iterator<Item = &VirtualServerConfiguration> {
        self.hosts.values()
    }

    pub fn host_owner(&self, host: &str) -> Option<ResourceKey> {
        self.hosts.get(host).map(|c| c.key())
    }

    pub fn dos_policies(&self) -> impl Iterator<Item = &DosPolicy> {
        self.dos_policies.values()
    }

    pub fn dos_log_confs(&self) -> impl Iterator<Item = &DosLogConf> {
        self.dos_log_confs.values()
    }

    pub fn dos_protected_resources(&self) -> impl Iterator<Item = &DosProtectedResource> {
        self.dos_protected.values()
    }

    /// `app_protect_dos_name` of every accepted, enabled DosProtectedResource
    pub fn dos_protected_names(&self) -> Vec<String> {
        self.dos_protected
            .values()
            .filter(|p| p.spec.enable)
            .map(|p| p.dos_name())
            .collect()
    }

    pub fn add_or_update_virtual_server(&mut self, vs: &VirtualServer) -> ConfigurationDelta {
        let key = vs.key();
        let mut rejection = None;

        if !vs.has_ingress_class(&self.ingress_class) {
            debug!(resource = %key, "ignoring resource with a different ingress class");
            self.virtual_servers.remove(&key.object_key());
        } else {
            match validation::validate_virtual_server(vs) {
                Ok(warnings) => {
                    self.virtual_servers.insert(
                        key.object_key(),
                        Validated {
                            resource: vs.clone(),
                            warnings,
                        },
                    );
                }
                Err(e) => {
                    self.virtual_servers.remove(&key.object_key());
                    rejection = Some(VsGateError::from(e));
                }
            }
        }

        let mut delta = self.rebuild_hosts();
        if let Some(e) = rejection {
            delta.problems.push(ConfigurationProblem::from_error(key, vs.metadata.generation, &e));
        }
        delta
    }

    /// Deleting a key that is not present is a no-op
    pub fn delete_virtual_server(&mut self, object_key: &str) -> ConfigurationDelta {
        if self.virtual_servers.remove(object_key).is_none() {
            return ConfigurationDelta::default();
        }
        self.rebuild_hosts()
    }

    pub fn add_or_update_virtual_server_route(&mut self, vsr: &VirtualServerRoute) -> ConfigurationDelta {
        let key = vsr.key();
        let mut rejection = None;

        if !vsr.has_ingress_class(&self.ingress_class) {
            debug!(resource = %key, "ignoring resource with a different ingress class");
            self.virtual_server_routes.remove(&key.object_key());
        } else {
            match validation::validate_virtual_server_route(vsr) {
                Ok(warnings) => {
                    self.virtual_server_routes.insert(
                        key.object_key(),
                        Validated {
                            resource: vsr.clone(),
                            warnings,
                        },
                    );
                }
                Err(e) => {
                    self.virtual_server_routes.remove(&key.object_key());
                    rejection = Some(VsGateError::from(e));
                }
            }
        }

        let mut delta = self.rebuild_hosts();
        if let Some(e) = rejection {
            delta.problems.push(ConfigurationProblem::from_error(key, vsr.metadata.generation, &e));
        }
        delta
    }

    pub fn delete_virtual_server_route(&mut self, object_key: &str) -> ConfigurationDelta {
        if self.virtual_server_routes.remove(object_key).is_none() {
            return ConfigurationDelta::default();
        }
        self.rebuild_hosts()
    }

    /// Warnings of a claimed VirtualServerRoute's own validation
    pub fn virtual_server_route_warnings(&self, object_key: &str) -> &[String] {
        self.virtual_server_routes
            .get(object_key)
            .map(|v| v.warnings.as_slice())
            .unwrap_or_default()
    }

    pub fn add_or_update_dos_policy(&mut self, policy: &DosPolicy) -> ConfigurationDelta {
        let key = policy.key();
        let result = validation::validate_dos_policy(&policy.spec);
        let rejection = upsert_validated(&mut self.dos_policies, key.object_key(), policy, result);
        self.finish_dos_update(key, policy.metadata.generation, rejection)
    }

    pub fn delete_dos_policy(&mut self, object_key: &str) -> ConfigurationDelta {
        if self.dos_policies.remove(object_key).is_none() {
            return ConfigurationDelta::default();
        }
        self.rebuild_hosts()
    }

    pub fn add_or_update_dos_log_conf(&mut self, log_conf: &DosLogConf) -> ConfigurationDelta {
        let key = log_conf.key();
        let result = validation::validate_dos_log_conf(&log_conf.spec);
        let rejection = upsert_validated(&mut self.dos_log_confs, key.object_key(), log_conf, result);
        self.finish_dos_update(key, log_conf.metadata.generation, rejection)
    }

    pub fn delete_dos_log_conf(&mut self, object_key: &str) -> ConfigurationDelta {
        if self.dos_log_confs.remove(object_key).is_none() {
            return ConfigurationDelta::default();
        }
        self.rebuild_hosts()
    }

    pub fn add_or_update_dos_protected(&mut self, protected: &DosProtectedResource) -> ConfigurationDelta {
        let key = protected.key();
        let result = validation::validate_dos_protected(&protected.spec);
        let rejection = upsert_validated(&mut self.dos_protected, key.object_key(), protected, result);
        self.finish_dos_update(key, protected.metadata.generation, rejection)
    }

    pub fn delete_dos_protected(&mut self, object_key: &str) -> ConfigurationDelta {
        if self.dos_protected.remove(object_key).is_none() {
            return ConfigurationDelta::default();
        }
        self.rebuild_hosts()
    }

    fn finish_dos_update(
        &mut self,
        key: ResourceKey,
        generation: Option<i64>,
        rejection: Option<VsGateError>,
    ) -> ConfigurationDelta {
        let mut delta = self.rebuild_hosts();
        if let Some(e) = rejection {
            delta.problems.push(ConfigurationProblem::from_error(key, generation, &e));
        }
        delta
    }

    fn rebuild_hosts(&mut self) -> ConfigurationDelta {
        let (new_hosts, new_resources) = self.build_hosts_and_resources();

        let changes = changes_for_hosts(&self.hosts, &new_hosts);
        self.hosts = new_hosts;

        // a delete refers to the previous version; report the latest one so
        // its warnings are not lost
        let mut changes = squash_changes(changes);
        for change in &mut changes {
            if let Some(latest) = new_resources.get(&change.config.key()) {
                change.config = latest.clone();
            }
        }

        let mut problems = BTreeMap::new();
        self.add_problems_for_resources_without_active_host(&new_resources, &mut problems);
        self.add_problems_for_orphan_or_ignored_routes(&mut problems);

        let changed = detect_changes_in_problems(&problems, &self.host_problems);
        self.host_problems = problems;

        ConfigurationDelta {
            changes,
            problems: changed,
        }
    }

    fn build_hosts_and_resources(
        &self,
    ) -> (
        BTreeMap<String, VirtualServerConfiguration>,
        BTreeMap<ResourceKey, VirtualServerConfiguration>,
    ) {
        let mut owners: BTreeMap<String, ResourceKey> = BTreeMap::new();
        let mut resources: BTreeMap<ResourceKey, VirtualServerConfiguration> = BTreeMap::new();

        for validated in self.virtual_servers.values() {
            let vs = &validated.resource;
            let mut warnings = validated.warnings.clone();
            let routes = self.build_virtual_server_routes(vs, &mut warnings);
            let dos = self.resolve_dos(vs, &mut warnings);

            let mut resource = VirtualServerConfiguration {
                virtual_server: vs.clone(),
                routes,
                dos,
                warnings,
            };
            let key = resource.key();
            let host = vs.spec.host.clone();

            match owners.get(&host).cloned() {
                None => {
                    owners.insert(host, key.clone());
                }
                Some(holder_key) => {
                    let warning = format!("host {} is taken by another resource", host);
                    match resources.get_mut(&holder_key) {
                        Some(holder) if !holder.wins(&resource) => {
                            holder.add_warning(warning);
                            owners.insert(host, key.clone());
                        }
                        _ => resource.add_warning(warning),
                    }
                }
            }
            resources.insert(key, resource);
        }

        let hosts = owners
            .into_iter()
            .filter_map(|(host, key)| resources.get(&key).map(|r| (host, r.clone())))
            .collect();

        (hosts, resources)
    }

    fn build_virtual_server_routes(&self, vs: &VirtualServer, warnings: &mut Vec<String>) -> Vec<VirtualServerRoute> {
        let namespace = vs.namespace().unwrap_or_default();
        let mut routes: Vec<VirtualServerRoute> = Vec::new();

        for route in &vs.spec.routes {
            let Some(reference) = &route.route else {
                continue;
            };
            let (ns, name) = resolve_reference(reference, &namespace);
            let vsr_key = format!("{}/{}", ns, name);

            let validated = match lookup(&self.virtual_server_routes, ResourceKind::VirtualServerRoute, &vsr_key) {
                Ok(validated) => validated,
                Err(e) => {
                    warnings.push(e.to_string());
                    continue;
                }
            };
            let vsr = &validated.resource;

            if let Err(e) = validation::validate_route_for_virtual_server(vsr, &vs.spec.host, &route.path) {
                warnings.push(format!("VirtualServerRoute {} is invalid: {}", vsr_key, e));
                continue;
            }

            let taken = routes
                .iter()
                .flat_map(|r| r.spec.subroutes.iter())
                .find(|existing| vsr.spec.subroutes.iter().any(|s| s.path == existing.path));
            if let Some(existing) = taken {
                warnings.push(format!(
                    "VirtualServerRoute {} is invalid: path {} is already defined by another VirtualServerRoute",
                    vsr_key, existing.path
                ));
                continue;
            }

            routes.push(vsr.clone());
        }

        routes
    }

    fn resolve_dos(&self, vs: &VirtualServer, warnings: &mut Vec<String>) -> Option<DosBinding> {
        if !self.dos_enabled {
            return None;
        }
        let reference = vs.spec.dos.as_ref()?;
        let (ns, name) = resolve_reference(reference, &vs.namespace().unwrap_or_default());
        let protected_key = format!("{}/{}", ns, name);

        let protected = match lookup(&self.dos_protected, ResourceKind::DosProtectedResource, &protected_key) {
            Ok(protected) => protected,
            Err(e) => {
                warnings.push(e.to_string());
                return None;
            }
        };

        let mut binding = DosBinding {
            protected: protected.clone(),
            policy: None,
            log_conf: None,
        };
        if !protected.spec.enable {
            return Some(binding);
        }

        if let Some(reference) = &protected.spec.ap_dos_policy {
            let (ns, name) = resolve_reference(reference, &ns);
            let key = format!("{}/{}", ns, name);
            binding.policy = resolve(&self.dos_policies, ResourceKind::DosPolicy, &key, warnings);
        }

        let log_reference = protected
            .spec
            .dos_security_log
            .as_ref()
            .filter(|l| l.enable)
            .and_then(|l| l.ap_dos_log_conf.as_ref());
        if let Some(reference) = log_reference {
            let (ns, name) = resolve_reference(reference, &ns);
            let key = format!("{}/{}", ns, name);
            binding.log_conf = resolve(&self.dos_log_confs, ResourceKind::DosLogConf, &key, warnings);
        }

        Some(binding)
    }

    fn add_problems_for_resources_without_active_host(
        &self,
        resources: &BTreeMap<ResourceKey, VirtualServerConfiguration>,
        problems: &mut BTreeMap<ResourceKey, ConfigurationProblem>,
    ) {
        for (key, resource) in resources {
            let holds_host = self.hosts.get(resource.host()).is_some_and(|h| &h.key() == key);
            if !holds_host {
                problems.insert(
                    key.clone(),
                    ConfigurationProblem {
                        key: key.clone(),
                        generation: resource.virtual_server.metadata.generation,
                        is_error: false,
                        reason: Reason::Rejected,
                        message: "Host is taken by another resource".to_string(),
                    },
                );
            }
        }
    }

    fn add_problems_for_orphan_or_ignored_routes(&self, problems: &mut BTreeMap<ResourceKey, ConfigurationProblem>) {
        for validated in self.virtual_server_routes.values() {
            let vsr = &validated.resource;
            let key = vsr.key();

            let message = match self.hosts.get(&vsr.spec.host) {
                None => "VirtualServer is invalid or doesn't exist".to_string(),
                Some(owner) => {
                    let claimed = owner
                        .routes
                        .iter()
                        .any(|r| r.namespace() == vsr.namespace() && r.name_any() == vsr.name_any());
                    if claimed {
                        continue;
                    }
                    format!("VirtualServer {} ignores VirtualServerRoute", owner.key().object_key())
                }
            };

            problems.insert(
                key.clone(),
                ConfigurationProblem {
                    key,
                    generation: vsr.metadata.generation,
                    is_error: false,
                    reason: Reason::AddedOrUpdatedWithWarning,
                    message,
                },
            );
        }
    }
}

/// A referenced resource, by `namespace/name`
fn lookup<'a, T>(map: &'a BTreeMap<String, T>, kind: ResourceKind, object_key: &str) -> Result<&'a T> {
    map.get(object_key)
        .ok_or_else(|| VsGateError::ReferenceUnresolved(format!("{} {} doesn't exist or invalid", kind, object_key)))
}

/// Like [`lookup`], recording an unresolved reference as a warning
fn resolve<T: Clone>(
    map: &BTreeMap<String, T>,
    kind: ResourceKind,
    object_key: &str,
    warnings: &mut Vec<String>,
) -> Option<T> {
    match lookup(map, kind, object_key) {
        Ok(resource) => Some(resource.clone()),
        Err(e) => {
            warnings.push(e.to_string());
            None
        }
    }
}

fn upsert_validated<T: Clone>(
    map: &mut BTreeMap<String, T>,
    object_key: String,
    resource: &T,
    result: std::result::Result<Vec<String>, ValidationError>,
) -> Option<VsGateError> {
    match result {
        Ok(_) => {
            map.insert(object_key, resource.clone());
            None
        }
        Err(e) => {
            map.remove(&object_key);
            Some(e.into())
        }
    }
}

fn same_meta(a: &ObjectMeta, b: &ObjectMeta) -> bool {
    a.namespace == b.namespace && a.name == b.name && a.generation == b.generation
}

fn same_optional_meta(a: Option<&ObjectMeta>, b: Option<&ObjectMeta>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => same_meta(a, b),
        _ => false,
    }
}

/// Deletes come first so an update taking over a host is applied only after
/// the previous holder's configuration is gone.
fn changes_for_hosts(
    old_hosts: &BTreeMap<String, VirtualServerConfiguration>,
    new_hosts: &BTreeMap<String, VirtualServerConfiguration>,
) -> Vec<ResourceChange> {
    let mut deletes = Vec::new();
    let mut updates = Vec::new();

    for (host, old) in old_hosts {
        if !new_hosts.contains_key(host) {
            deletes.push(ResourceChange {
                op: Operation::Delete,
                config: old.clone(),
            });
        }
    }

    for (host, new) in new_hosts {
        match old_hosts.get(host) {
            None => updates.push(ResourceChange {
                op: Operation::AddOrUpdate,
                config: new.clone(),
            }),
            Some(old) if !old.is_equal(new) => {
                if old.key() != new.key() {
                    deletes.push(ResourceChange {
                        op: Operation::Delete,
                        config: old.clone(),
                    });
                }
                updates.push(ResourceChange {
                    op: Operation::AddOrUpdate,
                    config: new.clone(),
                });
            }
            Some(_) => {}
        }
    }

    deletes.extend(updates);
    deletes
}

/// Collapse several changes for one resource into its last one, keeping
/// deletes ahead of updates.
fn squash_changes(changes: Vec<ResourceChange>) -> Vec<ResourceChange> {
    let mut last: BTreeMap<ResourceKey, ResourceChange> = BTreeMap::new();
    let mut order = Vec::new();

    for change in changes {
        let key = change.config.key();
        if !last.contains_key(&key) {
            order.push(key.clone());
        }
        last.insert(key, change);
    }

    let (mut deletes, updates): (Vec<_>, Vec<_>) = order
        .into_iter()
        .filter_map(|key| last.remove(&key))
        .partition(|c| c.op == Operation::Delete);
    deletes.extend(updates);
    deletes
}

/// Problems that are new or differ from the previously reported ones
fn detect_changes_in_problems(
    new_problems: &BTreeMap<ResourceKey, ConfigurationProblem>,
    old_problems: &BTreeMap<ResourceKey, ConfigurationProblem>,
) -> Vec<ConfigurationProblem> {
    new_problems
        .iter()
        .filter(|(key, new)| old_problems.get(*key).map_or(true, |old| !new.same_as(old)))
        .map(|(_, p)| p.clone())
        .collect()
}
