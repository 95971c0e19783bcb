// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Central coordinator between the watchers, the configuration model, the
//! file distributor and the status reporter.
//!
//! Events are drained from the channel in batches. Every batch mutates the
//! model serially, coalesces the resulting file and status updates (last one
//! per path and per key wins) and applies them with at most one reload.
//! Nothing is applied until every watcher has finished its initial listing.
//! A batch whose files cannot be written, or whose reload fails, is rolled
//! back and its resources are reported as invalid.

use crate::config::Config;
use crate::configuration::{Configuration, ConfigurationDelta, Operation};
use crate::constants::{nginx, paths};
use crate::dos::ArbitratorAddress;
use crate::error::{Result, VsGateError};
use crate::generator::nginx_conf::{self, MainConfig};
use crate::generator::{self, dos, Paths};
use crate::sync::files::ConfigFiles;
use crate::sync::reload::{reload_and_record, ReloadResults, Reloader};
use crate::sync::status::{StatusReporter, StatusWriter};
use crate::types::{
    DosLogConf, DosPolicy, DosProtectedResource, ReconciliationOutcome, ResourceKey, ResourceKind, ResourceStatus,
    State, VirtualServer, VirtualServerRoute,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

/// A resource as delivered by a watcher
#[derive(Debug, Clone)]
pub enum WatchedResource {
    VirtualServer(VirtualServer),
    VirtualServerRoute(VirtualServerRoute),
    DosPolicy(DosPolicy),
    DosLogConf(DosLogConf),
    DosProtectedResource(DosProtectedResource),
}

impl WatchedResource {
    pub fn key(&self) -> ResourceKey {
        match self {
            WatchedResource::VirtualServer(r) => r.key(),
            WatchedResource::VirtualServerRoute(r) => r.key(),
            WatchedResource::DosPolicy(r) => r.key(),
            WatchedResource::DosLogConf(r) => r.key(),
            WatchedResource::DosProtectedResource(r) => r.key(),
        }
    }
}

/// Events that watchers send to the SyncManager
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A resource was created or updated
    Applied(WatchedResource),
    /// A resource was deleted
    Deleted(ResourceKey),
    /// A watcher finished listing the existing resources of its kind
    InitDone(ResourceKind),
}

/// Handle to send events to the SyncManager
#[derive(Clone)]
pub struct SyncManagerHandle {
    event_tx: mpsc::Sender<SyncEvent>,
    reload_results: Arc<Mutex<ReloadResults>>,
    protected: watch::Receiver<Vec<String>>,
}

impl SyncManagerHandle {
    pub async fn send(&self, event: SyncEvent) {
        if let Err(e) = self.event_tx.send(event).await {
            error!("Failed to send event to SyncManager: {}", e);
        }
    }

    /// Snapshot of the recorded reloads
    pub fn reload_results(&self) -> ReloadResults {
        match self.reload_results.lock() {
            Ok(results) => results.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// `app_protect_dos_name` of every valid DosProtectedResource, kept current
    pub fn protected_resources(&self) -> watch::Receiver<Vec<String>> {
        self.protected.clone()
    }
}

/// Coalesced effects of one batch of events
#[derive(Default)]
struct Batch {
    files: BTreeMap<PathBuf, Option<String>>,
    statuses: BTreeMap<ResourceKey, ResourceStatus>,
    forgotten: Vec<ResourceKey>,
}

impl Batch {
    fn write(&mut self, path: PathBuf, contents: String) {
        self.files.insert(path, Some(contents));
    }

    fn remove(&mut self, path: PathBuf) {
        self.files.insert(path, None);
    }

    fn status(&mut self, key: ResourceKey, status: ResourceStatus) {
        self.statuses.insert(key, status);
    }

    fn forget(&mut self, key: ResourceKey) {
        self.statuses.remove(&key);
        self.forgotten.push(key);
    }

    fn is_empty(&self) -> bool {
        self.files.is_empty() && self.statuses.is_empty() && self.forgotten.is_empty()
    }
}

pub struct SyncManager {
    configuration: Configuration,
    paths: Paths,
    main: MainConfig,
    files: ConfigFiles,
    reloader: Arc<dyn Reloader>,
    status: StatusReporter,
    reload_results: Arc<Mutex<ReloadResults>>,
    protected_tx: watch::Sender<Vec<String>>,
    event_rx: mpsc::Receiver<SyncEvent>,
    pending_kinds: HashSet<ResourceKind>,
    initial_apply_done: bool,
    main_conf_written: bool,
}

impl SyncManager {
    pub fn new(
        config: &Config,
        status_writer: Arc<dyn StatusWriter>,
        reloader: Arc<dyn Reloader>,
        watched_kinds: &[ResourceKind],
    ) -> (Self, SyncManagerHandle) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (protected_tx, protected_rx) = watch::channel(Vec::new());
        let reload_results = Arc::new(Mutex::new(ReloadResults::default()));

        let manager = Self {
            configuration: Configuration::new(config.ingress_class.clone(), config.dos.enabled),
            paths: Paths::new(config.conf_root.clone()),
            main: MainConfig {
                status_port: nginx::STATUS_PORT,
                dos_arbitrator: config
                    .dos
                    .enabled
                    .then(|| ArbitratorAddress::from_config(&config.dos).host()),
            },
            files: ConfigFiles::new(),
            reloader,
            status: StatusReporter::new(status_writer),
            reload_results: reload_results.clone(),
            protected_tx,
            event_rx,
            pending_kinds: watched_kinds.iter().copied().collect(),
            initial_apply_done: false,
            main_conf_written: false,
        };

        let handle = SyncManagerHandle {
            event_tx,
            reload_results,
            protected: protected_rx,
        };
        (manager, handle)
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(kinds = self.pending_kinds.len(), "SyncManager started, waiting for initial listings...");
        let mut batch = Batch::default();

        while let Some(event) = self.event_rx.recv().await {
            self.handle_event(event, &mut batch);
            while let Ok(event) = self.event_rx.try_recv() {
                self.handle_event(event, &mut batch);
            }

            if self.pending_kinds.is_empty() {
                self.apply(std::mem::take(&mut batch)).await;
            }
        }

        self.status.flush().await;
        info!("SyncManager stopped");
        Ok(())
    }

    fn handle_event(&mut self, event: SyncEvent, batch: &mut Batch) {
        match event {
            SyncEvent::Applied(resource) => {
                debug!(resource = %resource.key(), "resource applied");
                self.handle_applied(resource, batch);
            }
            SyncEvent::Deleted(key) => {
                debug!(resource = %key, "resource deleted");
                self.handle_deleted(key, batch);
            }
            SyncEvent::InitDone(kind) => {
                if self.pending_kinds.remove(&kind) {
                    info!(kind = %kind, remaining = self.pending_kinds.len(), "initial listing complete");
                }
            }
        }
    }

    fn handle_applied(&mut self, resource: WatchedResource, batch: &mut Batch) {
        let key = resource.key();
        let delta = match &resource {
            WatchedResource::VirtualServer(vs) => self.configuration.add_or_update_virtual_server(vs),
            WatchedResource::VirtualServerRoute(vsr) => self.configuration.add_or_update_virtual_server_route(vsr),
            WatchedResource::DosPolicy(policy) => {
                let delta = self.configuration.add_or_update_dos_policy(policy);
                let path = self.paths.dos_policy(&key.namespace, &key.name);
                self.stage_dos_artifact(&delta, &key, policy.metadata.generation, path, dos::policy_json(policy).map(Some), batch);
                delta
            }
            WatchedResource::DosLogConf(log_conf) => {
                let delta = self.configuration.add_or_update_dos_log_conf(log_conf);
                let path = self.paths.dos_log_conf(&key.namespace, &key.name);
                self.stage_dos_artifact(&delta, &key, log_conf.metadata.generation, path, dos::log_conf_json(log_conf).map(Some), batch);
                delta
            }
            WatchedResource::DosProtectedResource(protected) => {
                let delta = self.configuration.add_or_update_dos_protected(protected);
                let path = self.paths.dos_allow_list(&key.namespace, &key.name);
                self.stage_dos_artifact(&delta, &key, protected.metadata.generation, path, dos::allow_list_json(protected), batch);
                delta
            }
        };
        self.stage(delta, batch);
    }

    /// Stage the JSON artifact of a DoS resource and its own status.
    /// Rejected resources, resources without an artifact and artifacts that
    /// fail to render leave no file behind.
    fn stage_dos_artifact(
        &self,
        delta: &ConfigurationDelta,
        key: &ResourceKey,
        generation: Option<i64>,
        path: PathBuf,
        artifact: Result<Option<String>>,
        batch: &mut Batch,
    ) {
        if delta.problem_for(key).is_some() {
            batch.remove(path);
            return;
        }
        let outcome = match artifact {
            Ok(Some(contents)) => {
                batch.write(path, contents);
                ReconciliationOutcome::Valid
            }
            Ok(None) => {
                batch.remove(path);
                ReconciliationOutcome::Valid
            }
            Err(e) => {
                error!(resource = %key, error = %e, "failed to render artifact");
                batch.remove(path);
                ReconciliationOutcome::from_error(&e)
            }
        };
        batch.status(
            key.clone(),
            outcome.to_status(key.kind.as_str(), &key.namespace, &key.name, generation),
        );
    }

    fn handle_deleted(&mut self, key: ResourceKey, batch: &mut Batch) {
        let object_key = key.object_key();
        let delta = match key.kind {
            ResourceKind::VirtualServer => self.configuration.delete_virtual_server(&object_key),
            ResourceKind::VirtualServerRoute => self.configuration.delete_virtual_server_route(&object_key),
            ResourceKind::DosPolicy => {
                batch.remove(self.paths.dos_policy(&key.namespace, &key.name));
                self.configuration.delete_dos_policy(&object_key)
            }
            ResourceKind::DosLogConf => {
                batch.remove(self.paths.dos_log_conf(&key.namespace, &key.name));
                self.configuration.delete_dos_log_conf(&object_key)
            }
            ResourceKind::DosProtectedResource => {
                batch.remove(self.paths.dos_allow_list(&key.namespace, &key.name));
                self.configuration.delete_dos_protected(&object_key)
            }
        };
        batch.forget(key);
        self.stage(delta, batch);
    }

    fn stage(&self, delta: ConfigurationDelta, batch: &mut Batch) {
        for change in delta.changes {
            let key = change.config.key();
            match change.op {
                Operation::Delete => {
                    batch.remove(self.paths.virtual_server_conf(&key.namespace, &key.name));
                }
                Operation::AddOrUpdate => {
                    let compiled = generator::compile(&change.config, &self.paths);
                    batch.write(compiled.path, compiled.rendered);
                    batch.status(
                        key.clone(),
                        change.config.outcome().to_status(
                            key.kind.as_str(),
                            &key.namespace,
                            &key.name,
                            compiled.generation,
                        ),
                    );

                    for vsr in &change.config.routes {
                        let vsr_key = vsr.key();
                        let warnings = self.configuration.virtual_server_route_warnings(&vsr_key.object_key());
                        batch.status(
                            vsr_key.clone(),
                            ReconciliationOutcome::from_warnings(warnings).to_status(
                                vsr_key.kind.as_str(),
                                &vsr_key.namespace,
                                &vsr_key.name,
                                vsr.metadata.generation,
                            ),
                        );
                    }
                }
            }
        }

        for problem in delta.problems {
            batch.status(problem.key.clone(), problem.to_status());
        }
    }

    /// Generated files left over from resources deleted while the controller was down
    async fn stale_files(&self) -> Vec<PathBuf> {
        let config = &self.configuration;
        let mut live = BTreeSet::new();
        live.extend(config.virtual_server_configurations().map(|c| {
            let key = c.key();
            self.paths.virtual_server_conf(&key.namespace, &key.name)
        }));
        live.extend(config.dos_policies().map(|p| {
            let key = p.key();
            self.paths.dos_policy(&key.namespace, &key.name)
        }));
        live.extend(config.dos_log_confs().map(|l| {
            let key = l.key();
            self.paths.dos_log_conf(&key.namespace, &key.name)
        }));
        live.extend(
            config
                .dos_protected_resources()
                .filter(|p| !p.spec.allow_list.is_empty())
                .map(|p| {
                    let key = p.key();
                    self.paths.dos_allow_list(&key.namespace, &key.name)
                }),
        );

        let generated = [
            (paths::CONF_DIR, "vs_", ".conf"),
            (paths::DOS_POLICIES_DIR, "", ".json"),
            (paths::DOS_LOGCONFS_DIR, "", ".json"),
            (paths::DOS_ALLOWLIST_DIR, "", ".json"),
        ];
        let mut stale = Vec::new();
        for (dir, prefix, suffix) in generated {
            let Ok(mut entries) = tokio::fs::read_dir(self.paths.root().join(dir)).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(prefix) && name.ends_with(suffix) && !live.contains(&path) {
                    stale.push(path);
                }
            }
        }
        stale
    }

    #[instrument(skip_all, fields(files = batch.files.len(), statuses = batch.statuses.len()))]
    async fn apply(&mut self, mut batch: Batch) {
        if !self.initial_apply_done {
            for path in self.stale_files().await {
                batch.files.entry(path).or_insert(None);
            }
        }
        if !self.main_conf_written {
            batch.write(self.paths.main_conf(), nginx_conf::render_main_config(&self.main, &self.paths));
        }
        if batch.is_empty() && self.initial_apply_done {
            return;
        }

        for key in &batch.forgotten {
            self.status.forget(key);
        }

        match self.distribute(&batch.files).await {
            Ok(()) => self.main_conf_written = true,
            Err(e) => {
                let outcome = ReconciliationOutcome::from_error(&e);
                for (key, status) in batch.statuses.iter_mut() {
                    if status.state != State::Invalid {
                        let generation = status.observed_generation;
                        *status = outcome.to_status(key.kind.as_str(), &key.namespace, &key.name, generation);
                    }
                }
            }
        }

        for (key, status) in batch.statuses {
            self.status.report(key, status);
        }

        self.publish_protected_resources();

        if !self.initial_apply_done {
            self.initial_apply_done = true;
            info!(
                hosts = self.configuration.virtual_server_configurations().count(),
                "initial configuration applied"
            );
        }
    }

    /// Write the batch's files and reload once. On failure every file that was
    /// changed gets its previous contents back and nginx is reloaded with them.
    async fn distribute(&self, files: &BTreeMap<PathBuf, Option<String>>) -> Result<()> {
        let mut previous = Vec::new();
        let outcome = match self.update_files(files, &mut previous).await {
            Ok(changed) if changed.is_empty() => return Ok(()),
            Ok(changed) => self.reload(changed).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            warn!(error = %e, changed = previous.len(), "configuration not applied, rolling back");
            if !previous.is_empty() {
                self.restore(previous).await;
            }
        }
        outcome
    }

    /// Update files in order, stopping at the first failure. `previous` gets
    /// the former contents of every file that was changed.
    async fn update_files<'a>(
        &self,
        files: &'a BTreeMap<PathBuf, Option<String>>,
        previous: &mut Vec<(&'a Path, Option<String>)>,
    ) -> Result<Vec<String>> {
        let mut changed = Vec::new();
        for (path, contents) in files {
            let before = self.files.read(path).await.map_err(|e| file_error(path, e))?;
            let updated = match contents {
                Some(contents) => self.files.write(path, contents).await,
                None => self.files.remove(path).await,
            }
            .map_err(|e| file_error(path, e))?;
            if updated {
                changed.push(path.display().to_string());
                previous.push((path.as_path(), before));
            }
        }
        Ok(changed)
    }

    async fn restore(&self, previous: Vec<(&Path, Option<String>)>) {
        let mut restored = Vec::new();
        for (path, contents) in previous.into_iter().rev() {
            let result = match &contents {
                Some(contents) => self.files.write(path, contents).await,
                None => self.files.remove(path).await,
            };
            match result {
                Ok(_) => restored.push(path.display().to_string()),
                Err(e) => error!(path = %path.display(), error = %e, "failed to restore file"),
            }
        }
        if let Err(e) = self.reload(restored).await {
            error!(error = %e, "reload of the restored configuration failed");
        }
    }

    async fn reload(&self, changed: Vec<String>) -> Result<()> {
        let mut results = match self.reload_results.lock() {
            Ok(results) => results.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let outcome = reload_and_record(self.reloader.as_ref(), &mut results, changed).await;
        if let Ok(mut shared) = self.reload_results.lock() {
            *shared = results;
        }
        outcome
    }

    fn publish_protected_resources(&self) {
        let names = self.configuration.dos_protected_names();
        self.protected_tx.send_if_modified(|current| {
            if *current == names {
                false
            } else {
                *current = names;
                true
            }
        });
    }
}

fn file_error(path: &Path, e: VsGateError) -> VsGateError {
    error!(path = %path.display(), error = %e, "failed to update file");
    e
}
