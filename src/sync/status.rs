// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Publishes reconciliation outcomes onto each resource's status subresource.
//!
//! Writes for one key are serialised: a newer write aborts the in-flight one.
//! Writes for different keys run concurrently, so a slow key never holds up
//! the others. An outcome identical to the last one reported is skipped unless
//! its write failed, and an outcome computed from an older generation than the
//! last recorded one is discarded.

use crate::constants::OPERATOR_NAME;
use crate::error::{Result, VsGateError};
use crate::kubernetes::retry::{retry_with_backoff, RetryConfig};
use crate::types::{
    DosLogConf, DosPolicy, DosProtectedResource, ResourceKey, ResourceKind, ResourceStatus, State, VirtualServer,
    VirtualServerRoute,
};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

#[async_trait]
pub trait StatusWriter: Send + Sync + 'static {
    async fn write_status(&self, key: &ResourceKey, status: &ResourceStatus) -> Result<()>;
}

/// Writes status through the API server with a single merge patch
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn patch<K>(&self, key: &ResourceKey, status: &ResourceStatus) -> Result<()>
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = json!({ "status": status });
        let params = PatchParams {
            field_manager: Some(OPERATOR_NAME.to_string()),
            ..PatchParams::default()
        };
        api.patch_status(&key.name, &params, &Patch::Merge(&patch)).await?;
        Ok(())
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn write_status(&self, key: &ResourceKey, status: &ResourceStatus) -> Result<()> {
        match key.kind {
            ResourceKind::VirtualServer => self.patch::<VirtualServer>(key, status).await,
            ResourceKind::VirtualServerRoute => self.patch::<VirtualServerRoute>(key, status).await,
            ResourceKind::DosPolicy => self.patch::<DosPolicy>(key, status).await,
            ResourceKind::DosLogConf => self.patch::<DosLogConf>(key, status).await,
            ResourceKind::DosProtectedResource => self.patch::<DosProtectedResource>(key, status).await,
        }
    }
}

/// Last outcome reported for a key
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObservedState {
    Unknown,
    Valid,
    Warning,
    Invalid,
}

impl From<State> for ObservedState {
    fn from(state: State) -> Self {
        match state {
            State::Valid => ObservedState::Valid,
            State::Warning => ObservedState::Warning,
            State::Invalid => ObservedState::Invalid,
        }
    }
}

/// Outcome of the writes for one key, shared with the write task
#[derive(Debug, Default)]
struct Progress {
    /// Incremented per scheduled write; a task only records its own attempt
    attempt: u64,
    failed: bool,
    confirmed: Option<State>,
}

fn lock(progress: &Mutex<Progress>) -> MutexGuard<'_, Progress> {
    progress.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Entry {
    /// Last status scheduled for writing
    status: ResourceStatus,
    progress: Arc<Mutex<Progress>>,
    task: Option<JoinHandle<()>>,
}

impl Entry {
    fn write_failed(&self) -> bool {
        lock(&self.progress).failed
    }
}

pub struct StatusReporter {
    writer: Arc<dyn StatusWriter>,
    retry: RetryConfig,
    entries: HashMap<ResourceKey, Entry>,
}

impl StatusReporter {
    pub fn new(writer: Arc<dyn StatusWriter>) -> Self {
        Self {
            writer,
            retry: RetryConfig::default(),
            entries: HashMap::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// State of the last status that was actually written
    pub fn observed_state(&self, key: &ResourceKey) -> ObservedState {
        self.entries
            .get(key)
            .and_then(|e| lock(&e.progress).confirmed)
            .map_or(ObservedState::Unknown, ObservedState::from)
    }

    /// Schedule a status write. Returns `false` when the write was skipped
    /// as a duplicate or as stale. A duplicate of a status whose write
    /// failed is written again.
    #[instrument(skip(self, status), fields(resource = %key, state = %status.state))]
    pub fn report(&mut self, key: ResourceKey, status: ResourceStatus) -> bool {
        if let Some(entry) = self.entries.get_mut(&key) {
            if let (Some(recorded), Some(incoming)) = (entry.status.observed_generation, status.observed_generation) {
                if incoming < recorded {
                    debug!(recorded, incoming, "discarding status computed from an older generation");
                    return false;
                }
            }
            if entry.status.same_outcome(&status) && !entry.write_failed() {
                entry.status.observed_generation = entry.status.observed_generation.max(status.observed_generation);
                debug!("status unchanged");
                return false;
            }
            if let Some(task) = entry.task.take() {
                if !task.is_finished() {
                    debug!("superseding in-flight status write");
                    task.abort();
                }
            }
        }

        let progress = self
            .entries
            .get(&key)
            .map(|e| e.progress.clone())
            .unwrap_or_default();
        let attempt = {
            let mut p = lock(&progress);
            p.attempt += 1;
            p.failed = false;
            p.attempt
        };

        let task = self.spawn_write(key.clone(), status.clone(), progress.clone(), attempt);
        self.entries.insert(
            key,
            Entry {
                status,
                progress,
                task: Some(task),
            },
        );
        true
    }

    /// Drop all bookkeeping for a deleted resource
    pub fn forget(&mut self, key: &ResourceKey) {
        if let Some(entry) = self.entries.remove(key) {
            if let Some(task) = entry.task {
                task.abort();
            }
        }
    }

    /// Wait for every in-flight write to finish
    pub async fn flush(&mut self) {
        for entry in self.entries.values_mut() {
            if let Some(task) = entry.task.take() {
                let _ = task.await;
            }
        }
    }

    fn spawn_write(
        &self,
        key: ResourceKey,
        status: ResourceStatus,
        progress: Arc<Mutex<Progress>>,
        attempt: u64,
    ) -> JoinHandle<()> {
        let writer = self.writer.clone();
        let retry = self.retry.clone();

        tokio::spawn(async move {
            let operation = format!("status {}", key);
            let result = retry_with_backoff(&retry, &operation, VsGateError::is_transient, || {
                writer.write_status(&key, &status)
            })
            .await;

            match &result {
                Ok(()) => debug!(resource = %key, state = %status.state, reason = %status.reason, "status written"),
                Err(e) if e.is_not_found() => debug!(resource = %key, "resource is gone, dropping status write"),
                Err(e) => warn!(resource = %key, error = %e, "failed to write status, the next report retries"),
            }

            let mut p = lock(&progress);
            if p.attempt == attempt {
                match result {
                    Ok(()) => p.confirmed = Some(status.state),
                    Err(_) => p.failed = true,
                }
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_utils::{status_json, virtual_server_json, MockService};
    use crate::types::{Reason, ReconciliationOutcome};
    use kube::core::ErrorResponse;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Records every write; optionally blocks writes until released.
    /// Queued `failures` are answered first, then `fail_with` if set.
    #[derive(Default)]
    pub(crate) struct RecordingWriter {
        pub writes: Mutex<Vec<(ResourceKey, ResourceStatus)>>,
        pub gate: Option<Arc<Notify>>,
        pub failures: Mutex<VecDeque<u16>>,
        pub fail_with: Option<u16>,
    }

    #[async_trait]
    impl StatusWriter for RecordingWriter {
        async fn write_status(&self, key: &ResourceKey, status: &ResourceStatus) -> Result<()> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let queued = self.failures.lock().unwrap().pop_front();
            if let Some(code) = queued.or(self.fail_with) {
                return Err(VsGateError::TransientCluster(kube::Error::Api(ErrorResponse {
                    status: "Failure".to_string(),
                    message: "test".to_string(),
                    reason: "Test".to_string(),
                    code,
                })));
            }
            self.writes.lock().unwrap().push((key.clone(), status.clone()));
            Ok(())
        }
    }

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new(ResourceKind::VirtualServer, "ns", name)
    }

    fn status(outcome: ReconciliationOutcome, generation: i64) -> ResourceStatus {
        outcome.to_status("VirtualServer", "ns", "cafe", Some(generation))
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_identical_outcome_written_once() {
        let writer = Arc::new(RecordingWriter::default());
        let mut reporter = StatusReporter::new(writer.clone());

        assert_eq!(reporter.observed_state(&key("cafe")), ObservedState::Unknown);
        assert!(reporter.report(key("cafe"), status(ReconciliationOutcome::Valid, 1)));
        assert!(!reporter.report(key("cafe"), status(ReconciliationOutcome::Valid, 1)));
        reporter.flush().await;

        assert_eq!(writer.writes.lock().unwrap().len(), 1);
        assert_eq!(reporter.observed_state(&key("cafe")), ObservedState::Valid);
    }

    #[tokio::test]
    async fn test_older_generation_is_discarded() {
        let writer = Arc::new(RecordingWriter::default());
        let mut reporter = StatusReporter::new(writer.clone());

        reporter.report(key("cafe"), status(ReconciliationOutcome::Valid, 3));
        let stale = reporter.report(key("cafe"), status(ReconciliationOutcome::Invalid("old".to_string()), 2));
        reporter.flush().await;

        assert!(!stale);
        let writes = writer.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1.state, State::Valid);
    }

    #[tokio::test]
    async fn test_newer_write_supersedes_in_flight() {
        let gate = Arc::new(Notify::new());
        let writer = Arc::new(RecordingWriter {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let mut reporter = StatusReporter::new(writer.clone());

        reporter.report(key("cafe"), status(ReconciliationOutcome::Valid, 1));
        tokio::task::yield_now().await;
        reporter.report(key("cafe"), status(ReconciliationOutcome::Warning("w".to_string()), 2));
        tokio::task::yield_now().await;
        gate.notify_one();
        reporter.flush().await;

        let writes = writer.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1.reason, Reason::AddedOrUpdatedWithWarning);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let writer = Arc::new(RecordingWriter::default());
        let mut reporter = StatusReporter::new(writer.clone());

        reporter.report(key("a"), status(ReconciliationOutcome::Valid, 1));
        reporter.report(key("b"), status(ReconciliationOutcome::Valid, 1));
        reporter.flush().await;

        assert_eq!(writer.writes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_forget_resets_state() {
        let writer = Arc::new(RecordingWriter::default());
        let mut reporter = StatusReporter::new(writer.clone());

        reporter.report(key("cafe"), status(ReconciliationOutcome::Valid, 1));
        reporter.flush().await;
        reporter.forget(&key("cafe"));

        assert_eq!(reporter.observed_state(&key("cafe")), ObservedState::Unknown);
        assert!(reporter.report(key("cafe"), status(ReconciliationOutcome::Valid, 1)));
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let writer = Arc::new(RecordingWriter {
            fail_with: Some(404),
            ..Default::default()
        });
        let mut reporter = StatusReporter::new(writer.clone()).with_retry(fast_retry());

        reporter.report(key("cafe"), status(ReconciliationOutcome::Valid, 1));
        reporter.flush().await;

        assert!(writer.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_is_retried_on_next_report() {
        let writer = Arc::new(RecordingWriter::default());
        writer.failures.lock().unwrap().push_back(400);
        let mut reporter = StatusReporter::new(writer.clone()).with_retry(fast_retry());

        assert!(reporter.report(key("cafe"), status(ReconciliationOutcome::Valid, 1)));
        reporter.flush().await;
        assert!(writer.writes.lock().unwrap().is_empty());
        assert_eq!(reporter.observed_state(&key("cafe")), ObservedState::Unknown);

        assert!(reporter.report(key("cafe"), status(ReconciliationOutcome::Valid, 1)));
        reporter.flush().await;
        assert_eq!(writer.writes.lock().unwrap().len(), 1);
        assert_eq!(reporter.observed_state(&key("cafe")), ObservedState::Valid);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_retried_on_next_report() {
        let writer = Arc::new(RecordingWriter::default());
        writer.failures.lock().unwrap().extend([503, 503, 503]);
        let mut reporter = StatusReporter::new(writer.clone()).with_retry(fast_retry());

        reporter.report(key("cafe"), status(ReconciliationOutcome::Valid, 1));
        reporter.flush().await;
        assert!(writer.writes.lock().unwrap().is_empty());

        assert!(reporter.report(key("cafe"), status(ReconciliationOutcome::Valid, 2)));
        reporter.flush().await;
        let writes = writer.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1.observed_generation, Some(2));
    }

    #[tokio::test]
    async fn test_kube_writer_sends_merge_patch() {
        let path = "/apis/k8s.nginx.org/v1/namespaces/ns/virtualservers/cafe/status";
        let mock = MockService::new().on_patch(path, 200, &virtual_server_json("ns", "cafe", None));
        let writer = KubeStatusWriter::new(mock.client());

        writer
            .write_status(&key("cafe"), &status(ReconciliationOutcome::Valid, 1))
            .await
            .unwrap();

        let requests = mock.requests_to("PATCH", path);
        assert_eq!(requests.len(), 1);
        let body = requests[0].json();
        assert_eq!(body["status"]["state"], "Valid");
        assert_eq!(body["status"]["reason"], "AddedOrUpdated");
        assert_eq!(body["status"]["observedGeneration"], 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let path = "/apis/k8s.nginx.org/v1/namespaces/ns/virtualservers/cafe/status";
        let mock = MockService::new()
            .on_patch(path, 503, &status_json(503, "ServiceUnavailable"))
            .on_patch(path, 200, &virtual_server_json("ns", "cafe", None));
        let mut reporter =
            StatusReporter::new(Arc::new(KubeStatusWriter::new(mock.client()))).with_retry(fast_retry());

        reporter.report(key("cafe"), status(ReconciliationOutcome::Valid, 1));
        reporter.flush().await;

        assert_eq!(mock.requests_to("PATCH", path).len(), 2);
    }
}
