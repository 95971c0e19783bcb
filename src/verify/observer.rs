// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Observers that wait for the cluster, the data plane and the logs to
//! converge on an expected state.

use crate::dos::log::{parse_log, SecurityLogRecord};
use crate::error::Result;
use crate::types::{DosLogConf, DosPolicy, DosProtectedResource, ResourceStatus, VirtualServer, VirtualServerRoute};
use crate::verify::poll::{poll, PollError};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use k8s_openapi::api::core::v1::Pod;
use kube::api::LogParams;
use kube::Api;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Time allowed for every replica to report the same learning confidence
pub const LEARNING_CONVERGENCE_BUDGET: Duration = Duration::from_secs(60);

/// Time allowed between `Attack started` and a healthy stress level
pub const ATTACK_RECOVERY_BUDGET: Duration = Duration::from_secs(150);

/// Stress level below which the protected service counts as healthy
pub const HEALTHY_STRESS_LEVEL: f64 = 0.6;

/// Attacking IPs that may go undetected as bad actors
pub const MAX_MISSED_BAD_ACTORS: usize = 1;

/// Interval and budget of one wait
#[derive(Debug, Clone)]
pub struct Wait {
    pub interval: Duration,
    pub max: Duration,
    pub cancel: CancellationToken,
}

impl Wait {
    pub fn new(interval: Duration, max: Duration) -> Self {
        Self {
            interval,
            max,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A custom resource that carries a [`ResourceStatus`]
pub trait HasStatus {
    fn resource_status(&self) -> Option<&ResourceStatus>;
}

macro_rules! has_status {
    ($($type:ty),*) => {
        $(impl HasStatus for $type {
            fn resource_status(&self) -> Option<&ResourceStatus> {
                self.status.as_ref()
            }
        })*
    };
}

has_status!(VirtualServer, VirtualServerRoute, DosPolicy, DosLogConf, DosProtectedResource);

/// Wait until the status of `name` satisfies `expected`. Read errors count
/// as not yet converged.
pub async fn wait_for_status<K, F>(api: &Api<K>, name: &str, expected: F, wait: &Wait) -> std::result::Result<ResourceStatus, PollError>
where
    K: kube::Resource + HasStatus + Clone + DeserializeOwned + Debug,
    F: Fn(&ResourceStatus) -> bool,
{
    poll(
        || async {
            match api.get_opt(name).await {
                Ok(Some(obj)) => obj.resource_status().filter(|s| expected(s)).cloned(),
                Ok(None) => None,
                Err(e) => {
                    debug!(name, error = %e, "status read failed");
                    None
                }
            }
        },
        wait.interval,
        wait.max,
        &wait.cancel,
    )
    .await
}

/// Wait until `name` is gone. A NotFound answer means deletion has converged.
pub async fn wait_for_deletion<K>(api: &Api<K>, name: &str, wait: &Wait) -> std::result::Result<(), PollError>
where
    K: kube::Resource + Clone + DeserializeOwned + Debug,
{
    poll(
        || async {
            match api.get_opt(name).await {
                Ok(None) => Some(()),
                Ok(Some(_)) => None,
                Err(e) => {
                    debug!(name, error = %e, "existence check failed");
                    None
                }
            }
        },
        wait.interval,
        wait.max,
        &wait.cancel,
    )
    .await
}

/// Where log lines come from
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn read(&self) -> Result<String>;
}

/// A log file on the local filesystem; a missing file reads as empty
pub struct FileLogSource {
    path: PathBuf,
}

impl FileLogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LogSource for FileLogSource {
    async fn read(&self) -> Result<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Logs of a pod's container
pub struct PodLogSource {
    api: Api<Pod>,
    pod: String,
    container: Option<String>,
}

impl PodLogSource {
    pub fn new(api: Api<Pod>, pod: impl Into<String>) -> Self {
        Self {
            api,
            pod: pod.into(),
            container: None,
        }
    }

    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }
}

#[async_trait]
impl LogSource for PodLogSource {
    async fn read(&self) -> Result<String> {
        let params = LogParams {
            container: self.container.clone(),
            ..LogParams::default()
        };
        Ok(self.api.logs(&self.pod, &params).await?)
    }
}

/// Wait until the log contains `needle`
pub async fn find_in_log(source: &dyn LogSource, needle: &str, wait: &Wait) -> std::result::Result<(), PollError> {
    poll(
        || async {
            match source.read().await {
                Ok(contents) => contents.contains(needle).then_some(()),
                Err(e) => {
                    debug!(error = %e, "log read failed");
                    None
                }
            }
        },
        wait.interval,
        wait.max,
        &wait.cancel,
    )
    .await
}

/// True when the file exists and contains every needle
pub async fn file_contains(path: &Path, needles: &[&str]) -> bool {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => needles.iter().all(|n| contents.contains(n)),
        Err(_) => false,
    }
}

pub async fn wait_for_file_contents(path: &Path, needles: &[&str], wait: &Wait) -> std::result::Result<(), PollError> {
    poll(
        || async { file_contains(path, needles).await.then_some(()) },
        wait.interval,
        wait.max,
        &wait.cancel,
    )
    .await
}

/// Latest `learning_confidence` reported by each unit, by log order
pub fn latest_confidence(records: &[SecurityLogRecord]) -> BTreeMap<String, String> {
    let mut latest = BTreeMap::new();
    for record in records {
        if let (Some(unit), Some(confidence)) = (record.unit_hostname(), record.learning_confidence()) {
            latest.insert(unit.to_string(), confidence.to_string());
        }
    }
    latest
}

/// Every unit in `unit_hostnames` last reported `confidence`
pub fn learning_converged(records: &[SecurityLogRecord], unit_hostnames: &[String], confidence: &str) -> bool {
    let latest = latest_confidence(records);
    unit_hostnames
        .iter()
        .all(|unit| latest.get(unit).map(String::as_str) == Some(confidence))
}

/// Wait until every replica reports `confidence`. Use
/// [`LEARNING_CONVERGENCE_BUDGET`] as `wait.max` for the default budget.
pub async fn wait_for_learning_convergence(
    source: &dyn LogSource,
    unit_hostnames: &[String],
    confidence: &str,
    wait: &Wait,
) -> std::result::Result<(), PollError> {
    poll(
        || async {
            let contents = source.read().await.ok()?;
            learning_converged(&parse_log(&contents), unit_hostnames, confidence).then_some(())
        },
        wait.interval,
        wait.max,
        &wait.cancel,
    )
    .await
}

/// Course of one attack as read from security log records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttackTimeline {
    /// A `No Attack` record with `dos_attack_id` 0 was seen
    pub quiet_before: bool,
    pub started_at: Option<NaiveDateTime>,
    pub attack_id: Option<u64>,
    pub under_attack: bool,
    /// First `Under Attack` record with a healthy stress level
    pub healthy_at: Option<NaiveDateTime>,
    pub mitigated_by_signatures: bool,
    pub bad_actors_detected: bool,
    /// Source IPs reported by `Bad actor detection` during the attack
    pub bad_actor_ips: Vec<String>,
    pub ended: bool,
}

impl AttackTimeline {
    pub fn from_records(records: &[SecurityLogRecord]) -> Self {
        let mut timeline = AttackTimeline::default();

        for record in records {
            match record.attack_event() {
                Some("No Attack") => {
                    if record.dos_attack_id() == Some(0) {
                        timeline.quiet_before = true;
                    }
                }
                Some("Attack started") => {
                    if timeline.started_at.is_none() {
                        if let Some(id) = record.dos_attack_id().filter(|id| *id > 0) {
                            timeline.attack_id = Some(id);
                            timeline.started_at = record.date_time();
                        }
                    }
                }
                Some("Under Attack") => {
                    timeline.under_attack = true;
                    if timeline.healthy_at.is_none()
                        && record.stress_level().is_some_and(|s| s < HEALTHY_STRESS_LEVEL)
                    {
                        timeline.healthy_at = record.date_time();
                    }
                    if record.mitigated_by_signatures().is_some_and(|n| n > 0) {
                        timeline.mitigated_by_signatures = true;
                    }
                }
                Some("Bad actors detected") => {
                    if timeline.under_attack {
                        timeline.bad_actors_detected = true;
                    }
                }
                Some("Bad actor detection") => {
                    if let (true, Some(ip)) = (timeline.under_attack, record.source_ip()) {
                        if !timeline.bad_actor_ips.iter().any(|known| known == ip) {
                            timeline.bad_actor_ips.push(ip.to_string());
                        }
                    }
                }
                Some("Attack ended") => timeline.ended = true,
                _ => {}
            }
        }
        timeline
    }

    /// Time from the attack start until the service was healthy again
    pub fn time_to_recover(&self) -> Option<Duration> {
        let elapsed = self.healthy_at? - self.started_at?;
        elapsed.to_std().ok()
    }

    /// Number of `attackers` never reported as a bad actor
    pub fn missed_attackers(&self, attackers: &[&str]) -> usize {
        attackers
            .iter()
            .filter(|ip| !self.bad_actor_ips.iter().any(|known| known == *ip))
            .count()
    }

    /// The attack went its full course: quiet before, started with a positive
    /// attack id, recovered within [`ATTACK_RECOVERY_BUDGET`], mitigated by
    /// signatures, detected at most [`MAX_MISSED_BAD_ACTORS`] short of all
    /// `attackers`, and ended.
    pub fn is_complete(&self, attackers: &[&str]) -> bool {
        self.quiet_before
            && self.started_at.is_some()
            && self.under_attack
            && self.time_to_recover().is_some_and(|d| d < ATTACK_RECOVERY_BUDGET)
            && self.mitigated_by_signatures
            && self.bad_actors_detected
            && self.missed_attackers(attackers) <= MAX_MISSED_BAD_ACTORS
            && self.ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{virtual_server_json, MockService};
    use crate::types::State;
    use kube::Client;
    use serde_json::json;

    const VS_PATH: &str = "/apis/k8s.nginx.org/v1/namespaces/ns/virtualservers/cafe";

    fn fast() -> Wait {
        Wait::new(Duration::from_millis(1), Duration::from_millis(200))
    }

    fn api(client: Client) -> Api<VirtualServer> {
        Api::namespaced(client, "ns")
    }

    fn status(state: &str) -> serde_json::Value {
        json!({ "state": state, "reason": "AddedOrUpdated", "message": "ok", "observedGeneration": 1 })
    }

    #[tokio::test]
    async fn test_wait_for_status_converges() {
        let mock = MockService::new()
            .on_get(VS_PATH, 200, &virtual_server_json("ns", "cafe", None))
            .on_get(VS_PATH, 200, &virtual_server_json("ns", "cafe", Some(status("Valid"))));

        let status = wait_for_status(&api(mock.client()), "cafe", |s| s.state == State::Valid, &fast())
            .await
            .unwrap();

        assert_eq!(status.state, State::Valid);
        assert_eq!(mock.requests_to("GET", VS_PATH).len(), 2);
    }

    #[tokio::test]
    async fn test_wait_for_status_times_out() {
        let mock = MockService::new().on_get(VS_PATH, 200, &virtual_server_json("ns", "cafe", Some(status("Warning"))));
        let wait = Wait::new(Duration::from_millis(1), Duration::from_millis(20));

        let result = wait_for_status(&api(mock.client()), "cafe", |s| s.state == State::Valid, &wait).await;

        assert_eq!(result, Err(PollError::Timeout(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn test_not_found_means_deleted() {
        let mock = MockService::new()
            .on_get(VS_PATH, 200, &virtual_server_json("ns", "cafe", None))
            .on_get(VS_PATH, 404, &crate::test_utils::not_found_json("virtualservers", "cafe"));

        wait_for_deletion(&api(mock.client()), "cafe", &fast()).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_in_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages");
        let source = FileLogSource::new(&path);
        let writer_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tokio::fs::write(writer_path, "attack_event=\"Attack ended\"\n").await.unwrap();
        });

        find_in_log(&source, "attack_event=\"Attack ended\"", &fast()).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_contains() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vs.conf");
        tokio::fs::write(&path, "app_protect_dos_enable on;\nlisten 80;\n").await.unwrap();

        assert!(file_contains(&path, &["app_protect_dos_enable on;", "listen 80;"]).await);
        assert!(!file_contains(&path, &["app_protect_dos_enable off;"]).await);
        assert!(!file_contains(&dir.path().join("missing"), &[]).await);
    }

    #[tokio::test]
    async fn test_wait_for_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vs.conf");
        let writer_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tokio::fs::write(writer_path, "app_protect_dos_enable on;\nlisten 80;\n").await.unwrap();
        });

        wait_for_file_contents(&path, &["app_protect_dos_enable on;", "listen 80;"], &fast())
            .await
            .unwrap();

        let wait = Wait::new(Duration::from_millis(1), Duration::from_millis(20));
        let result = wait_for_file_contents(&path, &["app_protect_dos_enable off;"], &wait).await;
        assert_eq!(result, Err(PollError::Timeout(Duration::from_millis(20))));
    }

    fn learning(unit: &str, confidence: &str) -> SecurityLogRecord {
        SecurityLogRecord::new()
            .with("unit_hostname", unit)
            .with("learning_confidence", confidence)
    }

    #[test]
    fn test_learning_converged_uses_latest_record() {
        let units = vec!["ic-0".to_string(), "ic-1".to_string()];
        let mut records = vec![learning("ic-0", "Ready"), learning("ic-1", "NotReady")];
        assert!(!learning_converged(&records, &units, "Ready"));

        records.push(learning("ic-1", "Ready"));
        assert!(learning_converged(&records, &units, "Ready"));

        records.push(learning("ic-0", "BadActorsOnly"));
        assert!(!learning_converged(&records, &units, "Ready"));
    }

    #[test]
    fn test_missing_unit_is_not_converged() {
        let units = vec!["ic-0".to_string(), "ic-2".to_string()];
        assert!(!learning_converged(&[learning("ic-0", "Ready")], &units, "Ready"));
    }

    #[tokio::test]
    async fn test_wait_for_learning_convergence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages");
        let lines = format!("{}\n{}\n", learning("ic-0", "Ready"), learning("ic-1", "Ready"));
        tokio::fs::write(&path, lines).await.unwrap();

        let units = vec!["ic-0".to_string(), "ic-1".to_string()];
        wait_for_learning_convergence(&FileLogSource::new(&path), &units, "Ready", &fast())
            .await
            .unwrap();
    }

    fn event(at: &str, event: &str, extra: &[(&str, &str)]) -> SecurityLogRecord {
        let mut record = SecurityLogRecord::new()
            .with("date_time", format!("Oct 17 2026 {}", at))
            .with("attack_event", event);
        for (k, v) in extra {
            record = record.with(k, *v);
        }
        record
    }

    fn attack(recovery_at: &str) -> Vec<SecurityLogRecord> {
        vec![
            event("10:00:00", "No Attack", &[("dos_attack_id", "0")]),
            event("10:01:00", "Attack started", &[("dos_attack_id", "7")]),
            event("10:01:10", "Under Attack", &[("stress_level", "0.95"), ("mitigated_by_signatures", "0")]),
            event("10:01:20", "Bad actors detected", &[]),
            event("10:01:21", "Bad actor detection", &[("source_ip", "1.1.1.1")]),
            event("10:01:22", "Bad actor detection", &[("source_ip", "1.1.1.2")]),
            event(recovery_at, "Under Attack", &[("stress_level", "0.4"), ("mitigated_by_signatures", "5")]),
            event("10:06:00", "Attack ended", &[("dos_attack_id", "7")]),
        ]
    }

    const ATTACKERS: [&str; 3] = ["1.1.1.1", "1.1.1.2", "1.1.1.3"];

    #[test]
    fn test_attack_timeline_complete() {
        let timeline = AttackTimeline::from_records(&attack("10:02:30"));

        assert!(timeline.quiet_before);
        assert_eq!(timeline.attack_id, Some(7));
        assert!(timeline.mitigated_by_signatures);
        assert!(timeline.bad_actors_detected);
        assert_eq!(timeline.bad_actor_ips, vec!["1.1.1.1".to_string(), "1.1.1.2".to_string()]);
        assert_eq!(timeline.time_to_recover(), Some(Duration::from_secs(90)));
        assert_eq!(timeline.missed_attackers(&ATTACKERS), 1);
        assert!(timeline.is_complete(&ATTACKERS));
    }

    /// Timeline of [`attack`] with the records of `attack_event` dropped,
    /// only the one from `source_ip` when given
    fn without(attack_event: &str, source_ip: Option<&str>) -> AttackTimeline {
        let records: Vec<_> = attack("10:02:30")
            .into_iter()
            .filter(|r| {
                r.attack_event() != Some(attack_event) || (source_ip.is_some() && r.source_ip() != source_ip)
            })
            .collect();
        AttackTimeline::from_records(&records)
    }

    #[test]
    fn test_each_missing_stage_is_incomplete() {
        assert!(!without("No Attack", None).is_complete(&ATTACKERS));
        assert!(!without("Bad actors detected", None).is_complete(&ATTACKERS));
        assert!(!without("Attack ended", None).is_complete(&ATTACKERS));

        let missed_two = without("Bad actor detection", Some("1.1.1.2"));
        assert_eq!(missed_two.missed_attackers(&ATTACKERS), 2);
        assert!(!missed_two.is_complete(&ATTACKERS));

        let mut records = attack("10:02:30");
        records[6] = event("10:02:30", "Under Attack", &[("stress_level", "0.4"), ("mitigated_by_signatures", "0")]);
        assert!(!AttackTimeline::from_records(&records).is_complete(&ATTACKERS));
    }

    #[test]
    fn test_slow_recovery_is_incomplete() {
        let timeline = AttackTimeline::from_records(&attack("10:03:31"));

        assert_eq!(timeline.time_to_recover(), Some(Duration::from_secs(151)));
        assert!(!timeline.is_complete(&ATTACKERS));
    }

    #[test]
    fn test_start_without_attack_id_is_ignored() {
        let records = vec![event("10:01:00", "Attack started", &[("dos_attack_id", "0")])];
        let timeline = AttackTimeline::from_records(&records);

        assert_eq!(timeline.started_at, None);
        assert!(!timeline.is_complete(&ATTACKERS));
    }
}
