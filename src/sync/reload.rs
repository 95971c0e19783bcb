// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Data-plane reloads and their timing record.

use crate::error::{Result, VsGateError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{info, instrument, warn};

/// Number of reloads kept in [`ReloadResults`]
const MAX_RECORDS: usize = 100;

#[async_trait]
pub trait Reloader: Send + Sync {
    async fn reload(&self) -> Result<()>;
}

/// Signals the nginx master process with `-s reload`
pub struct NginxReloader {
    binary: PathBuf,
}

impl NginxReloader {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }
}

#[async_trait]
impl Reloader for NginxReloader {
    #[instrument(skip(self), fields(binary = %self.binary.display()))]
    async fn reload(&self) -> Result<()> {
        let output = Command::new(&self.binary).args(["-s", "reload"]).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(VsGateError::Reload(format!("{} ({})", stderr, output.status)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadRecord {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub changed_files: Vec<String>,
    pub success: bool,
}

/// Timing of recent reloads, oldest first
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReloadResults {
    records: Vec<ReloadRecord>,
}

impl ReloadResults {
    pub fn record(&mut self, record: ReloadRecord) {
        if self.records.len() == MAX_RECORDS {
            self.records.remove(0);
        }
        self.records.push(record);
    }

    pub fn records(&self) -> &[ReloadRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&ReloadRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Mean duration of successful reloads
    pub fn average_duration(&self) -> Option<Duration> {
        let ok: Vec<u64> = self.records.iter().filter(|r| r.success).map(|r| r.duration_ms).collect();
        if ok.is_empty() {
            return None;
        }
        Some(Duration::from_millis(ok.iter().sum::<u64>() / ok.len() as u64))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Run one reload for a batch of changed files and record it
pub async fn reload_and_record(
    reloader: &dyn Reloader,
    results: &mut ReloadResults,
    changed_files: Vec<String>,
) -> Result<()> {
    let timestamp = Utc::now();
    let started = Instant::now();
    let outcome = reloader.reload().await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match &outcome {
        Ok(()) => info!(duration_ms, files = changed_files.len(), "reload complete"),
        Err(e) => warn!(duration_ms, error = %e, "reload failed"),
    }

    results.record(ReloadRecord {
        timestamp,
        duration_ms,
        changed_files,
        success: outcome.is_ok(),
    });
    outcome
}
