// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Client for the DoS arbitrator and the loop that keeps the local
//! learning-state cache in sync with it.

use crate::config::DosConfig;
use crate::constants::arbitrator::MAX_BACKOFF_SECS;
use crate::dos::learning::{LearningState, LearningStateCache};
use crate::dos::log::{SecurityLogRecord, SyslogSink};
use crate::error::{Result, VsGateError};
use crate::kubernetes::retry::{jittered, next_delay};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Where the arbitrator listens. The namespace is only part of the address
/// when configured, so a cross-namespace arbitrator must be named explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbitratorAddress {
    pub service: String,
    pub namespace: Option<String>,
    pub port: u16,
}

impl ArbitratorAddress {
    pub fn from_config(config: &DosConfig) -> Self {
        Self {
            service: config.arbitrator_service.clone(),
            namespace: config.arbitrator_namespace.clone(),
            port: config.arbitrator_port,
        }
    }

    /// Host part of the address, as the data plane's `app_protect_dos_arb_fqdn` expects it
    pub fn host(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}.{}.svc.cluster.local", self.service, ns),
            None => self.service.clone(),
        }
    }

    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&format!("http://{}/", self))
            .map_err(|e| VsGateError::Config(format!("invalid arbitrator address '{}': {}", self, e)))
    }
}

impl fmt::Display for ArbitratorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host(), self.port)
    }
}

#[async_trait]
pub trait Arbitrator: Send + Sync {
    /// Current learning state of a protected resource; `None` when the
    /// arbitrator has none yet
    async fn fetch(&self, protected: &str) -> Result<Option<LearningState>>;
}

pub struct HttpArbitrator {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpArbitrator {
    pub fn new(address: &ArbitratorAddress) -> Result<Self> {
        Self::with_base_url(address.base_url()?)
    }

    pub fn with_base_url(base_url: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| VsGateError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, base_url })
    }

    fn learning_url(&self, protected: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| VsGateError::Config(format!("arbitrator URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["learning", protected]);
        Ok(url)
    }
}

#[async_trait]
impl Arbitrator for HttpArbitrator {
    #[instrument(skip(self))]
    async fn fetch(&self, protected: &str) -> Result<Option<LearningState>> {
        let url = self.learning_url(protected)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| VsGateError::ArbitratorUnreachable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<LearningState>()
                .await
                .map(Some)
                .map_err(|e| VsGateError::ArbitratorUnreachable(format!("invalid response: {}", e))),
            status => Err(VsGateError::ArbitratorUnreachable(format!("unexpected status {}", status))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncHealth {
    Healthy,
    /// The arbitrator is unreachable; cached state is last known good
    Degraded { failures: u32 },
}

/// Periodically pulls learning state of every protected resource into the cache
pub struct ArbitratorSync {
    arbitrator: Arc<dyn Arbitrator>,
    cache: Arc<RwLock<LearningStateCache>>,
    protected: watch::Receiver<Vec<String>>,
    interval: Duration,
    health: SyncHealth,
    sink: Option<SyslogSink>,
}

impl ArbitratorSync {
    pub fn new(
        arbitrator: Arc<dyn Arbitrator>,
        protected: watch::Receiver<Vec<String>>,
        interval: Duration,
    ) -> Self {
        Self {
            arbitrator,
            cache: Arc::new(RwLock::new(LearningStateCache::new())),
            protected,
            interval,
            health: SyncHealth::Healthy,
            sink: None,
        }
    }

    /// Announce every learning-state change as a security log record
    pub fn with_sink(mut self, sink: SyslogSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn cache(&self) -> Arc<RwLock<LearningStateCache>> {
        self.cache.clone()
    }

    pub fn health(&self) -> SyncHealth {
        self.health
    }

    /// Fetch state for every protected resource. Nothing in the cache is
    /// replaced unless every fetch succeeds.
    pub async fn sync_all(&mut self) -> Result<usize> {
        let protected = self.protected.borrow_and_update().clone();

        let mut fetched = Vec::with_capacity(protected.len());
        for name in &protected {
            if let Some(state) = self.arbitrator.fetch(name).await? {
                fetched.push(state);
            }
        }

        let mut changed = Vec::new();
        {
            let mut cache = self.cache.write().await;
            cache.retain(&protected);
            for state in fetched {
                if cache.update(state.clone()) {
                    changed.push(state);
                }
            }
        }

        if let Some(sink) = &self.sink {
            for state in &changed {
                if let Err(e) = sink.send(&SecurityLogRecord::from_learning_state(state)).await {
                    warn!(error = %e, "failed to send learning state record");
                }
            }
        }
        Ok(changed.len())
    }

    /// Run one pass and return the delay before the next one
    async fn tick(&mut self, backoff: &mut Duration) -> Duration {
        match self.sync_all().await {
            Ok(changed) => {
                if let SyncHealth::Degraded { failures } = self.health {
                    info!(failures, "arbitrator reachable again, learning state re-synced");
                }
                self.health = SyncHealth::Healthy;
                *backoff = self.interval;
                debug!(changed, "learning state synced");
                self.interval
            }
            Err(e) => {
                let failures = match self.health {
                    SyncHealth::Healthy => 1,
                    SyncHealth::Degraded { failures } => failures + 1,
                };
                if failures == 1 {
                    warn!(error = %e, "arbitrator unreachable, keeping last known learning state");
                } else {
                    debug!(failures, error = %e, "arbitrator still unreachable");
                }
                self.health = SyncHealth::Degraded { failures };
                let wait = jittered(*backoff);
                *backoff = next_delay(*backoff, Duration::from_secs(MAX_BACKOFF_SECS));
                wait
            }
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        info!(interval_secs = self.interval.as_secs(), "Starting arbitrator sync");
        let mut backoff = self.interval;

        loop {
            let wait = self.tick(&mut backoff).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
                changed = self.protected.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    debug!("protected resources changed");
                }
            }
        }

        info!("Arbitrator sync stopped");
        Ok(())
    }
}
