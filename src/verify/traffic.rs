// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Background HTTP load against a protected host.

use crate::error::{Result, VsGateError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

/// Requests sent by a generator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficStats {
    pub succeeded: u64,
    pub failed: u64,
}

impl TrafficStats {
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed
    }
}

#[async_trait]
pub trait TrafficGenerator: Send {
    async fn start(&mut self) -> Result<()>;

    /// Stop all workers and return what they sent
    async fn stop(&mut self) -> Result<TrafficStats>;
}

#[derive(Default)]
struct Counters {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Sends GET requests from a set of workers, each presenting its own
/// `X-Forwarded-For` source address
pub struct HttpTrafficGenerator {
    client: reqwest::Client,
    url: Url,
    host: Option<String>,
    source_ips: Vec<String>,
    interval: Duration,
    cancel: Option<CancellationToken>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl HttpTrafficGenerator {
    pub fn new(url: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| VsGateError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url,
            host: None,
            source_ips: vec![],
            interval: Duration::from_millis(100),
            cancel: None,
            workers: vec![],
            counters: Arc::new(Counters::default()),
        })
    }

    /// Override the `Host` header, for addressing a virtual server by IP
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// One worker per address; without addresses a single worker sends no
    /// `X-Forwarded-For` header
    pub fn source_ips(mut self, ips: Vec<String>) -> Self {
        self.source_ips = ips;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn is_running(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn stats(&self) -> TrafficStats {
        TrafficStats {
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    fn spawn_worker(&self, source_ip: Option<String>, cancel: CancellationToken) -> JoinHandle<()> {
        let client = self.client.clone();
        let url = self.url.clone();
        let host = self.host.clone();
        let interval = self.interval;
        let counters = self.counters.clone();

        tokio::spawn(async move {
            loop {
                let mut request = client.get(url.clone());
                if let Some(host) = &host {
                    request = request.header(reqwest::header::HOST, host);
                }
                if let Some(ip) = &source_ip {
                    request = request.header("X-Forwarded-For", ip);
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    response = request.send() => {
                        match response {
                            Ok(r) if r.status().is_success() => {
                                counters.succeeded.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(r) => {
                                debug!(status = %r.status(), "request rejected");
                                counters.failed.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                debug!(error = %e, "request failed");
                                counters.failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        })
    }
}

#[async_trait]
impl TrafficGenerator for HttpTrafficGenerator {
    async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let cancel = CancellationToken::new();
        let sources: Vec<Option<String>> = if self.source_ips.is_empty() {
            vec![None]
        } else {
            self.source_ips.iter().cloned().map(Some).collect()
        };

        info!(url = %self.url, workers = sources.len(), "starting traffic");
        self.workers = sources
            .into_iter()
            .map(|ip| self.spawn_worker(ip, cancel.clone()))
            .collect();
        self.cancel = Some(cancel);
        Ok(())
    }

    async fn stop(&mut self) -> Result<TrafficStats> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                debug!(error = %e, "traffic worker ended abnormally");
            }
        }
        let stats = self.stats();
        info!(succeeded = stats.succeeded, failed = stats.failed, "traffic stopped");
        Ok(stats)
    }
}

impl Drop for HttpTrafficGenerator {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers every request with 200 and records the X-Forwarded-For values
    async fn serve(seen: Arc<Mutex<Vec<String>>>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let seen = seen.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]).to_lowercase();
                    if let Some(line) = request.lines().find(|l| l.starts_with("x-forwarded-for:")) {
                        seen.lock().unwrap().push(line["x-forwarded-for:".len()..].trim().to_string());
                    }
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                        .await;
                });
            }
        });
        url
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = serve(seen.clone()).await;
        let mut generator = HttpTrafficGenerator::new(url)
            .unwrap()
            .source_ips(vec!["1.1.1.1".to_string(), "1.1.1.2".to_string()])
            .interval(Duration::from_millis(5));

        generator.start().await.unwrap();
        assert!(generator.is_running());
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = generator.stop().await.unwrap();

        assert!(!generator.is_running());
        assert!(stats.succeeded > 0);
        let seen = seen.lock().unwrap();
        assert!(seen.contains(&"1.1.1.1".to_string()));
        assert!(seen.contains(&"1.1.1.2".to_string()));
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let mut generator = HttpTrafficGenerator::new(Url::parse("http://127.0.0.1:9/").unwrap()).unwrap();
        assert_eq!(generator.stop().await.unwrap(), TrafficStats::default());
    }

    #[tokio::test]
    async fn test_unreachable_target_counts_failures() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
        drop(listener);

        let mut generator = HttpTrafficGenerator::new(url).unwrap().interval(Duration::from_millis(5));
        generator.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = generator.stop().await.unwrap();

        assert_eq!(stats.succeeded, 0);
        assert!(stats.failed > 0);
    }
}
