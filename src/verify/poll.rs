// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Bounded polling.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("condition not met within {0:?}")]
    Timeout(Duration),

    #[error("polling cancelled")]
    Cancelled,
}

/// Evaluate `predicate` every `interval` until it yields a value, `max`
/// elapses or `cancel` fires. The predicate always runs at least once.
/// A `max` beyond what the clock can represent never times out.
pub async fn poll<T, F, Fut>(
    mut predicate: F,
    interval: Duration,
    max: Duration,
    cancel: &CancellationToken,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now().checked_add(max);

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }
        if let Some(value) = predicate().await {
            return Ok(value);
        }

        let wait = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(PollError::Timeout(max));
                }
                interval.min(deadline - now)
            }
            None => interval,
        };
        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_returns_first_value() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = poll(
            || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { (n == 3).then_some(n) }
            },
            Duration::from_millis(1),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out() {
        let result: Result<(), _> = poll(
            || async { None },
            Duration::from_millis(5),
            Duration::from_millis(20),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result, Err(PollError::Timeout(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn test_zero_budget_checks_once() {
        let result = poll(
            || async { Some("ready") },
            Duration::from_secs(1),
            Duration::ZERO,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result, Ok("ready"));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = poll(|| async { None }, Duration::from_secs(60), Duration::from_secs(60), &cancel).await;

        assert_eq!(result, Err(PollError::Cancelled));
    }

    #[tokio::test]
    async fn test_unbounded_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = poll(
            || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { (n == 2).then_some(n) }
            },
            Duration::from_millis(1),
            Duration::MAX,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result, Ok(2));
    }
}
