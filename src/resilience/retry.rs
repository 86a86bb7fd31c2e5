// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded retry with exponential backoff.
//!
//! Two callers: the document store connection made by `start()`, and the
//! relational queries issued by `SqlContentStore`. Document store writes
//! during a flush are never retried; a failed write lands in the
//! `FlushReport` and the scanner replays the entity later.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use mirror_sync::RetryConfig;
//!
//! let connect = RetryConfig::startup();
//! assert_eq!(connect.max_attempts, 5);
//! assert_eq!(connect.backoff(Duration::from_secs(1)), Duration::from_secs(2));
//! assert_eq!(connect.backoff(Duration::from_secs(2)), Duration::from_secs(2));
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Attempt budget and backoff curve.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::startup()
    }
}

impl RetryConfig {
    /// Document store / database connection at startup: a bad uri or a dead
    /// host surfaces within a few seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// One relational query inside a scan or a marker write.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            factor: 2.0,
        }
    }

    /// Millisecond delays for embedded hosts and tests.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay to wait after `current`, capped at `max_delay`.
    #[must_use]
    pub fn backoff(&self, current: Duration) -> Duration {
        current.mul_f64(self.factor).min(self.max_delay)
    }
}

/// Retry `operation` on any error until the attempt budget runs out.
pub async fn retry<F, Fut, T, E>(operation_name: &str, config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(operation_name, config, |_| true, operation).await
}

/// Retry `operation` only while `is_transient` accepts the error. Anything
/// else is returned after the first attempt.
pub async fn retry_if<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    is_transient: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut delay = config.initial_delay;
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "Recovered after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if attempt >= config.max_attempts || !is_transient(&err) {
            return Err(err);
        }
        warn!(
            operation = operation_name,
            attempt,
            max_attempts = config.max_attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed"
        );

        sleep(delay).await;
        delay = config.backoff(delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::StoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Operation failing with `errors` in order, then succeeding.
    fn scripted(calls: &AtomicUsize, errors: Vec<StoreError>) -> impl FnMut() -> std::future::Ready<Result<&'static str, StoreError>> + '_ {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(match errors.get(n) {
                Some(e) => Err(e.clone()),
                None => Ok("connected"),
            })
        }
    }

    #[tokio::test]
    async fn test_first_attempt_wins() {
        let calls = AtomicUsize::new(0);
        let result = retry("connect", &RetryConfig::immediate(), scripted(&calls, vec![])).await;

        assert_eq!(result, Ok("connected"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_from_connection_errors() {
        let calls = AtomicUsize::new(0);
        let errors = vec![StoreError::Connection("refused".into()), StoreError::Backend("busy".into())];

        let result = retry_if("connect", &RetryConfig::immediate(), StoreError::is_transient, scripted(&calls, errors)).await;

        assert_eq!(result, Ok("connected"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let errors = vec![StoreError::Connection("refused".into()); 10];

        let result = retry("connect", &RetryConfig::immediate(), scripted(&calls, errors)).await;

        assert_eq!(result, Err(StoreError::Connection("refused".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalid_uri_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let errors = vec![StoreError::InvalidUri("mongodb://x".into())];

        let result = retry_if("connect", &RetryConfig::immediate(), StoreError::is_transient, scripted(&calls, errors)).await;

        assert!(matches!(result, Err(StoreError::InvalidUri(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_grows_then_caps() {
        let config = RetryConfig::query();
        let mut delay = config.initial_delay;
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(delay.as_millis());
            delay = config.backoff(delay);
        }
        assert_eq!(seen, vec![100, 200, 400, 800, 1000]);
    }
}
