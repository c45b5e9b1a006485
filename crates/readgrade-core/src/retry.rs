//! Retry with exponential backoff, and bounded multi-URL fetching.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::Config;
use crate::fetch::{FetchError, Fetcher};
use crate::runner::{ConcurrentRunner, Dispatch, RunError};

/// How many times to attempt an operation and how long to wait in between.
///
/// After the failed attempt with zero-based index `n`, the next attempt
/// waits `base_delay * 2^n`: 1, 2, 4, ... units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Delay before the attempt following failed attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }

    /// Run `op` until it succeeds or attempts run out, retrying every error.
    pub async fn run<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_when(label, op, |_| true).await
    }

    /// Like [`run`](Self::run), but stops early on errors `retryable` rejects.
    pub async fn run_when<T, E, F, Fut, P>(&self, label: &str, mut op: F, retryable: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 >= attempts || !retryable(&e) => return Err(e),
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    log::info!(
                        "{}: attempt {}/{} failed ({}), retrying in {:.1}s",
                        label,
                        attempt + 1,
                        attempts,
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Fetch one URL, retrying failed attempts with backoff.
///
/// Each attempt is independently bounded by `per_attempt_timeout`.
pub async fn fetch_with_retry(
    fetcher: &dyn Fetcher,
    url: &str,
    policy: RetryPolicy,
    per_attempt_timeout: Duration,
) -> Result<String, FetchError> {
    let result = policy
        .run_when(
            url,
            |_| async move {
                match tokio::time::timeout(per_attempt_timeout, fetcher.fetch(url, per_attempt_timeout))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout {
                        url: url.to_string(),
                        timeout: per_attempt_timeout,
                    }),
                }
            },
            FetchError::is_retryable,
        )
        .await;

    if let Err(e) = &result {
        log::warn!(
            "Giving up on {} after {} attempt(s): {}",
            url,
            policy.max_attempts.max(1),
            e
        );
    }
    result
}

/// Fetch many URLs with at most `max_concurrent` requests in flight.
///
/// Every URL gets exactly one entry, in input order. Worker faults are
/// converted to [`FetchError::Transport`].
pub async fn fetch_many(
    fetcher: Arc<dyn Fetcher>,
    urls: Vec<String>,
    max_concurrent: usize,
    policy: RetryPolicy,
    per_attempt_timeout: Duration,
) -> Vec<(String, Result<String, FetchError>)> {
    let runner = ConcurrentRunner::new(max_concurrent, Dispatch::Semaphore);
    let results = runner
        .run(urls.clone(), move |url: String| {
            let fetcher = fetcher.clone();
            async move { fetch_with_retry(&*fetcher, &url, policy, per_attempt_timeout).await }
        })
        .collect_ordered()
        .await;

    urls.into_iter()
        .zip(results)
        .map(|(url, result)| {
            let result = result.map_err(|e| match e {
                RunError::Failed(e) => e,
                other => FetchError::Transport(other.to_string()),
            });
            (url, result)
        })
        .collect()
}

/// A [`Fetcher`] that retries its inner fetcher according to a policy.
pub struct RetryingFetcher {
    inner: Arc<dyn Fetcher>,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(inner: Arc<dyn Fetcher>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl Fetcher for RetryingFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<String, FetchError>> {
        fetch_with_retry(&*self.inner, url, self.policy, timeout).boxed()
    }
}
