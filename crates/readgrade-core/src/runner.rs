//! Bounded concurrent execution of independent units of work.
//!
//! One [`ConcurrentRunner`] covers both dispatch disciplines used in the crate:
//! a fixed pool of worker tasks pulling from a shared queue, and one task per
//! item gated by a counting semaphore. Each runner owns its bound; two runners
//! never share one.
//!
//! Every submitted item resolves exactly once, either with the work's result
//! or with a [`RunError`] describing why it did not finish.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::retry::RetryPolicy;

/// How items are scheduled onto tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// `limit` long-lived workers draining an mpmc queue.
    WorkerPool,
    /// One task per item, `limit` semaphore permits.
    Semaphore,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError<E> {
    #[error("{0}")]
    Failed(E),
    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("task panicked: {0}")]
    Panicked(String),
}

pub struct ConcurrentRunner {
    limit: usize,
    dispatch: Dispatch,
    per_attempt_timeout: Option<Duration>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl ConcurrentRunner {
    /// A runner with no timeout, no retries and its own cancellation token.
    pub fn new(limit: usize, dispatch: Dispatch) -> Self {
        Self {
            limit: limit.max(1),
            dispatch,
            per_attempt_timeout: None,
            retry: RetryPolicy::none(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Start running `work` over `items`.
    ///
    /// Must be called from within a Tokio runtime. Results arrive through the
    /// returned [`Completions`] in completion order, tagged with the item's
    /// input index.
    pub fn run<T, R, E, F, Fut>(&self, items: Vec<T>, work: F) -> Completions<R, E>
    where
        T: Clone + Send + Sync + 'static,
        R: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let total = items.len();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let unit = Arc::new(Unit {
            work,
            per_attempt_timeout: self.per_attempt_timeout,
            retry: self.retry,
            cancel: self.cancel.clone(),
        });

        match self.dispatch {
            Dispatch::WorkerPool => {
                let (job_tx, job_rx) = async_channel::unbounded::<(usize, T)>();
                for job in items.into_iter().enumerate() {
                    // Unbounded and still open, so this cannot fail.
                    let _ = job_tx.try_send(job);
                }
                job_tx.close();

                let workers = self.limit.min(total.max(1));
                for _ in 0..workers {
                    let rx = job_rx.clone();
                    let unit = unit.clone();
                    let done = done_tx.clone();
                    tokio::spawn(async move {
                        while let Ok((index, item)) = rx.recv().await {
                            let result = unit.execute(index, item).await;
                            if done.send((index, result)).is_err() {
                                break;
                            }
                        }
                    });
                }
            }
            Dispatch::Semaphore => {
                let permits = Arc::new(Semaphore::new(self.limit));
                for (index, item) in items.into_iter().enumerate() {
                    let permits = permits.clone();
                    let unit = unit.clone();
                    let done = done_tx.clone();
                    tokio::spawn(async move {
                        let result = match permits.acquire_owned().await {
                            Ok(_permit) => unit.execute(index, item).await,
                            Err(_) => Err(RunError::Cancelled),
                        };
                        let _ = done.send((index, result));
                    });
                }
            }
        }

        Completions {
            rx: done_rx,
            total,
        }
    }
}

struct Unit<F> {
    work: F,
    per_attempt_timeout: Option<Duration>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<F> Unit<F> {
    async fn execute<T, R, E, Fut>(&self, index: usize, item: T) -> Result<R, RunError<E>>
    where
        T: Clone,
        R: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        self.retry
            .run_when(
                &format!("item {index}"),
                |_| self.attempt(item.clone()),
                |e| matches!(e, RunError::Failed(_) | RunError::TimedOut(_)),
            )
            .await
    }

    async fn attempt<T, R, E, Fut>(&self, item: T) -> Result<R, RunError<E>>
    where
        R: Send + 'static,
        E: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        // Spawned so a panic in the work is caught as a JoinError.
        let mut handle = tokio::spawn((self.work)(item));
        let joined = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                handle.abort();
                return Err(RunError::Cancelled);
            }
            joined = within(self.per_attempt_timeout, &mut handle) => joined,
        };

        match joined {
            None => {
                handle.abort();
                Err(RunError::TimedOut(self.per_attempt_timeout.unwrap_or_default()))
            }
            Some(Ok(Ok(value))) => Ok(value),
            Some(Ok(Err(e))) => Err(RunError::Failed(e)),
            Some(Err(join_err)) => Err(RunError::Panicked(join_err.to_string())),
        }
    }
}

async fn within<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Results of a [`ConcurrentRunner::run`], in completion order.
pub struct Completions<R, E> {
    rx: mpsc::UnboundedReceiver<(usize, Result<R, RunError<E>>)>,
    total: usize,
}

impl<R, E> Completions<R, E> {
    /// Number of items submitted.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Next completed item, or `None` once every item has resolved.
    pub async fn next(&mut self) -> Option<(usize, Result<R, RunError<E>>)> {
        self.rx.recv().await
    }

    /// Wait for every item and return results in input order.
    pub async fn collect_ordered(mut self) -> Vec<Result<R, RunError<E>>> {
        let mut slots: Vec<Option<Result<R, RunError<E>>>> = (0..self.total).map(|_| None).collect();
        while let Some((index, result)) = self.next().await {
            slots[index] = Some(result);
        }
        slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(RunError::Cancelled)))
            .collect()
    }
}
