//! Live progress of in-flight batches.
//!
//! A [`ProgressStore`] is created by the caller and handed to the
//! orchestrator. Each batch gets one [`ProgressTracker`], the only writer for
//! that request id; any number of readers take [`ProgressState`] snapshots.
//!
//! The store is bounded. When it is full, the entry that finished longest ago
//! is evicted to make room. Entries still processing are never evicted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as Slot;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{Config, CoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Processing,
    Completed,
    Error,
}

impl BatchStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, BatchStatus::Processing)
    }
}

/// Snapshot of one batch's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub request_id: String,
    pub total_urls: usize,
    pub processed_count: usize,
    pub successful_count: usize,
    pub failed_count: usize,
    pub current_url: Option<String>,
    pub status: BatchStatus,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub avg_time_per_url: f64,
    pub estimated_remaining_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressState {
    fn new(request_id: String, total_urls: usize) -> Self {
        Self {
            request_id,
            total_urls,
            processed_count: 0,
            successful_count: 0,
            failed_count: 0,
            current_url: None,
            status: BatchStatus::Processing,
            started_at: Utc::now(),
            elapsed_seconds: 0.0,
            avg_time_per_url: 0.0,
            estimated_remaining_seconds: 0.0,
            error: None,
        }
    }

    /// Fraction of URLs processed, in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total_urls == 0 {
            1.0
        } else {
            self.processed_count as f64 / self.total_urls as f64
        }
    }
}

struct Entry {
    state: ProgressState,
    /// Order in which the batch finished; `None` while processing.
    finished_seq: Option<u64>,
}

struct Inner {
    entries: DashMap<String, Entry>,
    capacity: usize,
    finish_counter: AtomicU64,
}

/// Bounded, shared map of request id to progress.
#[derive(Clone)]
pub struct ProgressStore {
    inner: Arc<Inner>,
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                capacity: capacity.max(1),
                finish_counter: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.progress_capacity)
    }

    /// Register a new batch and return its writer.
    ///
    /// Fails if a batch with the same id is still processing.
    pub fn start(&self, request_id: &str, total_urls: usize) -> Result<ProgressTracker, CoreError> {
        if !self.inner.entries.contains_key(request_id) {
            self.make_room();
        }

        let fresh = Entry {
            state: ProgressState::new(request_id.to_string(), total_urls),
            finished_seq: None,
        };
        // The shard lock is held from the in-progress check to the insert.
        match self.inner.entries.entry(request_id.to_string()) {
            Slot::Occupied(mut slot) => {
                if slot.get().finished_seq.is_none() {
                    return Err(CoreError::RequestInProgress {
                        request_id: request_id.to_string(),
                    });
                }
                slot.insert(fresh);
            }
            Slot::Vacant(slot) => {
                slot.insert(fresh);
            }
        }

        Ok(ProgressTracker {
            store: self.clone(),
            request_id: request_id.to_string(),
            started: Instant::now(),
            finished: false,
        })
    }

    fn make_room(&self) {
        while self.inner.entries.len() >= self.inner.capacity {
            let oldest = self
                .inner
                .entries
                .iter()
                .filter_map(|e| e.finished_seq.map(|seq| (seq, e.key().clone())))
                .min_by_key(|(seq, _)| *seq);
            match oldest {
                Some((_, key)) => {
                    log::debug!("Evicting progress for finished batch {key}");
                    self.inner.entries.remove(&key);
                }
                None => {
                    log::warn!(
                        "Progress store over capacity ({}): all batches still processing",
                        self.inner.capacity
                    );
                    break;
                }
            }
        }
    }

    /// Snapshot of a batch's progress.
    pub fn get(&self, request_id: &str) -> Option<ProgressState> {
        self.inner.entries.get(request_id).map(|e| e.state.clone())
    }

    pub fn remove(&self, request_id: &str) -> Option<ProgressState> {
        self.inner.entries.remove(request_id).map(|(_, e)| e.state)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    fn update(&self, request_id: &str, f: impl FnOnce(&mut ProgressState)) {
        if let Some(mut entry) = self.inner.entries.get_mut(request_id) {
            f(&mut entry.state);
            if entry.state.status.is_finished() && entry.finished_seq.is_none() {
                entry.finished_seq = Some(self.inner.finish_counter.fetch_add(1, Ordering::SeqCst));
            }
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Sole writer of one batch's [`ProgressState`].
///
/// Dropping a tracker before [`complete`](Self::complete) or
/// [`fail`](Self::fail) marks the batch as errored.
pub struct ProgressTracker {
    store: ProgressStore,
    request_id: String,
    started: Instant,
    finished: bool,
}

impl ProgressTracker {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Record one finished URL and refresh timing estimates.
    pub fn record(&self, url: &str, succeeded: bool) {
        let elapsed = self.started.elapsed().as_secs_f64();
        self.store.update(&self.request_id, |state| {
            state.processed_count += 1;
            if succeeded {
                state.successful_count += 1;
            } else {
                state.failed_count += 1;
            }
            state.current_url = Some(url.to_string());
            state.elapsed_seconds = round2(elapsed);
            state.avg_time_per_url = round2(elapsed / state.processed_count as f64);
            let remaining = state.total_urls.saturating_sub(state.processed_count);
            state.estimated_remaining_seconds = round2(state.avg_time_per_url * remaining as f64);
        });
    }

    pub fn complete(mut self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        self.finish(BatchStatus::Completed, None, elapsed);
    }

    pub fn fail(mut self, message: impl Into<String>) {
        let elapsed = self.started.elapsed().as_secs_f64();
        self.finish(BatchStatus::Error, Some(message.into()), elapsed);
    }

    fn finish(&mut self, status: BatchStatus, error: Option<String>, elapsed: f64) {
        self.finished = true;
        self.store.update(&self.request_id, |state| {
            state.status = status;
            state.error = error;
            state.elapsed_seconds = round2(elapsed);
            state.estimated_remaining_seconds = 0.0;
        });
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        if !self.finished {
            let elapsed = self.started.elapsed().as_secs_f64();
            self.finish(BatchStatus::Error, Some("batch was abandoned".to_string()), elapsed);
        }
    }
}
