//! Batch orchestration: filter, dispatch, drain, reorder, summarize.
//!
//! Each non-skipped URL becomes one unit of work (extract, then analyze) on a
//! bounded worker pool. The draining loop is the only code that touches the
//! batch's progress entry, and it slots every completion back into the
//! position of its input URL.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::extraction::ExtractionChain;
use crate::progress::ProgressStore;
use crate::readability::Analyzer;
use crate::runner::{ConcurrentRunner, Dispatch, RunError};
use crate::{ArticleResult, BatchReport, BatchSummary, Config, CoreError, url_filter};

/// Slack added to the computed whole-batch deadline.
const DEADLINE_GRACE: Duration = Duration::from_secs(10);

/// Per-call knobs for [`Orchestrator::run_batch`].
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub max_workers: usize,
    pub per_task_timeout: Duration,
    /// Caller-chosen id; one is generated when `None`.
    pub request_id: Option<String>,
    /// Cancels the whole batch when triggered.
    pub cancel: Option<CancellationToken>,
    /// Replaces the deadline computed by [`batch_deadline`].
    pub deadline: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_workers: 10,
            per_task_timeout: Duration::from_secs(30),
            request_id: None,
            cancel: None,
            deadline: None,
        }
    }
}

impl BatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_workers: config.max_workers,
            per_task_timeout: config.task_timeout(),
            ..Self::default()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A fresh 16-hex-digit request id.
pub fn new_request_id() -> String {
    format!("{:016x}", fastrand::u64(..))
}

/// Upper bound on a whole batch: one task timeout per wave of workers, plus grace.
pub fn batch_deadline(urls: usize, max_workers: usize, per_task_timeout: Duration) -> Duration {
    let waves = urls.div_ceil(max_workers.max(1)) as u32;
    per_task_timeout.saturating_mul(waves) + DEADLINE_GRACE
}

pub struct Orchestrator {
    chain: Arc<ExtractionChain>,
    analyzer: Arc<Analyzer>,
    progress: ProgressStore,
    extraction_timeout: Duration,
}

impl Orchestrator {
    pub fn new(chain: ExtractionChain, progress: ProgressStore) -> Self {
        Self {
            chain: Arc::new(chain),
            analyzer: Arc::new(Analyzer::default()),
            progress,
            extraction_timeout: Duration::from_secs(10),
        }
    }

    /// HTTP-backed orchestrator using the configured timeouts and fetch mode.
    pub fn from_config(config: &Config, progress: ProgressStore) -> Result<Self, CoreError> {
        let chain = ExtractionChain::from_config(config)?;
        Ok(Self::new(chain, progress).with_extraction_timeout(config.extraction_timeout()))
    }

    pub fn with_analyzer(mut self, analyzer: Analyzer) -> Self {
        self.analyzer = Arc::new(analyzer);
        self
    }

    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// Run a batch to completion.
    ///
    /// Skipped URLs are dropped silently. Every other URL yields exactly one
    /// [`ArticleResult`], in input order. Only batch-level faults (cancellation,
    /// the whole-batch deadline, a lost unit) return `Err`; those also mark the
    /// batch's progress as `error`.
    pub async fn run_batch(
        &self,
        urls: &[String],
        options: BatchOptions,
    ) -> Result<BatchReport, CoreError> {
        let candidates: Vec<String> = urls
            .iter()
            .map(|u| url_filter::normalize(u))
            .filter(|u| !url_filter::should_skip(u))
            .collect();
        let skipped = urls.len() - candidates.len();
        let request_id = options.request_id.clone().unwrap_or_else(new_request_id);
        let tracker = self.progress.start(&request_id, candidates.len())?;

        if candidates.is_empty() {
            log::info!("Batch {request_id}: nothing to process ({skipped} skipped)");
            tracker.complete();
            return Ok(BatchReport {
                request_id,
                results: Vec::new(),
                summary: BatchSummary::default(),
            });
        }

        let started = Instant::now();
        let total = candidates.len();
        log::info!(
            "Batch {request_id}: analyzing {total} URLs ({skipped} skipped) with {} workers",
            options.max_workers
        );

        let cancel = options.cancel.clone().unwrap_or_default();
        let units = cancel.child_token();
        let runner = ConcurrentRunner::new(options.max_workers, Dispatch::WorkerPool)
            .with_timeout(options.per_task_timeout)
            .with_cancel(units.clone());

        let chain = self.chain.clone();
        let analyzer = self.analyzer.clone();
        let extraction_timeout = self.extraction_timeout;
        let mut completions = runner.run(candidates.clone(), move |url: String| {
            let chain = chain.clone();
            let analyzer = analyzer.clone();
            async move {
                Ok::<_, Infallible>(process_url(&chain, analyzer, &url, extraction_timeout).await)
            }
        });

        let deadline = options
            .deadline
            .unwrap_or_else(|| batch_deadline(total, options.max_workers, options.per_task_timeout));
        let deadline_timer = tokio::time::sleep(deadline);
        tokio::pin!(deadline_timer);

        let mut slots: Vec<Option<ArticleResult>> = (0..total).map(|_| None).collect();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::warn!("Batch {request_id} cancelled");
                    tracker.fail("batch was cancelled");
                    return Err(CoreError::Cancelled { request_id });
                }
                _ = &mut deadline_timer => {
                    units.cancel();
                    log::error!("Batch {request_id} exceeded its {}s deadline", deadline.as_secs());
                    tracker.fail(format!("batch exceeded its {}s deadline", deadline.as_secs()));
                    return Err(CoreError::DeadlineExceeded {
                        request_id,
                        deadline_secs: deadline.as_secs(),
                    });
                }
                next = completions.next() => {
                    let Some((index, result)) = next else { break };
                    let url = &candidates[index];
                    let article = match result {
                        Ok(article) => article,
                        Err(RunError::Failed(never)) => match never {},
                        Err(RunError::TimedOut(limit)) => ArticleResult::failed(
                            url.clone(),
                            format!("Processing timed out after {}s", limit.as_secs()),
                        ),
                        Err(other) => {
                            log::error!("Error processing {url}: {other}");
                            ArticleResult::failed(url.clone(), format!("Processing error: {other}"))
                        }
                    };
                    tracker.record(url, article.extraction_success);
                    slots[index] = Some(article);
                }
            }
        }

        let results: Option<Vec<ArticleResult>> = slots.into_iter().collect();
        let Some(results) = results else {
            tracker.fail("worker pool lost a unit of work");
            return Err(CoreError::WorkerPool(format!(
                "batch {request_id} finished with missing results"
            )));
        };

        let summary = BatchSummary::from_results(&results);
        log::info!(
            "Batch {request_id} complete: {}/{} succeeded, average grade {} in {:.1}s",
            summary.successful_count,
            summary.total_urls,
            summary
                .average_grade_level
                .map(|g| g.to_string())
                .unwrap_or_else(|| "n/a".to_string()),
            started.elapsed().as_secs_f64()
        );
        tracker.complete();

        Ok(BatchReport {
            request_id,
            results,
            summary,
        })
    }
}

/// One unit of work: extract, then analyze on the blocking pool.
async fn process_url(
    chain: &ExtractionChain,
    analyzer: Arc<Analyzer>,
    url: &str,
    extraction_timeout: Duration,
) -> ArticleResult {
    let outcome = chain.extract(url, extraction_timeout).await;
    if !outcome.succeeded {
        return ArticleResult::from_outcome(outcome, None);
    }
    let Some(text) = outcome.text.clone() else {
        return ArticleResult::from_outcome(outcome, None);
    };

    match tokio::task::spawn_blocking(move || analyzer.analyze(&text)).await {
        Ok(scores) => ArticleResult::from_outcome(outcome, Some(scores)),
        Err(e) => {
            log::error!("Error analyzing text for {url}: {e}");
            ArticleResult::failed(outcome.url, format!("Analysis error: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{ExtractedText, ExtractionError, ExtractionStrategy};
    use crate::progress::BatchStatus;
    use crate::readability::{GradeLevelMetric, MetricError, TextStats};
    use crate::{ExtractionMethod, round1};
    use futures_util::FutureExt;
    use futures_util::future::BoxFuture;

    /// Behaviour keyed on the URL's last path segment:
    /// `fail*` yields nothing, `slow*` hangs, `w<N>` yields N words.
    struct Scripted;

    impl ExtractionStrategy for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn attempt<'a>(
            &'a self,
            url: &'a str,
            _timeout: Duration,
        ) -> BoxFuture<'a, Result<ExtractedText, ExtractionError>> {
            async move {
                let last = url.rsplit('/').next().unwrap_or_default();
                if last.starts_with("fail") {
                    return Err(ExtractionError::Empty);
                }
                if last.starts_with("slow") {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                let words: usize = last.trim_start_matches('w').parse().unwrap_or(1);
                // Vary completion order.
                tokio::time::sleep(Duration::from_millis((words % 7) as u64 * 10)).await;
                Ok(ExtractedText {
                    title: Some(format!("Story {last}")),
                    text: format!("{}.", vec!["word"; words].join(" ")),
                })
            }
            .boxed()
        }
    }

    struct NeverWorks;

    impl ExtractionStrategy for NeverWorks {
        fn name(&self) -> &'static str {
            "never"
        }

        fn attempt<'a>(
            &'a self,
            _url: &'a str,
            _timeout: Duration,
        ) -> BoxFuture<'a, Result<ExtractedText, ExtractionError>> {
            async { Err(ExtractionError::Empty) }.boxed()
        }
    }

    /// Grade equal to a tenth of the word count.
    struct WordsOverTen;

    impl GradeLevelMetric for WordsOverTen {
        fn name(&self) -> &'static str {
            "words/10"
        }

        fn grade(&self, stats: &TextStats) -> Result<f64, MetricError> {
            Ok(stats.words as f64 / 10.0)
        }
    }

    fn orchestrator(store: ProgressStore) -> Orchestrator {
        let chain = ExtractionChain::new(vec![Box::new(Scripted), Box::new(NeverWorks)]);
        Orchestrator::new(chain, store).with_analyzer(Analyzer::with_metrics(
            Box::new(WordsOverTen),
            Box::new(WordsOverTen),
            Box::new(WordsOverTen),
            Box::new(WordsOverTen),
        ))
    }

    fn url(segment: &str) -> String {
        format!("https://news.example.com/story/{segment}")
    }

    #[tokio::test(start_paused = true)]
    async fn failed_url_keeps_its_slot_and_is_excluded_from_average() {
        let store = ProgressStore::new(16);
        let urls = vec![url("w80"), url("fail-2"), url("w120")];
        let report = orchestrator(store.clone())
            .run_batch(&urls, BatchOptions::default().with_request_id("three"))
            .await
            .unwrap();

        assert_eq!(report.request_id, "three");
        let got: Vec<&str> = report.results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(got, urls.iter().map(String::as_str).collect::<Vec<_>>());

        assert!(report.results[0].extraction_success);
        assert!(!report.results[1].extraction_success);
        assert!(report.results[1].scores.is_none());
        assert!(report.results[1].error.as_deref().unwrap().contains("Failed to extract text"));
        assert_eq!(report.results[2].extraction_method, Some(ExtractionMethod::Primary));

        assert_eq!(report.summary.total_urls, 3);
        assert_eq!(report.summary.successful_count, 2);
        assert_eq!(report.summary.failed_count, 1);
        assert_eq!(report.summary.average_grade_level, Some(10.0));

        let progress = store.get("three").unwrap();
        assert_eq!(progress.status, BatchStatus::Completed);
        assert_eq!(progress.processed_count, 3);
        assert_eq!(progress.successful_count, 2);
        assert_eq!(progress.failed_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn two_hundred_successes_average_their_consensus() {
        let store = ProgressStore::new(16);
        let counts: Vec<usize> = (0..200).map(|i| 20 + (i * 37) % 150).collect();
        let urls: Vec<String> = counts.iter().map(|n| url(&format!("w{n}"))).collect();
        let report = orchestrator(store)
            .run_batch(&urls, BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(report.results.len(), 200);
        assert_eq!(report.request_id.len(), 16);
        let consensus: Vec<f64> = report
            .results
            .iter()
            .map(|r| r.scores.unwrap().consensus)
            .collect();
        let expected: Vec<f64> = counts.iter().map(|n| round1(*n as f64 / 10.0)).collect();
        assert_eq!(consensus, expected);
        assert_eq!(
            report.summary.average_grade_level,
            Some(round1(expected.iter().sum::<f64>() / 200.0))
        );
        assert_eq!(report.summary.successful_count, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_urls_vanish_and_others_are_normalized() {
        let store = ProgressStore::new(16);
        let urls = vec![
            "https://www.youtube.com/watch?v=abc".to_string(),
            format!(" {}).", url("w30")),
            "https://cdn.example.com/chart.png".to_string(),
            url("w50"),
        ];
        let report = orchestrator(store)
            .run_batch(&urls, BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(report.summary.total_urls, 2);
        assert_eq!(report.results[0].url, url("w30"));
        assert_eq!(report.results[1].url, url("w50"));
    }

    #[tokio::test]
    async fn all_skipped_returns_empty_report() {
        let store = ProgressStore::new(16);
        let urls = vec!["https://vimeo.com/123".to_string()];
        let report = orchestrator(store.clone())
            .run_batch(&urls, BatchOptions::default().with_request_id("empty"))
            .await
            .unwrap();

        assert!(report.results.is_empty());
        assert_eq!(report.summary, BatchSummary::default());
        assert_eq!(store.get("empty").unwrap().status, BatchStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_unit_times_out_without_failing_the_batch() {
        let store = ProgressStore::new(16);
        let urls = vec![url("w40"), url("slow-1"), url("w60")];
        let options = BatchOptions {
            max_workers: 2,
            per_task_timeout: Duration::from_secs(5),
            ..BatchOptions::default()
        };
        let report = orchestrator(store)
            .with_extraction_timeout(Duration::from_secs(7200))
            .run_batch(&urls, options)
            .await
            .unwrap();

        assert!(report.results[0].extraction_success);
        assert_eq!(
            report.results[1].error.as_deref(),
            Some("Processing timed out after 5s")
        );
        assert!(report.results[2].extraction_success);
        assert_eq!(report.summary.failed_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_a_batch_fault() {
        let store = ProgressStore::new(16);
        let cancel = CancellationToken::new();
        let urls: Vec<String> = (0..5).map(|i| url(&format!("slow-{i}"))).collect();
        let options = BatchOptions::default()
            .with_request_id("cancel-me")
            .with_cancel(cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = orchestrator(store.clone())
            .with_extraction_timeout(Duration::from_secs(7200))
            .run_batch(&urls, options)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled { .. }));

        let progress = store.get("cancel-me").unwrap();
        assert_eq!(progress.status, BatchStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn exceeding_the_batch_deadline_is_a_fault() {
        let store = ProgressStore::new(16);
        let urls: Vec<String> = (0..4).map(|i| url(&format!("slow-{i}"))).collect();
        let options = BatchOptions {
            max_workers: 2,
            per_task_timeout: Duration::from_secs(7200),
            ..BatchOptions::default()
        }
        .with_request_id("overdue")
        .with_deadline(Duration::from_secs(30));

        let started = Instant::now();
        let err = orchestrator(store.clone())
            .with_extraction_timeout(Duration::from_secs(7200))
            .run_batch(&urls, options)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::DeadlineExceeded { deadline_secs: 30, .. }
        ));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(30) && waited < Duration::from_secs(31));

        let progress = store.get("overdue").unwrap();
        assert_eq!(progress.status, BatchStatus::Error);
        assert_eq!(
            progress.error.as_deref(),
            Some("batch exceeded its 30s deadline")
        );
        assert_eq!(progress.processed_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_urls_each_get_a_result() {
        let store = ProgressStore::new(16);
        let urls = vec![url("w80"), url("w80"), url("w30")];
        let report = orchestrator(store.clone())
            .run_batch(&urls, BatchOptions::default().with_request_id("repeats"))
            .await
            .unwrap();

        assert_eq!(report.results.len(), 3);
        let got: Vec<&str> = report.results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(got, vec![url("w80"), url("w80"), url("w30")]);
        assert_eq!(report.results[0], report.results[1]);
        assert_eq!(report.results[2].scores.unwrap().consensus, 3.0);
        assert_eq!(report.summary.total_urls, 3);
        assert_eq!(report.summary.successful_count, 3);
        assert_eq!(store.get("repeats").unwrap().processed_count, 3);
    }

    #[test]
    fn deadline_scales_with_waves_not_urls() {
        let timeout = Duration::from_secs(30);
        assert_eq!(batch_deadline(25, 10, timeout), Duration::from_secs(90) + DEADLINE_GRACE);
        assert_eq!(batch_deadline(10, 10, timeout), Duration::from_secs(30) + DEADLINE_GRACE);
        assert_eq!(batch_deadline(1, 0, timeout), Duration::from_secs(30) + DEADLINE_GRACE);
    }

    #[test]
    fn request_ids_are_sixteen_hex_digits() {
        let id = new_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
