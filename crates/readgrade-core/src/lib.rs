use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cleaner;
pub mod config;
pub mod extraction;
pub mod fetch;
pub mod html;
pub mod orchestrator;
pub mod progress;
pub mod readability;
pub mod retry;
pub mod runner;
pub mod url_filter;

// Re-export for convenience
pub use config::{Config, ConfigError};
pub use extraction::{ExtractionChain, ExtractionStrategy};
pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use orchestrator::{BatchOptions, Orchestrator};
pub use progress::{BatchStatus, ProgressState, ProgressStore};
pub use readability::{Analyzer, analyze};
pub use retry::{RetryPolicy, RetryingFetcher, fetch_many, fetch_with_retry};
pub use runner::{ConcurrentRunner, Dispatch, RunError};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("HTTP client error: {0}")]
    Http(#[from] FetchError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("batch {request_id} was cancelled")]
    Cancelled { request_id: String },
    #[error("batch {request_id} exceeded its deadline of {deadline_secs}s")]
    DeadlineExceeded {
        request_id: String,
        deadline_secs: u64,
    },
    #[error("batch {request_id} is already in progress")]
    RequestInProgress { request_id: String },
    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

/// Which extraction method produced an article's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Primary,
    Fallback,
    None,
}

impl ExtractionMethod {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::None => "none",
        }
    }
}

/// Result of running the extraction chain over one URL.
///
/// Built once per candidate URL and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOutcome {
    pub url: String,
    pub title: Option<String>,
    pub text: Option<String>,
    pub succeeded: bool,
    pub method: ExtractionMethod,
    pub error: Option<String>,
}

impl ExtractionOutcome {
    pub fn success(url: String, title: Option<String>, text: String, method: ExtractionMethod) -> Self {
        Self {
            url,
            title,
            text: Some(text),
            succeeded: true,
            method,
            error: None,
        }
    }

    pub fn failure(url: String, error: impl Into<String>) -> Self {
        Self {
            url,
            title: None,
            text: None,
            succeeded: false,
            method: ExtractionMethod::None,
            error: Some(error.into()),
        }
    }
}

/// Grade-level scores and basic statistics for one text.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReadabilityScores {
    pub flesch_kincaid_grade: f64,
    pub smog: f64,
    pub coleman_liau: f64,
    pub ari: f64,
    pub consensus: f64,
    pub word_count: usize,
    pub sentence_count: usize,
}

impl ReadabilityScores {
    /// The four independent grade estimates, in a fixed order.
    pub fn grades(&self) -> [f64; 4] {
        [self.flesch_kincaid_grade, self.smog, self.coleman_liau, self.ari]
    }
}

/// Per-URL entry of a batch response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleResult {
    pub url: String,
    pub title: Option<String>,
    pub extraction_success: bool,
    #[serde(rename = "metrics")]
    pub scores: Option<ReadabilityScores>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<ExtractionMethod>,
    pub error: Option<String>,
}

impl ArticleResult {
    /// Combine an extraction outcome with its scores.
    ///
    /// Scores are attached only when extraction succeeded.
    pub fn from_outcome(outcome: ExtractionOutcome, scores: Option<ReadabilityScores>) -> Self {
        if outcome.succeeded {
            Self {
                url: outcome.url,
                title: outcome.title,
                extraction_success: true,
                scores: Some(scores.unwrap_or_default()),
                extraction_method: Some(outcome.method),
                error: None,
            }
        } else {
            Self::failed(
                outcome.url,
                outcome
                    .error
                    .unwrap_or_else(|| "Failed to extract text".to_string()),
            )
        }
    }

    pub fn failed(url: String, error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "Failed to extract text".to_string();
        }
        Self {
            url,
            title: None,
            extraction_success: false,
            scores: None,
            extraction_method: None,
            error: Some(error),
        }
    }
}

/// Aggregate statistics for a finished batch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_urls: usize,
    #[serde(rename = "successful")]
    pub successful_count: usize,
    #[serde(rename = "failed")]
    pub failed_count: usize,
    pub average_grade_level: Option<f64>,
}

impl BatchSummary {
    /// Summarize ordered results.
    ///
    /// The average covers successful results only and is `None` when there
    /// are no successes.
    pub fn from_results(results: &[ArticleResult]) -> Self {
        let consensus: Vec<f64> = results
            .iter()
            .filter(|r| r.extraction_success)
            .map(|r| r.scores.map(|s| s.consensus).unwrap_or(0.0))
            .collect();
        let successful_count = consensus.len();
        let average_grade_level = if consensus.is_empty() {
            None
        } else {
            Some(round1(consensus.iter().sum::<f64>() / consensus.len() as f64))
        };
        Self {
            total_urls: results.len(),
            successful_count,
            failed_count: results.len() - successful_count,
            average_grade_level,
        }
    }
}

/// A finished batch: ordered per-URL results plus the summary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub request_id: String,
    pub results: Vec<ArticleResult>,
    pub summary: BatchSummary,
}

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(url: &str, consensus: f64) -> ArticleResult {
        ArticleResult {
            url: url.into(),
            title: None,
            extraction_success: true,
            scores: Some(ReadabilityScores {
                consensus,
                ..Default::default()
            }),
            extraction_method: Some(ExtractionMethod::Primary),
            error: None,
        }
    }

    #[test]
    fn summary_averages_successes_only() {
        let results = vec![
            ok("https://a.example/x/y", 8.2),
            ArticleResult::failed("https://b.example/x/y".into(), "boom"),
            ok("https://c.example/x/y", 12.0),
        ];
        let summary = BatchSummary::from_results(&results);
        assert_eq!(summary.total_urls, 3);
        assert_eq!(summary.successful_count, 2);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.average_grade_level, Some(10.1));
    }

    #[test]
    fn summary_without_successes_has_no_average() {
        let results = vec![ArticleResult::failed("https://a.example/x".into(), "nope")];
        let summary = BatchSummary::from_results(&results);
        assert_eq!(summary.average_grade_level, None);
        assert_eq!(summary.successful_count + summary.failed_count, summary.total_urls);
    }

    #[test]
    fn failed_result_always_has_message() {
        let result = ArticleResult::failed("https://a.example/x".into(), "  ");
        assert_eq!(result.error.as_deref(), Some("Failed to extract text"));
        assert!(result.scores.is_none());
    }

    #[test]
    fn serializes_with_api_field_names() {
        let summary = BatchSummary {
            total_urls: 1,
            successful_count: 1,
            failed_count: 0,
            average_grade_level: Some(9.5),
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["successful"], 1);
        assert_eq!(json["failed"], 0);
        assert_eq!(json["average_grade_level"], 9.5);

        let json = serde_json::to_value(ok("https://a.example/x/y", 7.0)).unwrap();
        assert_eq!(json["metrics"]["consensus"], 7.0);
        assert_eq!(json["extraction_method"], "primary");
    }
}
