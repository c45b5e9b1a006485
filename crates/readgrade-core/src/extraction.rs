//! Ordered fallback chain of extraction strategies.
//!
//! [`ExtractionChain::extract`] validates and classifies a URL, then tries each
//! [`ExtractionStrategy`] in order until one yields non-empty cleaned text.
//! Every failure mode ends up in the returned [`ExtractionOutcome`]; nothing
//! is propagated as an error.

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use thiserror::Error;
use url::Url;

use crate::fetch::{FetchError, Fetcher, HttpFetcher};
use crate::retry::{RetryPolicy, RetryingFetcher};
use crate::{Config, ExtractionMethod, ExtractionOutcome, cleaner, html, url_filter};

/// Text produced by one strategy, before cleaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub title: Option<String>,
    pub text: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("no text extracted")]
    Empty,
    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("extractor failed: {0}")]
    Extractor(String),
}

/// One way of turning a URL into article text.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn attempt<'a>(
        &'a self,
        url: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<ExtractedText, ExtractionError>>;
}

/// Fetch, then pull the densest article container's block text.
pub struct MainTextStrategy {
    fetcher: Arc<dyn Fetcher>,
}

impl MainTextStrategy {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

impl ExtractionStrategy for MainTextStrategy {
    fn name(&self) -> &'static str {
        "main-text"
    }

    fn attempt<'a>(
        &'a self,
        url: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<ExtractedText, ExtractionError>> {
        async move {
            let body = self.fetcher.fetch(url, timeout).await?;
            // scraper's DOM is !Send; parse on the blocking pool.
            let main = tokio::task::spawn_blocking(move || html::extract_main_text(&body))
                .await
                .map_err(|e| ExtractionError::Extractor(e.to_string()))?
                .ok_or(ExtractionError::Empty)?;
            Ok(ExtractedText {
                title: main.title,
                text: main.text,
            })
        }
        .boxed()
    }
}

/// Fetch, then score paragraph parents Readability-style and strip the
/// winning fragment's markup.
pub struct ReadableSummaryStrategy {
    fetcher: Arc<dyn Fetcher>,
}

impl ReadableSummaryStrategy {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

impl ExtractionStrategy for ReadableSummaryStrategy {
    fn name(&self) -> &'static str {
        "readable-summary"
    }

    fn attempt<'a>(
        &'a self,
        url: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<ExtractedText, ExtractionError>> {
        async move {
            let body = self.fetcher.fetch(url, timeout).await?;
            let extracted = tokio::task::spawn_blocking(move || {
                let fragment = html::readable_summary(&body)?;
                Some(ExtractedText {
                    title: html::page_title(&body),
                    text: html::fragment_to_text(&fragment),
                })
            })
            .await
            .map_err(|e| ExtractionError::Extractor(e.to_string()))?;
            extracted.ok_or(ExtractionError::Empty)
        }
        .boxed()
    }
}

/// Parse a URL, requiring an http(s) scheme and a host.
pub fn validate_url(url: &str) -> Option<Url> {
    let parsed = Url::parse(url).ok()?;
    let http = matches!(parsed.scheme(), "http" | "https");
    let has_host = parsed.host_str().is_some_and(|h| !h.is_empty());
    (http && has_host).then_some(parsed)
}

pub struct ExtractionChain {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl ExtractionChain {
    /// The first strategy is the primary method; the rest are fallbacks.
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Main-text extraction with a readable-summary fallback, sharing a fetcher.
    pub fn standard(fetcher: Arc<dyn Fetcher>) -> Self {
        Self::new(vec![
            Box::new(MainTextStrategy::new(fetcher.clone())),
            Box::new(ReadableSummaryStrategy::new(fetcher)),
        ])
    }

    /// Standard chain over HTTP, retrying fetches when `resilient_fetch` is set.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let http: Arc<dyn Fetcher> = Arc::new(HttpFetcher::from_config(config)?);
        let fetcher: Arc<dyn Fetcher> = if config.resilient_fetch {
            Arc::new(RetryingFetcher::new(http, RetryPolicy::from_config(config)))
        } else {
            http
        };
        Ok(Self::standard(fetcher))
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Extract cleaned article text from `url`.
    ///
    /// `timeout` bounds each strategy separately; a strategy timing out moves
    /// on to the next one.
    pub async fn extract(&self, url: &str, timeout: Duration) -> ExtractionOutcome {
        let url = url_filter::normalize(url);
        if validate_url(&url).is_none() {
            return ExtractionOutcome::failure(url, "Invalid URL format");
        }

        let classification = url_filter::classify_article(&url);
        if !classification.is_article {
            log::info!("Not extracting {}: {}", url, classification.reason);
            return ExtractionOutcome::failure(url, classification.reason);
        }

        let mut failures = Vec::with_capacity(self.strategies.len());
        for (i, strategy) in self.strategies.iter().enumerate() {
            let method = if i == 0 {
                ExtractionMethod::Primary
            } else {
                log::info!("Falling back to {} for {}", strategy.name(), url);
                ExtractionMethod::Fallback
            };

            let attempt = match tokio::time::timeout(timeout, strategy.attempt(&url, timeout)).await {
                Ok(result) => result,
                Err(_) => Err(ExtractionError::TimedOut(timeout)),
            };

            let cleaned = attempt.and_then(|extracted| {
                let text = cleaner::clean(&extracted.text);
                if text.trim().is_empty() {
                    Err(ExtractionError::Empty)
                } else {
                    Ok((extracted.title, text))
                }
            });

            match cleaned {
                Ok((title, text)) => {
                    log::info!(
                        "{}: extracted {} chars from {}",
                        strategy.name(),
                        text.chars().count(),
                        url
                    );
                    return ExtractionOutcome::success(url, title, text, method);
                }
                Err(e) => {
                    log::warn!("{}: failed on {}: {}", strategy.name(), url, e);
                    failures.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }

        let names = self.strategy_names();
        let tried = match names.len() {
            0 => "no extraction methods configured".to_string(),
            2 => format!("both {} and {}", names[0], names[1]),
            _ => format!("all of {}", names.join(", ")),
        };
        let message = if failures.is_empty() {
            format!("Failed to extract text with {tried}")
        } else {
            format!("Failed to extract text with {tried} ({})", failures.join("; "))
        };
        ExtractionOutcome::failure(url, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a canned result, optionally after a delay, and counts calls.
    struct Canned {
        name: &'static str,
        delay: Option<Duration>,
        result: Result<ExtractedText, ExtractionError>,
        calls: Arc<AtomicUsize>,
    }

    impl Canned {
        fn ok(name: &'static str, text: &str) -> Self {
            Self {
                name,
                delay: None,
                result: Ok(ExtractedText {
                    title: Some(format!("{name} title")),
                    text: text.to_string(),
                }),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn err(name: &'static str, err: ExtractionError) -> Self {
            Self {
                result: Err(err),
                ..Self::ok(name, "")
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    impl ExtractionStrategy for Canned {
        fn name(&self) -> &'static str {
            self.name
        }

        fn attempt<'a>(
            &'a self,
            _url: &'a str,
            _timeout: Duration,
        ) -> BoxFuture<'a, Result<ExtractedText, ExtractionError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                self.result.clone()
            }
            .boxed()
        }
    }

    const URL: &str = "https://news.example.com/2024/05/parks-budget";
    const BODY: &str = "The council approved the parks budget on Tuesday evening.";

    fn chain(primary: Canned, fallback: Canned) -> ExtractionChain {
        ExtractionChain::new(vec![Box::new(primary), Box::new(fallback)])
    }

    #[tokio::test(start_paused = true)]
    async fn primary_timeout_falls_back_to_secondary() {
        let primary = Canned::ok("primary", BODY).slow(Duration::from_secs(60));
        let fallback = Canned::ok("fallback", BODY);
        let outcome = chain(primary, fallback).extract(URL, Duration::from_secs(10)).await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.method, ExtractionMethod::Fallback);
        assert_eq!(outcome.text.as_deref(), Some(BODY));
        assert_eq!(outcome.title.as_deref(), Some("fallback title"));
    }

    #[tokio::test]
    async fn primary_success_skips_fallback() {
        let fallback = Canned::ok("fallback", BODY);
        let fallback_calls = fallback.calls.clone();
        let outcome = chain(Canned::ok("primary", BODY), fallback)
            .extract(URL, Duration::from_secs(10))
            .await;

        assert_eq!(outcome.method, ExtractionMethod::Primary);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn text_empty_after_cleaning_counts_as_failure() {
        let outcome = chain(Canned::ok("primary", "ADVERTISEMENT\n\n"), Canned::ok("fallback", BODY))
            .extract(URL, Duration::from_secs(10))
            .await;
        assert_eq!(outcome.method, ExtractionMethod::Fallback);
    }

    #[tokio::test]
    async fn both_failing_reports_both_methods() {
        let outcome = chain(
            Canned::err(
                "primary",
                ExtractionError::Fetch(FetchError::Status {
                    url: URL.into(),
                    status: 404,
                }),
            ),
            Canned::err("fallback", ExtractionError::Empty),
        )
        .extract(URL, Duration::from_secs(10))
        .await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.method, ExtractionMethod::None);
        let error = outcome.error.unwrap();
        assert!(error.starts_with("Failed to extract text with both primary and fallback"));
        assert!(error.contains("HTTP 404"));
        assert!(error.contains("fallback: no text extracted"));
    }

    #[tokio::test]
    async fn invalid_urls_short_circuit_without_extraction() {
        let primary = Canned::ok("primary", BODY);
        let calls = primary.calls.clone();
        let chain = chain(primary, Canned::ok("fallback", BODY));

        for bad in ["not a url", "ftp://example.com/file/a", "mailto:someone@example.com"] {
            let outcome = chain.extract(bad, Duration::from_secs(1)).await;
            assert!(!outcome.succeeded);
            assert_eq!(outcome.error.as_deref(), Some("Invalid URL format"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_articles_report_classification_reason() {
        let primary = Canned::ok("primary", BODY);
        let calls = primary.calls.clone();
        let outcome = chain(primary, Canned::ok("fallback", BODY))
            .extract("https://example.com/blog", Duration::from_secs(1))
            .await;
        assert!(!outcome.succeeded);
        assert!(outcome.error.unwrap().contains("Category page"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn outcome_url_is_normalized() {
        let outcome = chain(Canned::ok("primary", BODY), Canned::ok("fallback", BODY))
            .extract(&format!("  {URL}). "), Duration::from_secs(1))
            .await;
        assert_eq!(outcome.url, URL);
    }

    struct StaticPage(&'static str);

    impl Fetcher for StaticPage {
        fn fetch<'a>(&'a self, _url: &'a str, _timeout: Duration) -> BoxFuture<'a, Result<String, FetchError>> {
            let body = self.0.to_string();
            async move { Ok(body) }.boxed()
        }
    }

    const PAGE: &str = r#"<html><head><title>Parks budget</title></head><body>
        <nav class="menu"><a href="/">Home</a></nav>
        <article>
          <p>The council approved the parks budget on Tuesday, after months of debate.</p>
          <p>Officials said the money would fund new trails &amp; playgrounds across the city.</p>
        </article></body></html>"#;

    #[tokio::test]
    async fn standard_strategies_extract_from_html() {
        let fetcher: Arc<dyn Fetcher> = Arc::new(StaticPage(PAGE));

        let main = MainTextStrategy::new(fetcher.clone())
            .attempt(URL, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(main.text.contains("trails & playgrounds"));
        assert_eq!(main.title.as_deref(), Some("Parks budget"));

        let summary = ReadableSummaryStrategy::new(fetcher)
            .attempt(URL, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(summary.text.contains("after months of debate."));
        assert!(!summary.text.contains('<'));
        assert!(summary.text.contains("trails & playgrounds"));
    }

    #[tokio::test]
    async fn standard_chain_reports_fetch_failures() {
        struct NotFound;
        impl Fetcher for NotFound {
            fn fetch<'a>(&'a self, url: &'a str, _timeout: Duration) -> BoxFuture<'a, Result<String, FetchError>> {
                async move {
                    Err(FetchError::Status {
                        url: url.to_string(),
                        status: 404,
                    })
                }
                .boxed()
            }
        }

        let chain = ExtractionChain::standard(Arc::new(NotFound));
        assert_eq!(chain.strategy_names(), vec!["main-text", "readable-summary"]);
        let outcome = chain.extract(URL, Duration::from_secs(1)).await;
        assert!(!outcome.succeeded);
        assert!(
            outcome
                .error
                .unwrap()
                .starts_with("Failed to extract text with both main-text and readable-summary")
        );
    }
}
