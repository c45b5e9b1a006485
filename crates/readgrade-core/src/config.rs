//! Runtime configuration.
//!
//! Values resolve in layers: built-in defaults, then an optional TOML file,
//! then environment variables. Binaries apply their own CLI flags on top.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bound on each extraction method's fetch, in seconds.
    pub extraction_timeout_secs: u64,
    /// Concurrent units of work in a batch.
    pub max_workers: usize,
    /// Bound on one URL's extract-and-analyze unit, in seconds.
    pub task_timeout_secs: u64,
    /// Concurrent requests for bulk raw fetching.
    pub max_concurrent_requests: usize,
    /// Attempts made by the retrying fetcher.
    pub max_retries: u32,
    /// Backoff unit for the retrying fetcher, in milliseconds.
    pub retry_base_delay_ms: u64,
    pub max_urls_per_request: usize,
    /// Batches kept in the progress store.
    pub progress_capacity: usize,
    pub user_agent: String,
    /// Route extraction fetches through the retrying fetcher.
    pub resilient_fetch: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extraction_timeout_secs: 10,
            max_workers: 10,
            task_timeout_secs: 30,
            max_concurrent_requests: 10,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            max_urls_per_request: 200,
            progress_capacity: 256,
            user_agent: concat!("readgrade/", env!("CARGO_PKG_VERSION")).to_string(),
            resilient_fetch: false,
            log_level: "info".to_string(),
        }
    }
}

fn parse_env<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

impl Config {
    /// Defaults, overlaid with `path` (if any), overlaid with the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay values found by `lookup`, keyed by environment variable name.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        macro_rules! overlay {
            ($key:literal, $field:ident) => {
                if let Some(raw) = lookup($key) {
                    self.$field = parse_env($key, &raw)?;
                }
            };
        }

        overlay!("EXTRACTION_TIMEOUT", extraction_timeout_secs);
        overlay!("MAX_WORKERS", max_workers);
        overlay!("TASK_TIMEOUT", task_timeout_secs);
        overlay!("MAX_CONCURRENT_REQUESTS", max_concurrent_requests);
        overlay!("MAX_RETRIES", max_retries);
        overlay!("RETRY_BASE_DELAY_MS", retry_base_delay_ms);
        overlay!("MAX_URLS_PER_REQUEST", max_urls_per_request);
        overlay!("PROGRESS_CAPACITY", progress_capacity);

        if let Some(raw) = lookup("USER_AGENT") {
            self.user_agent = raw;
        }
        if let Some(raw) = lookup("RESILIENT_FETCH") {
            self.resilient_fetch = parse_bool("RESILIENT_FETCH", &raw)?;
        }
        if let Some(raw) = lookup("LOG_LEVEL") {
            self.log_level = raw.trim().to_ascii_lowercase();
        }
        Ok(())
    }

    /// Reject values that would stall or disable batch processing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive: [(&'static str, u64); 7] = [
            ("extraction_timeout_secs", self.extraction_timeout_secs),
            ("max_workers", self.max_workers as u64),
            ("task_timeout_secs", self.task_timeout_secs),
            ("max_concurrent_requests", self.max_concurrent_requests as u64),
            ("max_retries", self.max_retries as u64),
            ("max_urls_per_request", self.max_urls_per_request as u64),
            ("progress_capacity", self.progress_capacity as u64),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: value.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if !matches!(
            self.log_level.as_str(),
            "error" | "warn" | "info" | "debug" | "trace" | "off"
        ) {
            return Err(ConfigError::InvalidValue {
                key: "log_level",
                value: self.log_level.clone(),
                reason: "expected one of error, warn, info, debug, trace, off".to_string(),
            });
        }
        Ok(())
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}
