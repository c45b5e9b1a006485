//! HTTP service for batch readability analysis.
//!
//! Wraps [`readgrade_core::Orchestrator`] in an `axum` router: batch
//! submission, per-request progress lookup and a server-sent progress stream.

pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use readgrade_core::{Config, Orchestrator, ProgressStore};

pub use error::{ApiError, ErrorResponse};
pub use routes::AnalyzeRequest;

const DEFAULT_CORS_ORIGINS: &str = "http://localhost:5173,http://localhost:3000";

/// Listener and CORS settings, read from `API_HOST`, `API_PORT` and `CORS_ORIGINS`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: split_origins(DEFAULT_CORS_ORIGINS),
        }
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl ServerConfig {
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(host) = lookup("API_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("API_PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid API_PORT {port:?}: {e}"))?;
        }
        if let Some(origins) = lookup("CORS_ORIGINS") {
            config.cors_origins = split_origins(&origins);
        }
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, config: Config) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            config: Arc::new(config),
        }
    }

    /// State backed by the standard extraction chain.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = ProgressStore::from_config(&config);
        let orchestrator = Orchestrator::from_config(&config, store)?;
        Ok(Self::new(orchestrator, config))
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("Ignoring invalid CORS origin {o:?}");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn router(state: AppState, server: &ServerConfig) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/api/analyze-urls", post(routes::analyze_urls))
        .route("/api/progress/{request_id}", get(routes::progress))
        .route("/api/progress/{request_id}/stream", get(routes::progress_stream))
        .layer(cors_layer(&server.cors_origins))
        .with_state(state)
}
