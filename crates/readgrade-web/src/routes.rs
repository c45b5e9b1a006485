use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::{Stream, StreamExt, future};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;

use readgrade_core::{BatchOptions, BatchReport, ProgressState};

use crate::AppState;
use crate::error::ApiError;

/// How often the progress stream samples the store.
const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub message: &'static str,
    pub version: &'static str,
    pub status: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        message: "Readgrade Readability Analyzer API",
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
    })
}

pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy".to_string(),
    })
}

/// Extract and score every URL in the request.
///
/// The batch is cancelled if the client goes away before it finishes.
pub async fn analyze_urls(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<BatchReport>, ApiError> {
    let max = state.config.max_urls_per_request;
    if request.urls.is_empty() {
        return Err(ApiError::Validation("At least one URL is required".to_string()));
    }
    if request.urls.len() > max {
        return Err(ApiError::Validation(format!(
            "Maximum {max} URLs allowed per request (got {})",
            request.urls.len()
        )));
    }

    log::info!("Analyzing {} URLs", request.urls.len());

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let mut options = BatchOptions::from_config(&state.config).with_cancel(cancel);
    if let Some(id) = request.request_id {
        options = options.with_request_id(id);
    }

    let report = state.orchestrator.run_batch(&request.urls, options).await?;
    Ok(Json(report))
}

pub async fn progress(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<ProgressState>, ApiError> {
    state
        .orchestrator
        .progress()
        .get(&request_id)
        .map(Json)
        .ok_or(ApiError::NotFound(request_id))
}

fn progress_event(state: &ProgressState) -> Event {
    match Event::default().event("progress").json_data(state) {
        Ok(event) => event,
        Err(e) => Event::default().event("error").data(e.to_string()),
    }
}

/// Server-sent progress snapshots, ending after the batch completes or fails.
pub async fn progress_stream(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let store = state.orchestrator.progress().clone();
    if store.get(&request_id).is_none() {
        return Err(ApiError::NotFound(request_id));
    }

    let ticks = IntervalStream::new(tokio::time::interval(STREAM_POLL_INTERVAL));
    let snapshots = ticks.map(move |_| store.get(&request_id));
    let events = snapshots.scan(false, |done, snapshot| {
        if *done {
            return future::ready(None);
        }
        let event = match snapshot {
            Some(state) => {
                *done = state.status.is_finished();
                progress_event(&state)
            }
            // Evicted from the store mid-stream.
            None => {
                *done = true;
                Event::default().event("gone").data("progress no longer available")
            }
        };
        future::ready(Some(Ok(event)))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
