//! Request handlers.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::{Json, RequestExt};
use http_body_util::BodyExt;
use tracing::{error, info};

use super::error::ApiError;
use super::models::{HealthResponse, ScanRequest, ScanResponse, WorkerPoolStatus};
use super::state::AppState;
use crate::jobs::{run_scan, Job};
use crate::worker::Task;

/// Scan submission (`POST /scan`).
///
/// Accepts a JSON body `{"configs": [...]}`, a multipart upload with a
/// newline-delimited `file` field, or a plain-text newline-delimited
/// body. The handler holds a shared reservation for the whole submission
/// path: extraction, dedup, job registration, and the enqueue — not the
/// task's execution. While a refresh holds the exclusive side this
/// returns 503.
pub async fn scan(
    State(state): State<AppState>,
    request: Request,
) -> Result<impl IntoResponse, ApiError> {
    let Some(_hold) = state.lock.try_scan_hold() else {
        return Err(ApiError::RefreshInProgress);
    };

    let links = extract_links(request).await?;
    if links.is_empty() {
        return Err(ApiError::EmptyBatch);
    }

    let fresh = state
        .cache
        .filter_new(&links)
        .await
        .map_err(|e| ApiError::CacheUnavailable(e.to_string()))?;
    if fresh.is_empty() {
        return Err(ApiError::AllDuplicates);
    }

    let job = Arc::new(Job::new(fresh));
    state.registry.insert(Arc::clone(&job));
    job.start();

    let scanner = Arc::clone(&state.scanner);
    let task_job = Arc::clone(&job);
    let on_success = state.on_success.clone();
    let task = Task {
        id: job.id.clone(),
        work: Box::pin(async move { Ok(run_scan(scanner, task_job, on_success).await) }),
        callback: None,
    };

    if let Err(e) = state.pool.submit(task) {
        error!(job_id = %job.id, error = %e, "task submission failed");
        job.fail(&e.to_string());
        return Err(ApiError::SubmitFailed(e.to_string()));
    }

    info!(job_id = %job.id, total = job.total_count(), "scan accepted");
    Ok(Json(ScanResponse { job_id: job.id.clone() }))
}

/// Pulls links out of whichever body shape the client sent. Lines are
/// trimmed; blanks and `#` comments are dropped.
async fn extract_links(request: Request) -> Result<Vec<String>, ApiError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart: Multipart = request
            .extract::<Multipart, _>()
            .await
            .map_err(|e| ApiError::InvalidPayload(e.to_string()))?;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::InvalidPayload(e.to_string()))?
        {
            if field.name() == Some("file") {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::InvalidPayload(e.to_string()))?;
                return Ok(parse_lines(&text));
            }
        }
        return Err(ApiError::InvalidPayload("missing file field".to_string()));
    }

    let body = request
        .into_body()
        .collect()
        .await
        .map_err(|e| ApiError::InvalidPayload(e.to_string()))?
        .to_bytes();

    if content_type.starts_with("application/json") {
        let request: ScanRequest = serde_json::from_slice(&body)
            .map_err(|e| ApiError::InvalidPayload(format!("invalid JSON: {e}")))?;
        Ok(request
            .configs
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect())
    } else {
        let text = String::from_utf8_lossy(&body);
        Ok(parse_lines(&text))
    }
}

fn parse_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Job lookup (`GET /job/{id}`).
pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.registry.get(&id).ok_or_else(|| ApiError::JobNotFound(id))?;
    Ok(Json(job.snapshot()))
}

/// Health and worker-pool stats (`GET /health`). Unauthenticated.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.pool.stats();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: option_env!("PROXYBOX_BUILD").unwrap_or("dev").to_string(),
        worker_pool: WorkerPoolStatus {
            worker_count: stats.worker_count,
            total_tasks: stats.total_tasks,
            completed_tasks: stats.completed_tasks,
            failed_tasks: stats.failed_tasks,
            queue_length: stats.queue_length,
            is_running: stats.is_running,
            uptime: format!("{:.1}s", stats.uptime.as_secs_f64()),
        },
    })
}
