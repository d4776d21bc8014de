//! Dead letter inspection and resurrection routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::state::AppState;
use crate::ApiError;
use conveyor_core::{DeadLetter, Error, JobMessage, JobStatus, JobType};

#[derive(Debug, Deserialize)]
pub struct ListDeadLettersQuery {
    pub job_type: Option<JobType>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct DeadLetterListResponse {
    pub items: Vec<DeadLetter>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// List dead letters, most recent failures first.
///
/// GET /api/v1/dead-letters
async fn list_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<ListDeadLettersQuery>,
) -> Result<Json<DeadLetterListResponse>, ApiError> {
    if query.limit < 1 || query.limit > 500 {
        return Err(Error::validation("limit must be between 1 and 500").into());
    }
    if query.offset < 0 {
        return Err(Error::validation("offset must be non-negative").into());
    }

    let (items, total) = state
        .store
        .list_dead_letters(query.job_type, query.limit, query.offset)
        .await?;

    Ok(Json(DeadLetterListResponse {
        items,
        total,
        page: query.offset / query.limit + 1,
        page_size: query.limit,
    }))
}

/// Get dead letter details.
///
/// GET /api/v1/dead-letters/:id
async fn get_dead_letter(
    State(state): State<AppState>,
    Path(dead_letter_id): Path<Uuid>,
) -> Result<Json<DeadLetter>, ApiError> {
    let dead_letter = state.store.get_dead_letter(dead_letter_id).await?;
    Ok(Json(dead_letter))
}

/// Resurrect a dead-lettered job: reset its counters and republish.
///
/// POST /api/v1/dead-letters/:id/retry
async fn retry_dead_letter(
    State(state): State<AppState>,
    Path(dead_letter_id): Path<Uuid>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let job = state.store.retry_dead_letter(dead_letter_id).await?;

    if let Err(e) = state.cache.set_job_status(job.id, JobStatus::Pending).await {
        tracing::warn!("Failed to cache status for job {}: {}", job.id, e);
    }

    state
        .broker
        .publish_job(&JobMessage::for_job(&job), job.priority, Duration::ZERO)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "message": "Job resubmitted successfully" })),
    ))
}

/// Delete a dead letter.
///
/// DELETE /api/v1/dead-letters/:id
async fn delete_dead_letter(
    State(state): State<AppState>,
    Path(dead_letter_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_dead_letter(dead_letter_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Router for dead letter routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dead-letters", get(list_dead_letters))
        .route(
            "/dead-letters/:id",
            get(get_dead_letter).delete(delete_dead_letter),
        )
        .route("/dead-letters/:id/retry", post(retry_dead_letter))
}
