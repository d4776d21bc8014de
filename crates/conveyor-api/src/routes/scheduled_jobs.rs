//! Recurring job definition routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::state::AppState;
use crate::ApiError;
use conveyor_core::{
    cron_next, Error, JobPriority, JobType, NewScheduledJob, ScheduledJob,
};

#[derive(Debug, Deserialize)]
pub struct CreateScheduledJobRequest {
    pub name: String,
    pub job_type: JobType,
    pub cron_expression: String,
    pub payload: Value,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ListScheduledJobsQuery {
    pub is_active: Option<bool>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

/// Create a recurring definition. The cron expression is validated and
/// the first fire time computed here.
///
/// POST /api/v1/scheduled-jobs
async fn create_scheduled_job(
    State(state): State<AppState>,
    Json(request): Json<CreateScheduledJobRequest>,
) -> Result<(StatusCode, Json<ScheduledJob>), ApiError> {
    if request.name.is_empty() || request.name.len() > 200 {
        return Err(Error::validation("name must be 1-200 characters").into());
    }
    if request.cron_expression.len() > 100 {
        return Err(Error::validation("cron expression too long").into());
    }
    if !request.payload.is_object() {
        return Err(Error::validation("Payload must be a JSON object").into());
    }

    let next_run_at = cron_next(&request.cron_expression, Utc::now())?;

    let scheduled = state
        .store
        .create_scheduled_job(NewScheduledJob {
            name: request.name,
            job_type: request.job_type,
            cron_expression: request.cron_expression,
            payload: request.payload,
            priority: request.priority,
            is_active: request.is_active,
            next_run_at,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(scheduled)))
}

/// List recurring definitions, soonest fire first.
///
/// GET /api/v1/scheduled-jobs
async fn list_scheduled_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListScheduledJobsQuery>,
) -> Result<Json<Vec<ScheduledJob>>, ApiError> {
    if query.limit < 1 || query.limit > 500 {
        return Err(Error::validation("limit must be between 1 and 500").into());
    }

    let jobs = state
        .store
        .list_scheduled_jobs(query.is_active, query.limit, query.offset.max(0))
        .await?;

    Ok(Json(jobs))
}

/// Delete a recurring definition.
///
/// DELETE /api/v1/scheduled-jobs/:id
async fn delete_scheduled_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_scheduled_job(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Flip a recurring definition's active flag.
///
/// PATCH /api/v1/scheduled-jobs/:id/toggle
async fn toggle_scheduled_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ScheduledJob>, ApiError> {
    let scheduled = state.store.toggle_scheduled_job(id).await?;
    Ok(Json(scheduled))
}

/// Router for scheduled job routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/scheduled-jobs",
            get(list_scheduled_jobs).post(create_scheduled_job),
        )
        .route("/scheduled-jobs/:id", axum::routing::delete(delete_scheduled_job))
        .route("/scheduled-jobs/:id/toggle", patch(toggle_scheduled_job))
}
