//! Job submission and inspection routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

use crate::state::AppState;
use crate::ApiError;
use conveyor_core::{
    Error, Job, JobFilter, JobMessage, JobPriority, JobStatus, JobType, NewJob, RetryAttempt,
};

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub job_type: JobType,
    #[serde(default)]
    pub priority: JobPriority,
    pub payload: Value,
    pub max_retries: Option<u32>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct JobDetail {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub payload: Value,
    pub max_retries: i32,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub error_message: Option<String>,
}

impl From<Job> for JobDetail {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type,
            priority: job.priority,
            status: job.status,
            payload: job.payload,
            max_retries: job.max_retries,
            retry_count: job.retry_count,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            scheduled_for: job.scheduled_for,
            worker_id: job.worker_id,
            error_message: job.error_message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RetryAttemptView {
    pub id: Uuid,
    pub attempt_number: i32,
    pub started_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    pub error_message: String,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl From<RetryAttempt> for RetryAttemptView {
    fn from(attempt: RetryAttempt) -> Self {
        Self {
            id: attempt.id,
            attempt_number: attempt.attempt_number,
            started_at: attempt.started_at,
            failed_at: attempt.failed_at,
            error_message: attempt.error_message,
            next_retry_at: attempt.next_retry_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobWithRetries {
    #[serde(flatten)]
    pub job: JobDetail,
    pub retry_attempts: Vec<RetryAttemptView>,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<JobStatus>,
    pub priority: Option<JobPriority>,
    pub job_type: Option<JobType>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

/// Create and submit a new job.
///
/// POST /api/v1/jobs
async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    if !request.payload.is_object() {
        return Err(Error::validation("Payload must be a JSON object").into());
    }

    let mut spec = NewJob::new(request.job_type, request.payload)
        .with_priority(request.priority);
    if let Some(max_retries) = request.max_retries {
        spec = spec.with_max_retries(max_retries);
    }
    if let Some(at) = request.scheduled_for {
        spec = spec.scheduled_for(at);
    }

    let job = state.store.submit(spec).await?;

    if let Err(e) = state.cache.set_job_status(job.id, job.status).await {
        tracing::warn!("Failed to cache status for job {}: {}", job.id, e);
    }

    // Future-dated jobs are stored without a publish
    if job.due_now() {
        state
            .broker
            .publish_job(&JobMessage::for_job(&job), job.priority, Duration::ZERO)
            .await?;
    }

    Ok((
        StatusCode::CREATED,
        Json(JobResponse {
            job_id: job.id,
            status: job.status,
            created_at: job.created_at,
        }),
    ))
}

/// Get job details with retry history.
///
/// GET /api/v1/jobs/:id
async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobWithRetries>, ApiError> {
    // Advisory peek; the store remains the source of truth
    if let Ok(Some(cached)) = state.cache.get_job_status(job_id).await {
        tracing::debug!("Cached status for job {}: {}", job_id, cached);
    }

    let job = state.store.get_job(job_id).await?;
    let attempts = state.store.get_retry_attempts(job_id).await?;

    Ok(Json(JobWithRetries {
        job: job.into(),
        retry_attempts: attempts.into_iter().map(Into::into).collect(),
    }))
}

/// List jobs with optional filtering, newest first.
///
/// GET /api/v1/jobs
async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobDetail>>, ApiError> {
    if query.limit < 1 || query.limit > 1000 {
        return Err(Error::validation("limit must be between 1 and 1000").into());
    }
    if query.offset < 0 {
        return Err(Error::validation("offset must be non-negative").into());
    }

    let filter = JobFilter {
        status: query.status,
        priority: query.priority,
        job_type: query.job_type,
        limit: query.limit,
        offset: query.offset,
    };

    let jobs = state.store.list_jobs(&filter).await?;

    Ok(Json(jobs.into_iter().map(Into::into).collect()))
}

/// Cancel a pending or retrying job.
///
/// DELETE /api/v1/jobs/:id
async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let job = state.store.cancel(job_id).await?;

    if let Err(e) = state.cache.set_job_status(job.id, job.status).await {
        tracing::warn!("Failed to cache status for job {}: {}", job.id, e);
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Router for job routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/:id", get(get_job).delete(cancel_job))
}
