//! Job store: the durable, transactional source of truth for jobs,
//! retry attempts, dead letters, and scheduled definitions.
//!
//! Every other component writes through this store; the broker and
//! cache only ever hold copies of job fields.

pub mod migrate;

pub use migrate::Migrator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    DeadLetter, Job, JobFilter, JobId, JobPriority, JobStatus, JobType, NewJob, RetryAttempt,
    ScheduledJob,
};
use crate::retry::{Decision, RetryPolicy};
use crate::{Error, Result};

/// Create a Postgres connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// A single failed execution, as reported by the worker runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub error_message: String,
    pub error_traceback: Option<String>,
}

impl FailureReport {
    pub fn new(error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            error_traceback: None,
        }
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.error_traceback = Some(traceback.into());
        self
    }
}

/// Spec for a new recurring definition; `next_run_at` is computed by
/// the caller from the validated cron expression
#[derive(Debug, Clone)]
pub struct NewScheduledJob {
    pub name: String,
    pub job_type: JobType,
    pub cron_expression: String,
    pub payload: Value,
    pub priority: JobPriority,
    pub is_active: bool,
    pub next_run_at: DateTime<Utc>,
}

/// Aggregate counters for the stats endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    pub pending_jobs: i64,
    pub running_jobs: i64,
    pub completed_jobs: i64,
    pub failed_jobs: i64,
    pub dead_letter_count: i64,
    pub queue_breakdown: QueueBreakdown,
}

/// Pending jobs by priority band
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueBreakdown {
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

/// Durable job store over Postgres
#[derive(Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a new job in PENDING and return it. Publishing is the
    /// caller's responsibility (and is skipped for future
    /// `scheduled_for`).
    pub async fn submit(&self, spec: NewJob) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (id, job_type, priority, payload, max_retries, scheduled_for)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(spec.job_type)
        .bind(spec.priority)
        .bind(&spec.payload)
        .bind(spec.max_retries.map(|m| m as i32).unwrap_or(3))
        .bind(spec.scheduled_for)
        .fetch_one(&self.pool)
        .await?;

        Ok(job)
    }

    /// Cancel a job. Only PENDING and RETRYING jobs can be cancelled.
    pub async fn cancel(&self, job_id: JobId) -> Result<Job> {
        let cancelled = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'cancelled'
            WHERE id = $1 AND status IN ('pending', 'retrying')
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match cancelled {
            Some(job) => Ok(job),
            None => {
                let job = self.get_job(job_id).await?;
                Err(Error::InvalidTransition {
                    job_id,
                    status: job.status.to_string(),
                    attempted: "cancel".to_string(),
                })
            }
        }
    }

    /// Claim a job for execution: PENDING|RETRYING -> RUNNING.
    /// `started_at` is stamped on the first claim only. A redelivery to
    /// the same worker while RUNNING is accepted as a no-op.
    pub async fn claim_running(&self, job_id: JobId, worker_id: &str) -> Result<Job> {
        let claimed = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'running',
                started_at = COALESCE(started_at, NOW()),
                worker_id = $2
            WHERE id = $1 AND status IN ('pending', 'retrying')
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        match claimed {
            Some(job) => Ok(job),
            None => {
                let job = self.get_job(job_id).await?;
                if job.status == JobStatus::Running && job.worker_id.as_deref() == Some(worker_id)
                {
                    return Ok(job);
                }
                Err(Error::InvalidTransition {
                    job_id,
                    status: job.status.to_string(),
                    attempted: format!("claim by worker {}", worker_id),
                })
            }
        }
    }

    /// Record a successful execution: RUNNING -> COMPLETED.
    pub async fn mark_completed(&self, job_id: JobId) -> Result<Job> {
        let completed = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'completed',
                completed_at = NOW(),
                error_message = NULL
            WHERE id = $1 AND status = 'running'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match completed {
            Some(job) => Ok(job),
            None => {
                let job = self.get_job(job_id).await?;
                Err(Error::InvalidTransition {
                    job_id,
                    status: job.status.to_string(),
                    attempted: "complete".to_string(),
                })
            }
        }
    }

    /// Record a failed execution and decide its fate in one
    /// transaction: append the attempt row, bump `retry_count`, and
    /// either schedule a retry or fail the job and insert its dead
    /// letter. The row lock makes concurrent reports serialize, so two
    /// of them can never both decide on the same stale count.
    pub async fn record_failure(&self, job_id: JobId, report: FailureReport) -> Result<Decision> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>(r#"SELECT * FROM jobs WHERE id = $1 FOR UPDATE"#)
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::not_found(format!("Job {} not found", job_id)))?;

        if !job.status.can_record_failure() {
            return Err(Error::InvalidTransition {
                job_id,
                status: job.status.to_string(),
                attempted: "record failure".to_string(),
            });
        }

        let now = Utc::now();
        let retry_count = job.retry_count + 1;
        // A failure may arrive before any claim (e.g. no handler
        // registered); stamp started_at so it is always set once the
        // job leaves PENDING.
        let attempt_started_at = job.started_at.unwrap_or(now);
        let policy = RetryPolicy::for_job(job.job_type, Some(job.max_retries.max(0) as u32));

        let decision = if policy.should_retry(retry_count as u32) {
            let delay = policy.backoff_delay(retry_count as u32);
            let next_retry_at = now + chrono::Duration::seconds(delay.as_secs() as i64);

            sqlx::query(
                r#"
                INSERT INTO retry_attempts
                    (id, job_id, attempt_number, started_at, failed_at,
                     error_message, error_traceback, next_retry_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(job_id)
            .bind(retry_count)
            .bind(attempt_started_at)
            .bind(now)
            .bind(&report.error_message)
            .bind(&report.error_traceback)
            .bind(next_retry_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'retrying',
                    retry_count = $2,
                    error_message = $3,
                    started_at = $4
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(retry_count)
            .bind(&report.error_message)
            .bind(attempt_started_at)
            .execute(&mut *tx)
            .await?;

            Decision::Retry {
                next_retry_at,
                delay,
            }
        } else {
            sqlx::query(
                r#"
                INSERT INTO retry_attempts
                    (id, job_id, attempt_number, started_at, failed_at,
                     error_message, error_traceback, next_retry_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NULL)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(job_id)
            .bind(retry_count)
            .bind(attempt_started_at)
            .bind(now)
            .bind(&report.error_message)
            .bind(&report.error_traceback)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'failed',
                    retry_count = $2,
                    error_message = $3,
                    started_at = $4
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(retry_count)
            .bind(&report.error_message)
            .bind(attempt_started_at)
            .execute(&mut *tx)
            .await?;

            let all_messages: Vec<String> = sqlx::query_scalar(
                r#"SELECT error_message FROM retry_attempts WHERE job_id = $1 ORDER BY attempt_number"#,
            )
            .bind(job_id)
            .fetch_all(&mut *tx)
            .await?;

            let dead_letter_id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO dead_letters
                    (id, job_id, job_type, payload, total_attempts,
                     first_attempt_at, final_failure_at, failure_reason, all_error_messages)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(dead_letter_id)
            .bind(job_id)
            .bind(job.job_type)
            .bind(&job.payload)
            .bind(retry_count)
            .bind(job.created_at)
            .bind(now)
            .bind(&report.error_message)
            .bind(Json(all_messages))
            .execute(&mut *tx)
            .await?;

            Decision::DeadLetter { dead_letter_id }
        };

        tx.commit().await?;

        Ok(decision)
    }

    /// Resurrect a dead-lettered job: delete the dead letter and the
    /// attempt history, reset counters, and re-enter PENDING.
    /// Publishing is the caller's responsibility.
    pub async fn retry_dead_letter(&self, dead_letter_id: Uuid) -> Result<Job> {
        let mut tx = self.pool.begin().await?;

        let dead_letter = sqlx::query_as::<_, DeadLetter>(
            r#"SELECT * FROM dead_letters WHERE id = $1 FOR UPDATE"#,
        )
        .bind(dead_letter_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::not_found(format!("Dead letter {} not found", dead_letter_id)))?;

        // Attempt rows must match the reset retry count of zero
        sqlx::query(r#"DELETE FROM retry_attempts WHERE job_id = $1"#)
            .bind(dead_letter.job_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(r#"DELETE FROM dead_letters WHERE id = $1"#)
            .bind(dead_letter_id)
            .execute(&mut *tx)
            .await?;

        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'pending',
                retry_count = 0,
                error_message = NULL,
                completed_at = NULL,
                worker_id = NULL
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(dead_letter.job_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::not_found("Original job not found"))?;

        tx.commit().await?;

        Ok(job)
    }

    /// Get a job by id
    pub async fn get_job(&self, job_id: JobId) -> Result<Job> {
        sqlx::query_as::<_, Job>(r#"SELECT * FROM jobs WHERE id = $1"#)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found(format!("Job {} not found", job_id)))
    }

    /// Retry attempts for a job, in attempt order
    pub async fn get_retry_attempts(&self, job_id: JobId) -> Result<Vec<RetryAttempt>> {
        let attempts = sqlx::query_as::<_, RetryAttempt>(
            r#"SELECT * FROM retry_attempts WHERE job_id = $1 ORDER BY attempt_number"#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(attempts)
    }

    /// List jobs with optional filters, newest first
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let limit = filter.limit.clamp(1, 1000);
        let offset = filter.offset.max(0);

        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM jobs
            WHERE ($1::job_status IS NULL OR status = $1)
              AND ($2::job_priority IS NULL OR priority = $2)
              AND ($3::job_type IS NULL OR job_type = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.status)
        .bind(filter.priority)
        .bind(filter.job_type)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    /// List dead letters, most recent failures first
    pub async fn list_dead_letters(
        &self,
        job_type: Option<JobType>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<DeadLetter>, i64)> {
        let limit = limit.clamp(1, 500);
        let offset = offset.max(0);

        let total: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM dead_letters WHERE ($1::job_type IS NULL OR job_type = $1)"#,
        )
        .bind(job_type)
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, DeadLetter>(
            r#"
            SELECT * FROM dead_letters
            WHERE ($1::job_type IS NULL OR job_type = $1)
            ORDER BY final_failure_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(job_type)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((items, total))
    }

    /// Get a dead letter by id
    pub async fn get_dead_letter(&self, dead_letter_id: Uuid) -> Result<DeadLetter> {
        sqlx::query_as::<_, DeadLetter>(r#"SELECT * FROM dead_letters WHERE id = $1"#)
            .bind(dead_letter_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found(format!("Dead letter {} not found", dead_letter_id)))
    }

    /// Delete a dead letter
    pub async fn delete_dead_letter(&self, dead_letter_id: Uuid) -> Result<()> {
        let result = sqlx::query(r#"DELETE FROM dead_letters WHERE id = $1"#)
            .bind(dead_letter_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!(
                "Dead letter {} not found",
                dead_letter_id
            )));
        }

        Ok(())
    }

    /// Create a recurring definition; names are unique
    pub async fn create_scheduled_job(&self, spec: NewScheduledJob) -> Result<ScheduledJob> {
        let result = sqlx::query_as::<_, ScheduledJob>(
            r#"
            INSERT INTO scheduled_jobs
                (id, name, job_type, cron_expression, payload, priority, is_active, next_run_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&spec.name)
        .bind(spec.job_type)
        .bind(&spec.cron_expression)
        .bind(&spec.payload)
        .bind(spec.priority)
        .bind(spec.is_active)
        .bind(spec.next_run_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(scheduled) => Ok(scheduled),
            Err(e) if is_unique_violation(&e) => Err(Error::validation(
                "Scheduled job with this name already exists",
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// List recurring definitions, soonest fire first
    pub async fn list_scheduled_jobs(
        &self,
        is_active: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ScheduledJob>> {
        let limit = limit.clamp(1, 500);
        let offset = offset.max(0);

        let jobs = sqlx::query_as::<_, ScheduledJob>(
            r#"
            SELECT * FROM scheduled_jobs
            WHERE ($1::boolean IS NULL OR is_active = $1)
            ORDER BY next_run_at
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(is_active)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    /// Delete a recurring definition
    pub async fn delete_scheduled_job(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(r#"DELETE FROM scheduled_jobs WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("Scheduled job {} not found", id)));
        }

        Ok(())
    }

    /// Flip a recurring definition's active flag
    pub async fn toggle_scheduled_job(&self, id: Uuid) -> Result<ScheduledJob> {
        sqlx::query_as::<_, ScheduledJob>(
            r#"UPDATE scheduled_jobs SET is_active = NOT is_active WHERE id = $1 RETURNING *"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("Scheduled job {} not found", id)))
    }

    /// Active definitions due at or before `now`, soonest first
    pub async fn due_scheduled_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        let jobs = sqlx::query_as::<_, ScheduledJob>(
            r#"
            SELECT * FROM scheduled_jobs
            WHERE is_active = TRUE AND next_run_at <= $1
            ORDER BY next_run_at
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    /// Materialize one cron fire: advance the definition with a
    /// compare-and-set on `next_run_at` and insert the fired job row in
    /// the same transaction. Returns None when another scheduler
    /// instance already advanced the row.
    pub async fn materialize_scheduled_fire(
        &self,
        definition: &ScheduledJob,
        fired_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let advanced = sqlx::query(
            r#"
            UPDATE scheduled_jobs
            SET last_run_at = $2, next_run_at = $3
            WHERE id = $1 AND next_run_at = $4
            "#,
        )
        .bind(definition.id)
        .bind(fired_at)
        .bind(next_run_at)
        .bind(definition.next_run_at)
        .execute(&mut *tx)
        .await?;

        if advanced.rows_affected() == 0 {
            return Ok(None);
        }

        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (id, job_type, priority, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(definition.job_type)
        .bind(definition.priority)
        .bind(&definition.payload)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(job))
    }

    /// Aggregate counters for the stats endpoint
    pub async fn stats(&self) -> Result<JobStats> {
        let status_counts: Vec<(JobStatus, i64)> =
            sqlx::query_as(r#"SELECT status, COUNT(*) FROM jobs GROUP BY status"#)
                .fetch_all(&self.pool)
                .await?;

        let mut stats = JobStats::default();
        for (status, count) in status_counts {
            match status {
                JobStatus::Pending => stats.pending_jobs = count,
                JobStatus::Running => stats.running_jobs = count,
                JobStatus::Completed => stats.completed_jobs = count,
                JobStatus::Failed => stats.failed_jobs = count,
                _ => {}
            }
        }

        stats.dead_letter_count = sqlx::query_scalar(r#"SELECT COUNT(*) FROM dead_letters"#)
            .fetch_one(&self.pool)
            .await?;

        let pending_by_priority: Vec<(JobPriority, i64)> = sqlx::query_as(
            r#"SELECT priority, COUNT(*) FROM jobs WHERE status = 'pending' GROUP BY priority"#,
        )
        .fetch_all(&self.pool)
        .await?;

        for (priority, count) in pending_by_priority {
            match priority {
                JobPriority::High => stats.queue_breakdown.high = count,
                JobPriority::Medium => stats.queue_breakdown.medium = count,
                JobPriority::Low => stats.queue_breakdown.low = count,
            }
        }

        Ok(stats)
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .map_or(false, |db| db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Store tests run against DATABASE_URL when a Postgres instance is
    // reachable and silently skip otherwise.
    async fn test_store() -> Option<JobStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(std::time::Duration::from_secs(2))
            .connect(&url)
            .await
            .ok()?;

        Migrator::new(pool.clone()).migrate().await.ok()?;

        Some(JobStore::new(pool))
    }

    #[tokio::test]
    async fn test_submit_and_get() {
        if let Some(store) = test_store().await {
            let job = store
                .submit(NewJob::new(
                    JobType::SendEmail,
                    json!({"to": "a@b", "subject": "s", "body": "x"}),
                ))
                .await
                .unwrap();

            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.retry_count, 0);
            assert!(job.started_at.is_none());

            let fetched = store.get_job(job.id).await.unwrap();
            assert_eq!(fetched.id, job.id);
            assert_eq!(fetched.job_type, JobType::SendEmail);
        }
    }

    #[tokio::test]
    async fn test_cancel_guards_terminal_states() {
        if let Some(store) = test_store().await {
            let job = store
                .submit(NewJob::new(JobType::SendEmail, json!({})))
                .await
                .unwrap();

            let cancelled = store.cancel(job.id).await.unwrap();
            assert_eq!(cancelled.status, JobStatus::Cancelled);

            // Cancelling again is an invalid transition, not a mutation
            let err = store.cancel(job.id).await.unwrap_err();
            assert!(matches!(err, Error::InvalidTransition { .. }));

            let unchanged = store.get_job(job.id).await.unwrap();
            assert_eq!(unchanged.status, JobStatus::Cancelled);
        }
    }

    #[tokio::test]
    async fn test_claim_rejects_other_worker() {
        if let Some(store) = test_store().await {
            let job = store
                .submit(NewJob::new(JobType::SendEmail, json!({})))
                .await
                .unwrap();

            let claimed = store.claim_running(job.id, "worker-1").await.unwrap();
            assert_eq!(claimed.status, JobStatus::Running);
            assert!(claimed.started_at.is_some());

            // Same worker redelivery is idempotent
            assert!(store.claim_running(job.id, "worker-1").await.is_ok());

            // Another worker is rejected
            let err = store.claim_running(job.id, "worker-2").await.unwrap_err();
            assert!(matches!(err, Error::InvalidTransition { .. }));
        }
    }

    #[tokio::test]
    async fn test_retry_then_succeed_keeps_history_without_dead_letter() {
        if let Some(store) = test_store().await {
            let job = store
                .submit(NewJob::new(JobType::SendEmail, json!({})).with_max_retries(3))
                .await
                .unwrap();

            for _ in 0..2 {
                store.claim_running(job.id, "worker-1").await.unwrap();
                let decision = store
                    .record_failure(job.id, FailureReport::new("flaky"))
                    .await
                    .unwrap();
                assert!(decision.is_retry());
            }

            store.claim_running(job.id, "worker-1").await.unwrap();
            let completed = store.mark_completed(job.id).await.unwrap();

            assert_eq!(completed.status, JobStatus::Completed);
            assert_eq!(completed.retry_count, 2);
            assert!(completed.completed_at.is_some());
            assert!(completed.error_message.is_none());

            let attempts = store.get_retry_attempts(job.id).await.unwrap();
            assert_eq!(attempts.len(), 2);
            assert!(attempts.iter().all(|a| a.next_retry_at.is_some()));

            let (dead_letters, _) = store.list_dead_letters(None, 50, 0).await.unwrap();
            assert!(!dead_letters.iter().any(|d| d.job_id == job.id));
        }
    }

    #[tokio::test]
    async fn test_failure_exhaustion_creates_one_dead_letter() {
        if let Some(store) = test_store().await {
            let job = store
                .submit(NewJob::new(JobType::SendEmail, json!({})).with_max_retries(2))
                .await
                .unwrap();

            store.claim_running(job.id, "worker-1").await.unwrap();

            // Failures 1 and 2 retry, failure 3 dead-letters
            let d1 = store
                .record_failure(job.id, FailureReport::new("boom"))
                .await
                .unwrap();
            assert!(d1.is_retry());

            store.claim_running(job.id, "worker-1").await.unwrap();
            let d2 = store
                .record_failure(job.id, FailureReport::new("boom"))
                .await
                .unwrap();
            assert!(d2.is_retry());

            store.claim_running(job.id, "worker-1").await.unwrap();
            let d3 = store
                .record_failure(job.id, FailureReport::new("boom"))
                .await
                .unwrap();
            let dead_letter_id = match d3 {
                Decision::DeadLetter { dead_letter_id } => dead_letter_id,
                other => panic!("expected dead letter, got {:?}", other),
            };

            let failed = store.get_job(job.id).await.unwrap();
            assert_eq!(failed.status, JobStatus::Failed);
            assert_eq!(failed.retry_count, 3);

            let attempts = store.get_retry_attempts(job.id).await.unwrap();
            let numbers: Vec<i32> = attempts.iter().map(|a| a.attempt_number).collect();
            assert_eq!(numbers, vec![1, 2, 3]);

            let dead_letter = store.get_dead_letter(dead_letter_id).await.unwrap();
            assert_eq!(dead_letter.total_attempts, 3);
            assert_eq!(dead_letter.all_error_messages.0, vec!["boom"; 3]);

            // Another failure report cannot produce a second dead letter
            let err = store
                .record_failure(job.id, FailureReport::new("boom"))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidTransition { .. }));
        }
    }

    #[tokio::test]
    async fn test_dead_letter_retry_resets_job() {
        if let Some(store) = test_store().await {
            let job = store
                .submit(NewJob::new(JobType::SendEmail, json!({})).with_max_retries(0))
                .await
                .unwrap();

            store.claim_running(job.id, "worker-1").await.unwrap();
            let decision = store
                .record_failure(job.id, FailureReport::new("boom"))
                .await
                .unwrap();
            let dead_letter_id = match decision {
                Decision::DeadLetter { dead_letter_id } => dead_letter_id,
                other => panic!("expected dead letter, got {:?}", other),
            };

            let reset = store.retry_dead_letter(dead_letter_id).await.unwrap();
            assert_eq!(reset.status, JobStatus::Pending);
            assert_eq!(reset.retry_count, 0);
            assert!(reset.error_message.is_none());

            assert!(store.get_dead_letter(dead_letter_id).await.is_err());
            assert!(store.get_retry_attempts(job.id).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_scheduled_job_fire_advances_once() {
        if let Some(store) = test_store().await {
            let name = format!("nightly-{}", Uuid::new_v4());
            let now = Utc::now();
            let definition = store
                .create_scheduled_job(NewScheduledJob {
                    name: name.clone(),
                    job_type: JobType::ProcessVideo,
                    cron_expression: "0 2 * * *".to_string(),
                    payload: json!({"video_url": "u", "output_format": "mp4"}),
                    priority: JobPriority::Medium,
                    is_active: true,
                    next_run_at: now - chrono::Duration::seconds(30),
                })
                .await
                .unwrap();

            // Duplicate names are rejected
            let dup = store
                .create_scheduled_job(NewScheduledJob {
                    name,
                    job_type: JobType::ProcessVideo,
                    cron_expression: "0 2 * * *".to_string(),
                    payload: json!({}),
                    priority: JobPriority::Medium,
                    is_active: true,
                    next_run_at: now,
                })
                .await;
            assert!(matches!(dup, Err(Error::Validation(_))));

            let due = store.due_scheduled_jobs(now).await.unwrap();
            assert!(due.iter().any(|d| d.id == definition.id));

            let next = now + chrono::Duration::hours(24);
            let fired = store
                .materialize_scheduled_fire(&definition, now, next)
                .await
                .unwrap();
            let job = fired.expect("first fire should win the CAS");
            assert_eq!(job.job_type, JobType::ProcessVideo);
            assert_eq!(job.status, JobStatus::Pending);

            // A second fire from the stale snapshot loses the CAS
            let second = store
                .materialize_scheduled_fire(&definition, now, next)
                .await
                .unwrap();
            assert!(second.is_none());

            store.delete_scheduled_job(definition.id).await.unwrap();
        }
    }
}
