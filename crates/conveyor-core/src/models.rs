//! Job queue data model: jobs, retry attempts, dead letters, and
//! recurring definitions, plus the lifecycle state machine rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use std::fmt;
use uuid::Uuid;

/// Unique job identifier
pub type JobId = Uuid;

/// Registered job types
///
/// Extensible at build time; not user-defined at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
pub enum JobType {
    SendEmail,
    ProcessVideo,
    ScrapeWebsite,
}

impl JobType {
    /// All registered types
    pub const ALL: [JobType; 3] = [
        JobType::SendEmail,
        JobType::ProcessVideo,
        JobType::ScrapeWebsite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::SendEmail => "send_email",
            JobType::ProcessVideo => "process_video",
            JobType::ScrapeWebsite => "scrape_website",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send_email" => Ok(JobType::SendEmail),
            "process_video" => Ok(JobType::ProcessVideo),
            "scrape_website" => Ok(JobType::ScrapeWebsite),
            other => Err(crate::Error::validation(format!(
                "Unknown job type: {}",
                other
            ))),
        }
    }
}

/// Job priority bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "job_priority", rename_all = "snake_case")]
pub enum JobPriority {
    High,
    Medium,
    Low,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Medium
    }
}

impl JobPriority {
    /// All bands, highest first
    pub const ALL: [JobPriority; 3] = [JobPriority::High, JobPriority::Medium, JobPriority::Low];

    /// Broker queue for this band
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobPriority::High => "jobs.high",
            JobPriority::Medium => "jobs.medium",
            JobPriority::Low => "jobs.low",
        }
    }

    /// Holding queue used for delayed redelivery into this band
    pub fn delayed_queue_name(&self) -> &'static str {
        match self {
            JobPriority::High => "jobs.high.delayed",
            JobPriority::Medium => "jobs.medium.delayed",
            JobPriority::Low => "jobs.low.delayed",
        }
    }

    /// AMQP per-message priority for this band
    pub fn broker_priority(&self) -> u8 {
        match self {
            JobPriority::High => 10,
            JobPriority::Medium => 5,
            JobPriority::Low => 1,
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPriority::High => write!(f, "high"),
            JobPriority::Medium => write!(f, "medium"),
            JobPriority::Low => write!(f, "low"),
        }
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, not yet claimed
    Pending,

    /// Claimed by a worker, handler in flight
    Running,

    /// Handler succeeded
    Completed,

    /// Retries exhausted; a dead letter exists
    Failed,

    /// Cancelled before execution
    Cancelled,

    /// Failed with retries remaining; republished with a delay
    Retrying,
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Pending
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::Retrying => write!(f, "retrying"),
        }
    }
}

impl JobStatus {
    /// Check if the status is terminal (no forward transition)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Cancellation is allowed only before a worker holds the job
    pub fn can_cancel(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Retrying)
    }

    /// A worker may claim the job from these states
    pub fn can_claim(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Retrying)
    }

    /// A failure report is accepted from these states
    pub fn can_record_failure(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Running | JobStatus::Retrying
        )
    }
}

/// Durable job record, the source of truth for one unit of work
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: JobId,
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

impl Job {
    /// Whether submission should publish immediately
    pub fn due_now(&self) -> bool {
        match self.scheduled_for {
            Some(at) => at <= Utc::now(),
            None => true,
        }
    }
}

/// One failed execution attempt, owned by its job
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RetryAttempt {
    pub id: Uuid,
    pub job_id: JobId,
    pub attempt_number: i32,
    pub started_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    pub error_message: String,
    pub error_traceback: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Quarantine record for a job whose retries are exhausted
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeadLetter {
    pub id: Uuid,
    pub job_id: JobId,
    pub job_type: JobType,
    pub payload: Value,
    pub total_attempts: i32,
    pub first_attempt_at: DateTime<Utc>,
    pub final_failure_at: DateTime<Utc>,
    pub failure_reason: String,
    pub all_error_messages: Json<Vec<String>>,
}

/// Recurring job definition
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub name: String,
    pub job_type: JobType,
    pub cron_expression: String,
    pub payload: Value,
    pub priority: JobPriority,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Submission spec for a new job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub job_type: JobType,
    pub priority: JobPriority,
    pub payload: Value,
    pub max_retries: Option<u32>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(job_type: JobType, payload: Value) -> Self {
        Self {
            job_type,
            priority: JobPriority::default(),
            payload,
            max_retries: None,
            scheduled_for: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }
}

/// Filters for listing jobs
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub priority: Option<JobPriority>,
    pub job_type: Option<JobType>,
    pub limit: i64,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_priority_mappings() {
        assert_eq!(JobPriority::High.queue_name(), "jobs.high");
        assert_eq!(JobPriority::Medium.queue_name(), "jobs.medium");
        assert_eq!(JobPriority::Low.queue_name(), "jobs.low");

        assert_eq!(JobPriority::High.broker_priority(), 10);
        assert_eq!(JobPriority::Medium.broker_priority(), 5);
        assert_eq!(JobPriority::Low.broker_priority(), 1);

        assert_eq!(
            JobPriority::Medium.delayed_queue_name(),
            "jobs.medium.delayed"
        );
    }

    #[test]
    fn test_status_predicates() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Retrying.is_terminal());

        assert!(JobStatus::Pending.can_cancel());
        assert!(JobStatus::Retrying.can_cancel());
        assert!(!JobStatus::Running.can_cancel());
        assert!(!JobStatus::Completed.can_cancel());

        assert!(JobStatus::Pending.can_claim());
        assert!(JobStatus::Retrying.can_claim());
        assert!(!JobStatus::Failed.can_claim());

        assert!(JobStatus::Running.can_record_failure());
        assert!(!JobStatus::Cancelled.can_record_failure());
    }

    #[test]
    fn test_job_type_round_trip() {
        for job_type in JobType::ALL {
            let parsed = JobType::from_str(job_type.as_str()).unwrap();
            assert_eq!(parsed, job_type);
        }

        assert!(JobType::from_str("mine_bitcoin").is_err());
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_string(&JobType::SendEmail).unwrap();
        assert_eq!(json, "\"send_email\"");

        let json = serde_json::to_string(&JobStatus::Retrying).unwrap();
        assert_eq!(json, "\"retrying\"");

        let priority: JobPriority = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(priority, JobPriority::High);
    }

    #[test]
    fn test_new_job_builder() {
        let job = NewJob::new(JobType::SendEmail, serde_json::json!({"to": "a@b"}))
            .with_priority(JobPriority::High)
            .with_max_retries(5);

        assert_eq!(job.priority, JobPriority::High);
        assert_eq!(job.max_retries, Some(5));
        assert!(job.scheduled_for.is_none());
    }
}
