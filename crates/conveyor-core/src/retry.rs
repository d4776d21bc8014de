//! Retry policy: per-type backoff configuration and the
//! retry-or-dead-letter decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::Settings;
use crate::models::JobType;

/// Outcome of a recorded failure, derived inside the store transaction
/// so concurrent failure reports cannot both decide on stale counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Republish to the priority queue after the backoff delay
    Retry {
        next_retry_at: DateTime<Utc>,
        delay: Duration,
    },

    /// Retries exhausted; the job is failed and quarantined
    DeadLetter { dead_letter_id: Uuid },
}

impl Decision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Decision::Retry { .. })
    }
}

/// Backoff configuration for one job type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; a job runs at most
    /// `max_retries + 1` times
    pub max_retries: u32,

    /// Base delay in seconds for the first retry
    pub base_delay: u64,

    /// Delay ceiling in seconds, applied after jitter
    pub max_delay: u64,
}

impl RetryPolicy {
    /// Policy table by job type
    pub fn for_type(job_type: JobType) -> Self {
        match job_type {
            JobType::SendEmail => Self {
                max_retries: 3,
                base_delay: 2,
                max_delay: 300,
            },
            JobType::ProcessVideo => Self {
                max_retries: 5,
                base_delay: 5,
                max_delay: 3600,
            },
            JobType::ScrapeWebsite => Self {
                max_retries: 3,
                base_delay: 10,
                max_delay: 600,
            },
        }
    }

    /// Fallback policy from process settings
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.default_max_retries,
            base_delay: settings.default_retry_base_delay,
            max_delay: settings.default_retry_max_delay,
        }
    }

    /// Resolve the policy for a job: the type table supplies delays,
    /// the job's own `max_retries` overrides the ceiling.
    pub fn for_job(job_type: JobType, max_retries_override: Option<u32>) -> Self {
        let mut policy = Self::for_type(job_type);
        if let Some(max_retries) = max_retries_override {
            policy.max_retries = max_retries;
        }
        policy
    }

    /// Whether a job whose post-failure count is `retry_count` gets
    /// another attempt. `retry_count = max_retries + 1` is the final
    /// observed failure and dead-letters.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count <= self.max_retries
    }

    /// Backoff before retrying the attempt numbered `attempt` (1-based,
    /// the attempt that just failed), with ±20% uniform jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        use rand::Rng;
        let unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.backoff_delay_with_jitter(attempt, unit)
    }

    /// Deterministic variant: `jitter_unit` is the draw from U(-1, +1).
    pub fn backoff_delay_with_jitter(&self, attempt: u32, jitter_unit: f64) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let raw = self.base_delay as f64 * 2f64.powi(exponent as i32);
        let jitter = raw * 0.2 * jitter_unit;

        // Clamp after jitter, floor to whole seconds, never negative
        let delay = (raw + jitter).min(self.max_delay as f64).max(0.0);

        Duration::from_secs(delay as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table() {
        let email = RetryPolicy::for_type(JobType::SendEmail);
        assert_eq!((email.max_retries, email.base_delay, email.max_delay), (3, 2, 300));

        let video = RetryPolicy::for_type(JobType::ProcessVideo);
        assert_eq!((video.max_retries, video.base_delay, video.max_delay), (5, 5, 3600));

        let scrape = RetryPolicy::for_type(JobType::ScrapeWebsite);
        assert_eq!((scrape.max_retries, scrape.base_delay, scrape.max_delay), (3, 10, 600));
    }

    #[test]
    fn test_job_override_replaces_ceiling_only() {
        let policy = RetryPolicy::for_job(JobType::SendEmail, Some(7));
        assert_eq!(policy.max_retries, 7);
        assert_eq!(policy.base_delay, 2);
        assert_eq!(policy.max_delay, 300);

        let policy = RetryPolicy::for_job(JobType::SendEmail, None);
        assert_eq!(policy.max_retries, 3);
    }

    #[test]
    fn test_delay_doubles_without_jitter() {
        let policy = RetryPolicy::for_type(JobType::SendEmail);

        assert_eq!(policy.backoff_delay_with_jitter(1, 0.0), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay_with_jitter(2, 0.0), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay_with_jitter(3, 0.0), Duration::from_secs(8));
        assert_eq!(policy.backoff_delay_with_jitter(4, 0.0), Duration::from_secs(16));
    }

    #[test]
    fn test_delay_clamped_after_jitter() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: 2,
            max_delay: 300,
        };

        // 2 * 2^9 = 1024s raw; even with maximal negative jitter (819.2s)
        // the cap still applies
        assert_eq!(policy.backoff_delay_with_jitter(10, 1.0), Duration::from_secs(300));
        assert_eq!(policy.backoff_delay_with_jitter(10, -1.0), Duration::from_secs(300));
    }

    #[test]
    fn test_jitter_stays_within_twenty_percent() {
        let policy = RetryPolicy::for_type(JobType::ScrapeWebsite);

        for _ in 0..200 {
            let delay = policy.backoff_delay(2).as_secs();
            // raw = 20s, jitter band = [16, 24]
            assert!((16..=24).contains(&delay), "delay {} out of band", delay);
        }
    }

    #[test]
    fn test_delay_never_negative() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: 0,
            max_delay: 10,
        };

        assert_eq!(policy.backoff_delay_with_jitter(1, -1.0), Duration::from_secs(0));
    }

    #[test]
    fn test_retry_boundary_allows_max_retries_plus_one_runs() {
        let policy = RetryPolicy::for_job(JobType::SendEmail, Some(3));

        // Failures 1..=3 retry; the 4th observed failure dead-letters,
        // so the job runs at most 4 times
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_zero_max_retries_dead_letters_first_failure() {
        let policy = RetryPolicy::for_job(JobType::SendEmail, Some(0));
        assert!(!policy.should_retry(1));
    }
}
