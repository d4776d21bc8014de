//! Cron scheduler: materializes recurring definitions into queued jobs
//! and advances their next-fire times.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::broker::{Broker, JobMessage};
use crate::models::ScheduledJob;
use crate::store::JobStore;
use crate::{Error, Result};

/// Parse a cron expression. Standard 5-field expressions are accepted
/// and normalized to the 6-field form the parser expects (seconds
/// pinned to zero).
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let fields = expression.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    };

    Schedule::from_str(&normalized)
        .map_err(|e| Error::validation(format!("Invalid cron expression: {}", e)))
}

/// Validate a cron expression without keeping the schedule
pub fn validate_cron(expression: &str) -> Result<()> {
    parse_cron(expression).map(|_| ())
}

/// Smallest instant strictly after `after` matching `expression`.
/// Computing from the current time is also what collapses fires missed
/// during an outage into a single catch-up fire.
pub fn cron_next(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = parse_cron(expression)?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| Error::validation("Cron expression has no future fire time"))
}

/// Single-process scheduler loop. Safe to run more than once only
/// because each fire is guarded by a compare-and-set on `next_run_at`.
pub struct CronScheduler {
    store: JobStore,
    broker: Broker,
    poll_interval: Duration,
}

impl CronScheduler {
    pub fn new(store: JobStore, broker: Broker, poll_interval: Duration) -> Self {
        Self {
            store,
            broker,
            poll_interval,
        }
    }

    /// Run until the process is shut down
    pub async fn run(&self) {
        info!(
            "Scheduler running (poll interval {:?})",
            self.poll_interval
        );

        loop {
            match self.tick(Utc::now()).await {
                Ok(0) => debug!("No scheduled jobs due"),
                Ok(fired) => info!("Scheduler fired {} jobs", fired),
                Err(e) => error!("Scheduler tick failed: {}", e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One poll: fire every due definition. Each row commits on its
    /// own, so one bad definition does not block the rest.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.store.due_scheduled_jobs(now).await?;

        let mut fired = 0;
        for definition in due {
            match self.fire(&definition, now).await {
                Ok(true) => fired += 1,
                Ok(false) => {
                    debug!(
                        "Scheduled job {} already advanced by another instance",
                        definition.name
                    );
                }
                Err(e) => {
                    error!("Failed to fire scheduled job {}: {}", definition.name, e);
                }
            }
        }

        Ok(fired)
    }

    async fn fire(&self, definition: &ScheduledJob, now: DateTime<Utc>) -> Result<bool> {
        let next_run_at = cron_next(&definition.cron_expression, now)?;

        let Some(job) = self
            .store
            .materialize_scheduled_fire(definition, now, next_run_at)
            .await?
        else {
            return Ok(false);
        };

        self.broker
            .publish_job(
                &JobMessage::for_job(&job),
                job.priority,
                Duration::ZERO,
            )
            .await?;

        info!(
            "Scheduled job {} fired as job {}; next run at {}",
            definition.name, job.id, next_run_at
        );

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_five_field_expressions_are_accepted() {
        assert!(validate_cron("0 2 * * *").is_ok());
        assert!(validate_cron("*/5 * * * *").is_ok());
        assert!(validate_cron("30 4 1 * *").is_ok());
    }

    #[test]
    fn test_invalid_expressions_are_rejected() {
        assert!(validate_cron("not a cron").is_err());
        assert!(validate_cron("99 * * * *").is_err());
        assert!(validate_cron("").is_err());
    }

    #[test]
    fn test_next_fire_is_strictly_after() {
        let at_fire = Utc.with_ymd_and_hms(2026, 1, 15, 2, 0, 0).unwrap();
        let next = cron_next("0 2 * * *", at_fire).unwrap();

        assert!(next > at_fire);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 16, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_nightly_fire_advances_a_day() {
        // Defined at 01:30, the first fire is 02:00; advancing from a
        // tick at 02:00:30 lands on the next day's 02:00
        let defined_at = Utc.with_ymd_and_hms(2026, 1, 15, 1, 30, 0).unwrap();
        let first = cron_next("0 2 * * *", defined_at).unwrap();
        assert_eq!(first, Utc.with_ymd_and_hms(2026, 1, 15, 2, 0, 0).unwrap());

        let tick = Utc.with_ymd_and_hms(2026, 1, 15, 2, 0, 30).unwrap();
        let next = cron_next("0 2 * * *", tick).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 16, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_outage_collapses_missed_fires() {
        // Hourly schedule, six hours of downtime: the next fire is
        // computed from now, so the five missed occurrences are not
        // backfilled
        let resumed = Utc.with_ymd_and_hms(2026, 1, 15, 9, 20, 0).unwrap();
        let next = cron_next("0 * * * *", resumed).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_every_five_minutes() {
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 12, 3, 0).unwrap();
        let next = cron_next("*/5 * * * *", now).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 15, 12, 5, 0).unwrap());
    }
}
