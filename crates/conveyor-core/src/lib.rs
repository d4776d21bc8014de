//! Conveyor core: job lifecycle store, retry controller, broker and
//! cache adapters, cron scheduler, and the worker runtime.

pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod worker;

// Re-export commonly used types
pub use broker::{Broker, JobMessage, DEAD_LETTER_EXCHANGE, DEAD_LETTER_QUEUE};
pub use cache::StatusCache;
pub use config::Settings;
pub use error::{Error, Result};
pub use models::{
    DeadLetter, Job, JobFilter, JobId, JobPriority, JobStatus, JobType, NewJob, RetryAttempt,
    ScheduledJob,
};
pub use retry::{Decision, RetryPolicy};
pub use scheduler::{cron_next, validate_cron, CronScheduler};
pub use store::{
    create_pool, FailureReport, JobStats, JobStore, Migrator, NewScheduledJob, QueueBreakdown,
};
pub use worker::{HandlerRegistry, JobHandler, WorkerRuntime};

/// Current version of conveyor
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
    }
}
