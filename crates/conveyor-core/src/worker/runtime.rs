//! Worker runtime: pulls messages from the priority queues, drives the
//! job state machine, and feeds failures to the retry decision.

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::broker::{Broker, JobMessage};
use crate::cache::StatusCache;
use crate::models::{JobPriority, JobStatus};
use crate::retry::Decision;
use crate::store::{FailureReport, JobStore};
use crate::worker::handlers::HandlerRegistry;
use crate::{Error, Result};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Per-process execution counters
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub processed: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub dropped: AtomicU64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.processed.load(Ordering::Relaxed),
            self.succeeded.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
        )
    }
}

/// Shared state handed to every in-flight delivery
#[derive(Clone)]
struct WorkerContext {
    store: JobStore,
    broker: Broker,
    cache: StatusCache,
    registry: Arc<HandlerRegistry>,
    worker_id: Arc<String>,
    slots: Arc<Semaphore>,
    stats: Arc<WorkerStats>,
}

/// Runtime for one worker process
pub struct WorkerRuntime {
    context: WorkerContext,
    prefetch: u16,
}

impl WorkerRuntime {
    pub fn new(
        store: JobStore,
        broker: Broker,
        cache: StatusCache,
        registry: HandlerRegistry,
        worker_id: String,
        concurrency: usize,
        prefetch: u16,
    ) -> Self {
        Self {
            context: WorkerContext {
                store,
                broker,
                cache,
                registry: Arc::new(registry),
                worker_id: Arc::new(worker_id),
                slots: Arc::new(Semaphore::new(concurrency.max(1))),
                stats: Arc::new(WorkerStats::default()),
            },
            prefetch,
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.context.stats.clone()
    }

    /// Consume all three priority bands until shutdown
    pub async fn run(&self) -> Result<()> {
        info!("Worker {} starting", self.context.worker_id);

        self.spawn_heartbeat();

        let mut loops = Vec::new();
        for priority in JobPriority::ALL {
            let consumer_tag = format!("{}-{}", self.context.worker_id, priority);
            let consumer = self
                .context
                .broker
                .consume(priority.queue_name(), &consumer_tag, self.prefetch)
                .await?;

            let context = self.context.clone();
            loops.push(tokio::spawn(async move {
                consume_loop(context, consumer).await;
            }));
        }

        for task in loops {
            let _ = task.await;
        }

        info!("Worker {} stopped", self.context.worker_id);

        Ok(())
    }

    fn spawn_heartbeat(&self) {
        let cache = self.context.cache.clone();
        let worker_id = self.context.worker_id.clone();

        tokio::spawn(async move {
            loop {
                if let Err(e) = cache.worker_heartbeat(&worker_id).await {
                    warn!("Failed to send heartbeat: {}", e);
                }
                tokio::time::sleep(HEARTBEAT_INTERVAL).await;
            }
        });
    }
}

async fn consume_loop(context: WorkerContext, mut consumer: lapin::Consumer) {
    while let Some(delivery) = consumer.next().await {
        match delivery {
            Ok(delivery) => {
                let permit = match context.slots.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                let context = context.clone();
                tokio::spawn(async move {
                    process_delivery(&context, delivery).await;
                    drop(permit);
                });
            }
            Err(e) => {
                error!("Consumer error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// One message end to end: parse, claim, execute, settle.
async fn process_delivery(context: &WorkerContext, delivery: Delivery) {
    let message: JobMessage = match serde_json::from_slice(&delivery.data) {
        Ok(message) => message,
        Err(e) => {
            warn!("Dropping poison message: {}", e);
            let _ = context.cache.increment_counter("poison_messages").await;
            nack_no_requeue(&delivery).await;
            return;
        }
    };

    context.stats.processed.fetch_add(1, Ordering::Relaxed);

    match handle_message(context, &message).await {
        Ok(()) => {
            ack(&delivery).await;
        }
        Err(e) => {
            // No committed outcome; duplicate delivery is safe because
            // the state machine rejects illegal transitions
            error!(
                "Job {} did not reach a committed outcome: {}",
                message.job_id, e
            );
            context.stats.failed.fetch_add(1, Ordering::Relaxed);
            nack_no_requeue(&delivery).await;
        }
    }
}

async fn handle_message(context: &WorkerContext, message: &JobMessage) -> Result<()> {
    let Some(handler) = context.registry.get(message.job_type) else {
        // Unresolvable handler is a normal failure: the retry decision
        // will dead-letter it once retries run out
        let report = FailureReport::new(format!(
            "No handler registered for job type {}",
            message.job_type
        ));
        return settle_failure(context, message, report).await;
    };

    let job = match context
        .store
        .claim_running(message.job_id, &context.worker_id)
        .await
    {
        Ok(job) => job,
        Err(Error::NotFound(_)) | Err(Error::InvalidTransition { .. }) => {
            info!(
                "Dropping stale message for job {} (cancelled, finished, or claimed elsewhere)",
                message.job_id
            );
            context.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let _ = context.cache.set_job_status(job.id, JobStatus::Running).await;

    info!(
        "Worker {} executing job {} ({}), attempt {}/{}",
        context.worker_id,
        job.id,
        job.job_type,
        job.retry_count + 1,
        job.max_retries + 1
    );

    match handler.execute(&message.payload).await {
        Ok(_result) => {
            context.store.mark_completed(job.id).await?;
            let _ = context
                .cache
                .set_job_status(job.id, JobStatus::Completed)
                .await;
            context.stats.succeeded.fetch_add(1, Ordering::Relaxed);

            info!("Job {} completed", job.id);
            Ok(())
        }
        Err(e) => {
            let report =
                FailureReport::new(e.to_string()).with_traceback(format!("{:?}", e));
            settle_failure(context, message, report).await
        }
    }
}

/// Record a failure and act on the decision: republish with the backoff
/// delay, or leave the job failed with its dead letter.
async fn settle_failure(
    context: &WorkerContext,
    message: &JobMessage,
    report: FailureReport,
) -> Result<()> {
    let decision = match context.store.record_failure(message.job_id, report).await {
        Ok(decision) => decision,
        Err(Error::NotFound(_)) | Err(Error::InvalidTransition { .. }) => {
            info!("Dropping failure report for job {}", message.job_id);
            context.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    context.stats.failed.fetch_add(1, Ordering::Relaxed);

    match decision {
        Decision::Retry {
            next_retry_at,
            delay,
        } => {
            let _ = context
                .cache
                .set_job_status(message.job_id, JobStatus::Retrying)
                .await;

            let priority = context.store.get_job(message.job_id).await?.priority;
            context
                .broker
                .publish_job(message, priority, delay)
                .await?;

            info!(
                "Job {} scheduled for retry at {} (in {:?})",
                message.job_id, next_retry_at, delay
            );
        }
        Decision::DeadLetter { dead_letter_id } => {
            let _ = context
                .cache
                .set_job_status(message.job_id, JobStatus::Failed)
                .await;

            warn!(
                "Job {} exhausted retries; dead letter {}",
                message.job_id, dead_letter_id
            );
        }
    }

    Ok(())
}

async fn ack(delivery: &Delivery) {
    if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
        error!("Failed to ack delivery: {}", e);
    }
}

async fn nack_no_requeue(delivery: &Delivery) {
    let options = BasicNackOptions {
        requeue: false,
        ..Default::default()
    };
    if let Err(e) = delivery.acker.nack(options).await {
        error!("Failed to nack delivery: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let stats = WorkerStats::default();
        stats.processed.fetch_add(3, Ordering::Relaxed);
        stats.succeeded.fetch_add(2, Ordering::Relaxed);
        stats.failed.fetch_add(1, Ordering::Relaxed);

        assert_eq!(stats.snapshot(), (3, 2, 1, 0));
    }
}
