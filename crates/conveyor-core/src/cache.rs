//! Status cache: short-TTL job status mirror and worker liveness keys.
//!
//! Last-writer-wins and advisory only; nothing here is consulted for
//! correctness decisions.

use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::{JobId, JobStatus};
use crate::Result;

/// TTL for mirrored job status entries
const STATUS_TTL_SECS: u64 = 3600;

/// TTL for worker liveness keys; workers refresh at least every 30s
const HEARTBEAT_TTL_SECS: u64 = 60;

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Redis-backed status cache
#[derive(Clone)]
pub struct StatusCache {
    manager: ConnectionManager,
}

impl StatusCache {
    /// Connect to Redis with bounded retry
    pub async fn connect(cache_url: &str) -> Result<Self> {
        let client = Client::open(cache_url)
            .map_err(|e| crate::Error::Cache(format!("Invalid cache URL: {}", e)))?;

        let mut attempt = 0;
        let manager = loop {
            attempt += 1;
            match client.get_connection_manager().await {
                Ok(manager) => break manager,
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    warn!(
                        "Cache connection attempt {} failed: {}; retrying",
                        attempt, e
                    );
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        info!("Connected to cache at {}", cache_url);

        Ok(Self { manager })
    }

    /// Mirror a job's status with a short TTL
    pub async fn set_job_status(&self, job_id: JobId, status: JobStatus) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SETEX")
            .arg(Self::status_key(job_id))
            .arg(STATUS_TTL_SECS)
            .arg(status.to_string())
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Cached status {} for job {}", status, job_id);

        Ok(())
    }

    /// Read a mirrored job status, if still cached
    pub async fn get_job_status(&self, job_id: JobId) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let status: Option<String> = redis::cmd("GET")
            .arg(Self::status_key(job_id))
            .query_async(&mut conn)
            .await?;

        Ok(status)
    }

    /// Refresh this worker's liveness key
    pub async fn worker_heartbeat(&self, worker_id: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SETEX")
            .arg(Self::heartbeat_key(worker_id))
            .arg(HEARTBEAT_TTL_SECS)
            .arg("alive")
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    /// Workers with a live heartbeat key
    pub async fn active_workers(&self) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg("worker:*:heartbeat")
            .query_async(&mut conn)
            .await?;

        let workers = keys
            .iter()
            .filter_map(|key| key.split(':').nth(1))
            .map(|id| id.to_string())
            .collect();

        Ok(workers)
    }

    /// Bump a named counter (poison messages, etc.)
    pub async fn increment_counter(&self, name: &str) -> Result<i64> {
        let mut conn = self.manager.clone();
        let value: i64 = redis::cmd("INCR")
            .arg(format!("counters:{}", name))
            .query_async(&mut conn)
            .await?;

        Ok(value)
    }

    fn status_key(job_id: JobId) -> String {
        format!("job:{}:status", job_id)
    }

    fn heartbeat_key(worker_id: &str) -> String {
        format!("worker:{}:heartbeat", worker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    // Cache tests run against CACHE_URL when a Redis instance is
    // reachable and silently skip otherwise.
    async fn test_cache() -> Option<StatusCache> {
        let url = std::env::var("CACHE_URL").ok()?;
        let client = Client::open(url.as_str()).ok()?;
        let manager = tokio::time::timeout(
            Duration::from_secs(2),
            client.get_connection_manager(),
        )
        .await
        .ok()?
        .ok()?;

        Some(StatusCache { manager })
    }

    #[test]
    fn test_key_layout() {
        let id = Uuid::nil();
        assert_eq!(
            StatusCache::status_key(id),
            "job:00000000-0000-0000-0000-000000000000:status"
        );
        assert_eq!(
            StatusCache::heartbeat_key("worker-1"),
            "worker:worker-1:heartbeat"
        );
    }

    #[tokio::test]
    async fn test_status_round_trip() {
        if let Some(cache) = test_cache().await {
            let job_id = Uuid::new_v4();
            cache
                .set_job_status(job_id, JobStatus::Running)
                .await
                .unwrap();

            let status = cache.get_job_status(job_id).await.unwrap();
            assert_eq!(status.as_deref(), Some("running"));
        }
    }

    #[tokio::test]
    async fn test_heartbeat_registers_worker() {
        if let Some(cache) = test_cache().await {
            let worker_id = format!("test-{}", Uuid::new_v4());
            cache.worker_heartbeat(&worker_id).await.unwrap();

            let workers = cache.active_workers().await.unwrap();
            assert!(workers.contains(&worker_id));
        }
    }
}
