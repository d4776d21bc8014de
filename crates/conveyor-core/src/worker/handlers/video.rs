//! Video processing handler (simulated transcode).

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use super::{require_fields, JobHandler};
use crate::{Error, Result};

const CHUNKS: u32 = 5;

/// Simulated transcode that reports progress in chunks. The payload may
/// carry `duration` (total simulated seconds, default 10) and
/// `failure_rate` for exercising retries.
#[derive(Debug, Default)]
pub struct VideoHandler;

impl VideoHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for VideoHandler {
    async fn execute(&self, payload: &Value) -> Result<Value> {
        require_fields(payload, &["video_url", "output_format"])?;

        let video_url = payload["video_url"].as_str().unwrap_or_default().to_string();
        let output_format = payload["output_format"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let duration = payload
            .get("duration")
            .and_then(Value::as_f64)
            .unwrap_or(10.0)
            .max(0.0);
        let failure_rate = payload
            .get("failure_rate")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        info!(
            "Processing video from {} to format {}",
            video_url, output_format
        );

        let chunk_sleep = Duration::from_secs_f64(duration / CHUNKS as f64);
        for chunk in 1..=CHUNKS {
            if rand::random::<f64>() < failure_rate {
                return Err(Error::Other(format!(
                    "Video processing failed at {}%: Codec error",
                    chunk * 20
                )));
            }

            tokio::time::sleep(chunk_sleep).await;
            info!("Video processing progress: {}%", chunk * 20);
        }

        let file_name = video_url.rsplit('/').next().unwrap_or(&video_url);

        Ok(json!({
            "status": "processed",
            "video_url": video_url,
            "output_format": output_format,
            "output_url": format!("https://cdn.example.com/processed/{}", file_name),
            "processed_at": chrono::Utc::now(),
        }))
    }
}
