//! Email sending handler (simulated delivery).

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use super::{require_fields, JobHandler};
use crate::{Error, Result};

/// Simulated SMTP delivery. The optional `failure_rate` payload field
/// (0.0..=1.0) exists to exercise the retry path in test environments.
#[derive(Debug, Default)]
pub struct EmailHandler;

impl EmailHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for EmailHandler {
    async fn execute(&self, payload: &Value) -> Result<Value> {
        require_fields(payload, &["to", "subject", "body"])?;

        let to = payload["to"].as_str().unwrap_or_default().to_string();
        let subject = payload["subject"].as_str().unwrap_or_default().to_string();

        info!("Sending email to {} with subject '{}'", to, subject);

        let failure_rate = payload
            .get("failure_rate")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        if rand::random::<f64>() < failure_rate {
            return Err(Error::Other(format!(
                "Failed to send email to {}: SMTP connection timeout",
                to
            )));
        }

        let millis = 500 + (rand::random::<f64>() * 1500.0) as u64;
        tokio::time::sleep(Duration::from_millis(millis)).await;

        info!("Successfully sent email to {}", to);

        Ok(json!({
            "status": "sent",
            "to": to,
            "subject": subject,
            "sent_at": chrono::Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_rejects_incomplete_payload() {
        let handler = EmailHandler::new();
        let err = handler.execute(&json!({"to": "a@b"})).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_sends_with_full_payload() {
        let handler = EmailHandler::new();
        let result = handler
            .execute(&json!({"to": "a@b", "subject": "s", "body": "x"}))
            .await
            .unwrap();

        assert_eq!(result["status"], "sent");
        assert_eq!(result["to"], "a@b");
    }

    #[tokio::test]
    async fn test_certain_failure_rate_always_fails() {
        let handler = EmailHandler::new();
        let err = handler
            .execute(&json!({
                "to": "a@b", "subject": "s", "body": "x", "failure_rate": 1.0
            }))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("SMTP"));
    }
}
