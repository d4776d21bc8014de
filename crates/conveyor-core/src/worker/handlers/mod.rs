//! Job handlers: opaque user code invoked by the worker runtime.
//!
//! Handlers receive the job payload and either return a result document
//! or fail; retry bookkeeping happens entirely outside the handler.

pub mod email;
pub mod scraper;
pub mod video;

pub use email::EmailHandler;
pub use scraper::ScrapeHandler;
pub use video::VideoHandler;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::JobType;
use crate::{Error, Result};

/// Handler contract. Implementations may block on I/O for seconds to an
/// hour; there is no built-in timeout.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, payload: &Value) -> Result<Value>;
}

/// Build-time registry mapping job types to their handlers
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all built-in handlers
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(JobType::SendEmail, Arc::new(EmailHandler::new()));
        registry.register(JobType::ProcessVideo, Arc::new(VideoHandler::new()));
        registry.register(JobType::ScrapeWebsite, Arc::new(ScrapeHandler::new()));
        registry
    }

    pub fn register(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type, handler);
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }
}

/// Reject payloads missing required fields
pub fn require_fields(payload: &Value, required: &[&str]) -> Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .filter(|field| payload.get(**field).is_none())
        .copied()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_registry_covers_all_types() {
        let registry = HandlerRegistry::builtin();
        for job_type in JobType::ALL {
            assert!(registry.get(job_type).is_some(), "missing {}", job_type);
        }
    }

    #[test]
    fn test_require_fields_lists_missing() {
        let payload = json!({"to": "a@b"});

        let err = require_fields(&payload, &["to", "subject", "body"]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("subject"));
        assert!(message.contains("body"));
        assert!(!message.contains("to,"));

        assert!(require_fields(&payload, &["to"]).is_ok());
    }
}
