//! Website scraping handler.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use super::{require_fields, JobHandler};
use crate::{Error, Result};

const USER_AGENT: &str = "conveyor-scraper/1.0";

/// Fetches a page and extracts its title.
#[derive(Debug)]
pub struct ScrapeHandler {
    client: reqwest::Client,
}

impl ScrapeHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ScrapeHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for ScrapeHandler {
    async fn execute(&self, payload: &Value) -> Result<Value> {
        require_fields(payload, &["url"])?;

        let url = payload["url"].as_str().unwrap_or_default().to_string();
        let timeout = payload
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(10);

        info!("Scraping website: {}", url);

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(timeout))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| Error::Other(format!("Failed to scrape {}: {}", url, e)))?;

        let status_code = response.status();
        if !status_code.is_success() {
            return Err(Error::Other(format!(
                "Failed to scrape {}: HTTP {}",
                url, status_code
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Other(format!("Failed to scrape {}: {}", url, e)))?;

        let title = extract_title(&body).unwrap_or_else(|| "No title found".to_string());

        info!("Successfully scraped {}", url);

        Ok(json!({
            "status": "scraped",
            "url": url,
            "data": title,
            "status_code": status_code.as_u16(),
            "scraped_at": chrono::Utc::now(),
        }))
    }
}

fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_lowercase();
    let open = lower.find("<title")?;
    let open_end = lower[open..].find('>')? + open + 1;
    let close = lower[open_end..].find("</title>")? + open_end;

    let title = html[open_end..close].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_rejects_missing_url() {
        let handler = ScrapeHandler::new();
        let err = handler.execute(&json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_extract_title() {
        let html = "<html><head><TITLE>Example Domain</TITLE></head></html>";
        assert_eq!(extract_title(html).as_deref(), Some("Example Domain"));

        let html = r#"<title lang="en"> padded </title>"#;
        assert_eq!(extract_title(html).as_deref(), Some("padded"));

        assert_eq!(extract_title("<html><body>nope</body></html>"), None);
        assert_eq!(extract_title("<title></title>"), None);
    }
}
