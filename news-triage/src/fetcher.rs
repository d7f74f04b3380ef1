use crate::types::{Result, TriageError};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "news-triage/0.1".to_string(),
            timeout: Duration::from_secs(30),
            max_feed_size_mb: 10,
            max_redirects: 5,
        }
    }
}

/// Downloads feed documents over HTTP.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    /// GET the document at `url` and return its body. Non-2xx responses and
    /// oversized bodies are errors.
    pub async fn fetch_document(&self, url: &str) -> Result<String> {
        let start_time = Instant::now();
        debug!("Fetching feed: {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(TriageError::Fetch(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let limit_bytes = self.config.max_feed_size_mb * 1024 * 1024;
        if let Some(content_length) = response.content_length() {
            if content_length as usize > limit_bytes {
                return Err(TriageError::Fetch(format!(
                    "Feed too large: {} bytes (limit {}MB)",
                    content_length, self.config.max_feed_size_mb
                )));
            }
        }

        let content = response.text().await?;
        if content.len() > limit_bytes {
            return Err(TriageError::Fetch(format!(
                "Feed too large: {} bytes (limit {}MB)",
                content.len(),
                self.config.max_feed_size_mb
            )));
        }

        info!(
            "Fetched feed: {} ({} bytes in {}ms)",
            url,
            content.len(),
            start_time.elapsed().as_millis()
        );
        Ok(content)
    }
}
