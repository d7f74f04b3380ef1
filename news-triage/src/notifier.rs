use crate::traits::Notifier;
use crate::types::{FeedItem, Result, TriageError, Verdict};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Human-readable alert body for one relevant item.
pub fn render_message(item: &FeedItem, verdict: &Verdict) -> String {
    let mut message = format!(
        "{}\nCategory: {}\nAnalysis: {}\nLink: {}",
        item.title, verdict.category, verdict.reason, item.link
    );
    if !verdict.tags.is_empty() {
        message.push_str(&format!("\nTags: {}", verdict.tags.join(", ")));
    }
    message
}

/// Pick the webhook notifier when a URL is configured, otherwise log only.
pub fn notifier_from_url(webhook_url: Option<&str>) -> Result<Arc<dyn Notifier>> {
    match webhook_url {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(url)?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

/// Posts a text message to a chat-robot webhook
/// (`{"msgtype": "text", "text": {"content": ...}}`).
pub struct WebhookNotifier {
    url: String,
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            url: url.to_string(),
            http,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn notifier_name(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(parsed) => format!("webhook ({})", parsed.host_str().unwrap_or("unknown")),
            Err(_) => "webhook".to_string(),
        }
    }

    async fn send(&self, item: &FeedItem, verdict: &Verdict) -> Result<()> {
        let payload = json!({
            "msgtype": "text",
            "text": { "content": render_message(item, verdict) },
        });

        let response = self.http.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TriageError::Notify(format!(
                "webhook returned non-2xx status: {}",
                status
            )));
        }

        debug!(guid = %item.guid, "webhook delivered");
        Ok(())
    }
}

/// Writes the alert to the log. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn notifier_name(&self) -> String {
        "log".to_string()
    }

    async fn send(&self, item: &FeedItem, verdict: &Verdict) -> Result<()> {
        info!(guid = %item.guid, "relevant item:\n{}", render_message(item, verdict));
        Ok(())
    }
}
