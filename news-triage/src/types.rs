use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::text;

/// Character budget for the summary sent to the classifier.
pub const SUMMARY_CHAR_BUDGET: usize = 800;

/// One candidate entry from a single feed poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Dedup key. Never empty.
    pub guid: String,
    pub title: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
    pub summary: String,
}

impl FeedItem {
    pub fn context(&self) -> ItemContext {
        ItemContext::from(self)
    }
}

/// The fields of a `FeedItem` that the classifier sees.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemContext {
    pub title: String,
    pub link: String,
    pub published_at: DateTime<Utc>,
    pub summary: String,
}

impl From<&FeedItem> for ItemContext {
    fn from(item: &FeedItem) -> Self {
        let summary = text::strip_html(&item.summary);
        Self {
            title: item.title.clone(),
            link: item.link.clone(),
            published_at: item.published_at,
            summary: text::truncate_chars(&summary, SUMMARY_CHAR_BUDGET),
        }
    }
}

/// Structured judgement about one item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub relevant: bool,
    pub category: String,
    pub reason: String,
    pub tags: Vec<String>,
}

/// A finalized row in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: String,
    pub relevant: bool,
    pub category: String,
    pub reason: String,
    pub tags: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Per-cycle counters, logged when a cycle finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub already_known: usize,
    pub lookup_failures: usize,
    pub classified: usize,
    pub classification_failures: usize,
    pub persisted: usize,
    pub persistence_failures: usize,
    pub relevant: usize,
    pub notifications_dispatched: usize,
    /// Set when the feed could not be fetched at all.
    pub fetch_failed: bool,
    /// Set when shutdown stopped the cycle before every item was visited.
    pub interrupted: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed fetch failed: {0}")]
    Fetch(String),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Classifier disabled: no model credential configured")]
    ClassifierDisabled,

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Malformed verdict: {reason} (content: {content:?})")]
    MalformedVerdict { reason: String, content: String },

    #[error("Notification failed: {0}")]
    Notify(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TriageError>;
