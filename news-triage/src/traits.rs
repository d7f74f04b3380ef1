use crate::types::{FeedItem, ItemContext, PersistedRecord, Result, Verdict};
use async_trait::async_trait;

/// Source of candidate items for one cycle.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Human-readable name for this source
    fn source_name(&self) -> String;

    /// Fetch every usable item currently in the feed. A failure covers the
    /// whole fetch; no partial list is returned.
    async fn fetch(&self) -> Result<Vec<FeedItem>>;
}

/// Persistent record of processed identifiers and their verdicts.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Whether a record for `guid` exists. Reflects every prior successful upsert.
    async fn exists(&self, guid: &str) -> Result<bool>;

    /// Insert or replace the record keyed by `item.guid`. Replacing refreshes
    /// `last_updated` and keeps `first_seen`.
    async fn upsert(&self, item: &FeedItem, verdict: &Verdict) -> Result<PersistedRecord>;

    /// Records ordered by published time descending, then by insertion
    /// descending, at most `limit` of them.
    async fn list_recent(&self, relevant_only: bool, limit: usize) -> Result<Vec<PersistedRecord>>;
}

/// Relevance classification capability.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// True only when a usable credential is configured
    fn ready(&self) -> bool;

    /// Classify one item. A response that cannot be turned into a `Verdict`
    /// is an error, never a default verdict.
    async fn evaluate(&self, context: &ItemContext) -> Result<Verdict>;
}

/// Best-effort alert delivery for relevant items.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn notifier_name(&self) -> String;

    async fn send(&self, item: &FeedItem, verdict: &Verdict) -> Result<()>;
}
