// Deterministic stand-ins for the pipeline's collaborators
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use news_triage::{
    Classifier, FeedItem, FeedSource, ItemContext, Ledger, MemoryLedger, Notifier,
    PersistedRecord, Result, TriageError, Verdict,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

pub fn ts(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

pub fn item(guid: &str, title: &str, published: DateTime<Utc>) -> FeedItem {
    FeedItem {
        guid: guid.to_string(),
        title: title.to_string(),
        link: format!("https://example.com/newsletter/{}", guid),
        published_at: published,
        summary: format!("Summary of {}", title),
    }
}

pub fn relevant(category: &str, tags: &[&str]) -> Verdict {
    Verdict {
        relevant: true,
        category: category.to_string(),
        reason: format!("{} matters", category),
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

pub fn not_relevant() -> Verdict {
    Verdict {
        relevant: false,
        category: String::new(),
        reason: "noise".to_string(),
        tags: Vec::new(),
    }
}

/// Returns the same items on every fetch, or fails every fetch.
pub struct StaticSource {
    items: Mutex<Vec<FeedItem>>,
    fail: bool,
    pub fetches: AtomicUsize,
}

impl StaticSource {
    pub fn new(items: Vec<FeedItem>) -> Self {
        Self {
            items: Mutex::new(items),
            fail: false,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            fail: true,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_items(&self, items: Vec<FeedItem>) {
        *self.items.lock().unwrap() = items;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for StaticSource {
    fn source_name(&self) -> String {
        "static".to_string()
    }

    async fn fetch(&self) -> Result<Vec<FeedItem>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TriageError::Fetch("HTTP 503: Service Unavailable".to_string()));
        }
        Ok(self.items.lock().unwrap().clone())
    }
}

/// Answers by title. Titles in `failing` raise an error; unknown titles are
/// classified as not relevant.
#[derive(Default)]
pub struct ScriptedClassifier {
    verdicts: HashMap<String, Verdict>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    // flipped to true after the first evaluation when set
    stop_after_first: Option<Arc<watch::Sender<bool>>>,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verdict(mut self, title: &str, verdict: Verdict) -> Self {
        self.verdicts.insert(title.to_string(), verdict);
        self
    }

    pub fn failing_on(self, title: &str) -> Self {
        self.failing.lock().unwrap().insert(title.to_string());
        self
    }

    pub fn recover(&self, title: &str) {
        self.failing.lock().unwrap().remove(title);
    }

    pub fn stopping(mut self, shutdown: Arc<watch::Sender<bool>>) -> Self {
        self.stop_after_first = Some(shutdown);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, title: &str) -> usize {
        self.calls().iter().filter(|t| t.as_str() == title).count()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    fn ready(&self) -> bool {
        true
    }

    async fn evaluate(&self, context: &ItemContext) -> Result<Verdict> {
        self.calls.lock().unwrap().push(context.title.clone());
        if let Some(shutdown) = &self.stop_after_first {
            let _ = shutdown.send(true);
        }
        if self.failing.lock().unwrap().contains(&context.title) {
            return Err(TriageError::Classifier("transport reset".to_string()));
        }
        Ok(self
            .verdicts
            .get(&context.title)
            .cloned()
            .unwrap_or_else(not_relevant))
    }
}

/// Records every delivery attempt; optionally fails them all.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn notifier_name(&self) -> String {
        "recording".to_string()
    }

    async fn send(&self, item: &FeedItem, _verdict: &Verdict) -> Result<()> {
        self.sent.lock().unwrap().push(item.guid.clone());
        if self.fail {
            return Err(TriageError::Notify("webhook returned 500".to_string()));
        }
        Ok(())
    }
}

/// MemoryLedger with injectable per-identifier failures.
#[derive(Default)]
pub struct FlakyLedger {
    pub inner: MemoryLedger,
    fail_exists: HashSet<String>,
    fail_upsert: HashSet<String>,
}

impl FlakyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_lookup(mut self, guid: &str) -> Self {
        self.fail_exists.insert(guid.to_string());
        self
    }

    pub fn failing_upsert(mut self, guid: &str) -> Self {
        self.fail_upsert.insert(guid.to_string());
        self
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn exists(&self, guid: &str) -> Result<bool> {
        if self.fail_exists.contains(guid) {
            return Err(TriageError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.exists(guid).await
    }

    async fn upsert(&self, item: &FeedItem, verdict: &Verdict) -> Result<PersistedRecord> {
        if self.fail_upsert.contains(&item.guid) {
            return Err(TriageError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.upsert(item, verdict).await
    }

    async fn list_recent(&self, relevant_only: bool, limit: usize) -> Result<Vec<PersistedRecord>> {
        self.inner.list_recent(relevant_only, limit).await
    }
}
