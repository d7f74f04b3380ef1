use crate::config::DatabaseConfig;
use crate::traits::Ledger;
use crate::types::{FeedItem, PersistedRecord, Result, Verdict};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Connection, PgConnection, PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

const RECORD_COLUMNS: &str = "guid, title, link, published_at, summary, relevant, category, reason, tags, first_seen, last_updated";

/// Ledger backed by a single Postgres table keyed by `guid`.
pub struct PgLedger {
    db: PgPool,
}

impl PgLedger {
    /// Create the database if needed, connect, and ensure the schema exists.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        ensure_database(config).await?;

        let db = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options(config).database(&config.database))
            .await?;

        let ledger = Self { db };
        ledger.setup_schema().await?;
        info!(
            "Ledger ready on {}:{}/{}",
            config.host, config.port, config.database
        );
        Ok(ledger)
    }

    /// Wrap an existing pool. The caller is responsible for `setup_schema`.
    pub fn from_pool(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn setup_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS news_verdicts (
                id BIGSERIAL PRIMARY KEY,
                guid TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                link TEXT NOT NULL DEFAULT '',
                published_at TIMESTAMPTZ NULL,
                summary TEXT NOT NULL DEFAULT '',
                relevant BOOLEAN NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                reason TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '[]',
                first_seen TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                last_updated TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS news_verdicts_recent_idx
            ON news_verdicts (relevant, published_at DESC, id DESC)
            "#,
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
}

/// Connect to the maintenance database and create the target database if it
/// does not exist yet.
async fn ensure_database(config: &DatabaseConfig) -> Result<()> {
    let mut conn =
        PgConnection::connect_with(&connect_options(config).database("postgres")).await?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(&config.database)
            .fetch_one(&mut conn)
            .await?;

    if !exists {
        // identifiers cannot be bound as parameters
        let statement = format!(
            "CREATE DATABASE \"{}\"",
            config.database.replace('"', "\"\"")
        );
        sqlx::query(&statement).execute(&mut conn).await?;
        info!("Created database {}", config.database);
    }

    conn.close().await?;
    Ok(())
}

fn record_from_row(row: &PgRow) -> Result<PersistedRecord> {
    let raw_tags: String = row.try_get("tags")?;
    let tags = match serde_json::from_str::<Vec<String>>(&raw_tags) {
        Ok(tags) => tags,
        Err(e) => {
            warn!("Ignoring unreadable tags column ({}): {:?}", e, raw_tags);
            Vec::new()
        }
    };

    Ok(PersistedRecord {
        guid: row.try_get("guid")?,
        title: row.try_get("title")?,
        link: row.try_get("link")?,
        published_at: row.try_get("published_at")?,
        summary: row.try_get("summary")?,
        relevant: row.try_get("relevant")?,
        category: row.try_get("category")?,
        reason: row.try_get("reason")?,
        tags,
        first_seen: row.try_get("first_seen")?,
        last_updated: row.try_get("last_updated")?,
    })
}

#[async_trait]
impl Ledger for PgLedger {
    async fn exists(&self, guid: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM news_verdicts WHERE guid = $1 LIMIT 1")
            .bind(guid)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.is_some())
    }

    async fn upsert(&self, item: &FeedItem, verdict: &Verdict) -> Result<PersistedRecord> {
        let tags = serde_json::to_string(&verdict.tags)?;

        // single statement: the row is replaced atomically, first_seen is never
        // part of the update set
        let statement = format!(
            r#"
            INSERT INTO news_verdicts (guid, title, link, published_at, summary, relevant, category, reason, tags)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (guid) DO UPDATE SET
                title = EXCLUDED.title,
                link = EXCLUDED.link,
                published_at = EXCLUDED.published_at,
                summary = EXCLUDED.summary,
                relevant = EXCLUDED.relevant,
                category = EXCLUDED.category,
                reason = EXCLUDED.reason,
                tags = EXCLUDED.tags,
                last_updated = GREATEST(NOW(), news_verdicts.last_updated + INTERVAL '1 microsecond')
            RETURNING {}
            "#,
            RECORD_COLUMNS
        );

        let row = sqlx::query(&statement)
            .bind(&item.guid)
            .bind(&item.title)
            .bind(&item.link)
            .bind(item.published_at)
            .bind(&item.summary)
            .bind(verdict.relevant)
            .bind(&verdict.category)
            .bind(&verdict.reason)
            .bind(tags)
            .fetch_one(&self.db)
            .await?;

        record_from_row(&row)
    }

    async fn list_recent(&self, relevant_only: bool, limit: usize) -> Result<Vec<PersistedRecord>> {
        let statement = format!(
            r#"
            SELECT {}
            FROM news_verdicts
            WHERE relevant OR NOT $1
            ORDER BY published_at DESC NULLS LAST, id DESC
            LIMIT $2
            "#,
            RECORD_COLUMNS
        );

        let rows = sqlx::query(&statement)
            .bind(relevant_only)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(record_from_row).collect()
    }
}

/// In-process ledger with the same contract as `PgLedger`. State is lost on
/// restart.
#[derive(Default)]
pub struct MemoryLedger {
    inner: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_seq: u64,
    // guid -> (insertion sequence, record)
    records: HashMap<String, (u64, PersistedRecord)>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get(&self, guid: &str) -> Option<PersistedRecord> {
        self.inner
            .read()
            .await
            .records
            .get(guid)
            .map(|(_, record)| record.clone())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn exists(&self, guid: &str) -> Result<bool> {
        Ok(self.inner.read().await.records.contains_key(guid))
    }

    async fn upsert(&self, item: &FeedItem, verdict: &Verdict) -> Result<PersistedRecord> {
        let mut state = self.inner.write().await;
        let now = Utc::now();

        let existing = state
            .records
            .get(&item.guid)
            .map(|(seq, record)| (*seq, record.first_seen, record.last_updated));

        let (seq, first_seen, last_updated) = match existing {
            Some((seq, first_seen, previous)) => (seq, first_seen, advance(now, previous)),
            None => {
                state.next_seq += 1;
                (state.next_seq, now, now)
            }
        };

        let record = PersistedRecord {
            guid: item.guid.clone(),
            title: item.title.clone(),
            link: item.link.clone(),
            published_at: Some(item.published_at),
            summary: item.summary.clone(),
            relevant: verdict.relevant,
            category: verdict.category.clone(),
            reason: verdict.reason.clone(),
            tags: verdict.tags.clone(),
            first_seen,
            last_updated,
        };
        state
            .records
            .insert(item.guid.clone(), (seq, record.clone()));
        Ok(record)
    }

    async fn list_recent(&self, relevant_only: bool, limit: usize) -> Result<Vec<PersistedRecord>> {
        let state = self.inner.read().await;
        let mut rows: Vec<&(u64, PersistedRecord)> = state
            .records
            .values()
            .filter(|(_, record)| record.relevant || !relevant_only)
            .collect();

        // published DESC (missing last), then insertion DESC
        rows.sort_by(|(seq_a, a), (seq_b, b)| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| seq_b.cmp(seq_a))
        });

        Ok(rows
            .into_iter()
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

/// Strictly later than `previous`, even when the clock has not moved.
fn advance(now: DateTime<Utc>, previous: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn item(guid: &str, published: DateTime<Utc>) -> FeedItem {
        FeedItem {
            guid: guid.to_string(),
            title: format!("title {}", guid),
            link: format!("https://example.com/newsletter/{}", guid),
            published_at: published,
            summary: String::new(),
        }
    }

    fn verdict(relevant: bool, category: &str) -> Verdict {
        Verdict {
            relevant,
            category: category.to_string(),
            reason: "because".to_string(),
            tags: vec!["X".to_string()],
        }
    }

    #[tokio::test]
    async fn exists_reflects_upserts() {
        let ledger = MemoryLedger::new();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(!ledger.exists("a1").await.unwrap());

        ledger.upsert(&item("a1", t), &verdict(true, "policy")).await.unwrap();
        assert!(ledger.exists("a1").await.unwrap());
        assert!(!ledger.exists("a2").await.unwrap());
    }

    #[tokio::test]
    async fn second_upsert_replaces_fields_and_keeps_first_seen() {
        let ledger = MemoryLedger::new();
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let first = ledger.upsert(&item("a1", t), &verdict(true, "policy")).await.unwrap();
        let second = ledger.upsert(&item("a1", t), &verdict(false, "")).await.unwrap();

        assert_eq!(ledger.len().await, 1);
        assert!(!second.relevant);
        assert_eq!(second.category, "");
        assert_eq!(second.first_seen, first.first_seen);
        assert!(second.last_updated > first.last_updated);
        assert_eq!(ledger.get("a1").await, Some(second));
    }

    #[tokio::test]
    async fn list_recent_orders_by_published_then_insertion() {
        let ledger = MemoryLedger::new();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        ledger.upsert(&item("old", t2), &verdict(true, "a")).await.unwrap();
        ledger.upsert(&item("tie-first", t1), &verdict(true, "a")).await.unwrap();
        ledger.upsert(&item("skip", t1), &verdict(false, "")).await.unwrap();
        ledger.upsert(&item("tie-second", t1), &verdict(true, "a")).await.unwrap();

        let guids: Vec<String> = ledger
            .list_recent(true, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.guid)
            .collect();
        assert_eq!(guids, vec!["tie-second", "tie-first", "old"]);

        assert_eq!(ledger.list_recent(true, 2).await.unwrap().len(), 2);
        assert_eq!(ledger.list_recent(false, 10).await.unwrap().len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_leave_one_consistent_record() {
        let ledger = Arc::new(MemoryLedger::new());
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let first = ledger.upsert(&item("a1", t), &verdict(true, "seed")).await.unwrap();

        let verdicts: Vec<Verdict> = (0..16)
            .map(|n| Verdict {
                relevant: n % 2 == 0,
                category: format!("category-{}", n),
                reason: format!("reason-{}", n),
                tags: vec![format!("tag-{}", n)],
            })
            .collect();

        let mut tasks = tokio::task::JoinSet::new();
        for v in verdicts.clone() {
            let ledger = ledger.clone();
            tasks.spawn(async move { ledger.upsert(&item("a1", t), &v).await });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        assert_eq!(ledger.len().await, 1);
        let stored = ledger.get("a1").await.unwrap();
        assert_eq!(stored.first_seen, first.first_seen);
        assert!(stored.last_updated > first.last_updated);

        // every field comes from the same submitted verdict
        let winner = verdicts
            .iter()
            .find(|v| v.category == stored.category)
            .expect("stored category matches a submitted verdict");
        assert_eq!(stored.relevant, winner.relevant);
        assert_eq!(stored.reason, winner.reason);
        assert_eq!(stored.tags, winner.tags);
    }
}
