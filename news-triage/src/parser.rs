use crate::types::{FeedItem, Result, TriageError};
use chrono::Utc;
use feed_rs::parser;
use std::collections::HashSet;
use tracing::{debug, info};

/// Turns RSS/Atom documents into `FeedItem`s.
#[derive(Debug, Default)]
pub struct FeedParser;

impl FeedParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a whole document. Entries with no usable identifier are dropped,
    /// as are repeats of an identifier already seen in the same document.
    pub fn parse_feed(&self, content: &str) -> Result<Vec<FeedItem>> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = source_id_parser()
            .parse(content.as_bytes())
            .map_err(|e| TriageError::Parse(format!("Failed to parse feed: {}", e)))?;

        let total = feed.entries.len();
        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(total);

        for entry in feed.entries {
            let Some(item) = self.parse_entry(entry) else {
                continue;
            };
            if !seen.insert(item.guid.clone()) {
                debug!("Skipping duplicate entry with GUID: {}", item.guid);
                continue;
            }
            items.push(item);
        }

        info!("Parsed feed with {} usable entries out of {}", items.len(), total);
        Ok(items)
    }

    fn parse_entry(&self, entry: feed_rs::model::Entry) -> Option<FeedItem> {
        let title = entry
            .title
            .map(|t| t.content.trim().to_string())
            .unwrap_or_default();
        let link = entry
            .links
            .first()
            .map(|l| l.href.trim().to_string())
            .unwrap_or_default();

        let Some(guid) = pick_identifier(&entry.id, &link, &title) else {
            debug!("Dropping entry without guid, link or title");
            return None;
        };

        // prefer the summary; fall back to the full content body
        let summary = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .unwrap_or_default();

        let published_at = entry.published.or(entry.updated).unwrap_or_else(Utc::now);

        Some(FeedItem {
            guid,
            title,
            link,
            published_at,
            summary,
        })
    }
}

/// feed-rs fills a missing id with a hash or a random uuid. Keep it blank so
/// the identifier policy below sees only what the feed itself declared.
fn source_id_parser() -> parser::Parser {
    parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
}

/// Identifier policy: the entry's own id, then its link, then its title.
pub fn pick_identifier(id: &str, link: &str, title: &str) -> Option<String> {
    [id, link, title]
        .into_iter()
        .map(str::trim)
        .find(|candidate| !candidate.is_empty())
        .map(str::to_string)
}
