use crate::fetcher::{FetchConfig, Fetcher};
use crate::parser::FeedParser;
use crate::traits::FeedSource;
use crate::types::{FeedItem, Result};
use async_trait::async_trait;
use tracing::{debug, info};

/// A single RSS/Atom endpoint, optionally narrowed to entries whose
/// identifier or link contains a path fragment.
pub struct RssFeedSource {
    pub url: String,
    path_filter: Option<String>,
    fetcher: Fetcher,
    parser: FeedParser,
}

impl RssFeedSource {
    pub fn new(url: String, fetch_config: FetchConfig) -> Result<Self> {
        Ok(Self {
            url,
            path_filter: None,
            fetcher: Fetcher::new(fetch_config)?,
            parser: FeedParser::new(),
        })
    }

    pub fn with_path_filter(mut self, path_filter: Option<String>) -> Self {
        self.path_filter = path_filter.filter(|f| !f.is_empty());
        self
    }

    /// Parse a fetched document and apply the path filter.
    pub fn items_from_document(&self, content: &str) -> Result<Vec<FeedItem>> {
        let parsed = self.parser.parse_feed(content)?;
        let total = parsed.len();

        let items: Vec<FeedItem> = parsed
            .into_iter()
            .filter(|item| self.accepts(item))
            .collect();

        if items.len() < total {
            debug!(
                "Path filter {:?} kept {}/{} entries",
                self.path_filter,
                items.len(),
                total
            );
        }
        Ok(items)
    }

    fn accepts(&self, item: &FeedItem) -> bool {
        match &self.path_filter {
            Some(fragment) => item.guid.contains(fragment) || item.link.contains(fragment),
            None => true,
        }
    }
}

#[async_trait]
impl FeedSource for RssFeedSource {
    fn source_name(&self) -> String {
        match url::Url::parse(&self.url) {
            Ok(parsed) => match parsed.domain() {
                Some(domain) => format!("RSS Feed ({})", domain),
                None => "RSS Feed".to_string(),
            },
            Err(_) => "RSS Feed".to_string(),
        }
    }

    async fn fetch(&self) -> Result<Vec<FeedItem>> {
        let content = self.fetcher.fetch_document(&self.url).await?;
        let items = self.items_from_document(&content)?;
        info!("Pulled {} items from {}", items.len(), self.url);
        Ok(items)
    }
}
