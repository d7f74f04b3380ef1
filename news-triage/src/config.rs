use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::utils;

pub const DEFAULT_FEED_URL: &str = "https://www.techflowpost.com/rss.aspx";
pub const DEFAULT_PATH_FILTER: &str = "/newsletter/";
pub const DEFAULT_POLL_MINUTES: u64 = 15;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8082";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_ITEMS: usize = 50;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Postgres connection parameters for the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "news_triage".to_string(),
        }
    }
}

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub feed_url: String,
    pub path_filter: Option<String>,
    pub poll_interval: Duration,
    pub bind_addr: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub openai_timeout: Duration,
    pub webhook_url: Option<String>,
    pub max_items: usize,
    pub fetch_timeout: Duration,
    pub shutdown_grace: Duration,
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            path_filter: Some(DEFAULT_PATH_FILTER.to_string()),
            poll_interval: Duration::from_secs(DEFAULT_POLL_MINUTES * 60),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE.to_string(),
            openai_timeout: Duration::from_secs(DEFAULT_OPENAI_TIMEOUT_SECS),
            webhook_url: None,
            max_items: DEFAULT_MAX_ITEMS,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Load from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key/value lookup. Empty values count as unset;
    /// invalid values are logged and replaced by the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Config::default();

        let feed_url = match get("FEED_URL") {
            Some(url) if utils::url::is_http_url(&url) => url,
            Some(url) => {
                warn!(key = "FEED_URL", value = %url, "invalid feed URL, using default");
                defaults.feed_url
            }
            None => defaults.feed_url,
        };

        // an explicitly empty filter disables filtering
        let path_filter = match lookup("FEED_PATH_FILTER") {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(v.trim().to_string()),
            None => defaults.path_filter,
        };

        let webhook_url = match get("WEBHOOK_URL") {
            Some(url) if utils::url::is_http_url(&url) => Some(url),
            Some(url) => {
                warn!(key = "WEBHOOK_URL", value = %url, "invalid webhook URL, notifications will only be logged");
                None
            }
            None => None,
        };

        let db_defaults = DatabaseConfig::default();
        let database = DatabaseConfig {
            host: get("DB_HOST").unwrap_or(db_defaults.host),
            port: positive(&get, "DB_PORT", db_defaults.port),
            user: get("DB_USER").unwrap_or(db_defaults.user),
            password: get("DB_PASSWORD").unwrap_or(db_defaults.password),
            database: get("DB_NAME").unwrap_or(db_defaults.database),
        };

        Self {
            feed_url,
            path_filter,
            poll_interval: Duration::from_secs(
                positive(&get, "POLL_INTERVAL_MINUTES", DEFAULT_POLL_MINUTES) * 60,
            ),
            bind_addr: normalize_bind_addr(&get("BIND_ADDR").unwrap_or(defaults.bind_addr)),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            openai_base_url: get("OPENAI_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.openai_base_url),
            openai_timeout: Duration::from_secs(positive(
                &get,
                "OPENAI_TIMEOUT_SECS",
                DEFAULT_OPENAI_TIMEOUT_SECS,
            )),
            webhook_url,
            max_items: positive(&get, "MAX_ITEMS", DEFAULT_MAX_ITEMS),
            fetch_timeout: Duration::from_secs(positive(
                &get,
                "FETCH_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT_SECS,
            )),
            shutdown_grace: Duration::from_secs(positive(
                &get,
                "SHUTDOWN_GRACE_SECS",
                DEFAULT_SHUTDOWN_GRACE_SECS,
            )),
            database,
        }
    }
}

fn positive<T, G>(get: &G, key: &str, fallback: T) -> T
where
    T: FromStr + PartialOrd + Default + Copy + std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => fallback,
        Some(raw) => match raw.parse::<T>() {
            Ok(v) if v > T::default() => v,
            _ => {
                warn!(key, value = %raw, default = %fallback, "invalid value, using default");
                fallback
            }
        },
    }
}

/// Accept the `:8082` shorthand for "all interfaces".
fn normalize_bind_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}
