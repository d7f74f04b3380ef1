pub mod config;
pub mod fetcher;
pub mod ledger;
pub mod llm_adapter;
pub mod notifier;
pub mod parser;
pub mod pipeline;
pub mod server;
pub mod sources;
pub mod traits;
pub mod types;
pub mod utils;

pub use config::{Config, DatabaseConfig};
pub use fetcher::{FetchConfig, Fetcher};
pub use ledger::{MemoryLedger, PgLedger};
pub use llm_adapter::{DisabledClassifier, OpenAiClassifier};
pub use notifier::{LogNotifier, WebhookNotifier};
pub use parser::FeedParser;
pub use pipeline::Pipeline;
pub use sources::RssFeedSource;
pub use traits::{Classifier, FeedSource, Ledger, Notifier};
pub use types::*;
