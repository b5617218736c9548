//! Leakwatch: a distributed crawl pipeline for finding unauthorized copies of tracked titles
//!
//! Sites are crawled in two stages. A sitemap worker walks a site's sitemap tree and
//! streams discovered URLs into the frontier, then a page worker pulls pending URLs,
//! fetches and extracts each page, and harvests same-site links back into the frontier.
//! Workers only talk through a durable work queue; result processors are the only
//! writers of task, site and URL state.

pub mod config;
pub mod fetch;
pub mod frontier;
pub mod messages;
pub mod output;
pub mod page;
pub mod pipeline;
pub mod processors;
pub mod progress;
pub mod queue;
pub mod sitemap;
pub mod state;
pub mod storage;
pub mod url;

use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Main error type for Leakwatch operations
#[derive(Debug, Error)]
pub enum LeakwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("Message error: {0}")]
    Message(#[from] messages::MessageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetch::FetchError),

    #[error("Frontier error: {0}")]
    Frontier(#[from] frontier::FrontierError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Site not found: {0}")]
    SiteNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Lock poisoned: {0}")]
    Poisoned(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Leakwatch operations
pub type Result<T> = std::result::Result<T, LeakwatchError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

/// Locks a shared mutex, turning poisoning into an error instead of a panic
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| LeakwatchError::Poisoned(what.to_string()))
}

// Re-export commonly used types
pub use config::Config;
pub use state::{SiteStatus, StageStatus, TaskStatus, UrlStatus};
pub use url::{extract_domain, is_same_site, normalize_url};
