//! URL frontier access for the page worker
//!
//! The frontier itself lives in the document store. Page workers see it through the
//! `FrontierApi` query interface (pending batches plus a bulk URL listing) and keep a
//! per-task `FrontierFilter` to skip links they have probably seen already.

mod filter;
mod http;
mod store;

pub use filter::FrontierFilter;
pub use http::HttpFrontierApi;
pub use store::StoreFrontierApi;

use crate::storage::{SharedStorage, StorageError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Frontier API value that selects the local store
pub const LOCAL_FRONTIER: &str = "local";

/// Errors raised by frontier queries
#[derive(Debug, Error)]
pub enum FrontierError {
    #[error("Frontier request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Frontier returned status {0}")]
    Status(u16),

    #[error("Invalid frontier endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Frontier store error: {0}")]
    Store(#[from] StorageError),

    #[error("Lock poisoned: {0}")]
    Poisoned(String),
}

/// One URL handed out by the frontier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUrl {
    pub url: String,
    #[serde(default)]
    pub depth: u8,
}

/// One page of pending URLs
///
/// An empty batch with `all_indexed` means the site is done; an empty batch with
/// `in_retry` means the remaining URLs are waiting out their retry delay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBatch {
    #[serde(default)]
    pub urls: Vec<PendingUrl>,
    #[serde(rename = "allIndexed", default)]
    pub all_indexed: bool,
    #[serde(rename = "inRetry", default)]
    pub in_retry: bool,
    #[serde(rename = "totalURLs", default)]
    pub total_urls: u64,
    #[serde(rename = "indexedURLs", default)]
    pub indexed_urls: u64,
}

/// Bulk listing used to seed the filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlListing {
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Paged query interface over a site's frontier
#[async_trait]
pub trait FrontierApi: Send + Sync {
    async fn pending_urls(&self, site_id: &str, limit: u32) -> Result<PendingBatch, FrontierError>;

    async fn all_urls(&self, site_id: &str) -> Result<Vec<String>, FrontierError>;
}

/// Maps a task's `frontierAPI` value to a client
///
/// An empty value or `local` reads the local store; anything else must be an
/// http(s) base URL.
#[derive(Clone)]
pub struct FrontierResolver {
    storage: SharedStorage,
    client: reqwest::Client,
}

impl FrontierResolver {
    pub fn new(storage: SharedStorage, client: reqwest::Client) -> Self {
        Self { storage, client }
    }

    pub fn resolve(&self, frontier_api: &str) -> Result<Arc<dyn FrontierApi>, FrontierError> {
        let endpoint = frontier_api.trim();
        if endpoint.is_empty() || endpoint.eq_ignore_ascii_case(LOCAL_FRONTIER) {
            return Ok(Arc::new(StoreFrontierApi::new(self.storage.clone())));
        }
        Ok(Arc::new(HttpFrontierApi::new(self.client.clone(), endpoint)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{shared, SqliteStorage};

    fn resolver() -> FrontierResolver {
        let storage = shared(SqliteStorage::open_in_memory().unwrap());
        FrontierResolver::new(storage, reqwest::Client::new())
    }

    #[test]
    fn test_resolve_local_and_http() {
        let resolver = resolver();
        assert!(resolver.resolve("").is_ok());
        assert!(resolver.resolve("local").is_ok());
        assert!(resolver.resolve("https://frontier.internal/api").is_ok());
    }

    #[test]
    fn test_resolve_rejects_garbage() {
        let resolver = resolver();
        assert!(matches!(
            resolver.resolve("ftp://frontier"),
            Err(FrontierError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            resolver.resolve("not a url"),
            Err(FrontierError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_batch_wire_names() {
        let json = r#"{"urls":[{"url":"https://a.com/x","depth":1}],"allIndexed":false,"inRetry":true,"totalURLs":10,"indexedURLs":4}"#;
        let batch: PendingBatch = serde_json::from_str(json).unwrap();
        assert_eq!(batch.urls[0].depth, 1);
        assert!(batch.in_retry);
        assert_eq!(batch.total_urls, 10);
        assert_eq!(batch.indexed_urls, 4);
    }
}
