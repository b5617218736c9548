//! Fetch capability
//!
//! Workers never talk to the network directly. They call a `Fetcher`, which turns a
//! URL (plus the site's cookies) into the page body and a block classification.
//! Every fetcher shares one process-wide `FetchPool`: a permit must be held for the
//! duration of a fetch and is released when the permit drops.

mod classify;
mod http;
mod pool;

pub use classify::{classify_response, BlockClass};
pub use http::{build_http_client, HttpFetcher, StreamingFetcher};
pub use pool::{FetchPermit, FetchPool, PooledFetcher};

use crate::messages::Cookie;
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors raised by a fetch
///
/// Target blocking is not an error: it is reported on `FetchOutcome`.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Response exceeded {0} bytes")]
    TooLarge(u64),

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("Fetch pool closed")]
    PoolClosed,

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(url.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }
}

/// What to fetch
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub cookies: Vec<Cookie>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, cookies: &[Cookie]) -> Self {
        Self {
            url: url.into(),
            cookies: cookies.to_vec(),
        }
    }
}

/// A completed fetch
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub html: String,
    pub final_url: String,
    pub status: u16,
    /// Network-level block (403/429/503 without a challenge page)
    pub blocked: bool,
    /// Anti-bot challenge served instead of content
    pub is_captcha: bool,
    pub block_reason: Option<String>,
    /// Cookies set by the response
    pub cookies: Vec<Cookie>,
}

/// Opaque page fetch
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches a URL; returns early with `FetchError::Cancelled` when `cancel` fires
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        request: &FetchRequest,
    ) -> Result<FetchOutcome, FetchError>;
}
