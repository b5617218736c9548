//! Storage module for persisted crawl entities
//!
//! This module is the document store behind the pipeline:
//! - Sites and their operating parameters
//! - Scan tasks and their two stages
//! - The per-site URL frontier
//! - Extracted pages, dead letters and violation recalculation requests
//!
//! Writes are single-row upserts keyed by unique columns or status-guarded
//! conditional updates. A guarded update reports whether it changed anything,
//! which is how callers tell a first delivery from a replay.

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::messages::{Cookie, PageData};
use crate::state::{derive_task_status, ScannerType, SiteStatus, StageStatus, TaskStatus, UrlStatus};
use crate::LeakwatchError;
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Store handle shared between workers and processors
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(LeakwatchError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, LeakwatchError> {
    SqliteStorage::new(path)
}

/// Wraps a store for sharing across tasks
pub fn shared(storage: SqliteStorage) -> SharedStorage {
    Arc::new(Mutex::new(storage))
}

/// Locks a shared store for a short synchronous section
pub fn lock_shared(storage: &SharedStorage) -> crate::Result<MutexGuard<'_, SqliteStorage>> {
    crate::lock(storage, "storage")
}

/// Formats a timestamp the way every table stores it
///
/// Fixed precision and a `Z` suffix keep the text lexically ordered, so range
/// checks can compare columns directly in SQL.
pub(crate) fn to_db_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn from_db_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

/// A crawl target
#[derive(Debug, Clone)]
pub struct Site {
    pub id: String,
    pub domain: String,
    pub sitemap_urls: Vec<String>,
    pub scanner_type: ScannerType,
    pub captcha_type: Option<String>,
    pub cookies: Vec<Cookie>,
    pub status: SiteStatus,
    pub consecutive_failures: u32,
    pub next_scan_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when registering a site
#[derive(Debug, Clone, Default)]
pub struct NewSite {
    pub domain: String,
    pub sitemap_urls: Vec<String>,
    pub scanner_type: ScannerType,
    pub captcha_type: Option<String>,
}

/// Sitemap stage of a scan task
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapStage {
    pub status: StageStatus,
    pub total_found: u64,
    pub error: Option<String>,
}

/// Page stage of a scan task
#[derive(Debug, Clone, PartialEq)]
pub struct PageStage {
    pub status: StageStatus,
    pub total_urls: u32,
    pub success: u32,
    pub failed: u32,
    pub error: Option<String>,
}

/// One two-stage crawl attempt for one site
#[derive(Debug, Clone)]
pub struct ScanTask {
    pub id: String,
    pub site_id: String,
    pub domain: String,
    pub auto_continue: bool,
    pub frontier_api: String,
    pub sitemap: SitemapStage,
    /// `None` until the page stage is armed
    pub page: Option<PageStage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanTask {
    /// Overall status, derived from the two stages
    pub fn status(&self) -> TaskStatus {
        derive_task_status(self.sitemap.status, self.page.as_ref().map(|p| p.status))
    }
}

/// Fields supplied when creating a scan task
#[derive(Debug, Clone)]
pub struct NewTask {
    pub site_id: String,
    pub domain: String,
    pub auto_continue: bool,
    pub frontier_api: String,
}

/// Final page stage counters reported by a worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCounts {
    pub total: u32,
    pub success: u32,
    pub failed: u32,
}

/// One URL in a site's frontier
#[derive(Debug, Clone)]
pub struct SitemapUrl {
    pub id: i64,
    pub site_id: String,
    pub url: String,
    pub depth: u8,
    pub source: String,
    pub status: UrlStatus,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
}

/// Frontier counts for one site at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierSummary {
    pub total: u64,
    pub indexed: u64,
    /// Pending, or errored with the retry delay elapsed
    pub eligible: u64,
    /// Errored and still inside the retry delay
    pub in_retry: u64,
    pub skipped: u64,
}

/// Extracted fields of a saved page
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub site_id: String,
    pub task_id: String,
    pub url: String,
    pub data: PageData,
    pub crawled_at: DateTime<Utc>,
}

/// A message terminated by the queue after exhausting its deliveries
#[derive(Debug, Clone)]
pub struct DeadLetterRecord {
    pub message_id: String,
    pub subject: String,
    pub deliveries: u32,
    pub reason: String,
    pub payload: String,
    pub terminated_at: DateTime<Utc>,
}
