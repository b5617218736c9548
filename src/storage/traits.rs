//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::messages::{Cookie, SitemapUrlEntry, Stage};
use crate::state::{SiteStatus, TaskStatus, UrlStatus};
use crate::storage::{
    DeadLetterRecord, FrontierSummary, NewSite, NewTask, PageCounts, PageRecord, ScanTask, Site,
    SitemapUrl,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Site not found: {0}")]
    SiteNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Site already registered: {0}")]
    DuplicateSite(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for document store backends
///
/// Guarded transitions return `true` when they changed a row and `false` when the
/// guard rejected them (stage already terminal, outcome already recorded, ...).
pub trait Storage {
    // ===== Sites =====

    /// Registers a new site
    fn insert_site(&mut self, site: &NewSite) -> StorageResult<Site>;

    fn get_site(&self, site_id: &str) -> StorageResult<Option<Site>>;

    fn get_site_by_domain(&self, domain: &str) -> StorageResult<Option<Site>>;

    /// Replaces the cookie jar replayed on the site's fetches
    fn update_site_cookies(&mut self, site_id: &str, cookies: &[Cookie]) -> StorageResult<()>;

    /// Resets the failure streak, activates the site and schedules its next scan
    fn mark_site_success(
        &mut self,
        site_id: &str,
        next_scan_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Increments the failure streak and returns its new length
    fn increment_site_failures(&mut self, site_id: &str) -> StorageResult<u32>;

    /// Sets status and next scan time after a failure
    fn set_site_schedule(
        &mut self,
        site_id: &str,
        status: SiteStatus,
        next_scan_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Pushes the next scan out to at least `next_scan_at`; never pulls it earlier
    fn delay_site_scan(&mut self, site_id: &str, next_scan_at: DateTime<Utc>) -> StorageResult<()>;

    /// Schedulable sites whose next scan is due and that have no unfinished task
    fn due_sites(&self, now: DateTime<Utc>, limit: u32) -> StorageResult<Vec<Site>>;

    // ===== Scan tasks =====

    fn insert_task(&mut self, task: &NewTask) -> StorageResult<ScanTask>;

    fn get_task(&self, task_id: &str) -> StorageResult<Option<ScanTask>>;

    /// Moves a stage from pending to processing
    fn mark_stage_started(&mut self, task_id: &str, stage: Stage) -> StorageResult<bool>;

    /// Raises the running found-count of an active sitemap stage
    fn record_sitemap_found(&mut self, task_id: &str, count: u64) -> StorageResult<bool>;

    /// Completes an active sitemap stage, optionally arming the page stage
    fn complete_sitemap_stage(
        &mut self,
        task_id: &str,
        total_found: u64,
        error: Option<&str>,
        arm_page: bool,
    ) -> StorageResult<bool>;

    fn fail_sitemap_stage(&mut self, task_id: &str, error: &str) -> StorageResult<bool>;

    /// Arms the page stage of a task whose sitemap stage completed without it
    fn arm_page_stage(&mut self, task_id: &str) -> StorageResult<bool>;

    fn complete_page_stage(&mut self, task_id: &str, counts: PageCounts) -> StorageResult<bool>;

    fn fail_page_stage(
        &mut self,
        task_id: &str,
        error: &str,
        counts: PageCounts,
    ) -> StorageResult<bool>;

    /// Records one URL outcome and folds it into the page counters
    ///
    /// Returns `false` if the outcome for `(task_id, url)` was already recorded.
    fn record_page_outcome(
        &mut self,
        task_id: &str,
        url: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Cancels every non-terminal stage of a task
    fn cancel_task(&mut self, task_id: &str) -> StorageResult<bool>;

    // ===== Frontier =====

    /// Upserts frontier entries and returns how many were new
    ///
    /// Existing rows keep their status; their depth only ever decreases.
    fn upsert_sitemap_urls(
        &mut self,
        site_id: &str,
        entries: &[SitemapUrlEntry],
        now: DateTime<Utc>,
    ) -> StorageResult<usize>;

    /// URLs ready to crawl, shallowest first
    fn pending_urls(
        &self,
        site_id: &str,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StorageResult<Vec<SitemapUrl>>;

    fn frontier_summary(&self, site_id: &str, now: DateTime<Utc>) -> StorageResult<FrontierSummary>;

    /// Every URL known for the site, in any status
    fn all_urls(&self, site_id: &str) -> StorageResult<Vec<String>>;

    fn get_sitemap_url(&self, site_id: &str, url: &str) -> StorageResult<Option<SitemapUrl>>;

    fn mark_url_indexed(
        &mut self,
        site_id: &str,
        url: &str,
        depth: u8,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Records a crawl error; the URL becomes skipped once `max_retries` errors accrue
    ///
    /// An indexed URL is left as it is and `Indexed` is returned.
    fn mark_url_error(
        &mut self,
        site_id: &str,
        url: &str,
        error: &str,
        next_retry_at: DateTime<Utc>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<UrlStatus>;

    // ===== Pages, dead letters, violation jobs =====

    fn save_page(&mut self, page: &PageRecord) -> StorageResult<()>;

    /// Returns `false` if the dead letter was already recorded
    fn insert_dead_letter(&mut self, record: &DeadLetterRecord) -> StorageResult<bool>;

    /// Returns `false` if a job for this (site, task) already exists
    fn enqueue_violation_job(
        &mut self,
        site_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<bool>;

    // ===== Statistics =====

    fn count_tasks_by_status(&self) -> StorageResult<HashMap<TaskStatus, u64>>;

    fn count_sites_by_status(&self) -> StorageResult<HashMap<SiteStatus, u64>>;

    fn count_urls_by_status(&self) -> StorageResult<HashMap<UrlStatus, u64>>;

    fn count_pages(&self) -> StorageResult<u64>;

    fn count_dead_letters(&self) -> StorageResult<u64>;

    fn count_violation_jobs(&self) -> StorageResult<u64>;
}
