//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::messages::{Cookie, SitemapUrlEntry, Stage};
use crate::state::{ScannerType, SiteStatus, StageStatus, TaskStatus, UrlStatus, derive_task_status};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    from_db_time, to_db_time, DeadLetterRecord, FrontierSummary, NewSite, NewTask, PageCounts,
    PageRecord, PageStage, ScanTask, Site, SitemapStage, SitemapUrl,
};
use crate::LeakwatchError;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

const SITE_COLUMNS: &str = "id, domain, sitemap_urls, scanner_type, captcha_type, cookies, status, \
     consecutive_failures, next_scan_at, last_success_at, created_at";

const TASK_COLUMNS: &str = "id, site_id, domain, auto_continue, frontier_api, sitemap_status, \
     sitemap_total_found, sitemap_error, page_status, page_total_urls, page_success, page_failed, \
     page_error, created_at, updated_at";

const URL_COLUMNS: &str = "id, site_id, url, depth, source, status, error_count, last_error, \
     next_retry_at, discovered_at";

/// A stage that may still change
const ACTIVE: &str = "('pending', 'processing')";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(LeakwatchError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, LeakwatchError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> Result<Self, LeakwatchError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn task_exists(&self, task_id: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM scan_tasks WHERE id = ?1", params![task_id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    /// Runs a guarded task update, distinguishing "guard rejected" from "no such task"
    fn guarded_task_update(
        &mut self,
        task_id: &str,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StorageResult<bool> {
        let changed = self.conn.execute(sql, params)?;
        if changed > 0 {
            return Ok(true);
        }
        if !self.task_exists(task_id)? {
            return Err(StorageError::TaskNotFound(task_id.to_string()));
        }
        Ok(false)
    }
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn time_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    from_db_time(&raw).ok_or_else(|| conversion_error(idx, format!("bad timestamp: {}", raw)))
}

fn opt_time_col(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => from_db_time(&raw)
            .map(Some)
            .ok_or_else(|| conversion_error(idx, format!("bad timestamp: {}", raw))),
        None => Ok(None),
    }
}

fn enum_col<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_error(idx, format!("unknown value: {}", raw)))
}

fn read_site(row: &Row) -> rusqlite::Result<Site> {
    Ok(Site {
        id: row.get(0)?,
        domain: row.get(1)?,
        sitemap_urls: json_col(row, 2)?,
        scanner_type: enum_col(row, 3, ScannerType::from_db_string)?,
        captcha_type: row.get(4)?,
        cookies: json_col(row, 5)?,
        status: enum_col(row, 6, SiteStatus::from_db_string)?,
        consecutive_failures: row.get(7)?,
        next_scan_at: opt_time_col(row, 8)?,
        last_success_at: opt_time_col(row, 9)?,
        created_at: time_col(row, 10)?,
    })
}

fn read_task(row: &Row) -> rusqlite::Result<ScanTask> {
    let page_status: Option<String> = row.get(8)?;
    let page = match page_status {
        Some(raw) => Some(PageStage {
            status: StageStatus::from_db_string(&raw)
                .ok_or_else(|| conversion_error(8, format!("unknown value: {}", raw)))?,
            total_urls: row.get(9)?,
            success: row.get(10)?,
            failed: row.get(11)?,
            error: row.get(12)?,
        }),
        None => None,
    };

    Ok(ScanTask {
        id: row.get(0)?,
        site_id: row.get(1)?,
        domain: row.get(2)?,
        auto_continue: row.get(3)?,
        frontier_api: row.get(4)?,
        sitemap: SitemapStage {
            status: enum_col(row, 5, StageStatus::from_db_string)?,
            total_found: row.get::<_, i64>(6)? as u64,
            error: row.get(7)?,
        },
        page,
        created_at: time_col(row, 13)?,
        updated_at: time_col(row, 14)?,
    })
}

fn read_url(row: &Row) -> rusqlite::Result<SitemapUrl> {
    Ok(SitemapUrl {
        id: row.get(0)?,
        site_id: row.get(1)?,
        url: row.get(2)?,
        depth: row.get(3)?,
        source: row.get(4)?,
        status: enum_col(row, 5, UrlStatus::from_db_string)?,
        error_count: row.get(6)?,
        last_error: row.get(7)?,
        next_retry_at: opt_time_col(row, 8)?,
        discovered_at: time_col(row, 9)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Sites =====

    fn insert_site(&mut self, site: &NewSite) -> StorageResult<Site> {
        let domain = site.domain.trim().to_lowercase();
        if self.get_site_by_domain(&domain)?.is_some() {
            return Err(StorageError::DuplicateSite(domain));
        }

        let id = Uuid::new_v4().to_string();
        let now = to_db_time(&Utc::now());
        self.conn.execute(
            "INSERT INTO sites (id, domain, sitemap_urls, scanner_type, captcha_type, cookies, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, '[]', ?6, ?7)",
            params![
                id,
                domain,
                serde_json::to_string(&site.sitemap_urls)?,
                site.scanner_type.to_db_string(),
                site.captcha_type,
                SiteStatus::Pending.to_db_string(),
                now
            ],
        )?;

        self.get_site(&id)?.ok_or(StorageError::SiteNotFound(id))
    }

    fn get_site(&self, site_id: &str) -> StorageResult<Option<Site>> {
        let sql = format!("SELECT {} FROM sites WHERE id = ?1", SITE_COLUMNS);
        let site = self
            .conn
            .query_row(&sql, params![site_id], read_site)
            .optional()?;
        Ok(site)
    }

    fn get_site_by_domain(&self, domain: &str) -> StorageResult<Option<Site>> {
        let sql = format!("SELECT {} FROM sites WHERE domain = ?1", SITE_COLUMNS);
        let site = self
            .conn
            .query_row(&sql, params![domain.trim().to_lowercase()], read_site)
            .optional()?;
        Ok(site)
    }

    fn update_site_cookies(&mut self, site_id: &str, cookies: &[Cookie]) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE sites SET cookies = ?1 WHERE id = ?2",
            params![serde_json::to_string(cookies)?, site_id],
        )?;
        if changed == 0 {
            return Err(StorageError::SiteNotFound(site_id.to_string()));
        }
        Ok(())
    }

    fn mark_site_success(
        &mut self,
        site_id: &str,
        next_scan_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE sites SET consecutive_failures = 0, status = ?1, next_scan_at = ?2, last_success_at = ?3
             WHERE id = ?4",
            params![
                SiteStatus::Active.to_db_string(),
                to_db_time(&next_scan_at),
                to_db_time(&now),
                site_id
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::SiteNotFound(site_id.to_string()));
        }
        Ok(())
    }

    fn increment_site_failures(&mut self, site_id: &str) -> StorageResult<u32> {
        let failures: Option<u32> = self
            .conn
            .query_row(
                "UPDATE sites SET consecutive_failures = consecutive_failures + 1 WHERE id = ?1
                 RETURNING consecutive_failures",
                params![site_id],
                |row| row.get(0),
            )
            .optional()?;
        failures.ok_or_else(|| StorageError::SiteNotFound(site_id.to_string()))
    }

    fn set_site_schedule(
        &mut self,
        site_id: &str,
        status: SiteStatus,
        next_scan_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE sites SET status = ?1, next_scan_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), to_db_time(&next_scan_at), site_id],
        )?;
        if changed == 0 {
            return Err(StorageError::SiteNotFound(site_id.to_string()));
        }
        Ok(())
    }

    fn delay_site_scan(&mut self, site_id: &str, next_scan_at: DateTime<Utc>) -> StorageResult<()> {
        let at = to_db_time(&next_scan_at);
        self.conn.execute(
            "UPDATE sites SET next_scan_at = ?1
             WHERE id = ?2 AND (next_scan_at IS NULL OR next_scan_at < ?1)",
            params![at, site_id],
        )?;
        Ok(())
    }

    fn due_sites(&self, now: DateTime<Utc>, limit: u32) -> StorageResult<Vec<Site>> {
        let sql = format!(
            "SELECT {} FROM sites
             WHERE status IN ('pending', 'active')
               AND (next_scan_at IS NULL OR next_scan_at <= ?1)
               AND NOT EXISTS (
                   SELECT 1 FROM scan_tasks t
                   WHERE t.site_id = sites.id
                     AND (t.sitemap_status IN {active} OR t.page_status IN {active})
               )
             ORDER BY next_scan_at, created_at
             LIMIT ?2",
            SITE_COLUMNS,
            active = ACTIVE
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let sites = stmt
            .query_map(params![to_db_time(&now), limit], read_site)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sites)
    }

    // ===== Scan tasks =====

    fn insert_task(&mut self, task: &NewTask) -> StorageResult<ScanTask> {
        if self.get_site(&task.site_id)?.is_none() {
            return Err(StorageError::SiteNotFound(task.site_id.clone()));
        }

        let id = Uuid::new_v4().to_string();
        let now = to_db_time(&Utc::now());
        self.conn.execute(
            "INSERT INTO scan_tasks (id, site_id, domain, auto_continue, frontier_api, sitemap_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id,
                task.site_id,
                task.domain,
                task.auto_continue,
                task.frontier_api,
                StageStatus::Pending.to_db_string(),
                now
            ],
        )?;

        self.get_task(&id)?.ok_or(StorageError::TaskNotFound(id))
    }

    fn get_task(&self, task_id: &str) -> StorageResult<Option<ScanTask>> {
        let sql = format!("SELECT {} FROM scan_tasks WHERE id = ?1", TASK_COLUMNS);
        let task = self
            .conn
            .query_row(&sql, params![task_id], read_task)
            .optional()?;
        Ok(task)
    }

    fn mark_stage_started(&mut self, task_id: &str, stage: Stage) -> StorageResult<bool> {
        let column = match stage {
            Stage::Sitemap => "sitemap_status",
            Stage::Page => "page_status",
        };
        let sql = format!(
            "UPDATE scan_tasks SET {col} = 'processing', updated_at = ?1 WHERE id = ?2 AND {col} = 'pending'",
            col = column
        );
        let now = to_db_time(&Utc::now());
        self.guarded_task_update(task_id, &sql, params![now, task_id])
    }

    fn record_sitemap_found(&mut self, task_id: &str, count: u64) -> StorageResult<bool> {
        let sql = format!(
            "UPDATE scan_tasks SET sitemap_total_found = ?1, updated_at = ?2
             WHERE id = ?3 AND sitemap_status IN {} AND sitemap_total_found < ?1",
            ACTIVE
        );
        let now = to_db_time(&Utc::now());
        self.guarded_task_update(task_id, &sql, params![count as i64, now, task_id])
    }

    fn complete_sitemap_stage(
        &mut self,
        task_id: &str,
        total_found: u64,
        error: Option<&str>,
        arm_page: bool,
    ) -> StorageResult<bool> {
        let sql = format!(
            "UPDATE scan_tasks
             SET sitemap_status = 'completed',
                 sitemap_total_found = MAX(sitemap_total_found, ?1),
                 sitemap_error = ?2,
                 page_status = CASE WHEN ?3 THEN 'pending' ELSE page_status END,
                 updated_at = ?4
             WHERE id = ?5 AND sitemap_status IN {}",
            ACTIVE
        );
        let now = to_db_time(&Utc::now());
        self.guarded_task_update(
            task_id,
            &sql,
            params![total_found as i64, error, arm_page, now, task_id],
        )
    }

    fn fail_sitemap_stage(&mut self, task_id: &str, error: &str) -> StorageResult<bool> {
        let sql = format!(
            "UPDATE scan_tasks SET sitemap_status = 'failed', sitemap_error = ?1, updated_at = ?2
             WHERE id = ?3 AND sitemap_status IN {}",
            ACTIVE
        );
        let now = to_db_time(&Utc::now());
        self.guarded_task_update(task_id, &sql, params![error, now, task_id])
    }

    fn arm_page_stage(&mut self, task_id: &str) -> StorageResult<bool> {
        let now = to_db_time(&Utc::now());
        self.guarded_task_update(
            task_id,
            "UPDATE scan_tasks SET page_status = 'pending', updated_at = ?1
             WHERE id = ?2 AND sitemap_status = 'completed' AND page_status IS NULL",
            params![now, task_id],
        )
    }

    fn complete_page_stage(&mut self, task_id: &str, counts: PageCounts) -> StorageResult<bool> {
        let sql = format!(
            "UPDATE scan_tasks
             SET page_status = 'completed',
                 page_total_urls = MAX(page_total_urls, ?1),
                 page_success = MAX(page_success, ?2),
                 page_failed = MAX(page_failed, ?3),
                 updated_at = ?4
             WHERE id = ?5 AND page_status IN {}",
            ACTIVE
        );
        let now = to_db_time(&Utc::now());
        self.guarded_task_update(
            task_id,
            &sql,
            params![counts.total, counts.success, counts.failed, now, task_id],
        )
    }

    fn fail_page_stage(
        &mut self,
        task_id: &str,
        error: &str,
        counts: PageCounts,
    ) -> StorageResult<bool> {
        let sql = format!(
            "UPDATE scan_tasks
             SET page_status = 'failed',
                 page_error = ?1,
                 page_total_urls = MAX(page_total_urls, ?2),
                 page_success = MAX(page_success, ?3),
                 page_failed = MAX(page_failed, ?4),
                 updated_at = ?5
             WHERE id = ?6 AND page_status IN {}",
            ACTIVE
        );
        let now = to_db_time(&Utc::now());
        self.guarded_task_update(
            task_id,
            &sql,
            params![error, counts.total, counts.success, counts.failed, now, task_id],
        )
    }

    fn record_page_outcome(
        &mut self,
        task_id: &str,
        url: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let now = to_db_time(&now);
        let tx = self.conn.transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO page_outcomes (task_id, url, success, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            params![task_id, url, success, now],
        )?;

        if inserted > 0 {
            let (ok, failed) = if success { (1, 0) } else { (0, 1) };
            tx.execute(
                &format!(
                    "UPDATE scan_tasks
                     SET page_total_urls = page_total_urls + 1,
                         page_success = page_success + ?1,
                         page_failed = page_failed + ?2,
                         updated_at = ?3
                     WHERE id = ?4 AND page_status IN {}",
                    ACTIVE
                ),
                params![ok, failed, now, task_id],
            )?;
        }

        tx.commit()?;
        Ok(inserted > 0)
    }

    fn cancel_task(&mut self, task_id: &str) -> StorageResult<bool> {
        let now = to_db_time(&Utc::now());
        let tx = self.conn.transaction()?;
        let sitemap = tx.execute(
            &format!(
                "UPDATE scan_tasks SET sitemap_status = 'cancelled', updated_at = ?1
                 WHERE id = ?2 AND sitemap_status IN {}",
                ACTIVE
            ),
            params![now, task_id],
        )?;
        let page = tx.execute(
            &format!(
                "UPDATE scan_tasks SET page_status = 'cancelled', updated_at = ?1
                 WHERE id = ?2 AND page_status IN {}",
                ACTIVE
            ),
            params![now, task_id],
        )?;
        tx.commit()?;

        if sitemap + page > 0 {
            return Ok(true);
        }
        if !self.task_exists(task_id)? {
            return Err(StorageError::TaskNotFound(task_id.to_string()));
        }
        Ok(false)
    }

    // ===== Frontier =====

    fn upsert_sitemap_urls(
        &mut self,
        site_id: &str,
        entries: &[SitemapUrlEntry],
        now: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let now = to_db_time(&now);
        let tx = self.conn.transaction()?;
        let mut inserted = 0;

        {
            let mut insert = tx.prepare_cached(
                "INSERT OR IGNORE INTO sitemap_urls
                 (site_id, url, depth, source, status, last_mod, change_freq, priority, discovered_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8)",
            )?;
            let mut refresh = tx.prepare_cached(
                "UPDATE sitemap_urls
                 SET depth = MIN(depth, ?3),
                     last_mod = COALESCE(?4, last_mod),
                     change_freq = COALESCE(?5, change_freq),
                     priority = COALESCE(?6, priority)
                 WHERE site_id = ?1 AND url = ?2",
            )?;

            for entry in entries {
                let added = insert.execute(params![
                    site_id,
                    entry.url,
                    entry.depth,
                    entry.source.as_str(),
                    entry.last_mod,
                    entry.change_freq,
                    entry.priority,
                    now
                ])?;
                if added > 0 {
                    inserted += 1;
                } else {
                    refresh.execute(params![
                        site_id,
                        entry.url,
                        entry.depth,
                        entry.last_mod,
                        entry.change_freq,
                        entry.priority
                    ])?;
                }
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn pending_urls(
        &self,
        site_id: &str,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StorageResult<Vec<SitemapUrl>> {
        let sql = format!(
            "SELECT {} FROM sitemap_urls
             WHERE site_id = ?1
               AND (status = 'pending' OR (status = 'error' AND next_retry_at <= ?2))
             ORDER BY depth, id
             LIMIT ?3",
            URL_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let urls = stmt
            .query_map(params![site_id, to_db_time(&now), limit], read_url)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(urls)
    }

    fn frontier_summary(&self, site_id: &str, now: DateTime<Utc>) -> StorageResult<FrontierSummary> {
        let summary = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'indexed'), 0),
                    COALESCE(SUM(status = 'pending' OR (status = 'error' AND next_retry_at <= ?2)), 0),
                    COALESCE(SUM(status = 'error' AND (next_retry_at IS NULL OR next_retry_at > ?2)), 0),
                    COALESCE(SUM(status = 'skipped'), 0)
             FROM sitemap_urls WHERE site_id = ?1",
            params![site_id, to_db_time(&now)],
            |row| {
                Ok(FrontierSummary {
                    total: row.get::<_, i64>(0)? as u64,
                    indexed: row.get::<_, i64>(1)? as u64,
                    eligible: row.get::<_, i64>(2)? as u64,
                    in_retry: row.get::<_, i64>(3)? as u64,
                    skipped: row.get::<_, i64>(4)? as u64,
                })
            },
        )?;
        Ok(summary)
    }

    fn all_urls(&self, site_id: &str) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url FROM sitemap_urls WHERE site_id = ?1 ORDER BY id")?;
        let urls = stmt
            .query_map(params![site_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(urls)
    }

    fn get_sitemap_url(&self, site_id: &str, url: &str) -> StorageResult<Option<SitemapUrl>> {
        let sql = format!(
            "SELECT {} FROM sitemap_urls WHERE site_id = ?1 AND url = ?2",
            URL_COLUMNS
        );
        let found = self
            .conn
            .query_row(&sql, params![site_id, url], read_url)
            .optional()?;
        Ok(found)
    }

    fn mark_url_indexed(
        &mut self,
        site_id: &str,
        url: &str,
        depth: u8,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO sitemap_urls (site_id, url, depth, source, status, discovered_at, last_crawled_at)
             VALUES (?1, ?2, ?3, 'link', 'indexed', ?4, ?4)
             ON CONFLICT(site_id, url) DO UPDATE SET
                 status = 'indexed',
                 last_error = NULL,
                 next_retry_at = NULL,
                 last_crawled_at = excluded.last_crawled_at",
            params![site_id, url, depth, to_db_time(&now)],
        )?;
        Ok(())
    }

    fn mark_url_error(
        &mut self,
        site_id: &str,
        url: &str,
        error: &str,
        next_retry_at: DateTime<Utc>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<UrlStatus> {
        let status: Option<String> = self.conn.query_row(
            "INSERT INTO sitemap_urls
             (site_id, url, depth, source, status, error_count, last_error, next_retry_at, discovered_at, last_crawled_at)
             VALUES (?1, ?2, 0, 'link', CASE WHEN ?6 <= 1 THEN 'skipped' ELSE 'error' END, 1, ?3, ?4, ?5, ?5)
             ON CONFLICT(site_id, url) DO UPDATE SET
                 error_count = error_count + 1,
                 status = CASE WHEN error_count + 1 >= ?6 THEN 'skipped' ELSE 'error' END,
                 last_error = excluded.last_error,
                 next_retry_at = excluded.next_retry_at,
                 last_crawled_at = excluded.last_crawled_at
             WHERE status != 'indexed'
             RETURNING status",
            params![
                site_id,
                url,
                error,
                to_db_time(&next_retry_at),
                to_db_time(&now),
                max_retries
            ],
            |row| row.get(0),
        ).optional()?;

        let Some(status) = status else {
            return Ok(UrlStatus::Indexed);
        };
        UrlStatus::from_db_string(&status)
            .ok_or_else(|| StorageError::Corrupt(format!("url status {}", status)))
    }

    // ===== Pages, dead letters, violation jobs =====

    fn save_page(&mut self, page: &PageRecord) -> StorageResult<()> {
        let data = &page.data;
        self.conn.execute(
            "INSERT INTO pages
             (site_id, task_id, url, final_url, status_code, title, description, canonical, h1,
              og_title, og_image, lang, text_length, links_found, crawled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(site_id, url) DO UPDATE SET
                 task_id = excluded.task_id,
                 final_url = excluded.final_url,
                 status_code = excluded.status_code,
                 title = excluded.title,
                 description = excluded.description,
                 canonical = excluded.canonical,
                 h1 = excluded.h1,
                 og_title = excluded.og_title,
                 og_image = excluded.og_image,
                 lang = excluded.lang,
                 text_length = excluded.text_length,
                 links_found = excluded.links_found,
                 crawled_at = excluded.crawled_at",
            params![
                page.site_id,
                page.task_id,
                page.url,
                data.final_url,
                data.status_code,
                data.title,
                data.description,
                data.canonical,
                data.h1,
                data.og_title,
                data.og_image,
                data.lang,
                data.text_length as i64,
                data.links_found as i64,
                to_db_time(&page.crawled_at)
            ],
        )?;
        Ok(())
    }

    fn insert_dead_letter(&mut self, record: &DeadLetterRecord) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO dead_letters (message_id, subject, deliveries, reason, payload, terminated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.message_id,
                record.subject,
                record.deliveries,
                record.reason,
                record.payload,
                to_db_time(&record.terminated_at)
            ],
        )?;
        Ok(inserted > 0)
    }

    fn enqueue_violation_job(
        &mut self,
        site_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO violation_jobs (site_id, task_id, status, requested_at)
             VALUES (?1, ?2, 'queued', ?3)",
            params![site_id, task_id, to_db_time(&now)],
        )?;
        Ok(inserted > 0)
    }

    // ===== Statistics =====

    fn count_tasks_by_status(&self) -> StorageResult<HashMap<TaskStatus, u64>> {
        let mut stmt = self.conn.prepare(
            "SELECT sitemap_status, page_status, COUNT(*) FROM scan_tasks
             GROUP BY sitemap_status, page_status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (sitemap, page, count) = row?;
            let sitemap = StageStatus::from_db_string(&sitemap)
                .ok_or_else(|| StorageError::Corrupt(format!("stage status {}", sitemap)))?;
            let page = match page {
                Some(raw) => Some(
                    StageStatus::from_db_string(&raw)
                        .ok_or_else(|| StorageError::Corrupt(format!("stage status {}", raw)))?,
                ),
                None => None,
            };
            *counts.entry(derive_task_status(sitemap, page)).or_insert(0) += count as u64;
        }
        Ok(counts)
    }

    fn count_sites_by_status(&self) -> StorageResult<HashMap<SiteStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM sites GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = SiteStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }

    fn count_urls_by_status(&self) -> StorageResult<HashMap<UrlStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM sitemap_urls GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = UrlStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }

    fn count_pages(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_dead_letters(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_violation_jobs(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM violation_jobs", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
