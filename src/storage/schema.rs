//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Leakwatch document store.
//! Every mutable row is addressed by a unique key, so writers never need more than
//! a single-row conditional update.

/// SQL schema for the document store
pub const SCHEMA_SQL: &str = r#"
-- Crawl targets
CREATE TABLE IF NOT EXISTS sites (
    id TEXT PRIMARY KEY,
    domain TEXT NOT NULL UNIQUE,
    sitemap_urls TEXT NOT NULL DEFAULT '[]',
    scanner_type TEXT NOT NULL DEFAULT 'http',
    captcha_type TEXT,
    cookies TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'pending',
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    next_scan_at TEXT,
    last_success_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sites_status ON sites(status);
CREATE INDEX IF NOT EXISTS idx_sites_next_scan ON sites(next_scan_at);

-- Two-stage scan attempts; page_status is NULL until the page stage is armed
CREATE TABLE IF NOT EXISTS scan_tasks (
    id TEXT PRIMARY KEY,
    site_id TEXT NOT NULL REFERENCES sites(id),
    domain TEXT NOT NULL,
    auto_continue INTEGER NOT NULL DEFAULT 1,
    frontier_api TEXT NOT NULL DEFAULT '',
    sitemap_status TEXT NOT NULL DEFAULT 'pending',
    sitemap_total_found INTEGER NOT NULL DEFAULT 0,
    sitemap_error TEXT,
    page_status TEXT,
    page_total_urls INTEGER NOT NULL DEFAULT 0,
    page_success INTEGER NOT NULL DEFAULT 0,
    page_failed INTEGER NOT NULL DEFAULT 0,
    page_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scan_tasks_site ON scan_tasks(site_id);

-- Per-site URL frontier
CREATE TABLE IF NOT EXISTS sitemap_urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id TEXT NOT NULL REFERENCES sites(id),
    url TEXT NOT NULL,
    depth INTEGER NOT NULL DEFAULT 0,
    source TEXT NOT NULL DEFAULT 'sitemap',
    status TEXT NOT NULL DEFAULT 'pending',
    last_mod TEXT,
    change_freq TEXT,
    priority REAL,
    error_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    next_retry_at TEXT,
    discovered_at TEXT NOT NULL,
    last_crawled_at TEXT,
    UNIQUE(site_id, url)
);

CREATE INDEX IF NOT EXISTS idx_sitemap_urls_pending ON sitemap_urls(site_id, status, depth);

-- Extracted page fields, one row per (site, url)
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id TEXT NOT NULL REFERENCES sites(id),
    task_id TEXT NOT NULL,
    url TEXT NOT NULL,
    final_url TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    title TEXT,
    description TEXT,
    canonical TEXT,
    h1 TEXT,
    og_title TEXT,
    og_image TEXT,
    lang TEXT,
    text_length INTEGER NOT NULL DEFAULT 0,
    links_found INTEGER NOT NULL DEFAULT 0,
    crawled_at TEXT NOT NULL,
    UNIQUE(site_id, url)
);

-- One row per (task, url) folded into the page stage counters
CREATE TABLE IF NOT EXISTS page_outcomes (
    task_id TEXT NOT NULL,
    url TEXT NOT NULL,
    success INTEGER NOT NULL,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY(task_id, url)
);

-- Messages terminated after exhausting their deliveries
CREATE TABLE IF NOT EXISTS dead_letters (
    message_id TEXT PRIMARY KEY,
    subject TEXT NOT NULL,
    deliveries INTEGER NOT NULL,
    reason TEXT NOT NULL,
    payload TEXT NOT NULL,
    terminated_at TEXT NOT NULL
);

-- Violation recalculation requests, one per (site, task)
CREATE TABLE IF NOT EXISTS violation_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id TEXT NOT NULL REFERENCES sites(id),
    task_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    requested_at TEXT NOT NULL,
    UNIQUE(site_id, task_id)
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
