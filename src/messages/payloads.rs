//! JSON payloads carried on the work queue
//!
//! Field names follow the wire names the pipeline has always used
//! (`siteID`, `sitemapURLs`, `frontierAPI`, ...), so every struct spells out
//! the renames that `camelCase` gets wrong.

use crate::state::ScannerType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cookie captured from, or replayed to, a target site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
        }
    }
}

/// Merges freshly returned cookies over an existing jar, replacing by name
pub fn merge_cookies(existing: &[Cookie], fresh: &[Cookie]) -> Vec<Cookie> {
    let mut merged: Vec<Cookie> = existing
        .iter()
        .filter(|c| !fresh.iter().any(|f| f.name == c.name))
        .cloned()
        .collect();
    merged.extend(fresh.iter().cloned());
    merged
}

/// Where a frontier URL was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlSource {
    Sitemap,
    Homepage,
    Link,
}

impl UrlSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sitemap => "sitemap",
            Self::Homepage => "homepage",
            Self::Link => "link",
        }
    }
}

/// Starts the sitemap stage of a scan task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitemapCrawlTask {
    pub id: String,
    #[serde(rename = "siteID")]
    pub site_id: String,
    pub domain: String,
    #[serde(rename = "sitemapURLs", default)]
    pub sitemap_urls: Vec<String>,
    #[serde(rename = "scannerType", default)]
    pub scanner_type: ScannerType,
    #[serde(rename = "captchaType", default)]
    pub captcha_type: Option<String>,
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(rename = "autoContinue")]
    pub auto_continue: bool,
    #[serde(rename = "frontierAPI", default)]
    pub frontier_api: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// One URL discovered for a site's frontier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitemapUrlEntry {
    pub url: String,
    #[serde(rename = "lastMod", default, skip_serializing_if = "Option::is_none")]
    pub last_mod: Option<String>,
    #[serde(rename = "changeFreq", default, skip_serializing_if = "Option::is_none")]
    pub change_freq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
    pub source: UrlSource,
    pub depth: u8,
}

impl SitemapUrlEntry {
    /// An entry with no sitemap metadata
    pub fn bare(url: impl Into<String>, source: UrlSource, depth: u8) -> Self {
        Self {
            url: url.into(),
            last_mod: None,
            change_freq: None,
            priority: None,
            source,
            depth,
        }
    }
}

/// A batch of frontier URLs published while a stage is still running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitemapUrlBatch {
    #[serde(rename = "taskID")]
    pub task_id: String,
    #[serde(rename = "siteID")]
    pub site_id: String,
    pub urls: Vec<SitemapUrlEntry>,
    #[serde(rename = "batchNumber")]
    pub batch_number: u32,
    #[serde(rename = "sitemapSource")]
    pub sitemap_source: String,
}

/// Outcome of one sitemap node in the walk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitemapStats {
    pub url: String,
    pub depth: u32,
    #[serde(rename = "urlCount")]
    pub url_count: usize,
    #[serde(rename = "isIndex")]
    pub is_index: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final report of the sitemap stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitemapCrawlResult {
    #[serde(rename = "taskID")]
    pub task_id: String,
    #[serde(rename = "siteID")]
    pub site_id: String,
    pub success: bool,
    #[serde(rename = "totalURLs")]
    pub total_urls: u64,
    #[serde(rename = "newURLs")]
    pub new_urls: u64,
    #[serde(rename = "sitemapStats", default)]
    pub sitemap_stats: Vec<SitemapStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "newCookies", default)]
    pub new_cookies: Vec<Cookie>,
    #[serde(rename = "autoContinue")]
    pub auto_continue: bool,
    #[serde(rename = "finishedAt")]
    pub finished_at: DateTime<Utc>,
}

/// Starts the page stage of a scan task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCrawlTask {
    pub id: String,
    #[serde(rename = "siteID")]
    pub site_id: String,
    pub domain: String,
    #[serde(rename = "scannerType", default)]
    pub scanner_type: ScannerType,
    #[serde(rename = "captchaType", default)]
    pub captcha_type: Option<String>,
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(rename = "batchSize")]
    pub batch_size: u32,
    #[serde(rename = "frontierAPI", default)]
    pub frontier_api: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Fields extracted from a crawled page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    #[serde(rename = "finalURL")]
    pub final_url: String,
    pub status_code: u16,
    pub title: Option<String>,
    pub description: Option<String>,
    pub canonical: Option<String>,
    pub h1: Option<String>,
    pub og_title: Option<String>,
    pub og_image: Option<String>,
    pub lang: Option<String>,
    pub text_length: usize,
    pub links_found: usize,
    pub depth: u8,
}

/// Per-URL outcome, published as soon as the URL is done
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSingleResult {
    #[serde(rename = "taskID")]
    pub task_id: String,
    #[serde(rename = "siteID")]
    pub site_id: String,
    pub url: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<PageData>,
    #[serde(rename = "ipBlocked")]
    pub ip_blocked: bool,
    pub timestamp: DateTime<Utc>,
}

/// Final report of the page stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCrawlResult {
    #[serde(rename = "taskID")]
    pub task_id: String,
    #[serde(rename = "siteID")]
    pub site_id: String,
    pub success: bool,
    #[serde(rename = "pagesTotal")]
    pub pages_total: u32,
    #[serde(rename = "pagesSuccess")]
    pub pages_success: u32,
    #[serde(rename = "pagesFailed")]
    pub pages_failed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "newCookies", default)]
    pub new_cookies: Vec<Cookie>,
    #[serde(rename = "noURLsAvailable")]
    pub no_urls_available: bool,
    #[serde(rename = "allIndexed")]
    pub all_indexed: bool,
    #[serde(rename = "ipBlocked")]
    pub ip_blocked: bool,
    #[serde(rename = "blockReason", default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    #[serde(rename = "finishedAt")]
    pub finished_at: DateTime<Utc>,
}

/// The two stages of a scan task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Sitemap,
    Page,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sitemap => "sitemap",
            Self::Page => "page",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    /// A worker picked the stage up
    Started,
    /// Running count of URLs found so far
    Found,
}

/// Progress reported by a worker while a stage runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgressEvent {
    #[serde(rename = "taskID")]
    pub task_id: String,
    #[serde(rename = "siteID")]
    pub site_id: String,
    pub stage: Stage,
    pub kind: ProgressKind,
    #[serde(default)]
    pub count: u64,
}

/// Emitted when a message is terminated after exhausting its deliveries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterAdvisory {
    pub subject: String,
    #[serde(rename = "messageID")]
    pub message_id: String,
    pub deliveries: u32,
    pub reason: String,
    /// Original payload as UTF-8 (lossy)
    pub payload: String,
    #[serde(rename = "terminatedAt")]
    pub terminated_at: DateTime<Utc>,
}
