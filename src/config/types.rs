use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Leakwatch
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub queue: QueueConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub sitemap: SitemapConfig,
    #[serde(default)]
    pub page: PageConfig,
    #[serde(default)]
    pub frontier: FrontierConfig,
    #[serde(default)]
    pub sites: SitesConfig,
    #[serde(default)]
    pub processors: ProcessorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Durable work queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Path to the SQLite file backing the queue streams
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Deliveries after which a failing message is terminated and dead-lettered
    #[serde(rename = "max-deliver", default = "default_max_deliver")]
    pub max_deliver: u32,

    /// How long a fetched message stays leased before it is redelivered
    #[serde(rename = "ack-wait-secs", default = "default_ack_wait_secs")]
    pub ack_wait_secs: u64,

    /// Maximum unacknowledged messages per consumer group
    #[serde(rename = "max-ack-pending", default = "default_max_ack_pending")]
    pub max_ack_pending: u32,

    /// Messages fetched per pull
    #[serde(rename = "fetch-batch", default = "default_fetch_batch")]
    pub fetch_batch: u32,

    /// Sleep between empty pulls (milliseconds)
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay before a nak'd message becomes visible again (milliseconds)
    #[serde(rename = "nak-delay-ms", default = "default_nak_delay_ms")]
    pub nak_delay_ms: u64,
}

/// Document store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database holding sites, tasks and frontier URLs
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Fetch capability configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Process-wide number of concurrent fetches
    #[serde(rename = "pool-size", default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(rename = "connect-timeout-secs", default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Upper bound on a sitemap body read through the streaming fallback
    #[serde(rename = "max-sitemap-bytes", default = "default_max_sitemap_bytes")]
    pub max_sitemap_bytes: u64,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

/// Sitemap worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SitemapConfig {
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Resets on every successful fetch
    #[serde(rename = "inactivity-timeout-secs", default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,

    /// Bounds the whole task regardless of activity
    #[serde(rename = "hard-deadline-secs", default = "default_hard_deadline_secs")]
    pub hard_deadline_secs: u64,

    /// Maximum sitemap index nesting
    #[serde(rename = "max-depth", default = "default_sitemap_max_depth")]
    pub max_depth: u32,

    /// URLs per published batch
    #[serde(rename = "batch-size", default = "default_sitemap_batch_size")]
    pub batch_size: usize,

    /// Child sitemaps whose URL contains any of these fragments are never fetched
    #[serde(default = "default_sitemap_blacklist")]
    pub blacklist: Vec<String>,
}

/// Page worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PageConfig {
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Pending URLs pulled per frontier query
    #[serde(rename = "batch-size", default = "default_page_batch_size")]
    pub batch_size: u32,

    /// Links are only harvested from pages shallower than this
    #[serde(rename = "max-link-depth", default = "default_max_link_depth")]
    pub max_link_depth: u8,

    #[serde(rename = "bloom-capacity", default = "default_bloom_capacity")]
    pub bloom_capacity: usize,

    #[serde(rename = "bloom-false-positive-rate", default = "default_bloom_fp_rate")]
    pub bloom_false_positive_rate: f64,

    /// Hard stop on pages crawled by one task
    #[serde(rename = "max-pages-per-task", default = "default_max_pages_per_task")]
    pub max_pages_per_task: u32,

    /// Consecutive frontier pulls with nothing new before the task ends
    #[serde(rename = "idle-polls", default = "default_idle_polls")]
    pub idle_polls: u32,
}

/// Frontier retry policy
#[derive(Debug, Clone, Deserialize)]
pub struct FrontierConfig {
    /// Delay before an errored URL becomes eligible again
    #[serde(rename = "retry-delay-secs", default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Errors after which a URL is skipped for good
    #[serde(rename = "max-url-retries", default = "default_max_url_retries")]
    pub max_url_retries: u32,
}

/// Site lifecycle policy
#[derive(Debug, Clone, Deserialize)]
pub struct SitesConfig {
    #[serde(rename = "rescan-interval-hours", default = "default_rescan_interval_hours")]
    pub rescan_interval_hours: u64,

    #[serde(rename = "failure-backoff-mins", default = "default_failure_backoff_mins")]
    pub failure_backoff_mins: u64,

    #[serde(rename = "freeze-after-failures", default = "default_freeze_after_failures")]
    pub freeze_after_failures: u32,

    #[serde(rename = "dead-after-failures", default = "default_dead_after_failures")]
    pub dead_after_failures: u32,

    #[serde(rename = "ip-block-backoff-mins", default = "default_ip_block_backoff_mins")]
    pub ip_block_backoff_mins: u64,
}

/// Result processor pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_workers")]
    pub workers: u32,
}

/// Periodic enqueuer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(rename = "interval-secs", default = "default_scheduler_interval_secs")]
    pub interval_secs: u64,

    /// Batch size carried by page tasks created for scheduled scans
    #[serde(rename = "page-batch-size", default = "default_page_batch_size")]
    pub page_batch_size: u32,

    #[serde(rename = "auto-continue", default = "default_true")]
    pub auto_continue: bool,
}

impl QueueConfig {
    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn nak_delay(&self) -> Duration {
        Duration::from_millis(self.nak_delay_ms)
    }
}

impl SitemapConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn hard_deadline(&self) -> Duration {
        Duration::from_secs(self.hard_deadline_secs)
    }
}

impl FrontierConfig {
    pub fn retry_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retry_delay_secs as i64)
    }
}

impl SitesConfig {
    pub fn rescan_interval(&self) -> chrono::Duration {
        chrono::Duration::hours(self.rescan_interval_hours as i64)
    }

    pub fn failure_backoff(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.failure_backoff_mins as i64)
    }

    pub fn ip_block_backoff(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.ip_block_backoff_mins as i64)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_sitemap_bytes: default_max_sitemap_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for SitemapConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            hard_deadline_secs: default_hard_deadline_secs(),
            max_depth: default_sitemap_max_depth(),
            batch_size: default_sitemap_batch_size(),
            blacklist: default_sitemap_blacklist(),
        }
    }
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_page_batch_size(),
            max_link_depth: default_max_link_depth(),
            bloom_capacity: default_bloom_capacity(),
            bloom_false_positive_rate: default_bloom_fp_rate(),
            max_pages_per_task: default_max_pages_per_task(),
            idle_polls: default_idle_polls(),
        }
    }
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: default_retry_delay_secs(),
            max_url_retries: default_max_url_retries(),
        }
    }
}

impl Default for SitesConfig {
    fn default() -> Self {
        Self {
            rescan_interval_hours: default_rescan_interval_hours(),
            failure_backoff_mins: default_failure_backoff_mins(),
            freeze_after_failures: default_freeze_after_failures(),
            dead_after_failures: default_dead_after_failures(),
            ip_block_backoff_mins: default_ip_block_backoff_mins(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_scheduler_interval_secs(),
            page_batch_size: default_page_batch_size(),
            auto_continue: true,
        }
    }
}

fn default_max_deliver() -> u32 {
    5
}

fn default_ack_wait_secs() -> u64 {
    300
}

fn default_max_ack_pending() -> u32 {
    16
}

fn default_fetch_batch() -> u32 {
    4
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_nak_delay_ms() -> u64 {
    2000
}

fn default_pool_size() -> u32 {
    4
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_sitemap_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_user_agent() -> String {
    format!("leakwatch/{}", env!("CARGO_PKG_VERSION"))
}

fn default_workers() -> u32 {
    2
}

fn default_inactivity_timeout_secs() -> u64 {
    120
}

fn default_hard_deadline_secs() -> u64 {
    1800
}

fn default_sitemap_max_depth() -> u32 {
    5
}

fn default_sitemap_batch_size() -> usize {
    500
}

/// Low-value sitemap sections: per-author, per-tag and similar listings
pub fn default_sitemap_blacklist() -> Vec<String> {
    [
        "author", "tag", "category", "attachment", "user", "comment", "archive",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_page_batch_size() -> u32 {
    20
}

fn default_max_link_depth() -> u8 {
    3
}

fn default_bloom_capacity() -> usize {
    100_000
}

fn default_bloom_fp_rate() -> f64 {
    0.001
}

fn default_max_pages_per_task() -> u32 {
    5000
}

fn default_idle_polls() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    3600
}

fn default_max_url_retries() -> u32 {
    3
}

fn default_rescan_interval_hours() -> u64 {
    24
}

fn default_failure_backoff_mins() -> u64 {
    60
}

fn default_freeze_after_failures() -> u32 {
    5
}

fn default_dead_after_failures() -> u32 {
    20
}

fn default_ip_block_backoff_mins() -> u64 {
    360
}

fn default_scheduler_interval_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}
