use super::{is_blacklisted, SitemapItem, SitemapStream};
use crate::config::SitemapConfig;
use crate::fetch::{FetchError, FetchOutcome, FetchRequest, Fetcher};
use crate::frontier::{FrontierFilter, FrontierResolver};
use crate::messages::{
    merge_cookies, Cookie, Message, ProgressKind, SitemapCrawlResult, SitemapCrawlTask,
    SitemapStats, SitemapUrlBatch, SitemapUrlEntry, Stage, TaskProgressEvent, UrlSource,
};
use crate::queue::{HandlerError, MessageHandler, Publisher, QueueError};
use crate::url::{homepage_url, normalize_url, onto_site_host};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// False-positive rate of the known-URL filter used to count new URLs
const KNOWN_URLS_FP_RATE: f64 = 0.001;

/// Why a walk ended early
#[derive(Debug)]
enum WalkStop {
    Timeout(String),
    Cancelled,
    Queue(QueueError),
}

impl From<QueueError> for WalkStop {
    fn from(err: QueueError) -> Self {
        WalkStop::Queue(err)
    }
}

type WalkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), WalkStop>> + Send + 'a>>;

/// State of one task's walk, threaded through every recursive call
struct SitemapWalk {
    task_id: String,
    site_id: String,
    domain: String,
    cancel: CancellationToken,
    visited: HashSet<String>,
    seen_urls: HashSet<String>,
    known: Option<FrontierFilter>,
    pending: Vec<SitemapUrlEntry>,
    batch_number: u32,
    total_urls: u64,
    new_urls: u64,
    stats: Vec<SitemapStats>,
    cookies: Vec<Cookie>,
    new_cookies: Vec<Cookie>,
    last_activity: Instant,
    deadline: Instant,
}

impl SitemapWalk {
    fn absorb_cookies(&mut self, fresh: &[Cookie]) {
        if fresh.is_empty() {
            return;
        }
        self.cookies = merge_cookies(&self.cookies, fresh);
        self.new_cookies = merge_cookies(&self.new_cookies, fresh);
    }

    fn node_failed(&mut self, url: &str, depth: u32, error: impl Into<String>) {
        let error = error.into();
        debug!(task_id = %self.task_id, sitemap = %url, "Sitemap node failed: {}", error);
        self.stats.push(SitemapStats {
            url: url.to_string(),
            depth,
            url_count: 0,
            is_index: false,
            error: Some(error),
        });
    }

    /// Normalizes and deduplicates a listed page, returning the frontier entry
    fn accept(
        &mut self,
        loc: &str,
        last_mod: Option<String>,
        change_freq: Option<String>,
        priority: Option<f64>,
    ) -> Option<SitemapUrlEntry> {
        let url = onto_site_host(normalize_url(loc).ok()?, &self.domain)?.to_string();
        if !self.seen_urls.insert(url.clone()) {
            return None;
        }

        self.total_urls += 1;
        let known = self.known.as_ref().map(|f| f.check(&url)).unwrap_or(false);
        if !known {
            self.new_urls += 1;
        }

        Some(SitemapUrlEntry {
            url,
            last_mod,
            change_freq,
            priority,
            source: UrlSource::Sitemap,
            depth: 0,
        })
    }
}

/// Sitemap worker: consumes `SitemapCrawlTask`s, publishes URL batches and one result
pub struct SitemapWorker {
    fetcher: Arc<dyn Fetcher>,
    fallback: Arc<dyn Fetcher>,
    frontier: FrontierResolver,
    publisher: Publisher,
    config: SitemapConfig,
    shutdown: CancellationToken,
}

impl SitemapWorker {
    /// Creates a worker
    ///
    /// `fallback` is tried once for a sitemap whose primary fetch timed out.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        fallback: Arc<dyn Fetcher>,
        frontier: FrontierResolver,
        publisher: Publisher,
        config: SitemapConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            fallback,
            frontier,
            publisher,
            config,
            shutdown,
        }
    }

    /// Runs the sitemap stage of a task and publishes its result
    pub async fn crawl(&self, task: SitemapCrawlTask) -> Result<SitemapCrawlResult, HandlerError> {
        info!(task_id = %task.id, site_id = %task.site_id, domain = %task.domain, "Sitemap crawl started");
        self.progress(&task, ProgressKind::Started, 0).await?;

        let started = Instant::now();
        let mut walk = SitemapWalk {
            task_id: task.id.clone(),
            site_id: task.site_id.clone(),
            domain: task.domain.clone(),
            cancel: self.shutdown.child_token(),
            visited: HashSet::new(),
            seen_urls: HashSet::new(),
            known: self.known_urls(&task).await,
            pending: Vec::new(),
            batch_number: 0,
            total_urls: 0,
            new_urls: 0,
            stats: Vec::new(),
            cookies: task.cookies.clone(),
            new_cookies: Vec::new(),
            last_activity: started,
            deadline: started + self.config.hard_deadline(),
        };

        let outcome = if task.sitemap_urls.is_empty() {
            self.seed_homepage(&mut walk).await
        } else {
            self.walk_seeds(&mut walk, &task.sitemap_urls).await
        };

        let (success, error) = match outcome {
            Ok(()) => {
                let failures: Vec<&str> = walk
                    .stats
                    .iter()
                    .filter_map(|s| s.error.as_deref())
                    .collect();
                if walk.total_urls == 0 && !failures.is_empty() && failures.len() == walk.stats.len() {
                    (false, Some(format!("no sitemap could be read: {}", failures[0])))
                } else {
                    (true, None)
                }
            }
            Err(WalkStop::Timeout(reason)) => {
                if walk.total_urls > 0 {
                    warn!(task_id = %task.id, urls = walk.total_urls, "Sitemap crawl stopped early: {}", reason);
                    (true, Some(format!("{}; partial results ({} URLs)", reason, walk.total_urls)))
                } else {
                    (false, Some(reason))
                }
            }
            Err(WalkStop::Cancelled) => {
                return Err(HandlerError::Retry("sitemap crawl cancelled by shutdown".to_string()))
            }
            Err(WalkStop::Queue(e)) => return Err(e.into()),
        };

        let result = SitemapCrawlResult {
            task_id: task.id.clone(),
            site_id: task.site_id.clone(),
            success,
            total_urls: walk.total_urls,
            new_urls: walk.new_urls,
            sitemap_stats: walk.stats,
            error,
            new_cookies: walk.new_cookies,
            auto_continue: task.auto_continue,
            finished_at: Utc::now(),
        };
        self.publisher.publish(result.clone()).await?;

        info!(
            task_id = %task.id,
            success = result.success,
            total_urls = result.total_urls,
            new_urls = result.new_urls,
            batches = walk.batch_number,
            "Sitemap crawl finished"
        );
        Ok(result)
    }

    /// Loads the URLs the frontier already knows, for counting new ones
    async fn known_urls(&self, task: &SitemapCrawlTask) -> Option<FrontierFilter> {
        let api = match self.frontier.resolve(&task.frontier_api) {
            Ok(api) => api,
            Err(e) => {
                warn!(task_id = %task.id, "Frontier unavailable, new URL count will be approximate: {}", e);
                return None;
            }
        };
        match api.all_urls(&task.site_id).await {
            Ok(urls) => {
                let mut filter = FrontierFilter::new(urls.len() * 2 + 1024, KNOWN_URLS_FP_RATE);
                filter.seed(urls);
                Some(filter)
            }
            Err(e) => {
                warn!(task_id = %task.id, "Frontier listing failed, new URL count will be approximate: {}", e);
                None
            }
        }
    }

    /// Seeds the frontier with the homepage when a site has no known sitemaps
    async fn seed_homepage(&self, walk: &mut SitemapWalk) -> Result<(), WalkStop> {
        let homepage = homepage_url(&walk.domain);
        debug!(task_id = %walk.task_id, url = %homepage, "No sitemaps known, seeding homepage");
        if let Some(mut entry) = walk.accept(&homepage, None, None, None) {
            entry.source = UrlSource::Homepage;
            walk.pending.push(entry);
        }
        walk.stats.push(SitemapStats {
            url: homepage.clone(),
            depth: 0,
            url_count: walk.pending.len(),
            is_index: false,
            error: None,
        });
        self.flush(walk, &homepage).await?;
        Ok(())
    }

    async fn walk_seeds(&self, walk: &mut SitemapWalk, seeds: &[String]) -> Result<(), WalkStop> {
        for seed in seeds {
            self.walk(walk, seed.clone(), 0).await?;
        }
        Ok(())
    }

    /// Visits one sitemap node and recurses into its children
    fn walk<'a>(&'a self, walk: &'a mut SitemapWalk, url: String, depth: u32) -> WalkFuture<'a> {
        Box::pin(async move {
            if walk.cancel.is_cancelled() {
                return Err(WalkStop::Cancelled);
            }
            if depth >= self.config.max_depth {
                walk.node_failed(&url, depth, "maximum sitemap depth exceeded");
                return Ok(());
            }
            if !walk.visited.insert(url.clone()) {
                debug!(sitemap = %url, "Sitemap already visited");
                return Ok(());
            }

            let Some(outcome) = self.fetch_node(walk, &url, depth).await? else {
                return Ok(());
            };
            walk.last_activity = Instant::now();
            walk.absorb_cookies(&outcome.cookies);

            if outcome.blocked || outcome.is_captcha {
                let reason = outcome.block_reason.unwrap_or_else(|| "blocked".to_string());
                walk.node_failed(&url, depth, reason);
                return Ok(());
            }
            if outcome.status >= 400 {
                walk.node_failed(&url, depth, format!("http {}", outcome.status));
                return Ok(());
            }

            let mut children = Vec::new();
            let mut url_count = 0;
            let mut error = None;
            let mut stream = SitemapStream::new(&outcome.html);
            for item in stream.by_ref() {
                match item {
                    Ok(SitemapItem::Sitemap { loc, .. }) => {
                        if is_blacklisted(&loc, &self.config.blacklist) {
                            debug!(sitemap = %loc, "Skipping blacklisted sitemap");
                        } else {
                            children.push(loc);
                        }
                    }
                    Ok(SitemapItem::Url {
                        loc,
                        last_mod,
                        change_freq,
                        priority,
                    }) => {
                        if let Some(entry) = walk.accept(&loc, last_mod, change_freq, priority) {
                            walk.pending.push(entry);
                            url_count += 1;
                            if walk.pending.len() >= self.config.batch_size {
                                self.flush(walk, &url).await?;
                            }
                        }
                    }
                    Err(e) => {
                        error = Some(e.to_string());
                        break;
                    }
                }
            }
            let is_index = stream.is_index();
            self.flush(walk, &url).await?;

            debug!(sitemap = %url, depth, url_count, children = children.len(), "Sitemap node parsed");
            walk.stats.push(SitemapStats {
                url,
                depth,
                url_count,
                is_index,
                error,
            });

            for child in children {
                self.walk(walk, child, depth + 1).await?;
            }
            Ok(())
        })
    }

    /// Fetches a node under the walk's timers, falling back to the streaming fetch
    ///
    /// Returns `Ok(None)` when the node failed in a way that only affects this node.
    async fn fetch_node(
        &self,
        walk: &mut SitemapWalk,
        url: &str,
        depth: u32,
    ) -> Result<Option<FetchOutcome>, WalkStop> {
        if Instant::now() >= walk.deadline {
            return Err(WalkStop::Timeout("hard deadline exceeded".to_string()));
        }

        let request = FetchRequest::new(url, &walk.cookies);
        let limit = (walk.last_activity + self.config.inactivity_timeout()).min(walk.deadline);
        match timeout_at(limit, self.fetcher.fetch(&walk.cancel, &request)).await {
            Ok(Ok(outcome)) => return Ok(Some(outcome)),
            Ok(Err(FetchError::Cancelled)) => return Err(WalkStop::Cancelled),
            Ok(Err(e)) if !e.is_timeout() => {
                walk.node_failed(url, depth, e.to_string());
                return Ok(None);
            }
            _ => {}
        }

        if Instant::now() >= walk.deadline {
            return Err(WalkStop::Timeout("hard deadline exceeded".to_string()));
        }

        warn!(task_id = %walk.task_id, sitemap = %url, "Sitemap fetch timed out, retrying with streaming fetch");
        match timeout_at(walk.deadline, self.fallback.fetch(&walk.cancel, &request)).await {
            Ok(Ok(outcome)) => Ok(Some(outcome)),
            Ok(Err(FetchError::Cancelled)) => Err(WalkStop::Cancelled),
            Ok(Err(e)) if e.is_timeout() => Err(WalkStop::Timeout(format!(
                "inactivity timeout fetching {}",
                url
            ))),
            Ok(Err(e)) => {
                walk.node_failed(url, depth, e.to_string());
                Ok(None)
            }
            Err(_) => Err(WalkStop::Timeout("hard deadline exceeded".to_string())),
        }
    }

    /// Publishes the pending URLs as one batch
    async fn flush(&self, walk: &mut SitemapWalk, source: &str) -> Result<(), QueueError> {
        if walk.pending.is_empty() {
            return Ok(());
        }

        walk.batch_number += 1;
        let urls = std::mem::take(&mut walk.pending);
        let count = urls.len();
        self.publisher
            .publish(SitemapUrlBatch {
                task_id: walk.task_id.clone(),
                site_id: walk.site_id.clone(),
                urls,
                batch_number: walk.batch_number,
                sitemap_source: source.to_string(),
            })
            .await?;
        debug!(task_id = %walk.task_id, batch = walk.batch_number, count, "Published URL batch");

        self.publisher
            .publish(TaskProgressEvent {
                task_id: walk.task_id.clone(),
                site_id: walk.site_id.clone(),
                stage: Stage::Sitemap,
                kind: ProgressKind::Found,
                count: walk.total_urls,
            })
            .await?;
        Ok(())
    }

    async fn progress(
        &self,
        task: &SitemapCrawlTask,
        kind: ProgressKind,
        count: u64,
    ) -> Result<(), QueueError> {
        self.publisher
            .publish(TaskProgressEvent {
                task_id: task.id.clone(),
                site_id: task.site_id.clone(),
                stage: Stage::Sitemap,
                kind,
                count,
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for SitemapWorker {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        match message {
            Message::SitemapTask(task) => self.crawl(task).await.map(|_| ()),
            other => Err(HandlerError::Terminal(format!(
                "sitemap worker cannot handle {} messages",
                other.subject()
            ))),
        }
    }
}
