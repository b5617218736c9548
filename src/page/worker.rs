use super::{classify_page, extract_page, harvest_links, ExtractedPage, PageVerdict};
use crate::config::PageConfig;
use crate::fetch::{FetchError, FetchRequest, Fetcher};
use crate::frontier::{FrontierApi, FrontierFilter, FrontierResolver, PendingUrl};
use crate::messages::{
    merge_cookies, Cookie, Message, PageCrawlResult, PageCrawlTask, PageData, PageSingleResult,
    ProgressKind, SitemapUrlBatch, Stage, TaskProgressEvent,
};
use crate::queue::{HandlerError, MessageHandler, Publisher};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Pause before re-polling a frontier that only returned URLs already attempted
const IDLE_POLL_DELAY: Duration = Duration::from_millis(500);

/// Running totals of one page-task run
#[derive(Default)]
struct PageRun {
    attempted: HashSet<String>,
    total: u32,
    success: u32,
    failed: u32,
    link_batches: u32,
    no_urls_available: bool,
    all_indexed: bool,
    ip_blocked: bool,
    block_reason: Option<String>,
    error: Option<String>,
    cookies: Vec<Cookie>,
    new_cookies: Vec<Cookie>,
}

impl PageRun {
    fn absorb_cookies(&mut self, fresh: &[Cookie]) {
        if fresh.is_empty() {
            return;
        }
        self.cookies = merge_cookies(&self.cookies, fresh);
        self.new_cookies = merge_cookies(&self.new_cookies, fresh);
    }
}

/// Outcome of crawling a single URL
enum UrlOutcome {
    Done,
    Blocked,
}

/// Page worker: consumes `PageCrawlTask`s and crawls the frontier until it runs dry
pub struct PageWorker {
    fetcher: Arc<dyn Fetcher>,
    frontier: FrontierResolver,
    publisher: Publisher,
    config: PageConfig,
    shutdown: CancellationToken,
}

impl PageWorker {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        frontier: FrontierResolver,
        publisher: Publisher,
        config: PageConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            frontier,
            publisher,
            config,
            shutdown,
        }
    }

    /// Runs the page stage of a task and publishes its aggregate result
    pub async fn crawl(&self, task: PageCrawlTask) -> Result<PageCrawlResult, HandlerError> {
        info!(task_id = %task.id, site_id = %task.site_id, domain = %task.domain, "Page crawl started");
        self.publisher
            .publish(TaskProgressEvent {
                task_id: task.id.clone(),
                site_id: task.site_id.clone(),
                stage: Stage::Page,
                kind: ProgressKind::Started,
                count: 0,
            })
            .await?;

        let api = self
            .frontier
            .resolve(&task.frontier_api)
            .map_err(|e| HandlerError::Terminal(format!("invalid frontier API: {}", e)))?;

        // One filter per run, dropped with it
        let mut filter =
            FrontierFilter::new(self.config.bloom_capacity, self.config.bloom_false_positive_rate);
        match api.all_urls(&task.site_id).await {
            Ok(urls) => filter.seed(urls),
            Err(e) => warn!(task_id = %task.id, "Could not seed frontier filter: {}", e),
        }

        let mut run = PageRun {
            cookies: task.cookies.clone(),
            ..PageRun::default()
        };
        self.drain_frontier(&task, api.as_ref(), &mut filter, &mut run).await?;

        let result = PageCrawlResult {
            task_id: task.id.clone(),
            site_id: task.site_id.clone(),
            success: !run.ip_blocked && run.error.is_none(),
            pages_total: run.total,
            pages_success: run.success,
            pages_failed: run.failed,
            error: run.error,
            new_cookies: run.new_cookies,
            no_urls_available: run.no_urls_available,
            all_indexed: run.all_indexed,
            ip_blocked: run.ip_blocked,
            block_reason: run.block_reason,
            finished_at: Utc::now(),
        };
        self.publisher.publish(result.clone()).await?;

        info!(
            task_id = %task.id,
            total = result.pages_total,
            success = result.pages_success,
            failed = result.pages_failed,
            ip_blocked = result.ip_blocked,
            all_indexed = result.all_indexed,
            "Page crawl finished"
        );
        Ok(result)
    }

    async fn drain_frontier(
        &self,
        task: &PageCrawlTask,
        api: &dyn FrontierApi,
        filter: &mut FrontierFilter,
        run: &mut PageRun,
    ) -> Result<(), HandlerError> {
        let batch_size = task.batch_size.max(1);
        let mut idle = 0;

        loop {
            if run.total >= self.config.max_pages_per_task {
                info!(task_id = %task.id, pages = run.total, "Page limit reached");
                return Ok(());
            }

            // Ask for enough rows to see a full batch past URLs still awaiting their outcome
            let limit = batch_size.saturating_add(run.attempted.len() as u32);
            let batch = match api.pending_urls(&task.site_id, limit).await {
                Ok(batch) => batch,
                Err(e) if run.total == 0 => {
                    return Err(HandlerError::Retry(format!("frontier query failed: {}", e)))
                }
                Err(e) => {
                    run.error = Some(format!("frontier query failed: {}", e));
                    return Ok(());
                }
            };

            if batch.urls.is_empty() {
                run.no_urls_available = true;
                run.all_indexed = batch.all_indexed;
                debug!(
                    task_id = %task.id,
                    all_indexed = batch.all_indexed,
                    in_retry = batch.in_retry,
                    "Frontier exhausted"
                );
                return Ok(());
            }

            let fresh: Vec<PendingUrl> = batch
                .urls
                .into_iter()
                .filter(|u| !run.attempted.contains(&u.url))
                .take(batch_size as usize)
                .collect();

            if fresh.is_empty() {
                idle += 1;
                if idle > self.config.idle_polls {
                    debug!(task_id = %task.id, "Frontier only returns attempted URLs, stopping");
                    return Ok(());
                }
                tokio::select! {
                    _ = self.shutdown.cancelled() => return Err(shutdown()),
                    _ = tokio::time::sleep(IDLE_POLL_DELAY) => continue,
                }
            }
            idle = 0;

            for pending in fresh {
                if self.shutdown.is_cancelled() {
                    return Err(shutdown());
                }
                if run.total >= self.config.max_pages_per_task {
                    break;
                }
                if let UrlOutcome::Blocked = self.crawl_url(task, pending, filter, run).await? {
                    return Ok(());
                }
            }
        }
    }

    /// Fetches, classifies and reports one URL
    async fn crawl_url(
        &self,
        task: &PageCrawlTask,
        pending: PendingUrl,
        filter: &mut FrontierFilter,
        run: &mut PageRun,
    ) -> Result<UrlOutcome, HandlerError> {
        run.attempted.insert(pending.url.clone());
        filter.insert(pending.url.clone());
        run.total += 1;

        let request = FetchRequest::new(pending.url.clone(), &run.cookies);
        let outcome = match self.fetcher.fetch(&self.shutdown, &request).await {
            Ok(outcome) => outcome,
            Err(FetchError::Cancelled) => return Err(shutdown()),
            Err(e) => {
                run.failed += 1;
                self.report(task, &pending.url, Err(e.to_string()), false).await?;
                return Ok(UrlOutcome::Done);
            }
        };
        run.absorb_cookies(&outcome.cookies);

        let base = Url::parse(&outcome.final_url)
            .or_else(|_| Url::parse(&pending.url))
            .ok();
        let extracted = match (&base, outcome.blocked) {
            (Some(base), false) => extract_page(&outcome.html, base),
            _ => ExtractedPage::default(),
        };

        match classify_page(&outcome, &extracted) {
            PageVerdict::IpBlocked(reason) => {
                warn!(task_id = %task.id, url = %pending.url, "IP blocked, stopping task: {}", reason);
                run.failed += 1;
                run.ip_blocked = true;
                run.block_reason = Some(reason.clone());
                self.report(task, &pending.url, Err(format!("ip blocked: {}", reason)), true)
                    .await?;
                Ok(UrlOutcome::Blocked)
            }
            PageVerdict::Success => {
                run.success += 1;
                if let Some(base) = &base {
                    let entries = harvest_links(
                        &extracted.links,
                        base,
                        &task.domain,
                        pending.depth,
                        self.config.max_link_depth,
                        filter,
                    );
                    if !entries.is_empty() {
                        run.link_batches += 1;
                        debug!(url = %pending.url, links = entries.len(), "Harvested links");
                        self.publisher
                            .publish(SitemapUrlBatch {
                                task_id: task.id.clone(),
                                site_id: task.site_id.clone(),
                                urls: entries,
                                batch_number: run.link_batches,
                                sitemap_source: pending.url.clone(),
                            })
                            .await?;
                    }
                }

                let page = PageData {
                    final_url: outcome.final_url.clone(),
                    status_code: outcome.status,
                    title: extracted.title,
                    description: extracted.description,
                    canonical: extracted.canonical,
                    h1: extracted.h1,
                    og_title: extracted.og_title,
                    og_image: extracted.og_image,
                    lang: extracted.lang,
                    text_length: extracted.text_length,
                    links_found: extracted.links.len(),
                    depth: pending.depth,
                };
                self.report(task, &pending.url, Ok(page), false).await?;
                Ok(UrlOutcome::Done)
            }
            verdict => {
                run.failed += 1;
                let error = verdict.error().unwrap_or_default();
                debug!(url = %pending.url, "Page failed: {}", error);
                self.report(task, &pending.url, Err(error), false).await?;
                Ok(UrlOutcome::Done)
            }
        }
    }

    async fn report(
        &self,
        task: &PageCrawlTask,
        url: &str,
        outcome: Result<PageData, String>,
        ip_blocked: bool,
    ) -> Result<(), HandlerError> {
        let (success, error, page) = match outcome {
            Ok(page) => (true, None, Some(page)),
            Err(error) => (false, Some(error), None),
        };
        self.publisher
            .publish(PageSingleResult {
                task_id: task.id.clone(),
                site_id: task.site_id.clone(),
                url: url.to_string(),
                success,
                error,
                page,
                ip_blocked,
                timestamp: Utc::now(),
            })
            .await?;
        Ok(())
    }
}

fn shutdown() -> HandlerError {
    HandlerError::Retry("page crawl cancelled by shutdown".to_string())
}

#[async_trait]
impl MessageHandler for PageWorker {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        match message {
            Message::PageTask(task) => self.crawl(task).await.map(|_| ()),
            other => Err(HandlerError::Terminal(format!(
                "page worker cannot handle {} messages",
                other.subject()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::fetch::HttpFetcher;
    use crate::messages::{SitemapUrlEntry, Subject, UrlSource};
    use crate::queue::testing::drain;
    use crate::queue::{SqliteQueue, WorkQueue};
    use crate::state::ScannerType;
    use crate::storage::{shared, NewSite, SharedStorage, SqliteStorage, Storage};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn html(title: &str, body: &str) -> String {
        format!("<html><head><title>{}</title></head><body>{}</body></html>", title, body)
    }

    async fn mount_page(server: &MockServer, at: &str, status: u16, body: String) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_string(body)
                    .insert_header("content-type", "text/html"),
            )
            .mount(server)
            .await;
    }

    struct Harness {
        queue: Arc<SqliteQueue>,
        storage: SharedStorage,
        worker: PageWorker,
        site_id: String,
    }

    fn harness(server: &MockServer, paths: &[&str]) -> Harness {
        let mut store = SqliteStorage::open_in_memory().unwrap();
        let site = store
            .insert_site(&NewSite {
                domain: server.uri(),
                ..NewSite::default()
            })
            .unwrap();
        let entries: Vec<_> = paths
            .iter()
            .map(|p| SitemapUrlEntry::bare(format!("{}{}", server.uri(), p), UrlSource::Sitemap, 0))
            .collect();
        store.upsert_sitemap_urls(&site.id, &entries, Utc::now()).unwrap();
        let storage = shared(store);

        let queue = Arc::new(SqliteQueue::open_in_memory().unwrap());
        let fetch = FetchConfig {
            request_timeout_secs: 5,
            ..FetchConfig::default()
        };
        let worker = PageWorker::new(
            Arc::new(HttpFetcher::new(&fetch).unwrap()),
            FrontierResolver::new(storage.clone(), reqwest::Client::new()),
            Publisher::new(queue.clone()),
            PageConfig {
                idle_polls: 0,
                ..PageConfig::default()
            },
            CancellationToken::new(),
        );
        Harness {
            queue,
            storage,
            worker,
            site_id: site.id,
        }
    }

    fn task(server: &MockServer, site_id: &str, batch_size: u32) -> PageCrawlTask {
        PageCrawlTask {
            id: "task-1".to_string(),
            site_id: site_id.to_string(),
            domain: server.uri(),
            scanner_type: ScannerType::Http,
            captcha_type: None,
            cookies: Vec::new(),
            batch_size,
            frontier_api: String::new(),
            created_at: Utc::now(),
        }
    }

    async fn singles(queue: &SqliteQueue) -> Vec<PageSingleResult> {
        drain(queue, Subject::PageSingle)
            .await
            .into_iter()
            .filter_map(|m| match m {
                Message::PageSingle(single) => Some(single),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_ip_block_stops_task() {
        let server = MockServer::start().await;
        mount_page(&server, "/1", 200, html("Movie One", "")).await;
        mount_page(&server, "/2", 403, "Forbidden".to_string()).await;
        Mock::given(method("GET"))
            .and(path("/3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html("Movie Three", "")))
            .expect(0)
            .mount(&server)
            .await;

        let h = harness(&server, &["/1", "/2", "/3"]);
        let result = h.worker.crawl(task(&server, &h.site_id, 10)).await.unwrap();

        assert!(result.ip_blocked);
        assert!(!result.success);
        assert_eq!(result.pages_total, 2);
        assert_eq!(result.pages_success, 1);
        assert_eq!(result.pages_failed, 1);
        assert_eq!(result.block_reason.as_deref(), Some("http 403"));

        let singles = singles(&h.queue).await;
        assert_eq!(singles.len(), 2);
        assert!(singles[0].success);
        assert!(singles[1].ip_blocked);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_batch() {
        let server = MockServer::start().await;
        mount_page(&server, "/ok", 200, html("Movie", "<p>text</p>")).await;
        mount_page(&server, "/untitled", 200, "<html><body>x</body></html>".to_string()).await;
        mount_page(&server, "/gone", 200, html("404 Not Found", "")).await;
        mount_page(&server, "/broken", 500, html("Oops", "")).await;

        let h = harness(&server, &["/ok", "/untitled", "/gone", "/broken"]);
        let result = h.worker.crawl(task(&server, &h.site_id, 10)).await.unwrap();

        assert!(result.success);
        assert_eq!(result.pages_total, 4);
        assert_eq!(result.pages_success, 1);
        assert_eq!(result.pages_failed, 3);

        let errors: Vec<String> = singles(&h.queue)
            .await
            .into_iter()
            .filter_map(|s| s.error)
            .collect();
        assert!(errors.contains(&"empty title".to_string()));
        assert!(errors.contains(&"http 500".to_string()));
        assert!(errors.iter().any(|e| e.starts_with("error page")));
    }

    #[tokio::test]
    async fn test_links_harvested_one_level_deeper() {
        let server = MockServer::start().await;
        let body = format!(
            r#"<a href="/new">New</a><a href="/1">Self</a><a href="https://elsewhere.org/x">Away</a><a href="{}/other">Abs</a>"#,
            server.uri()
        );
        mount_page(&server, "/1", 200, html("Movie", &body)).await;

        let h = harness(&server, &["/1"]);
        h.worker.crawl(task(&server, &h.site_id, 10)).await.unwrap();

        let batches: Vec<SitemapUrlBatch> = drain(h.queue.as_ref(), Subject::SitemapUrls)
            .await
            .into_iter()
            .filter_map(|m| match m {
                Message::SitemapUrls(batch) => Some(batch),
                _ => None,
            })
            .collect();
        assert_eq!(batches.len(), 1);
        let urls: Vec<&str> = batches[0].urls.iter().map(|u| u.url.as_str()).collect();
        assert_eq!(urls.len(), 2);
        assert!(urls.iter().all(|u| u.ends_with("/new") || u.ends_with("/other")));
        assert!(batches[0].urls.iter().all(|u| u.depth == 1 && u.source == UrlSource::Link));
    }

    #[tokio::test]
    async fn test_no_harvest_at_depth_cap() {
        let server = MockServer::start().await;
        mount_page(&server, "/deep", 200, html("Movie", r#"<a href="/deeper">x</a>"#)).await;

        let h = harness(&server, &[]);
        {
            let entry = SitemapUrlEntry::bare(format!("{}/deep", server.uri()), UrlSource::Link, 3);
            h.storage
                .lock()
                .unwrap()
                .upsert_sitemap_urls(&h.site_id, &[entry], Utc::now())
                .unwrap();
        }
        h.worker.crawl(task(&server, &h.site_id, 10)).await.unwrap();

        assert_eq!(h.queue.depth(Subject::SitemapUrls).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_frontier_reports_all_indexed() {
        let server = MockServer::start().await;
        let h = harness(&server, &[]);
        let result = h.worker.crawl(task(&server, &h.site_id, 10)).await.unwrap();

        assert!(result.success);
        assert!(result.no_urls_available);
        assert!(result.all_indexed);
        assert_eq!(result.pages_total, 0);
    }

    #[tokio::test]
    async fn test_attempted_urls_not_refetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html("Movie", "")))
            .expect(1)
            .mount(&server)
            .await;

        // Nothing records outcomes here, so the frontier keeps returning /1
        let h = harness(&server, &["/1"]);
        let result = h.worker.crawl(task(&server, &h.site_id, 10)).await.unwrap();

        assert_eq!(result.pages_total, 1);
        assert!(!result.no_urls_available);
    }

    #[tokio::test]
    async fn test_response_cookies_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(html("Movie", ""))
                    .insert_header("set-cookie", "cf_clearance=abc; Path=/"),
            )
            .mount(&server)
            .await;

        let h = harness(&server, &["/1"]);
        let result = h.worker.crawl(task(&server, &h.site_id, 10)).await.unwrap();

        assert_eq!(result.new_cookies.len(), 1);
        assert_eq!(result.new_cookies[0].name, "cf_clearance");
    }
}
