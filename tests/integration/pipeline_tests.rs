//! Integration tests for the crawl pipeline
//!
//! These tests run real consumers over an in-memory queue and store, with wiremock
//! standing in for the crawled site, and drain every subject until the pipeline
//! settles.

use chrono::Utc;
use leakwatch::config::{parse_config, Config};
use leakwatch::messages::{PageCrawlResult, Subject};
use leakwatch::pipeline::{Role, Runtime};
use leakwatch::queue::{Consumer, Publisher, SqliteQueue, WorkQueue};
use leakwatch::storage::{lock_shared, shared, NewSite, SqliteStorage, Storage};
use leakwatch::{SiteStatus, StageStatus, UrlStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config() -> Config {
    parse_config(
        r#"
[queue]
database-path = ":memory:"

[store]
database-path = ":memory:"

[fetch]
request-timeout-secs = 5
connect-timeout-secs = 2

[sitemap]
workers = 1

[page]
workers = 1
idle-polls = 0

[processors]
workers = 1

[scheduler]
enabled = false
"#,
    )
    .expect("test config should parse")
}

fn create_runtime() -> Runtime {
    Runtime::new(
        test_config(),
        Arc::new(SqliteQueue::open_in_memory().expect("queue")),
        shared(SqliteStorage::open_in_memory().expect("store")),
    )
}

fn urlset(base: &str, paths: &[&str]) -> String {
    let urls: String = paths
        .iter()
        .map(|p| format!("<url><loc>{}{}</loc></url>", base, p))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{}</urlset>"#,
        urls
    )
}

fn sitemap_index(base: &str, paths: &[&str]) -> String {
    let maps: String = paths
        .iter()
        .map(|p| format!("<sitemap><loc>{}{}</loc></sitemap>", base, p))
        .collect();
    format!(
        r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{}</sitemapindex>"#,
        maps
    )
}

fn page(title: &str) -> String {
    format!(
        "<html><head><title>{}</title></head><body><h1>{}</h1><p>Watch it here in full.</p></body></html>",
        title, title
    )
}

async fn mount(server: &MockServer, at: &str, status: u16, body: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

/// Registers the mock server as a site with one known sitemap
fn register_site(runtime: &Runtime, server: &MockServer, sitemap: &str) -> String {
    lock_shared(runtime.storage())
        .expect("store lock")
        .insert_site(&NewSite {
            domain: server.uri(),
            sitemap_urls: vec![format!("{}{}", server.uri(), sitemap)],
            ..NewSite::default()
        })
        .expect("insert site")
        .id
}

/// Drains every consumer repeatedly until a full round handles nothing
async fn settle(consumers: &[Consumer]) -> usize {
    let mut total = 0;
    loop {
        let mut handled = 0;
        for consumer in consumers {
            handled += consumer.drain().await.expect("drain");
        }
        if handled == 0 {
            return total;
        }
        total += handled;
    }
}

#[tokio::test]
async fn test_sitemap_stage_fills_frontier_and_arms_page_stage() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount(
        &server,
        "/sitemap_index.xml",
        200,
        sitemap_index(&base, &["/post-sitemap.xml", "/page-sitemap.xml", "/author-sitemap.xml"]),
    )
    .await;
    mount(
        &server,
        "/post-sitemap.xml",
        200,
        urlset(&base, &["/p/1", "/p/2", "/p/3", "/p/4", "/p/5"]),
    )
    .await;
    mount(&server, "/page-sitemap.xml", 200, urlset(&base, &["/a", "/b", "/c"])).await;
    Mock::given(method("GET"))
        .and(path("/author-sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(urlset(&base, &["/author/x"])))
        .expect(0)
        .mount(&server)
        .await;

    let runtime = create_runtime();
    let site_id = register_site(&runtime, &server, "/sitemap_index.xml");
    let task = runtime
        .enqueuer()
        .enqueue_site(&site_id, true, "")
        .await
        .expect("enqueue");

    let shutdown = CancellationToken::new();
    let consumers = runtime
        .consumers(&[Role::Sitemap, Role::Processors], &shutdown)
        .expect("consumers");
    assert!(settle(&consumers).await > 0);

    let storage = lock_shared(runtime.storage()).expect("store lock");
    let urls = storage.all_urls(&site_id).expect("frontier");
    assert_eq!(urls.len(), 8);
    assert!(urls.iter().all(|u| !u.contains("/author/")));

    let stored = storage.get_task(&task.id).expect("task").expect("task exists");
    assert_eq!(stored.sitemap.status, StageStatus::Completed);
    assert_eq!(stored.sitemap.total_found, 8);
    assert_eq!(stored.page.as_ref().map(|p| p.status), Some(StageStatus::Pending));
    drop(storage);

    // The page task waits for a page worker
    assert_eq!(runtime.queue().depth(Subject::PageTasks).await.expect("depth"), 1);
    assert_eq!(runtime.queue().depth(Subject::DeadLetter).await.expect("depth"), 0);
}

/// Runs a full two-stage crawl where the second page answers 403
async fn crawl_with_blocked_page(server: &MockServer) -> (Runtime, String, String) {
    let base = server.uri();
    mount(server, "/sitemap.xml", 200, urlset(&base, &["/m/1", "/m/2", "/m/3"])).await;
    mount(server, "/m/1", 200, page("Movie One")).await;
    mount(server, "/m/2", 403, "Forbidden".to_string()).await;
    Mock::given(method("GET"))
        .and(path("/m/3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page("Movie Three")))
        .expect(0)
        .mount(server)
        .await;

    let runtime = create_runtime();
    let site_id = register_site(&runtime, server, "/sitemap.xml");
    let task = runtime
        .enqueuer()
        .enqueue_site(&site_id, true, "")
        .await
        .expect("enqueue");

    let shutdown = CancellationToken::new();
    let consumers = runtime
        .consumers(&[Role::Sitemap, Role::Page, Role::Processors], &shutdown)
        .expect("consumers");
    settle(&consumers).await;

    (runtime, site_id, task.id)
}

#[tokio::test]
async fn test_ip_block_fails_page_stage_without_site_failure() {
    let server = MockServer::start().await;
    let (runtime, site_id, task_id) = crawl_with_blocked_page(&server).await;
    let base = server.uri();

    let storage = lock_shared(runtime.storage()).expect("store lock");
    let task = storage.get_task(&task_id).expect("task").expect("task exists");
    let stage = task.page.as_ref().expect("page stage armed");
    assert_eq!(stage.status, StageStatus::Failed);
    assert_eq!(stage.total_urls, 2);
    assert_eq!(stage.success, 1);
    assert_eq!(stage.failed, 1);
    assert!(stage.error.as_deref().unwrap_or_default().starts_with("ip blocked"));
    assert_eq!(task.status(), StageStatus::Failed);

    let url_status = |p: &str| {
        storage
            .get_sitemap_url(&site_id, &format!("{}{}", base, p))
            .expect("url")
            .expect("url exists")
            .status
    };
    assert_eq!(url_status("/m/1"), UrlStatus::Indexed);
    assert_eq!(url_status("/m/2"), UrlStatus::Pending);
    assert_eq!(url_status("/m/3"), UrlStatus::Pending);
    assert_eq!(storage.count_pages().expect("pages"), 1);

    let site = storage.get_site(&site_id).expect("site").expect("site exists");
    assert_eq!(site.consecutive_failures, 0);
    assert_ne!(site.status, SiteStatus::Frozen);
    assert!(site.next_scan_at.expect("scan delayed") > Utc::now());
}

#[tokio::test]
async fn test_replayed_page_result_is_ignored() {
    let server = MockServer::start().await;
    let (runtime, site_id, task_id) = crawl_with_blocked_page(&server).await;

    let before = lock_shared(runtime.storage())
        .expect("store lock")
        .get_site(&site_id)
        .expect("site")
        .expect("site exists");

    Publisher::new(runtime.queue().clone())
        .publish(PageCrawlResult {
            task_id: task_id.clone(),
            site_id: site_id.clone(),
            success: true,
            pages_total: 3,
            pages_success: 3,
            pages_failed: 0,
            error: None,
            new_cookies: Vec::new(),
            no_urls_available: false,
            all_indexed: false,
            ip_blocked: false,
            block_reason: None,
            finished_at: Utc::now(),
        })
        .await
        .expect("publish");

    let consumers = runtime
        .consumers(&[Role::Processors], &CancellationToken::new())
        .expect("consumers");
    assert_eq!(settle(&consumers).await, 1);

    let storage = lock_shared(runtime.storage()).expect("store lock");
    let task = storage.get_task(&task_id).expect("task").expect("task exists");
    let stage = task.page.expect("page stage armed");
    assert_eq!(stage.status, StageStatus::Failed);
    assert_eq!(stage.success, 1);

    let after = storage.get_site(&site_id).expect("site").expect("site exists");
    assert_eq!(after.status, before.status);
    assert_eq!(after.last_success_at, before.last_success_at);
    assert_eq!(after.next_scan_at, before.next_scan_at);
    assert_eq!(storage.count_violation_jobs().expect("jobs"), 0);
    drop(storage);

    assert_eq!(runtime.queue().depth(Subject::DeadLetter).await.expect("depth"), 0);
}

#[tokio::test]
async fn test_cancelled_task_ignores_late_results() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount(&server, "/sitemap.xml", 200, urlset(&base, &["/m/1"])).await;

    let runtime = create_runtime();
    let site_id = register_site(&runtime, &server, "/sitemap.xml");
    let task = runtime
        .enqueuer()
        .enqueue_site(&site_id, true, "")
        .await
        .expect("enqueue");
    assert!(runtime.enqueuer().cancel_task(&task.id).expect("cancel").is_applied());

    let consumers = runtime
        .consumers(&[Role::Sitemap, Role::Processors], &CancellationToken::new())
        .expect("consumers");
    settle(&consumers).await;

    let storage = lock_shared(runtime.storage()).expect("store lock");
    let stored = storage.get_task(&task.id).expect("task").expect("task exists");
    assert_eq!(stored.status(), StageStatus::Cancelled);
    assert!(stored.page.is_none());
    drop(storage);

    assert_eq!(runtime.queue().depth(Subject::PageTasks).await.expect("depth"), 0);
}
