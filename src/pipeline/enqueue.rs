use crate::messages::{PageCrawlTask, SitemapCrawlTask};
use crate::progress::{TaskProgress, Transition};
use crate::queue::Publisher;
use crate::state::StageStatus;
use crate::storage::{NewTask, ScanTask, SharedStorage, Site, Storage};
use crate::{lock, LeakwatchError, Result};
use chrono::Utc;
use tracing::info;

/// Builds the sitemap task that starts a scan
pub fn sitemap_task_for(task: &ScanTask, site: &Site) -> SitemapCrawlTask {
    SitemapCrawlTask {
        id: task.id.clone(),
        site_id: site.id.clone(),
        domain: site.domain.clone(),
        sitemap_urls: site.sitemap_urls.clone(),
        scanner_type: site.scanner_type,
        captcha_type: site.captcha_type.clone(),
        cookies: site.cookies.clone(),
        auto_continue: task.auto_continue,
        frontier_api: task.frontier_api.clone(),
        created_at: Utc::now(),
    }
}

/// Builds the page task of a scan, carrying the site's current cookie jar
pub fn page_task_for(task: &ScanTask, site: &Site, batch_size: u32) -> PageCrawlTask {
    PageCrawlTask {
        id: task.id.clone(),
        site_id: site.id.clone(),
        domain: site.domain.clone(),
        scanner_type: site.scanner_type,
        captcha_type: site.captcha_type.clone(),
        cookies: site.cookies.clone(),
        batch_size,
        frontier_api: task.frontier_api.clone(),
        created_at: Utc::now(),
    }
}

/// Creates scan tasks and publishes the messages that drive them
#[derive(Clone)]
pub struct Enqueuer {
    storage: SharedStorage,
    publisher: Publisher,
    progress: TaskProgress,
    page_batch_size: u32,
}

impl Enqueuer {
    pub fn new(storage: SharedStorage, publisher: Publisher, page_batch_size: u32) -> Self {
        Self {
            progress: TaskProgress::new(storage.clone()),
            storage,
            publisher,
            page_batch_size,
        }
    }

    /// Creates a scan task for a site and publishes its sitemap task
    pub async fn enqueue_site(
        &self,
        site_id: &str,
        auto_continue: bool,
        frontier_api: &str,
    ) -> Result<ScanTask> {
        let (task, message) = {
            let mut storage = lock(&self.storage, "storage")?;
            let site = storage
                .get_site(site_id)?
                .ok_or_else(|| LeakwatchError::SiteNotFound(site_id.to_string()))?;
            let task = storage.insert_task(&NewTask {
                site_id: site.id.clone(),
                domain: site.domain.clone(),
                auto_continue,
                frontier_api: frontier_api.to_string(),
            })?;
            let message = sitemap_task_for(&task, &site);
            (task, message)
        };

        self.publisher.publish(message).await?;
        info!(task_id = %task.id, site_id = %task.site_id, domain = %task.domain, "Scan task enqueued");
        Ok(task)
    }

    /// Arms the page stage of a task completed without it and publishes its page task
    ///
    /// Calling it again while the page stage is still pending republishes the task.
    pub async fn trigger_page_stage(&self, task_id: &str) -> Result<ScanTask> {
        self.progress.arm_page_stage(task_id)?;

        let (task, message) = {
            let storage = lock(&self.storage, "storage")?;
            let task = storage
                .get_task(task_id)?
                .ok_or_else(|| LeakwatchError::TaskNotFound(task_id.to_string()))?;
            match task.page.as_ref().map(|p| p.status) {
                Some(StageStatus::Pending) => {}
                Some(status) => {
                    return Err(LeakwatchError::InvalidRequest(format!(
                        "page stage of task {} is already {}",
                        task_id, status
                    )))
                }
                None => {
                    return Err(LeakwatchError::InvalidRequest(format!(
                        "sitemap stage of task {} is {}, not completed",
                        task_id, task.sitemap.status
                    )))
                }
            }
            let site = storage
                .get_site(&task.site_id)?
                .ok_or_else(|| LeakwatchError::SiteNotFound(task.site_id.clone()))?;
            let message = page_task_for(&task, &site, self.page_batch_size);
            (task, message)
        };

        self.publisher.publish(message).await?;
        info!(task_id = %task.id, "Page stage triggered");
        Ok(task)
    }

    /// Moves every unsettled stage of a task to cancelled
    ///
    /// Workers already running finish normally; their results no longer change the task.
    pub fn cancel_task(&self, task_id: &str) -> Result<Transition> {
        self.progress.cancel_task(task_id)
    }
}
