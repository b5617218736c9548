use super::url_batch::unexpected;
use super::SitePolicy;
use crate::messages::{Message, SitemapCrawlResult};
use crate::pipeline::page_task_for;
use crate::progress::TaskProgress;
use crate::queue::{HandlerError, MessageHandler, Publisher};
use crate::state::StageStatus;
use crate::storage::{SharedStorage, Storage};
use crate::{lock, LeakwatchError};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

/// Folds sitemap results into the task and continues into the page stage
pub struct SitemapResultProcessor {
    storage: SharedStorage,
    progress: TaskProgress,
    sites: SitePolicy,
    publisher: Publisher,
    page_batch_size: u32,
}

impl SitemapResultProcessor {
    pub fn new(
        storage: SharedStorage,
        sites: SitePolicy,
        publisher: Publisher,
        page_batch_size: u32,
    ) -> Self {
        Self {
            progress: TaskProgress::new(storage.clone()),
            storage,
            sites,
            publisher,
            page_batch_size,
        }
    }

    pub async fn process(&self, result: &SitemapCrawlResult) -> Result<(), HandlerError> {
        let now = Utc::now();
        self.sites.absorb_cookies(&result.site_id, &result.new_cookies)?;

        if !result.success {
            let error = result.error.as_deref().unwrap_or("sitemap crawl failed");
            if self.progress.fail_sitemap_stage(&result.task_id, error)?.is_applied() {
                warn!(task_id = %result.task_id, site_id = %result.site_id, "Sitemap stage failed: {}", error);
                self.sites.record_failure(&result.site_id, now)?;
            }
            return Ok(());
        }

        if let Some(error) = &result.error {
            info!(task_id = %result.task_id, "Sitemap stage finished with a diagnostic: {}", error);
        }

        if !result.auto_continue {
            let transition = self.progress.complete_sitemap_stage_only(
                &result.task_id,
                result.total_urls,
                result.error.as_deref(),
            )?;
            if transition.is_applied() {
                self.sites.record_success(&result.site_id, now)?;
                info!(task_id = %result.task_id, "Sitemap stage completed, page stage awaits a manual trigger");
            }
            return Ok(());
        }

        self.progress.complete_sitemap_stage(
            &result.task_id,
            result.total_urls,
            result.error.as_deref(),
        )?;

        // Also covers a replay after a crash between the state write and the publish
        if let Some(task) = self.armed_page_task(&result.task_id)? {
            let id = self.publisher.publish(task).await?;
            info!(
                task_id = %result.task_id,
                message_id = %id,
                total_urls = result.total_urls,
                new_urls = result.new_urls,
                "Page stage published"
            );
        }
        Ok(())
    }

    /// The page task to publish while the page stage is armed but not yet picked up
    fn armed_page_task(
        &self,
        task_id: &str,
    ) -> Result<Option<crate::messages::PageCrawlTask>, HandlerError> {
        let storage = lock(&self.storage, "storage")?;
        let task = storage
            .get_task(task_id)?
            .ok_or_else(|| LeakwatchError::TaskNotFound(task_id.to_string()))?;
        if task.page.as_ref().map(|p| p.status) != Some(StageStatus::Pending) {
            return Ok(None);
        }
        let site = storage
            .get_site(&task.site_id)?
            .ok_or_else(|| LeakwatchError::SiteNotFound(task.site_id.clone()))?;
        Ok(Some(page_task_for(&task, &site, self.page_batch_size)))
    }
}

#[async_trait]
impl MessageHandler for SitemapResultProcessor {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        match message {
            Message::SitemapResult(result) => self.process(&result).await,
            other => Err(unexpected(&other)),
        }
    }
}
