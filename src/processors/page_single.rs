use super::url_batch::unexpected;
use crate::config::FrontierConfig;
use crate::messages::{Message, PageSingleResult};
use crate::progress::TaskProgress;
use crate::queue::{HandlerError, MessageHandler};
use crate::state::UrlStatus;
use crate::storage::{PageRecord, SharedStorage, Storage};
use crate::lock;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

/// Applies per-URL outcomes: page data, frontier status and running counters
pub struct PageSingleProcessor {
    storage: SharedStorage,
    progress: TaskProgress,
    frontier: FrontierConfig,
}

impl PageSingleProcessor {
    pub fn new(storage: SharedStorage, frontier: FrontierConfig) -> Self {
        Self {
            progress: TaskProgress::new(storage.clone()),
            storage,
            frontier,
        }
    }

    pub fn process(&self, single: &PageSingleResult) -> Result<(), HandlerError> {
        let now = Utc::now();

        if single.success {
            // Both writes are upserts, so they can run ahead of the outcome guard
            {
                let mut storage = lock(&self.storage, "storage")?;
                if let Some(page) = &single.page {
                    storage.save_page(&PageRecord {
                        site_id: single.site_id.clone(),
                        task_id: single.task_id.clone(),
                        url: single.url.clone(),
                        data: page.clone(),
                        crawled_at: single.timestamp,
                    })?;
                }
                let depth = single.page.as_ref().map(|p| p.depth).unwrap_or(0);
                storage.mark_url_indexed(&single.site_id, &single.url, depth, now)?;
            }
            self.progress.on_page_processed(&single.task_id, &single.url, true)?;
            return Ok(());
        }

        let error = single.error.as_deref().unwrap_or("unknown error");
        let first = self
            .progress
            .on_page_processed(&single.task_id, &single.url, false)?
            .is_applied();

        // Error counts only move on the first delivery, and a block says nothing about the URL
        if first && !single.ip_blocked {
            let status = lock(&self.storage, "storage")?.mark_url_error(
                &single.site_id,
                &single.url,
                error,
                now + self.frontier.retry_delay(),
                self.frontier.max_url_retries,
                now,
            )?;
            if status == UrlStatus::Skipped {
                info!(site_id = %single.site_id, url = %single.url, "URL skipped after repeated errors: {}", error);
            } else {
                debug!(site_id = %single.site_id, url = %single.url, "URL failed: {}", error);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for PageSingleProcessor {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        match message {
            Message::PageSingle(single) => self.process(&single),
            other => Err(unexpected(&other)),
        }
    }
}
