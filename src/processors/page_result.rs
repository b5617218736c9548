use super::url_batch::unexpected;
use super::{spawn_violation_pass, SitePolicy, ViolationScheduler};
use crate::messages::{Message, PageCrawlResult};
use crate::progress::{TaskProgress, Transition};
use crate::queue::{HandlerError, MessageHandler};
use crate::storage::{PageCounts, SharedStorage};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Finalizes the page stage and applies the site's crawl outcome
///
/// | Result | Stage | Site |
/// |--------|-------|------|
/// | `ipBlocked` | failed | scan delayed, streak untouched |
/// | some page succeeded | completed (failed if `success` is false) | success |
/// | every attempted page failed | completed (failed if `success` is false) | failure |
/// | nothing attempted | completed | rescan scheduled |
pub struct PageResultProcessor {
    progress: TaskProgress,
    sites: SitePolicy,
    violations: Arc<dyn ViolationScheduler>,
}

impl PageResultProcessor {
    pub fn new(
        storage: SharedStorage,
        sites: SitePolicy,
        violations: Arc<dyn ViolationScheduler>,
    ) -> Self {
        Self {
            progress: TaskProgress::new(storage),
            sites,
            violations,
        }
    }

    pub fn process(&self, result: &PageCrawlResult) -> Result<Transition, HandlerError> {
        let now = Utc::now();
        self.sites.absorb_cookies(&result.site_id, &result.new_cookies)?;
        let counts = PageCounts {
            total: result.pages_total,
            success: result.pages_success,
            failed: result.pages_failed,
        };

        if result.ip_blocked {
            let reason = result.block_reason.as_deref().unwrap_or("blocked");
            let transition = self.progress.fail_page_stage(
                &result.task_id,
                &format!("ip blocked: {}", reason),
                counts,
            )?;
            if transition.is_applied() {
                self.sites.record_ip_block(&result.site_id, now)?;
            }
            return Ok(transition);
        }

        let transition = if result.success {
            self.progress.complete_page_stage(&result.task_id, counts)?
        } else {
            let error = result.error.as_deref().unwrap_or("page crawl failed");
            warn!(task_id = %result.task_id, "Page stage failed: {}", error);
            self.progress.fail_page_stage(&result.task_id, error, counts)?
        };
        if !transition.is_applied() {
            return Ok(transition);
        }

        if result.pages_success > 0 {
            self.sites.record_success(&result.site_id, now)?;
            if result.success {
                spawn_violation_pass(
                    self.violations.clone(),
                    result.site_id.clone(),
                    result.task_id.clone(),
                );
            }
        } else if result.pages_total > 0 {
            self.sites.record_failure(&result.site_id, now)?;
        } else {
            info!(
                task_id = %result.task_id,
                all_indexed = result.all_indexed,
                "No URLs were available to crawl"
            );
            self.sites.record_idle(&result.site_id, now)?;
        }
        Ok(transition)
    }
}

#[async_trait]
impl MessageHandler for PageResultProcessor {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        match message {
            Message::PageResult(result) => self.process(&result).map(|_| ()),
            other => Err(unexpected(&other)),
        }
    }
}
