use super::url_batch::unexpected;
use crate::messages::{Message, ProgressKind, Stage, TaskProgressEvent};
use crate::progress::TaskProgress;
use crate::queue::{HandlerError, MessageHandler};
use crate::storage::SharedStorage;
use async_trait::async_trait;
use tracing::debug;

/// Moves stages to processing and records running sitemap counts
pub struct ProgressProcessor {
    progress: TaskProgress,
}

impl ProgressProcessor {
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            progress: TaskProgress::new(storage),
        }
    }

    pub fn process(&self, event: &TaskProgressEvent) -> Result<(), HandlerError> {
        match (event.kind, event.stage) {
            (ProgressKind::Started, stage) => {
                self.progress.mark_stage_started(&event.task_id, stage)?;
            }
            (ProgressKind::Found, Stage::Sitemap) => {
                self.progress.record_sitemap_found(&event.task_id, event.count)?;
            }
            (ProgressKind::Found, Stage::Page) => {
                debug!(task_id = %event.task_id, count = event.count, "Page progress");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for ProgressProcessor {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        match message {
            Message::Progress(event) => self.process(&event),
            other => Err(unexpected(&other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::testing::fixture;
    use crate::state::StageStatus;

    fn event(task_id: &str, stage: Stage, kind: ProgressKind, count: u64) -> TaskProgressEvent {
        TaskProgressEvent {
            task_id: task_id.to_string(),
            site_id: "s".to_string(),
            stage,
            kind,
            count,
        }
    }

    #[test]
    fn test_started_then_found() {
        let f = fixture(true);
        let processor = ProgressProcessor::new(f.storage.clone());

        processor
            .process(&event(&f.task_id, Stage::Sitemap, ProgressKind::Started, 0))
            .unwrap();
        processor
            .process(&event(&f.task_id, Stage::Sitemap, ProgressKind::Found, 40))
            .unwrap();
        processor
            .process(&event(&f.task_id, Stage::Sitemap, ProgressKind::Found, 12))
            .unwrap();

        let task = f.task();
        assert_eq!(task.sitemap.status, StageStatus::Processing);
        assert_eq!(task.sitemap.total_found, 40);
    }

    #[test]
    fn test_late_start_does_not_reopen_stage() {
        let f = fixture(true);
        f.progress().complete_sitemap_stage_only(&f.task_id, 3, None).unwrap();

        ProgressProcessor::new(f.storage.clone())
            .process(&event(&f.task_id, Stage::Sitemap, ProgressKind::Started, 0))
            .unwrap();
        assert_eq!(f.task().sitemap.status, StageStatus::Completed);
    }

    #[test]
    fn test_page_start_before_arming_is_ignored() {
        let f = fixture(true);
        ProgressProcessor::new(f.storage.clone())
            .process(&event(&f.task_id, Stage::Page, ProgressKind::Started, 0))
            .unwrap();
        assert!(f.task().page.is_none());
    }
}
