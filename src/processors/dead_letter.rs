use super::url_batch::unexpected;
use crate::messages::{DeadLetterAdvisory, Message, Subject};
use crate::progress::{TaskProgress, Transition};
use crate::queue::{HandlerError, MessageHandler};
use crate::storage::{DeadLetterRecord, PageCounts, SharedStorage, Storage};
use crate::{lock, LeakwatchError};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Records dead-lettered messages and settles the stages they leave hanging
pub struct DeadLetterProcessor {
    storage: SharedStorage,
    progress: TaskProgress,
}

impl DeadLetterProcessor {
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            progress: TaskProgress::new(storage.clone()),
            storage,
        }
    }

    pub fn process(&self, advisory: &DeadLetterAdvisory) -> Result<(), HandlerError> {
        warn!(
            subject = %advisory.subject,
            message_id = %advisory.message_id,
            deliveries = advisory.deliveries,
            reason = %advisory.reason,
            "Dead letter"
        );

        let recorded = lock(&self.storage, "storage")?.insert_dead_letter(&DeadLetterRecord {
            message_id: advisory.message_id.clone(),
            subject: advisory.subject.clone(),
            deliveries: advisory.deliveries,
            reason: advisory.reason.clone(),
            payload: advisory.payload.clone(),
            terminated_at: advisory.terminated_at,
        })?;
        if !recorded {
            debug!(message_id = %advisory.message_id, "Dead letter already recorded");
        }

        let Ok(subject) = advisory.subject.parse::<Subject>() else {
            return Ok(());
        };
        let Ok(message) = Message::decode(subject, advisory.payload.as_bytes()) else {
            return Ok(());
        };

        let error = format!(
            "dead-lettered after {} deliveries: {}",
            advisory.deliveries, advisory.reason
        );
        let settled = match &message {
            Message::SitemapTask(task) => self.progress.fail_sitemap_stage(&task.id, &error),
            Message::PageTask(task) => {
                self.progress
                    .fail_page_stage(&task.id, &error, PageCounts::default())
            }
            _ => return Ok(()),
        };

        match settled {
            Ok(Transition::Applied) | Ok(Transition::AlreadyTerminal) => Ok(()),
            Err(LeakwatchError::TaskNotFound(id)) => {
                debug!(task_id = %id, "Dead-lettered task no longer exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl MessageHandler for DeadLetterProcessor {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        match message {
            Message::DeadLetter(advisory) => self.process(&advisory),
            other => Err(unexpected(&other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{PageCrawlTask, SitemapCrawlTask};
    use crate::processors::testing::fixture;
    use crate::state::{ScannerType, StageStatus};
    use chrono::Utc;

    fn advisory(subject: Subject, payload: Vec<u8>) -> DeadLetterAdvisory {
        DeadLetterAdvisory {
            subject: subject.to_string(),
            message_id: "m1".to_string(),
            deliveries: 5,
            reason: "fetch failed".to_string(),
            payload: String::from_utf8(payload).unwrap(),
            terminated_at: Utc::now(),
        }
    }

    fn sitemap_task(id: &str, site_id: &str) -> Vec<u8> {
        Message::from(SitemapCrawlTask {
            id: id.to_string(),
            site_id: site_id.to_string(),
            domain: "example.com".to_string(),
            sitemap_urls: Vec::new(),
            scanner_type: ScannerType::Http,
            captcha_type: None,
            cookies: Vec::new(),
            auto_continue: true,
            frontier_api: String::new(),
            created_at: Utc::now(),
        })
        .encode()
        .unwrap()
    }

    #[test]
    fn test_dead_sitemap_task_fails_stage() {
        let f = fixture(true);
        let processor = DeadLetterProcessor::new(f.storage.clone());
        let message = advisory(Subject::SitemapTasks, sitemap_task(&f.task_id, &f.site_id));

        processor.process(&message).unwrap();
        processor.process(&message).unwrap();

        let task = f.task();
        assert_eq!(task.sitemap.status, StageStatus::Failed);
        assert!(task.sitemap.error.unwrap().contains("fetch failed"));
        assert_eq!(f.storage.lock().unwrap().count_dead_letters().unwrap(), 1);
    }

    #[test]
    fn test_dead_page_task_fails_page_stage() {
        let f = fixture(true);
        f.progress().complete_sitemap_stage(&f.task_id, 1, None).unwrap();
        let payload = Message::from(PageCrawlTask {
            id: f.task_id.clone(),
            site_id: f.site_id.clone(),
            domain: "example.com".to_string(),
            scanner_type: ScannerType::Http,
            captcha_type: None,
            cookies: Vec::new(),
            batch_size: 20,
            frontier_api: String::new(),
            created_at: Utc::now(),
        })
        .encode()
        .unwrap();

        DeadLetterProcessor::new(f.storage.clone())
            .process(&advisory(Subject::PageTasks, payload))
            .unwrap();
        assert_eq!(f.task().page.unwrap().status, StageStatus::Failed);
    }

    #[test]
    fn test_unknown_task_and_garbage_are_only_recorded() {
        let f = fixture(true);
        let processor = DeadLetterProcessor::new(f.storage.clone());

        processor
            .process(&advisory(Subject::SitemapTasks, sitemap_task("gone", &f.site_id)))
            .unwrap();
        let mut garbage = advisory(Subject::PageTasks, b"not json".to_vec());
        garbage.message_id = "m2".to_string();
        processor.process(&garbage).unwrap();

        assert_eq!(f.storage.lock().unwrap().count_dead_letters().unwrap(), 2);
        assert_eq!(f.task().sitemap.status, StageStatus::Pending);
    }
}
