use crate::messages::{Message, SitemapUrlBatch};
use crate::queue::{HandlerError, MessageHandler};
use crate::storage::{SharedStorage, Storage};
use crate::lock;
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

/// Upserts discovered URLs into the site's frontier
///
/// Replays are harmless: rows are keyed by (site, url), existing rows keep their
/// status and only ever lower their depth.
pub struct UrlBatchProcessor {
    storage: SharedStorage,
}

impl UrlBatchProcessor {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    pub fn process(&self, batch: &SitemapUrlBatch) -> Result<usize, HandlerError> {
        let inserted = lock(&self.storage, "storage")?.upsert_sitemap_urls(
            &batch.site_id,
            &batch.urls,
            Utc::now(),
        )?;
        debug!(
            task_id = %batch.task_id,
            site_id = %batch.site_id,
            batch = batch.batch_number,
            urls = batch.urls.len(),
            new = inserted,
            source = %batch.sitemap_source,
            "Frontier batch ingested"
        );
        Ok(inserted)
    }
}

#[async_trait]
impl MessageHandler for UrlBatchProcessor {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        match message {
            Message::SitemapUrls(batch) => self.process(&batch).map(|_| ()),
            other => Err(unexpected(&other)),
        }
    }
}

pub(crate) fn unexpected(message: &Message) -> HandlerError {
    HandlerError::Terminal(format!("unexpected {} message", message.subject()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{SitemapUrlEntry, UrlSource};
    use crate::processors::testing::fixture;
    use crate::state::UrlStatus;

    fn batch(site_id: &str, urls: &[(&str, u8)]) -> SitemapUrlBatch {
        SitemapUrlBatch {
            task_id: "t1".to_string(),
            site_id: site_id.to_string(),
            urls: urls
                .iter()
                .map(|(u, d)| SitemapUrlEntry::bare(*u, UrlSource::Link, *d))
                .collect(),
            batch_number: 1,
            sitemap_source: "https://example.com/sitemap.xml".to_string(),
        }
    }

    #[tokio::test]
    async fn test_replayed_batch_adds_nothing() {
        let f = fixture(true);
        let processor = UrlBatchProcessor::new(f.storage.clone());
        let message = batch(&f.site_id, &[("https://example.com/a", 2), ("https://example.com/b", 1)]);

        assert_eq!(processor.process(&message).unwrap(), 2);
        assert_eq!(processor.process(&message).unwrap(), 0);
        assert_eq!(f.storage.lock().unwrap().all_urls(&f.site_id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rediscovery_keeps_status_and_lowers_depth() {
        let f = fixture(true);
        let processor = UrlBatchProcessor::new(f.storage.clone());
        processor
            .process(&batch(&f.site_id, &[("https://example.com/a", 2)]))
            .unwrap();
        f.storage
            .lock()
            .unwrap()
            .mark_url_indexed(&f.site_id, "https://example.com/a", 2, Utc::now())
            .unwrap();

        processor
            .handle(Message::SitemapUrls(batch(&f.site_id, &[("https://example.com/a", 0)])))
            .await
            .unwrap();

        let url = f
            .storage
            .lock()
            .unwrap()
            .get_sitemap_url(&f.site_id, "https://example.com/a")
            .unwrap()
            .unwrap();
        assert_eq!(url.status, UrlStatus::Indexed);
        assert_eq!(url.depth, 0);
    }
}
