use super::{FrontierApi, FrontierError, PendingBatch, PendingUrl};
use crate::storage::{SharedStorage, Storage};
use async_trait::async_trait;
use chrono::Utc;

/// Frontier queries answered from the local document store
#[derive(Clone)]
pub struct StoreFrontierApi {
    storage: SharedStorage,
}

impl StoreFrontierApi {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    fn with_store<T>(
        &self,
        f: impl FnOnce(&crate::storage::SqliteStorage) -> Result<T, FrontierError>,
    ) -> Result<T, FrontierError> {
        let guard = self
            .storage
            .lock()
            .map_err(|_| FrontierError::Poisoned("store".to_string()))?;
        f(&guard)
    }
}

#[async_trait]
impl FrontierApi for StoreFrontierApi {
    async fn pending_urls(&self, site_id: &str, limit: u32) -> Result<PendingBatch, FrontierError> {
        let now = Utc::now();
        self.with_store(|store| {
            let pending = store.pending_urls(site_id, now, limit)?;
            let summary = store.frontier_summary(site_id, now)?;
            Ok(PendingBatch {
                all_indexed: pending.is_empty() && summary.eligible == 0 && summary.in_retry == 0,
                in_retry: summary.in_retry > 0,
                total_urls: summary.total,
                indexed_urls: summary.indexed,
                urls: pending
                    .into_iter()
                    .map(|u| PendingUrl {
                        url: u.url,
                        depth: u.depth,
                    })
                    .collect(),
            })
        })
    }

    async fn all_urls(&self, site_id: &str) -> Result<Vec<String>, FrontierError> {
        self.with_store(|store| Ok(store.all_urls(site_id)?))
    }
}
