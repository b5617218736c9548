use crate::storage::{SharedStorage, Storage};
use crate::{lock, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Requests a violation recalculation for a freshly crawled site
#[async_trait]
pub trait ViolationScheduler: Send + Sync {
    async fn schedule(&self, site_id: &str, task_id: &str) -> Result<()>;
}

/// Queues recalculation jobs in the document store, one per (site, task)
pub struct StoreViolationScheduler {
    storage: SharedStorage,
}

impl StoreViolationScheduler {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ViolationScheduler for StoreViolationScheduler {
    async fn schedule(&self, site_id: &str, task_id: &str) -> Result<()> {
        let queued = lock(&self.storage, "storage")?.enqueue_violation_job(site_id, task_id, Utc::now())?;
        if !queued {
            debug!(site_id = %site_id, task_id = %task_id, "Violation job already queued");
        }
        Ok(())
    }
}

/// Runs a violation scheduling request in the background
///
/// Failures are logged and go no further.
pub fn spawn_violation_pass(
    scheduler: Arc<dyn ViolationScheduler>,
    site_id: String,
    task_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = scheduler.schedule(&site_id, &task_id).await {
            error!(site_id = %site_id, task_id = %task_id, "Violation scheduling failed: {}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{shared, NewSite, SqliteStorage};
    use crate::LeakwatchError;

    struct Failing;

    #[async_trait]
    impl ViolationScheduler for Failing {
        async fn schedule(&self, _site_id: &str, _task_id: &str) -> Result<()> {
            Err(LeakwatchError::InvalidRequest("index offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_scheduler_queues_once() {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let site = storage
            .insert_site(&NewSite {
                domain: "example.com".to_string(),
                ..NewSite::default()
            })
            .unwrap();
        let storage = shared(storage);
        let scheduler = Arc::new(StoreViolationScheduler::new(storage.clone()));

        spawn_violation_pass(scheduler.clone(), site.id.clone(), "t1".to_string())
            .await
            .unwrap();
        spawn_violation_pass(scheduler, site.id, "t1".to_string())
            .await
            .unwrap();

        assert_eq!(storage.lock().unwrap().count_violation_jobs().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_contained() {
        let handle = spawn_violation_pass(Arc::new(Failing), "s".to_string(), "t".to_string());
        assert!(handle.await.is_ok());
    }
}
