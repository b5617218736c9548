//! Process-wide fetch capacity
//!
//! One `FetchPool` is built at startup and handed to every worker. Capacity is a
//! tokio semaphore; a `FetchPermit` holds one slot and gives it back on drop, on
//! every exit path including cancellation.

use super::{FetchError, FetchOutcome, FetchRequest, Fetcher};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Capacity-bounded fetch slots shared by all workers
#[derive(Clone)]
pub struct FetchPool {
    slots: Arc<Semaphore>,
    size: usize,
}

/// One held fetch slot, released when dropped
#[derive(Debug)]
pub struct FetchPermit {
    _permit: OwnedSemaphorePermit,
}

impl FetchPool {
    pub fn new(size: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Waits for a free slot, giving up when `cancel` fires
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<FetchPermit, FetchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            permit = self.slots.clone().acquire_owned() => {
                let permit = permit.map_err(|_| FetchError::PoolClosed)?;
                trace!(available = self.slots.available_permits(), "Fetch slot acquired");
                Ok(FetchPermit { _permit: permit })
            }
        }
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// A fetcher that holds a pool slot for the duration of every fetch
#[derive(Clone)]
pub struct PooledFetcher {
    inner: Arc<dyn Fetcher>,
    pool: FetchPool,
}

impl PooledFetcher {
    pub fn new(inner: Arc<dyn Fetcher>, pool: FetchPool) -> Self {
        Self { inner, pool }
    }

    pub fn pool(&self) -> &FetchPool {
        &self.pool
    }
}

#[async_trait]
impl Fetcher for PooledFetcher {
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        request: &FetchRequest,
    ) -> Result<FetchOutcome, FetchError> {
        let _permit = self.pool.acquire(cancel).await?;
        self.inner.fetch(cancel, request).await
    }
}
