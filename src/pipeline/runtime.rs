//! Worker pools
//!
//! The runtime owns the shared handles (queue, store, fetch pool) and starts one
//! fixed-size pool of consumers per role. Every consumer and the scheduler loop
//! watch the same cancellation token, so cancelling it drains the whole process.

use super::{Enqueuer, SiteScheduler};
use crate::config::Config;
use crate::fetch::{build_http_client, FetchPool, Fetcher, HttpFetcher, PooledFetcher, StreamingFetcher};
use crate::frontier::FrontierResolver;
use crate::messages::Subject;
use crate::page::PageWorker;
use crate::processors::{processor_handlers, StoreViolationScheduler, ViolationScheduler};
use crate::queue::{Consumer, ConsumerSpec, MessageHandler, Publisher, SqliteQueue, WorkQueue};
use crate::sitemap::SitemapWorker;
use crate::storage::{open_storage, shared, SharedStorage};
use crate::Result;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A group of pools a process can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    /// Sitemap workers
    Sitemap,
    /// Page workers
    Page,
    /// Every result processor
    Processors,
    /// The periodic site scheduler
    Scheduler,
}

impl Role {
    pub fn all() -> Vec<Self> {
        vec![Self::Sitemap, Self::Page, Self::Processors, Self::Scheduler]
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sitemap => "sitemap",
            Self::Page => "page",
            Self::Processors => "processors",
            Self::Scheduler => "scheduler",
        };
        write!(f, "{}", name)
    }
}

pub struct Runtime {
    config: Config,
    queue: Arc<dyn WorkQueue>,
    storage: SharedStorage,
    pool: FetchPool,
    violations: Arc<dyn ViolationScheduler>,
}

impl Runtime {
    /// Opens the queue and store files named in the config
    pub fn open(config: Config) -> Result<Self> {
        let queue = SqliteQueue::open(Path::new(&config.queue.database_path))?;
        let storage = open_storage(Path::new(&config.store.database_path))?;
        Ok(Self::new(config, Arc::new(queue), shared(storage)))
    }

    pub fn new(config: Config, queue: Arc<dyn WorkQueue>, storage: SharedStorage) -> Self {
        let pool = FetchPool::new(config.fetch.pool_size as usize);
        let violations = Arc::new(StoreViolationScheduler::new(storage.clone()));
        Self {
            config,
            queue,
            storage,
            pool,
            violations,
        }
    }

    /// Replaces the store-backed violation scheduler
    pub fn with_violation_scheduler(mut self, violations: Arc<dyn ViolationScheduler>) -> Self {
        self.violations = violations;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }

    pub fn fetch_pool(&self) -> &FetchPool {
        &self.pool
    }

    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.queue.clone())
    }

    pub fn enqueuer(&self) -> Enqueuer {
        Enqueuer::new(
            self.storage.clone(),
            self.publisher(),
            self.config.scheduler.page_batch_size,
        )
    }

    /// Builds the consumers of the given roles
    ///
    /// Every consumer renews the lease of the message it is handling, so task
    /// subjects share the queue's `ack_wait` with the processors.
    pub fn consumers(&self, roles: &[Role], shutdown: &CancellationToken) -> Result<Vec<Consumer>> {
        let mut consumers = Vec::new();

        if roles.contains(&Role::Sitemap) {
            let worker: Arc<dyn MessageHandler> = Arc::new(self.sitemap_worker(shutdown)?);
            let spec = ConsumerSpec::from_config(Subject::SitemapTasks, &self.config.queue);
            self.pool_of(&mut consumers, spec, worker, self.config.sitemap.workers);
        }

        if roles.contains(&Role::Page) {
            let worker: Arc<dyn MessageHandler> = Arc::new(self.page_worker(shutdown)?);
            let spec = ConsumerSpec::from_config(Subject::PageTasks, &self.config.queue);
            self.pool_of(&mut consumers, spec, worker, self.config.page.workers);
        }

        if roles.contains(&Role::Processors) {
            for (subject, handler) in processor_handlers(
                self.storage.clone(),
                self.publisher(),
                &self.config,
                self.violations.clone(),
            ) {
                let spec = ConsumerSpec::from_config(subject, &self.config.queue);
                self.pool_of(&mut consumers, spec, handler, self.config.processors.workers);
            }
        }

        Ok(consumers)
    }

    fn pool_of(
        &self,
        consumers: &mut Vec<Consumer>,
        spec: ConsumerSpec,
        handler: Arc<dyn MessageHandler>,
        workers: u32,
    ) {
        for _ in 0..workers.max(1) {
            consumers.push(Consumer::new(self.queue.clone(), spec.clone(), handler.clone()));
        }
    }

    fn pooled(&self, inner: Arc<dyn Fetcher>) -> Arc<dyn Fetcher> {
        Arc::new(PooledFetcher::new(inner, self.pool.clone()))
    }

    fn frontier(&self) -> Result<FrontierResolver> {
        let client = build_http_client(
            &self.config.fetch,
            Duration::from_secs(self.config.fetch.request_timeout_secs),
        )?;
        Ok(FrontierResolver::new(self.storage.clone(), client))
    }

    pub fn sitemap_worker(&self, shutdown: &CancellationToken) -> Result<SitemapWorker> {
        Ok(SitemapWorker::new(
            self.pooled(Arc::new(HttpFetcher::new(&self.config.fetch)?)),
            self.pooled(Arc::new(StreamingFetcher::new(&self.config.fetch)?)),
            self.frontier()?,
            self.publisher(),
            self.config.sitemap.clone(),
            shutdown.clone(),
        ))
    }

    pub fn page_worker(&self, shutdown: &CancellationToken) -> Result<PageWorker> {
        Ok(PageWorker::new(
            self.pooled(Arc::new(HttpFetcher::new(&self.config.fetch)?)),
            self.frontier()?,
            self.publisher(),
            self.config.page.clone(),
            shutdown.clone(),
        ))
    }

    /// Runs the given roles until `shutdown` fires
    pub async fn run(&self, roles: &[Role], shutdown: CancellationToken) -> Result<()> {
        let consumers = self.consumers(roles, &shutdown)?;
        info!(
            roles = ?roles,
            consumers = consumers.len(),
            fetch_slots = self.pool.size(),
            "Runtime starting"
        );

        let mut tasks = JoinSet::new();
        for consumer in consumers {
            let cancel = shutdown.clone();
            tasks.spawn(async move {
                let subject = consumer.spec().subject;
                if let Err(e) = consumer.run(cancel).await {
                    error!(subject = %subject, "Consumer stopped with error: {}", e);
                }
            });
        }

        if roles.contains(&Role::Scheduler) && self.config.scheduler.enabled {
            let scheduler = SiteScheduler::new(
                self.storage.clone(),
                self.enqueuer(),
                self.config.scheduler.clone(),
            );
            let cancel = shutdown.clone();
            tasks.spawn(async move { scheduler.run(cancel).await });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Runtime task aborted: {}", e);
            }
        }
        info!("Runtime stopped");
        Ok(())
    }
}
