//! Periodic site scheduler
//!
//! Every tick enqueues a fresh scan task for each schedulable site whose next scan
//! is due and which has no unfinished task. Sites are picked up again only once
//! a result processor has pushed `next_scan_at` into the future, so the loop never
//! stacks tasks for the same site.

use super::Enqueuer;
use crate::config::SchedulerConfig;
use crate::storage::{SharedStorage, Storage};
use crate::{lock, Result};
use chrono::Utc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Sites enqueued per tick at most
const SITES_PER_TICK: u32 = 100;

pub struct SiteScheduler {
    storage: SharedStorage,
    enqueuer: Enqueuer,
    config: SchedulerConfig,
}

impl SiteScheduler {
    pub fn new(storage: SharedStorage, enqueuer: Enqueuer, config: SchedulerConfig) -> Self {
        Self {
            storage,
            enqueuer,
            config,
        }
    }

    /// Enqueues every due site once and returns how many were enqueued
    pub async fn tick(&self) -> Result<usize> {
        let due = lock(&self.storage, "storage")?.due_sites(Utc::now(), SITES_PER_TICK)?;
        if due.is_empty() {
            debug!("No sites due");
            return Ok(0);
        }

        let mut enqueued = 0;
        for site in due {
            match self
                .enqueuer
                .enqueue_site(&site.id, self.config.auto_continue, "")
                .await
            {
                Ok(_) => enqueued += 1,
                Err(e) => error!(site_id = %site.id, domain = %site.domain, "Failed to enqueue scan: {}", e),
            }
        }
        info!("Enqueued {} scheduled scans", enqueued);
        Ok(enqueued)
    }

    /// Ticks every `interval-secs` until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        info!(interval_secs = self.config.interval_secs, "Site scheduler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("Scheduler tick failed: {}", e);
                    }
                }
            }
        }
        info!("Site scheduler stopped");
    }
}
