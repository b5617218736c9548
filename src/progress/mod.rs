//! Task progress state machine
//!
//! `TaskProgress` is the single authority for stage transitions. Every operation is
//! a status-guarded update, so calling it again after it took effect changes
//! nothing and reports `Transition::AlreadyTerminal`. That is what makes replayed
//! result messages harmless.

use crate::messages::Stage;
use crate::storage::{PageCounts, SharedStorage, Storage};
use crate::{lock, LeakwatchError, Result};
use chrono::Utc;
use tracing::{debug, info};

/// Outcome of a guarded transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The stage changed
    Applied,
    /// The guard rejected the call; nothing was written
    AlreadyTerminal,
}

impl Transition {
    fn from_changed(changed: bool) -> Self {
        if changed {
            Self::Applied
        } else {
            Self::AlreadyTerminal
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Stage transitions for scan tasks
#[derive(Clone)]
pub struct TaskProgress {
    storage: SharedStorage,
}

impl TaskProgress {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    fn apply<F>(&self, task_id: &str, op: &str, f: F) -> Result<Transition>
    where
        F: FnOnce(&mut dyn Storage) -> std::result::Result<bool, crate::storage::StorageError>,
    {
        let mut storage = lock(&self.storage, "storage")?;
        let changed = f(&mut *storage).map_err(|e| match e {
            crate::storage::StorageError::TaskNotFound(id) => LeakwatchError::TaskNotFound(id),
            other => LeakwatchError::Storage(other),
        })?;
        let transition = Transition::from_changed(changed);
        if transition.is_applied() {
            info!(task_id = %task_id, "{}", op);
        } else {
            debug!(task_id = %task_id, "{} ignored, stage already settled", op);
        }
        Ok(transition)
    }

    /// Moves a stage from pending to processing
    pub fn mark_stage_started(&self, task_id: &str, stage: Stage) -> Result<Transition> {
        self.apply(task_id, "Stage started", |s| s.mark_stage_started(task_id, stage))
    }

    /// Records a running found-count on an active sitemap stage
    pub fn record_sitemap_found(&self, task_id: &str, count: u64) -> Result<Transition> {
        self.apply(task_id, "Sitemap progress recorded", |s| {
            s.record_sitemap_found(task_id, count)
        })
    }

    /// Completes the sitemap stage without arming the page stage
    pub fn complete_sitemap_stage_only(
        &self,
        task_id: &str,
        total_found: u64,
        error: Option<&str>,
    ) -> Result<Transition> {
        self.apply(task_id, "Sitemap stage completed", |s| {
            s.complete_sitemap_stage(task_id, total_found, error, false)
        })
    }

    /// Completes the sitemap stage and arms the page stage
    pub fn complete_sitemap_stage(
        &self,
        task_id: &str,
        total_found: u64,
        error: Option<&str>,
    ) -> Result<Transition> {
        self.apply(task_id, "Sitemap stage completed, page stage armed", |s| {
            s.complete_sitemap_stage(task_id, total_found, error, true)
        })
    }

    pub fn fail_sitemap_stage(&self, task_id: &str, error: &str) -> Result<Transition> {
        self.apply(task_id, "Sitemap stage failed", |s| {
            s.fail_sitemap_stage(task_id, error)
        })
    }

    /// Arms the page stage of a task completed with `complete_sitemap_stage_only`
    pub fn arm_page_stage(&self, task_id: &str) -> Result<Transition> {
        self.apply(task_id, "Page stage armed", |s| s.arm_page_stage(task_id))
    }

    pub fn complete_page_stage(&self, task_id: &str, counts: PageCounts) -> Result<Transition> {
        self.apply(task_id, "Page stage completed", |s| {
            s.complete_page_stage(task_id, counts)
        })
    }

    pub fn fail_page_stage(
        &self,
        task_id: &str,
        error: &str,
        counts: PageCounts,
    ) -> Result<Transition> {
        self.apply(task_id, "Page stage failed", |s| {
            s.fail_page_stage(task_id, error, counts)
        })
    }

    /// Folds one URL outcome into the running page counters
    ///
    /// Each `(task, url)` pair counts once; replays report `AlreadyTerminal`.
    pub fn on_page_processed(&self, task_id: &str, url: &str, success: bool) -> Result<Transition> {
        self.apply(task_id, "Page outcome recorded", |s| {
            s.record_page_outcome(task_id, url, success, Utc::now())
        })
    }

    /// Cancels every stage that has not settled yet
    pub fn cancel_task(&self, task_id: &str) -> Result<Transition> {
        self.apply(task_id, "Task cancelled", |s| s.cancel_task(task_id))
    }
}
