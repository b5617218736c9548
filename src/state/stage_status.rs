/// Stage status definitions for scan tasks
///
/// A scan task has a sitemap stage and a page stage. Both move through the same
/// vocabulary, and the task's own status is derived from the pair.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of one stage of a scan task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    // ===== Active States =====
    /// Created but no worker has reported yet
    Pending,

    /// A worker has started on the stage
    Processing,

    // ===== Terminal States =====
    Completed,
    Failed,
    Cancelled,
}

/// Overall task status uses the same vocabulary as its stages
pub type TaskStatus = StageStatus;

impl StageStatus {
    /// Returns true once the stage can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true while the stage may still be worked on
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Processing,
            Self::Completed,
            Self::Failed,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Derives a task's overall status from its stages
///
/// `page` is `None` while the page stage has not been armed. A task whose sitemap
/// stage completed without arming the page stage is complete; once the page
/// stage is armed the task follows it.
pub fn derive_task_status(sitemap: StageStatus, page: Option<StageStatus>) -> TaskStatus {
    match sitemap {
        StageStatus::Completed => match page {
            None => StageStatus::Completed,
            Some(StageStatus::Pending) | Some(StageStatus::Processing) => StageStatus::Processing,
            Some(terminal) => terminal,
        },
        other => other,
    }
}
