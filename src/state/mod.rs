//! State module for crawl lifecycles
//!
//! This module defines the status vocabularies persisted for tasks, sites and
//! frontier URLs, and the rule that derives a task's overall status from its
//! two stages.
//!
//! # Components
//!
//! - `StageStatus`: status of one stage of a scan task (also used for the task itself)
//! - `SiteStatus`: operating status of a crawl target
//! - `UrlStatus`: status of a URL in a site's frontier
//! - `ScannerType`: which fetch capability a site needs

mod site_status;
mod stage_status;

pub use site_status::{ScannerType, SiteStatus, UrlStatus};
pub use stage_status::{derive_task_status, StageStatus, TaskStatus};
