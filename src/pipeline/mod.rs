//! Pipeline wiring
//!
//! - `Enqueuer`: creates scan tasks, triggers page stages by hand, cancels tasks
//! - `SiteScheduler`: enqueues due sites on an interval
//! - `Runtime`: builds the worker and processor pools and runs them until shutdown

mod enqueue;
mod runtime;
mod scheduler;

pub use enqueue::{page_task_for, sitemap_task_for, Enqueuer};
pub use runtime::{Role, Runtime};
pub use scheduler::SiteScheduler;
