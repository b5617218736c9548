//! Result processors
//!
//! Processors are the only writers of task, site and frontier state. There is one
//! per subject; each decodes its message, applies the guarded `TaskProgress`
//! transition that fits the outcome, and updates sites and URLs only when that
//! transition actually happened. Replaying any result message therefore leaves the
//! store exactly as the first delivery did.
//!
//! | Subject | Processor |
//! |---------|-----------|
//! | `crawl.sitemap.urls` | `UrlBatchProcessor` |
//! | `crawl.sitemap.results` | `SitemapResultProcessor` |
//! | `crawl.page.single` | `PageSingleProcessor` |
//! | `crawl.page.results` | `PageResultProcessor` |
//! | `crawl.progress` | `ProgressProcessor` |
//! | `crawl.advisory.dead_letter` | `DeadLetterProcessor` |

mod dead_letter;
mod page_result;
mod page_single;
mod progress;
mod site_policy;
mod sitemap_result;
mod url_batch;
mod violations;

pub use dead_letter::DeadLetterProcessor;
pub use page_result::PageResultProcessor;
pub use page_single::PageSingleProcessor;
pub use progress::ProgressProcessor;
pub use site_policy::{failure_backoff, status_after_failures, SitePolicy};
pub use sitemap_result::SitemapResultProcessor;
pub use url_batch::UrlBatchProcessor;
pub use violations::{spawn_violation_pass, StoreViolationScheduler, ViolationScheduler};

use crate::config::Config;
use crate::messages::Subject;
use crate::queue::{MessageHandler, Publisher};
use crate::storage::SharedStorage;
use std::sync::Arc;

/// Builds the handler for every processor subject
pub fn processor_handlers(
    storage: SharedStorage,
    publisher: Publisher,
    config: &Config,
    violations: Arc<dyn ViolationScheduler>,
) -> Vec<(Subject, Arc<dyn MessageHandler>)> {
    let sites = SitePolicy::new(storage.clone(), config.sites.clone());
    vec![
        (
            Subject::SitemapUrls,
            Arc::new(UrlBatchProcessor::new(storage.clone())) as Arc<dyn MessageHandler>,
        ),
        (
            Subject::SitemapResults,
            Arc::new(SitemapResultProcessor::new(
                storage.clone(),
                sites.clone(),
                publisher,
                config.scheduler.page_batch_size,
            )),
        ),
        (
            Subject::PageSingle,
            Arc::new(PageSingleProcessor::new(storage.clone(), config.frontier.clone())),
        ),
        (
            Subject::PageResults,
            Arc::new(PageResultProcessor::new(storage.clone(), sites, violations)),
        ),
        (Subject::Progress, Arc::new(ProgressProcessor::new(storage.clone()))),
        (Subject::DeadLetter, Arc::new(DeadLetterProcessor::new(storage))),
    ]
}
