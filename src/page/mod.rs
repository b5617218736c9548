//! Page stage
//!
//! The page worker drains a site's frontier in bounded batches. Every URL is fetched,
//! extracted and classified, and its outcome is published at once as a
//! `PageSingleResult`; links of successful shallow pages are fed back into the
//! frontier. One `PageCrawlResult` closes the stage.

mod extract;
mod harvest;
mod verdict;
mod worker;

pub use extract::{extract_page, ExtractedPage};
pub use harvest::harvest_links;
pub use verdict::{classify_page, PageVerdict};
pub use worker::PageWorker;
