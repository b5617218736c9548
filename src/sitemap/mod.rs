//! Sitemap stage
//!
//! The sitemap worker walks a site's sitemap tree depth-first and streams every
//! discovered page URL into the frontier as `SitemapUrlBatch` messages while the walk
//! is still running. The walk is bounded three ways: a visited set against cycles, a
//! maximum nesting depth, and two timers (an inactivity timeout that resets on each
//! successful fetch, and a hard deadline for the whole task).

mod blacklist;
mod parser;
mod worker;

pub use blacklist::is_blacklisted;
pub use parser::{SitemapError, SitemapItem, SitemapKind, SitemapStream};
pub use worker::SitemapWorker;
