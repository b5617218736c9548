//! Output module for the `stats` command
//!
//! This module loads task, site, frontier and queue counts and prints them.

pub mod stats;

pub use stats::{load_queue_depths, load_statistics, print_statistics, PipelineStatistics};
