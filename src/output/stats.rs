//! Statistics from the pipeline's store and queue
//!
//! This module provides functionality for extracting and displaying
//! pipeline statistics for the `stats` command.

use crate::messages::Subject;
use crate::queue::{QueueResult, WorkQueue};
use crate::state::{SiteStatus, TaskStatus, UrlStatus};
use crate::storage::{Storage, StorageResult};
use std::collections::HashMap;

/// Pipeline statistics summary
#[derive(Debug, Clone, Default)]
pub struct PipelineStatistics {
    /// Scan tasks by derived status
    pub tasks_by_status: HashMap<TaskStatus, u64>,

    /// Sites by operating status
    pub sites_by_status: HashMap<SiteStatus, u64>,

    /// Frontier URLs by status
    pub urls_by_status: HashMap<UrlStatus, u64>,

    /// Saved pages
    pub total_pages: u64,

    pub dead_letters: u64,

    pub violation_jobs: u64,

    /// Messages stored per subject, leased or not
    pub queue_depths: Vec<(Subject, u64)>,
}

impl PipelineStatistics {
    pub fn total_tasks(&self) -> u64 {
        self.tasks_by_status.values().sum()
    }

    pub fn total_urls(&self) -> u64 {
        self.urls_by_status.values().sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(PipelineStatistics)` - Statistics without queue depths
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> StorageResult<PipelineStatistics> {
    Ok(PipelineStatistics {
        tasks_by_status: storage.count_tasks_by_status()?,
        sites_by_status: storage.count_sites_by_status()?,
        urls_by_status: storage.count_urls_by_status()?,
        total_pages: storage.count_pages()?,
        dead_letters: storage.count_dead_letters()?,
        violation_jobs: storage.count_violation_jobs()?,
        queue_depths: Vec::new(),
    })
}

/// Reads the depth of every subject
pub async fn load_queue_depths(queue: &dyn WorkQueue) -> QueueResult<Vec<(Subject, u64)>> {
    let mut depths = Vec::new();
    for subject in Subject::all() {
        depths.push((subject, queue.depth(subject).await?));
    }
    Ok(depths)
}

fn print_counts<K: std::fmt::Display>(title: &str, counts: &HashMap<K, u64>, total: u64) {
    println!("{}:", title);
    let mut sorted: Vec<_> = counts.iter().filter(|(_, count)| **count > 0).collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1));

    for (key, count) in sorted {
        let percentage = if total > 0 {
            (*count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", key, count, percentage);
    }
    println!();
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &PipelineStatistics) {
    println!("=== Pipeline Statistics ===\n");

    println!("Overview:");
    println!("  Scan tasks: {}", stats.total_tasks());
    println!("  Sites: {}", stats.sites_by_status.values().sum::<u64>());
    println!("  Frontier URLs: {}", stats.total_urls());
    println!("  Saved pages: {}", stats.total_pages);
    println!("  Dead letters: {}", stats.dead_letters);
    println!("  Violation jobs: {}", stats.violation_jobs);
    println!();

    print_counts("Tasks by Status", &stats.tasks_by_status, stats.total_tasks());
    print_counts(
        "Sites by Status",
        &stats.sites_by_status,
        stats.sites_by_status.values().sum(),
    );
    print_counts("URLs by Status", &stats.urls_by_status, stats.total_urls());

    if !stats.queue_depths.is_empty() {
        println!("Queue Depth:");
        for (subject, depth) in &stats.queue_depths {
            println!("  {}: {}", subject, depth);
        }
        println!();
    }

    let indexed = stats.urls_by_status.get(&UrlStatus::Indexed).copied().unwrap_or(0);
    let coverage = if stats.total_urls() > 0 {
        (indexed as f64 / stats.total_urls() as f64) * 100.0
    } else {
        0.0
    };
    println!(
        "Frontier Coverage: {:.1}% ({} / {} URLs indexed)",
        coverage,
        indexed,
        stats.total_urls()
    );
}
