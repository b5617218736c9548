//! Configuration module for Leakwatch
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use leakwatch::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("leakwatch.toml")).unwrap();
//! println!("Sitemap recursion is capped at depth {}", config.sitemap.max_depth);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    default_sitemap_blacklist, Config, FetchConfig, FrontierConfig, PageConfig, ProcessorConfig,
    QueueConfig, SchedulerConfig, SitemapConfig, SitesConfig, StoreConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
