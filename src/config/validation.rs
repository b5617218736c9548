use crate::config::types::{
    Config, FetchConfig, PageConfig, QueueConfig, SitemapConfig, SitesConfig,
};
use crate::ConfigError;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_queue_config(&config.queue)?;
    validate_path("store.database-path", &config.store.database_path)?;
    validate_fetch_config(&config.fetch)?;
    validate_sitemap_config(&config.sitemap)?;
    validate_page_config(&config.page)?;
    validate_sites_config(&config.sites)?;
    validate_workers("processors.workers", config.processors.workers)?;
    Ok(())
}

/// Validates durable queue configuration
fn validate_queue_config(config: &QueueConfig) -> Result<(), ConfigError> {
    validate_path("queue.database-path", &config.database_path)?;

    if config.max_deliver < 1 {
        return Err(ConfigError::Validation(format!(
            "max-deliver must be >= 1, got {}",
            config.max_deliver
        )));
    }

    if config.max_ack_pending < 1 {
        return Err(ConfigError::Validation(format!(
            "max-ack-pending must be >= 1, got {}",
            config.max_ack_pending
        )));
    }

    if config.fetch_batch < 1 || config.fetch_batch > config.max_ack_pending {
        return Err(ConfigError::Validation(format!(
            "fetch-batch must be between 1 and max-ack-pending ({}), got {}",
            config.max_ack_pending, config.fetch_batch
        )));
    }

    if config.ack_wait_secs < 1 {
        return Err(ConfigError::Validation(
            "ack-wait-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates fetch pool configuration
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.pool_size < 1 || config.pool_size > 256 {
        return Err(ConfigError::Validation(format!(
            "fetch pool-size must be between 1 and 256, got {}",
            config.pool_size
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates sitemap worker configuration
fn validate_sitemap_config(config: &SitemapConfig) -> Result<(), ConfigError> {
    validate_workers("sitemap.workers", config.workers)?;

    if config.max_depth < 1 || config.max_depth > 10 {
        return Err(ConfigError::Validation(format!(
            "sitemap max-depth must be between 1 and 10, got {}",
            config.max_depth
        )));
    }

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(
            "sitemap batch-size must be >= 1".to_string(),
        ));
    }

    if config.hard_deadline_secs < config.inactivity_timeout_secs {
        return Err(ConfigError::Validation(format!(
            "hard-deadline-secs ({}) must not be shorter than inactivity-timeout-secs ({})",
            config.hard_deadline_secs, config.inactivity_timeout_secs
        )));
    }

    for pattern in &config.blacklist {
        if pattern.trim().is_empty() {
            return Err(ConfigError::InvalidPattern(
                "sitemap blacklist entries cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates page worker configuration
fn validate_page_config(config: &PageConfig) -> Result<(), ConfigError> {
    validate_workers("page.workers", config.workers)?;

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(
            "page batch-size must be >= 1".to_string(),
        ));
    }

    if config.max_link_depth > 3 {
        return Err(ConfigError::Validation(format!(
            "max-link-depth must be <= 3, got {}",
            config.max_link_depth
        )));
    }

    if config.bloom_capacity < 1 {
        return Err(ConfigError::Validation(
            "bloom-capacity must be >= 1".to_string(),
        ));
    }

    let rate = config.bloom_false_positive_rate;
    if !(rate > 0.0 && rate < 1.0) {
        return Err(ConfigError::Validation(format!(
            "bloom-false-positive-rate must be in (0, 1), got {}",
            rate
        )));
    }

    Ok(())
}

/// Validates site lifecycle thresholds
fn validate_sites_config(config: &SitesConfig) -> Result<(), ConfigError> {
    if config.freeze_after_failures < 1 {
        return Err(ConfigError::Validation(
            "freeze-after-failures must be >= 1".to_string(),
        ));
    }

    if config.dead_after_failures < config.freeze_after_failures {
        return Err(ConfigError::Validation(format!(
            "dead-after-failures ({}) must be >= freeze-after-failures ({})",
            config.dead_after_failures, config.freeze_after_failures
        )));
    }

    Ok(())
}

fn validate_workers(name: &str, workers: u32) -> Result<(), ConfigError> {
    if workers < 1 || workers > 64 {
        return Err(ConfigError::Validation(format!(
            "{} must be between 1 and 64, got {}",
            name, workers
        )));
    }
    Ok(())
}

fn validate_path(name: &str, path: &str) -> Result<(), ConfigError> {
    if path.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
    }
    Ok(())
}
