use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so operators can tell which configuration a worker fleet runs with.
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const MINIMAL: &str = r#"
[queue]
database-path = "./queue.db"

[store]
database-path = "./leakwatch.db"
"#;

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let file = create_temp_config(MINIMAL);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.queue.database_path, "./queue.db");
        assert_eq!(config.queue.max_deliver, 5);
        assert_eq!(config.sitemap.max_depth, 5);
        assert_eq!(config.page.max_link_depth, 3);
        assert_eq!(config.frontier.max_url_retries, 3);
        assert!(config.sitemap.blacklist.contains(&"author".to_string()));
        assert!(config.scheduler.auto_continue);
    }

    #[test]
    fn test_load_full_config() {
        let config_content = r#"
[queue]
database-path = "./queue.db"
max-deliver = 3
ack-wait-secs = 60
max-ack-pending = 4
fetch-batch = 2

[store]
database-path = "./leakwatch.db"

[fetch]
pool-size = 8
user-agent = "TestBot/1.0"

[sitemap]
workers = 1
inactivity-timeout-secs = 30
hard-deadline-secs = 600
batch-size = 100
blacklist = ["author", "tag"]

[page]
workers = 3
batch-size = 10
bloom-capacity = 5000

[sites]
freeze-after-failures = 3
dead-after-failures = 6
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.queue.max_deliver, 3);
        assert_eq!(config.queue.max_ack_pending, 4);
        assert_eq!(config.fetch.pool_size, 8);
        assert_eq!(config.fetch.user_agent, "TestBot/1.0");
        assert_eq!(config.sitemap.batch_size, 100);
        assert_eq!(config.sitemap.blacklist.len(), 2);
        assert_eq!(config.page.workers, 3);
        assert_eq!(config.sites.freeze_after_failures, 3);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/leakwatch.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let config_content = r#"
[queue]
database-path = "./queue.db"
max-deliver = 0

[store]
database-path = "./leakwatch.db"
"#;

        let file = create_temp_config(config_content);
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
