use crate::config::SitesConfig;
use crate::messages::{merge_cookies, Cookie};
use crate::state::SiteStatus;
use crate::storage::{SharedStorage, Storage, StorageError};
use crate::{lock, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

/// Site lifecycle rules applied after each crawl outcome
#[derive(Clone)]
pub struct SitePolicy {
    storage: SharedStorage,
    config: SitesConfig,
}

impl SitePolicy {
    pub fn new(storage: SharedStorage, config: SitesConfig) -> Self {
        Self { storage, config }
    }

    /// Resets the failure streak and schedules the regular rescan
    pub fn record_success(&self, site_id: &str, now: DateTime<Utc>) -> Result<()> {
        let next = now + self.config.rescan_interval();
        lock(&self.storage, "storage")?.mark_site_success(site_id, next, now)?;
        info!(site_id = %site_id, next_scan_at = %next, "Site crawl succeeded");
        Ok(())
    }

    /// Extends the failure streak, backs off and freezes or kills the site past its thresholds
    pub fn record_failure(&self, site_id: &str, now: DateTime<Utc>) -> Result<SiteStatus> {
        let mut storage = lock(&self.storage, "storage")?;
        let current = storage
            .get_site(site_id)?
            .ok_or_else(|| StorageError::SiteNotFound(site_id.to_string()))?
            .status;
        let streak = storage.increment_site_failures(site_id)?;
        let status = status_after_failures(&self.config, current, streak);
        let next = now + failure_backoff(&self.config, streak);
        storage.set_site_schedule(site_id, status, next)?;

        if status != current {
            warn!(site_id = %site_id, failures = streak, status = %status, "Site status changed after failures");
        } else {
            info!(site_id = %site_id, failures = streak, next_scan_at = %next, "Site crawl failed");
        }
        Ok(status)
    }

    /// Pushes the next scan out without touching the streak or status
    pub fn record_ip_block(&self, site_id: &str, now: DateTime<Utc>) -> Result<()> {
        let next = now + self.config.ip_block_backoff();
        lock(&self.storage, "storage")?.delay_site_scan(site_id, next)?;
        warn!(site_id = %site_id, next_scan_at = %next, "Site blocked our address, scan delayed");
        Ok(())
    }

    /// Schedules the regular rescan of a site that had nothing to crawl
    pub fn record_idle(&self, site_id: &str, now: DateTime<Utc>) -> Result<()> {
        let next = now + self.config.rescan_interval();
        lock(&self.storage, "storage")?.delay_site_scan(site_id, next)?;
        Ok(())
    }

    /// Merges cookies returned by a fetch into the site's jar
    pub fn absorb_cookies(&self, site_id: &str, fresh: &[Cookie]) -> Result<()> {
        if fresh.is_empty() {
            return Ok(());
        }
        let mut storage = lock(&self.storage, "storage")?;
        let site = storage
            .get_site(site_id)?
            .ok_or_else(|| StorageError::SiteNotFound(site_id.to_string()))?;
        let merged = merge_cookies(&site.cookies, fresh);
        if merged != site.cookies {
            storage.update_site_cookies(site_id, &merged)?;
        }
        Ok(())
    }
}

/// Backoff after `streak` consecutive failures
///
/// Doubles per failure starting at `failure-backoff`, capped at seven rescan intervals.
pub fn failure_backoff(config: &SitesConfig, streak: u32) -> Duration {
    let exponent = streak.saturating_sub(1).min(30);
    let minutes = config
        .failure_backoff_mins
        .saturating_mul(1u64 << exponent);
    let cap = config.rescan_interval_hours.saturating_mul(60 * 7);
    Duration::minutes(minutes.min(cap).min(i64::MAX as u64 / 60_000) as i64)
}

/// Status a site takes after `streak` consecutive failures
pub fn status_after_failures(config: &SitesConfig, current: SiteStatus, streak: u32) -> SiteStatus {
    if streak >= config.dead_after_failures {
        SiteStatus::Dead
    } else if streak >= config.freeze_after_failures {
        SiteStatus::Frozen
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{shared, NewSite, SqliteStorage};

    fn policy() -> (SitePolicy, SharedStorage, String) {
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        let site = storage
            .insert_site(&NewSite {
                domain: "example.com".to_string(),
                ..NewSite::default()
            })
            .unwrap();
        let storage = shared(storage);
        (
            SitePolicy::new(storage.clone(), SitesConfig::default()),
            storage,
            site.id,
        )
    }

    fn site(storage: &SharedStorage, id: &str) -> crate::storage::Site {
        storage.lock().unwrap().get_site(id).unwrap().unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = SitesConfig::default();
        assert_eq!(failure_backoff(&config, 1), Duration::minutes(60));
        assert_eq!(failure_backoff(&config, 2), Duration::minutes(120));
        assert_eq!(failure_backoff(&config, 3), Duration::minutes(240));
        assert_eq!(failure_backoff(&config, 40), Duration::hours(24 * 7));
    }

    #[test]
    fn test_thresholds() {
        let config = SitesConfig::default();
        assert_eq!(status_after_failures(&config, SiteStatus::Active, 1), SiteStatus::Active);
        assert_eq!(status_after_failures(&config, SiteStatus::Active, 5), SiteStatus::Frozen);
        assert_eq!(status_after_failures(&config, SiteStatus::Frozen, 20), SiteStatus::Dead);
    }

    #[test]
    fn test_failures_freeze_then_success_resets() {
        let (policy, storage, id) = policy();
        let now = Utc::now();
        for _ in 0..4 {
            policy.record_failure(&id, now).unwrap();
        }
        assert_eq!(site(&storage, &id).status, SiteStatus::Pending);
        assert_eq!(policy.record_failure(&id, now).unwrap(), SiteStatus::Frozen);
        assert_eq!(site(&storage, &id).consecutive_failures, 5);

        policy.record_success(&id, now).unwrap();
        let site = site(&storage, &id);
        assert_eq!(site.status, SiteStatus::Active);
        assert_eq!(site.consecutive_failures, 0);
        assert!(site.last_success_at.is_some());
    }

    #[test]
    fn test_ip_block_leaves_streak_and_status() {
        let (policy, storage, id) = policy();
        let now = Utc::now();
        policy.record_success(&id, now).unwrap();
        policy.record_failure(&id, now).unwrap();

        policy.record_ip_block(&id, now).unwrap();
        let site = site(&storage, &id);
        assert_eq!(site.status, SiteStatus::Active);
        assert_eq!(site.consecutive_failures, 1);
        assert!(site.next_scan_at.unwrap() >= now + Duration::minutes(360) - Duration::seconds(1));
    }

    #[test]
    fn test_cookies_merged_by_name() {
        let (policy, storage, id) = policy();
        policy
            .absorb_cookies(&id, &[Cookie::new("a", "1"), Cookie::new("b", "1")])
            .unwrap();
        policy.absorb_cookies(&id, &[Cookie::new("b", "2")]).unwrap();

        let cookies = site(&storage, &id).cookies;
        assert_eq!(cookies.len(), 2);
        assert!(cookies.contains(&Cookie::new("b", "2")));
    }
}
