use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating status of a crawl target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    /// Registered, never crawled successfully
    Pending,

    /// Crawled successfully at least once and scheduled for rescans
    Active,

    /// Too many consecutive failures; excluded from scheduling until re-enabled
    Frozen,

    /// Failures exceeded the dead threshold
    Dead,
}

impl SiteStatus {
    /// Returns true if the scheduler may enqueue scans for the site
    pub fn is_schedulable(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Frozen => "frozen",
            Self::Dead => "dead",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "frozen" => Some(Self::Frozen),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }

    pub fn all_states() -> Vec<Self> {
        vec![Self::Pending, Self::Active, Self::Frozen, Self::Dead]
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Status of a URL in a site's frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlStatus {
    /// Discovered, waiting to be crawled
    Pending,

    /// Crawled and saved
    Indexed,

    /// Last crawl failed; eligible again after the retry delay
    Error,

    /// Retry budget exhausted; never crawled again
    Skipped,
}

impl UrlStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Indexed => "indexed",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "indexed" => Some(Self::Indexed),
            "error" => Some(Self::Error),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn all_states() -> Vec<Self> {
        vec![Self::Pending, Self::Indexed, Self::Error, Self::Skipped]
    }
}

impl fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Fetch capability a site needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerType {
    /// Plain HTTP fetches
    #[default]
    Http,

    /// Pages need a rendering browser
    Browser,
}

impl ScannerType {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Browser => "browser",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Self::Http),
            "browser" => Some(Self::Browser),
            _ => None,
        }
    }
}

impl fmt::Display for ScannerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
