use super::ExtractedPage;
use crate::fetch::FetchOutcome;

/// Title fragments of error and interstitial pages, matched case-insensitively
const ERROR_TITLE_MARKERS: &[&str] = &[
    "404",
    "not found",
    "access denied",
    "forbidden",
    "just a moment",
];

/// Classification of a fetched page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageVerdict {
    Success,
    /// Network-level block; stops the whole task
    IpBlocked(String),
    Captcha,
    HttpError(u16),
    EmptyTitle,
    ErrorPage(String),
    ParseError(String),
}

impl PageVerdict {
    pub fn is_success(&self) -> bool {
        matches!(self, PageVerdict::Success)
    }

    /// Per-URL error message, `None` on success
    pub fn error(&self) -> Option<String> {
        match self {
            PageVerdict::Success => None,
            PageVerdict::IpBlocked(reason) => Some(format!("ip blocked: {}", reason)),
            PageVerdict::Captcha => Some("captcha challenge".to_string()),
            PageVerdict::HttpError(status) => Some(format!("http {}", status)),
            PageVerdict::EmptyTitle => Some("empty title".to_string()),
            PageVerdict::ErrorPage(title) => Some(format!("error page: {}", title)),
            PageVerdict::ParseError(reason) => Some(format!("parse error: {}", reason)),
        }
    }
}

/// Classifies a fetch and its extraction
///
/// Blocking is checked first, then the HTTP status, then the content.
pub fn classify_page(outcome: &FetchOutcome, page: &ExtractedPage) -> PageVerdict {
    if outcome.blocked {
        let reason = outcome
            .block_reason
            .clone()
            .unwrap_or_else(|| format!("http {}", outcome.status));
        return PageVerdict::IpBlocked(reason);
    }
    if outcome.is_captcha {
        return PageVerdict::Captcha;
    }
    if outcome.status >= 400 {
        return PageVerdict::HttpError(outcome.status);
    }
    if outcome.html.trim().is_empty() {
        return PageVerdict::ParseError("empty body".to_string());
    }

    let Some(title) = page.title.as_deref() else {
        return PageVerdict::EmptyTitle;
    };
    let lowered = title.to_lowercase();
    if ERROR_TITLE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return PageVerdict::ErrorPage(title.to_string());
    }

    PageVerdict::Success
}
