use url::Url;

/// Extracts the crawl domain from a URL
///
/// The host is lowercased and a leading `www.` is stripped, so the result can be
/// compared directly with a site's stored domain.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use leakwatch::url::extract_domain;
///
/// let url = Url::parse("https://WWW.Example.com/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(bare_host)
}

/// Lowercases a host and strips a leading `www.`
pub fn bare_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

/// Builds the homepage URL for a site domain
///
/// A domain that already carries a scheme (test servers, non-standard ports) is
/// used as given; otherwise HTTPS is assumed.
pub fn homepage_url(domain: &str) -> String {
    if domain.starts_with("http://") || domain.starts_with("https://") {
        let trimmed = domain.trim_end_matches('/');
        format!("{}/", trimmed)
    } else {
        format!("https://{}/", domain.trim_end_matches('/'))
    }
}
