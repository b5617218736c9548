use crate::url::domain::bare_host;
use crate::url::normalize::normalize_url;
use url::Url;

/// Returns the bare host a site is crawled under
///
/// Site domains are usually plain hosts (`example.com`) but may carry a scheme
/// and port when a site is served from a non-standard origin.
pub fn site_host(site_domain: &str) -> String {
    let rest = site_domain
        .strip_prefix("https://")
        .or_else(|| site_domain.strip_prefix("http://"))
        .unwrap_or(site_domain);
    let authority = rest.split('/').next().unwrap_or(rest);
    let host = match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    };
    bare_host(host)
}

/// Checks whether a host belongs to a site
///
/// A host belongs to the site if it is the site's host itself or any subdomain
/// of it. `www.` is ignored on both sides.
///
/// # Examples
///
/// ```
/// use leakwatch::url::is_same_site;
///
/// assert!(is_same_site("example.com", "example.com"));
/// assert!(is_same_site("cdn.example.com", "www.example.com"));
/// assert!(!is_same_site("badexample.com", "example.com"));
/// ```
pub fn is_same_site(host: &str, site_domain: &str) -> bool {
    let candidate = bare_host(host);
    let base = site_host(site_domain);
    if base.is_empty() {
        return false;
    }
    candidate == base || candidate.ends_with(&format!(".{}", base))
}

/// Resolves a link found on a page into a frontier URL for the site
///
/// Relative links are resolved against `base`, the result is normalized onto
/// the canonical crawl host, and anything outside the site is dropped.
pub fn resolve_site_link(base: &Url, href: &str, site_domain: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let joined = base.join(href).ok()?;
    let url = normalize_url(joined.as_str()).ok()?;
    onto_site_host(url, site_domain)
}

/// Moves a same-site URL onto the site's canonical host
///
/// Subdomain links (`m.example.com`, `cdn.example.com`) are rewritten to the
/// crawl host so one page has one frontier entry. Returns `None` for URLs
/// outside the site.
pub fn onto_site_host(mut url: Url, site_domain: &str) -> Option<Url> {
    let host = url.host_str()?;
    if !is_same_site(host, site_domain) {
        return None;
    }
    let canonical = site_host(site_domain);
    if bare_host(host) != canonical {
        url.set_host(Some(&canonical)).ok()?;
    }
    Some(url)
}
