use crate::UrlError;
use url::Url;

/// Query parameters that never change what a page shows
const NOISE_PARAMS: &[&str] = &[
    "fbclid",
    "gclid",
    "yclid",
    "mc_eid",
    "ref",
    "phpsessid",
    "sessionid",
    "sid",
    "replytocom",
];

/// Normalizes a URL into the form stored in the frontier
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject anything that is not HTTP(S) or has no host
/// 2. Lowercase the host and strip a leading `www.`
/// 3. Collapse dot segments and duplicate slashes, drop the trailing slash
///    (except for the root)
/// 4. Drop the fragment
/// 5. Drop tracking/session query parameters and sort the rest
///
/// The scheme and port are kept as-is: sites are crawled on whatever scheme
/// their sitemaps advertise.
///
/// # Examples
///
/// ```
/// use leakwatch::url::normalize_url;
///
/// let url = normalize_url("https://WWW.Example.com/watch/42/?utm_source=x#player").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/watch/42");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let path = normalize_path(url.path());
    url.set_path(&path);
    url.set_fragment(None);

    if url.query().is_some() {
        let kept = kept_query_params(&url);
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept.iter());
        }
    }

    Ok(url)
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Filters out noise parameters and sorts what remains by key
fn kept_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_noise_param(key))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort();
    params
}

fn is_noise_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || NOISE_PARAMS.contains(&key.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_preserved() {
        let result = normalize_url("http://example.com/page").unwrap();
        assert_eq!(result.as_str(), "http://example.com/page");
    }

    #[test]
    fn test_port_preserved() {
        let result = normalize_url("http://127.0.0.1:8080/a/").unwrap();
        assert_eq!(result.as_str(), "http://127.0.0.1:8080/a");
    }

    #[test]
    fn test_remove_www() {
        let result = normalize_url("https://www.example.com/").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }

    #[test]
    fn test_remove_trailing_slash_and_fragment() {
        let result = normalize_url("https://example.com/movie/1/#comments").unwrap();
        assert_eq!(result.as_str(), "https://example.com/movie/1");
    }

    #[test]
    fn test_dot_segments_and_duplicate_slashes() {
        let result = normalize_url("https://example.com//a/../b/./c//").unwrap();
        assert_eq!(result.as_str(), "https://example.com/b/c");
    }

    #[test]
    fn test_noise_params_removed_and_sorted() {
        let result =
            normalize_url("https://example.com/s?q=film&utm_medium=x&PHPSESSID=1&a=2").unwrap();
        assert_eq!(result.as_str(), "https://example.com/s?a=2&q=film");
    }

    #[test]
    fn test_only_noise_params_drops_query() {
        let result = normalize_url("https://example.com/p?fbclid=1&utm_source=t").unwrap();
        assert_eq!(result.as_str(), "https://example.com/p");
    }

    #[test]
    fn test_invalid_scheme() {
        let result = normalize_url("ftp://example.com/file");
        assert!(matches!(result.unwrap_err(), UrlError::InvalidScheme(_)));
    }

    #[test]
    fn test_malformed_url() {
        assert!(normalize_url("not a url").is_err());
    }

    #[test]
    fn test_empty_path_becomes_root() {
        let result = normalize_url("https://example.com").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }
}
