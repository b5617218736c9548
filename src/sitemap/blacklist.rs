use url::Url;

/// Whether a child sitemap covers a low-value section
///
/// The path is split into alphanumeric words and each word is compared with the
/// blacklist, singular or plural, so `post_tag-sitemap.xml`, `/sitemaps/authors.xml`
/// and `category-sitemap2.xml` all match their entries.
pub fn is_blacklisted(sitemap_url: &str, blacklist: &[String]) -> bool {
    let path = match Url::parse(sitemap_url) {
        Ok(url) => url.path().to_ascii_lowercase(),
        Err(_) => sitemap_url.to_ascii_lowercase(),
    };

    path.split(|c: char| !c.is_ascii_alphabetic())
        .filter(|word| !word.is_empty())
        .any(|word| blacklist.iter().any(|entry| word_matches(word, entry)))
}

fn word_matches(word: &str, entry: &str) -> bool {
    let entry = entry.to_ascii_lowercase();
    if word == entry || word == format!("{}s", entry) {
        return true;
    }
    match entry.strip_suffix('y') {
        Some(stem) => word == format!("{}ies", stem),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_sitemap_blacklist;

    #[test]
    fn test_wordpress_sections() {
        let blacklist = default_sitemap_blacklist();
        assert!(is_blacklisted("https://a.com/author-sitemap.xml", &blacklist));
        assert!(is_blacklisted("https://a.com/post_tag-sitemap.xml", &blacklist));
        assert!(is_blacklisted("https://a.com/category-sitemap2.xml", &blacklist));
        assert!(is_blacklisted("https://a.com/sitemaps/categories.xml", &blacklist));
    }

    #[test]
    fn test_content_sitemaps_pass() {
        let blacklist = default_sitemap_blacklist();
        assert!(!is_blacklisted("https://a.com/post-sitemap.xml", &blacklist));
        assert!(!is_blacklisted("https://a.com/movies-sitemap1.xml", &blacklist));
        assert!(!is_blacklisted("https://a.com/page-sitemap.xml", &blacklist));
        // The host is not part of the match
        assert!(!is_blacklisted("https://tag.a.com/sitemap.xml", &blacklist));
    }

    #[test]
    fn test_empty_blacklist() {
        assert!(!is_blacklisted("https://a.com/author-sitemap.xml", &[]));
    }
}
