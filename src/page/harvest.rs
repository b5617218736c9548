use crate::frontier::FrontierFilter;
use crate::messages::{SitemapUrlEntry, UrlSource};
use crate::url::resolve_site_link;
use url::Url;

/// Turns a page's links into new frontier entries one level deeper
///
/// Nothing is harvested from pages at `max_depth` or deeper, so harvested entries
/// never exceed `max_depth`. Links outside the site and links the filter has
/// (probably) seen are dropped; survivors are added to the filter.
pub fn harvest_links(
    links: &[String],
    base: &Url,
    site_domain: &str,
    depth: u8,
    max_depth: u8,
    filter: &mut FrontierFilter,
) -> Vec<SitemapUrlEntry> {
    if depth >= max_depth {
        return Vec::new();
    }

    links
        .iter()
        .filter_map(|href| resolve_site_link(base, href, site_domain))
        .map(|url| url.to_string())
        .filter(|url| filter.check_and_insert(url))
        .map(|url| SitemapUrlEntry::bare(url, UrlSource::Link, depth + 1))
        .collect()
}
