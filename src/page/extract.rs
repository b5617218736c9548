//! HTML field extraction
//!
//! This module pulls the fields the pipeline keeps for every crawled page:
//! - Title, meta description, first `<h1>`
//! - Canonical URL, `og:title`, `og:image`, document language
//! - Visible text length
//! - Links to follow (absolute http(s) URLs)

use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Fields extracted from an HTML page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub description: Option<String>,
    pub canonical: Option<String>,
    pub h1: Option<String>,
    pub og_title: Option<String>,
    pub og_image: Option<String>,
    pub lang: Option<String>,
    /// Non-whitespace characters of text outside scripts and styles
    pub text_length: usize,
    /// All links found on the page (absolute URLs)
    pub links: Vec<String>,
}

/// Parses HTML content and extracts page fields
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links and data URIs
/// - Fragment-only links
///
/// # Arguments
///
/// * `html` - The HTML content to parse
/// * `base_url` - The URL the page was served from, for resolving relative links
///
/// # Example
///
/// ```
/// use leakwatch::page::extract_page;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let page = extract_page(html, &base_url);
/// assert_eq!(page.title, Some("Test".to_string()));
/// assert_eq!(page.links, vec!["https://example.com/page".to_string()]);
/// ```
pub fn extract_page(html: &str, base_url: &Url) -> ExtractedPage {
    let document = Html::parse_document(html);

    ExtractedPage {
        title: first_text(&document, "title"),
        description: meta_content(&document, r#"meta[name="description"]"#),
        canonical: first_attr(&document, r#"link[rel="canonical"][href]"#, "href")
            .and_then(|href| resolve_link(&href, base_url)),
        h1: first_text(&document, "h1"),
        og_title: meta_content(&document, r#"meta[property="og:title"]"#),
        og_image: meta_content(&document, r#"meta[property="og:image"]"#),
        lang: first_attr(&document, "html[lang]", "lang"),
        text_length: visible_text_length(&document),
        links: extract_links(&document, base_url),
    }
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next()
}

/// Text of the first matching element, whitespace-collapsed
fn first_text(document: &Html, selector: &str) -> Option<String> {
    select_first(document, selector)
        .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        .filter(|s| !s.is_empty())
}

fn first_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    select_first(document, selector)
        .and_then(|element| element.value().attr(attr))
        .map(|value| value.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    first_attr(document, selector, "content").map(|s| collapse_whitespace(&s))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn visible_text_length(document: &Html) -> usize {
    let Some(body) = select_first(document, "body") else {
        return 0;
    };

    body.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node.parent()?;
            if let Some(element) = parent.value().as_element() {
                if matches!(element.name(), "script" | "style" | "noscript" | "template") {
                    return None;
                }
            }
            Some(text.chars().filter(|c| !c.is_whitespace()).count())
        })
        .sum()
}

/// Extracts all valid links from the HTML document
fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            // Skip if it has the download attribute
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(href) = element.value().attr("href") {
                if let Some(absolute_url) = resolve_link(href, base_url) {
                    links.push(absolute_url);
                }
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(href) = element.value().attr("href") {
                if let Some(absolute_url) = resolve_link(href, base_url) {
                    links.push(absolute_url);
                }
            }
        }
    }

    links
}

/// Resolves a link href to an absolute http(s) URL
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Fragment-only links
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute_url) => {
            if absolute_url.scheme() == "http" || absolute_url.scheme() == "https" {
                Some(absolute_url.to_string())
            } else {
                None
            }
        }
        Err(_) => None,
    }
}
