//! Streaming sitemap parser
//!
//! `SitemapStream` yields one `SitemapItem` per `<url>` or `<sitemap>` element as it
//! reads, so a large urlset can be published in bounded batches without building the
//! whole document in memory. Plain-text sitemaps (one URL per line) are accepted too.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use thiserror::Error;

/// Errors raised while reading a sitemap body
#[derive(Debug, Error)]
pub enum SitemapError {
    #[error("Malformed sitemap XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Not a sitemap (root element <{0}>)")]
    NotSitemap(String),
}

/// One entry read from a sitemap
#[derive(Debug, Clone, PartialEq)]
pub enum SitemapItem {
    /// A child sitemap listed by a sitemap index
    Sitemap { loc: String, last_mod: Option<String> },
    /// A page listed by a urlset
    Url {
        loc: String,
        last_mod: Option<String>,
        change_freq: Option<String>,
        priority: Option<f64>,
    },
}

/// Which kind of document the stream is reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SitemapKind {
    Index,
    UrlSet,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Loc,
    LastMod,
    ChangeFreq,
    Priority,
}

#[derive(Default)]
struct Partial {
    loc: Option<String>,
    last_mod: Option<String>,
    change_freq: Option<String>,
    priority: Option<String>,
}

enum Source<'a> {
    Xml(Reader<&'a [u8]>),
    Text(std::str::Lines<'a>),
}

/// Element-level state of the XML walk
#[derive(Default)]
struct ParseState {
    kind: Option<SitemapKind>,
    entry: Option<Partial>,
    field: Option<Field>,
    text: String,
}

impl ParseState {
    fn start_field(&mut self, field: Field) {
        if self.entry.is_some() {
            self.field = Some(field);
            self.text.clear();
        }
    }

    fn end_field(&mut self) {
        let (Some(field), Some(entry)) = (self.field.take(), self.entry.as_mut()) else {
            return;
        };
        let value = self.text.trim().to_string();
        self.text.clear();
        if value.is_empty() {
            return;
        }
        match field {
            Field::Loc => entry.loc = Some(value),
            Field::LastMod => entry.last_mod = Some(value),
            Field::ChangeFreq => entry.change_freq = Some(value),
            Field::Priority => entry.priority = Some(value),
        }
    }

    fn finish(&mut self, child: bool) -> Option<SitemapItem> {
        let entry = self.entry.take()?;
        let loc = entry.loc?;
        if child {
            return Some(SitemapItem::Sitemap {
                loc,
                last_mod: entry.last_mod,
            });
        }
        Some(SitemapItem::Url {
            loc,
            last_mod: entry.last_mod,
            change_freq: entry.change_freq,
            priority: entry.priority.and_then(|p| p.parse().ok()),
        })
    }
}

/// Pull parser over a sitemap body
pub struct SitemapStream<'a> {
    source: Source<'a>,
    state: ParseState,
    done: bool,
}

impl<'a> SitemapStream<'a> {
    pub fn new(body: &'a str) -> Self {
        let trimmed = body.trim_start_matches('\u{feff}').trim_start();
        if trimmed.starts_with('<') {
            let mut reader = Reader::from_str(trimmed);
            reader.trim_text(true);
            Self::with_source(Source::Xml(reader), None)
        } else {
            Self::with_source(Source::Text(trimmed.lines()), Some(SitemapKind::Text))
        }
    }

    fn with_source(source: Source<'a>, kind: Option<SitemapKind>) -> Self {
        Self {
            source,
            state: ParseState {
                kind,
                ..ParseState::default()
            },
            done: false,
        }
    }

    /// Document kind, known once the root element has been read
    pub fn kind(&self) -> Option<SitemapKind> {
        self.state.kind
    }

    pub fn is_index(&self) -> bool {
        self.state.kind == Some(SitemapKind::Index)
    }

    fn next_text_line(lines: &mut std::str::Lines<'a>) -> Option<SitemapItem> {
        for line in lines.by_ref() {
            let line = line.trim();
            if line.starts_with("http://") || line.starts_with("https://") {
                return Some(SitemapItem::Url {
                    loc: line.to_string(),
                    last_mod: None,
                    change_freq: None,
                    priority: None,
                });
            }
        }
        None
    }

    fn next_xml(
        reader: &mut Reader<&'a [u8]>,
        state: &mut ParseState,
    ) -> Option<Result<SitemapItem, SitemapError>> {
        loop {
            let event = match reader.read_event() {
                Ok(event) => event,
                Err(e) => return Some(Err(e.into())),
            };

            match event {
                Event::Start(ref e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
                    if state.kind.is_none() {
                        match name.as_str() {
                            "sitemapindex" => state.kind = Some(SitemapKind::Index),
                            "urlset" => state.kind = Some(SitemapKind::UrlSet),
                            _ => return Some(Err(SitemapError::NotSitemap(name))),
                        }
                        continue;
                    }
                    match name.as_str() {
                        "url" | "sitemap" => state.entry = Some(Partial::default()),
                        "loc" => state.start_field(Field::Loc),
                        "lastmod" => state.start_field(Field::LastMod),
                        "changefreq" => state.start_field(Field::ChangeFreq),
                        "priority" => state.start_field(Field::Priority),
                        _ => {}
                    }
                }
                Event::Text(ref e) => {
                    if state.field.is_some() {
                        if let Ok(text) = e.unescape() {
                            state.text.push_str(&text);
                        }
                    }
                }
                Event::CData(ref e) => {
                    if state.field.is_some() {
                        state.text.push_str(&String::from_utf8_lossy(e));
                    }
                }
                Event::End(ref e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
                    match name.as_str() {
                        "loc" | "lastmod" | "changefreq" | "priority" => state.end_field(),
                        "url" => {
                            if let Some(item) = state.finish(false) {
                                return Some(Ok(item));
                            }
                        }
                        "sitemap" => {
                            if let Some(item) = state.finish(true) {
                                return Some(Ok(item));
                            }
                        }
                        _ => {}
                    }
                }
                Event::Eof => return None,
                _ => {}
            }
        }
    }
}

impl<'a> Iterator for SitemapStream<'a> {
    type Item = Result<SitemapItem, SitemapError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = match &mut self.source {
            Source::Text(lines) => Self::next_text_line(lines).map(Ok),
            Source::Xml(reader) => Self::next_xml(reader, &mut self.state),
        };
        if !matches!(next, Some(Ok(_))) {
            self.done = true;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url>
    <loc>https://example.com/watch/1</loc>
    <lastmod>2024-01-01</lastmod>
    <changefreq>daily</changefreq>
    <priority>0.8</priority>
  </url>
  <url><loc>https://example.com/watch/2?a=1&amp;b=2</loc></url>
</urlset>"#;

        let mut stream = SitemapStream::new(xml);
        let items: Vec<_> = stream.by_ref().collect::<Result<_, _>>().unwrap();

        assert_eq!(stream.kind(), Some(SitemapKind::UrlSet));
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0],
            SitemapItem::Url {
                loc: "https://example.com/watch/1".to_string(),
                last_mod: Some("2024-01-01".to_string()),
                change_freq: Some("daily".to_string()),
                priority: Some(0.8),
            }
        );
        match &items[1] {
            SitemapItem::Url { loc, .. } => assert_eq!(loc, "https://example.com/watch/2?a=1&b=2"),
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_sitemap_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.com/post-sitemap.xml</loc><lastmod>2024-02-02</lastmod></sitemap>
  <sitemap><loc><![CDATA[https://example.com/page-sitemap.xml]]></loc></sitemap>
</sitemapindex>"#;

        let mut stream = SitemapStream::new(xml);
        let items: Vec<_> = stream.by_ref().collect::<Result<_, _>>().unwrap();

        assert!(stream.is_index());
        assert_eq!(
            items,
            vec![
                SitemapItem::Sitemap {
                    loc: "https://example.com/post-sitemap.xml".to_string(),
                    last_mod: Some("2024-02-02".to_string()),
                },
                SitemapItem::Sitemap {
                    loc: "https://example.com/page-sitemap.xml".to_string(),
                    last_mod: None,
                },
            ]
        );
    }

    #[test]
    fn test_entry_without_loc_is_skipped() {
        let xml = "<urlset><url><lastmod>2024</lastmod></url><url><loc>https://a.com/x</loc></url></urlset>";
        let items: Vec<_> = SitemapStream::new(xml).collect::<Result<_, _>>().unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_html_is_not_a_sitemap() {
        let mut stream = SitemapStream::new("<html><body>Not found</body></html>");
        assert!(matches!(stream.next(), Some(Err(SitemapError::NotSitemap(_)))));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_plain_text_sitemap() {
        let body = "https://a.com/1\n\n  https://a.com/2  \nnot a url\n";
        let mut stream = SitemapStream::new(body);
        let items: Vec<_> = stream.by_ref().collect::<Result<_, _>>().unwrap();
        assert_eq!(stream.kind(), Some(SitemapKind::Text));
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_malformed_xml_reports_error() {
        let xml = "<urlset><url><loc>https://a.com/1</loc></url><url><loc>https://a.com/2</loc></wrong></urlset>";
        let results: Vec<_> = SitemapStream::new(xml).collect();
        assert!(results[0].is_ok());
        assert!(results.iter().any(|r| r.is_err()));
    }
}
