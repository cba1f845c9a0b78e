// src/ingest/feed.rs
//! Streaming RSS 2.0 / Atom parser. Both dialects collapse into one
//! [`RawEntry`] shape so the normalizer only knows a single ingestion method.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::ParseError;

/// One feed entry as found in the payload, before normalization.
/// Text fields are XML-unescaped but otherwise untouched (markup included).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    /// RSS `guid` or Atom `id`.
    pub native_id: Option<String>,
    /// RSS `description` or Atom `summary`.
    pub description: Option<String>,
    /// RSS `content:encoded` or Atom `content`.
    pub content: Option<String>,
    pub published: Option<String>,
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    NativeId,
    Description,
    Content,
    Published,
    Updated,
    Other,
}

impl Field {
    fn from_local_name(name: &[u8]) -> Self {
        match name {
            b"title" => Field::Title,
            b"link" => Field::Link,
            b"guid" | b"id" => Field::NativeId,
            b"description" | b"summary" => Field::Description,
            b"encoded" | b"content" => Field::Content,
            b"pubDate" | b"published" | b"issued" => Field::Published,
            b"updated" | b"date" | b"modified" => Field::Updated,
            _ => Field::Other,
        }
    }
}

impl RawEntry {
    fn slot(&mut self, field: Field) -> Option<&mut Option<String>> {
        match field {
            Field::Title => Some(&mut self.title),
            Field::Link => Some(&mut self.link),
            Field::NativeId => Some(&mut self.native_id),
            Field::Description => Some(&mut self.description),
            Field::Content => Some(&mut self.content),
            Field::Published => Some(&mut self.published),
            Field::Updated => Some(&mut self.updated),
            Field::Other => None,
        }
    }

    /// First non-empty value wins; later duplicates are ignored.
    fn set(&mut self, field: Field, value: String) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        if let Some(slot) = self.slot(field) {
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
    }
}

/// Atom `<link href=.. rel=..>`: only the alternate (or rel-less) link counts.
fn atom_href(e: &BytesStart<'_>) -> Option<String> {
    let mut href = None;
    let mut alternate = true;
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"href" => href = attr.unescape_value().ok().map(|v| v.into_owned()),
            b"rel" => {
                alternate = attr
                    .unescape_value()
                    .map(|v| v.as_ref() == "alternate")
                    .unwrap_or(false)
            }
            _ => {}
        }
    }
    href.filter(|_| alternate)
}

/// Parse an RSS or Atom payload into raw entries.
///
/// Fails with [`ParseError::NotAFeed`] when no `<rss>`, `<rdf:RDF>` or
/// `<feed>` root is found, and with [`ParseError::Xml`] on malformed XML.
/// A well-formed feed with no entries yields an empty vector.
pub fn parse_feed(payload: &str) -> Result<Vec<RawEntry>, ParseError> {
    let mut reader = Reader::from_str(payload);
    reader.config_mut().trim_text(true);

    let mut recognized = false;
    let mut entries = Vec::new();
    let mut current: Option<RawEntry> = None;
    // depth below the current entry element; 1 = direct child
    let mut depth = 0usize;
    let mut field = Field::Other;
    let mut buf = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name();
                let name = name.as_ref();
                if !recognized {
                    recognized = matches!(name, b"rss" | b"RDF" | b"feed");
                    continue;
                }
                if current.is_none() {
                    if matches!(name, b"item" | b"entry") {
                        current = Some(RawEntry::default());
                        depth = 0;
                    }
                    continue;
                }
                depth += 1;
                if depth == 1 {
                    field = Field::from_local_name(name);
                    buf.clear();
                    if field == Field::Link {
                        if let (Some(entry), Some(href)) = (current.as_mut(), atom_href(&e)) {
                            entry.set(Field::Link, href);
                        }
                    }
                }
            }
            Event::Empty(e) => {
                if let Some(entry) = current.as_mut() {
                    if depth == 0 && e.local_name().as_ref() == b"link" {
                        if let Some(href) = atom_href(&e) {
                            entry.set(Field::Link, href);
                        }
                    }
                }
            }
            Event::Text(t) => {
                if current.is_some() && depth >= 1 {
                    let text = t
                        .unescape()
                        .map(|c| c.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                    push_text(&mut buf, &text);
                }
            }
            Event::CData(c) => {
                if current.is_some() && depth >= 1 {
                    push_text(&mut buf, &String::from_utf8_lossy(&c));
                }
            }
            Event::End(e) => {
                if current.is_none() {
                    continue;
                }
                if depth == 0 {
                    if matches!(e.local_name().as_ref(), b"item" | b"entry") {
                        if let Some(done) = current.take() {
                            entries.push(done);
                        }
                    }
                    continue;
                }
                if depth == 1 {
                    if let Some(entry) = current.as_mut() {
                        entry.set(field, std::mem::take(&mut buf));
                    }
                    field = Field::Other;
                }
                depth -= 1;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !recognized {
        return Err(ParseError::NotAFeed);
    }
    Ok(entries)
}

fn push_text(buf: &mut String, text: &str) {
    if !buf.is_empty() {
        buf.push(' ');
    }
    buf.push_str(text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rss_items_with_cdata_and_namespaced_content() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Feed</title>
    <link>https://example.test/</link>
    <item>
      <title>First &amp; foremost</title>
      <link>https://example.test/1</link>
      <guid isPermaLink="false">urn:1</guid>
      <description><![CDATA[<p>Hello <b>there</b></p>]]></description>
      <content:encoded><![CDATA[<div>Full body</div>]]></content:encoded>
      <pubDate>Tue, 01 Oct 2024 10:00:00 +0000</pubDate>
    </item>
    <item>
      <title>Second</title>
      <link>https://example.test/2</link>
    </item>
  </channel>
</rss>"#;
        let entries = parse_feed(xml).unwrap();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.title.as_deref(), Some("First & foremost"));
        assert_eq!(first.link.as_deref(), Some("https://example.test/1"));
        assert_eq!(first.native_id.as_deref(), Some("urn:1"));
        assert_eq!(first.description.as_deref(), Some("<p>Hello <b>there</b></p>"));
        assert_eq!(first.content.as_deref(), Some("<div>Full body</div>"));
        assert_eq!(
            first.published.as_deref(),
            Some("Tue, 01 Oct 2024 10:00:00 +0000")
        );

        // channel-level title/link must not leak into entries
        assert_eq!(entries[1].native_id, None);
        assert_eq!(entries[1].description, None);
    }

    #[test]
    fn parses_atom_entries_with_href_links() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom</title>
  <link href="https://example.test/" rel="self"/>
  <entry>
    <title>Atom entry</title>
    <link rel="edit" href="https://example.test/edit/1"/>
    <link href="https://example.test/a/1"/>
    <id>tag:example.test,2024:1</id>
    <summary>Short</summary>
    <updated>2024-10-02T08:30:00Z</updated>
  </entry>
</feed>"#;
        let entries = parse_feed(xml).unwrap();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.link.as_deref(), Some("https://example.test/a/1"));
        assert_eq!(e.native_id.as_deref(), Some("tag:example.test,2024:1"));
        assert_eq!(e.description.as_deref(), Some("Short"));
        assert_eq!(e.published, None);
        assert_eq!(e.updated.as_deref(), Some("2024-10-02T08:30:00Z"));
    }

    #[test]
    fn empty_channel_is_ok() {
        let xml = "<rss><channel><title>none</title></channel></rss>";
        assert!(parse_feed(xml).unwrap().is_empty());
    }

    #[test]
    fn non_feed_payload_is_rejected() {
        assert!(matches!(
            parse_feed("<html><body>nope</body></html>"),
            Err(ParseError::NotAFeed)
        ));
        assert!(matches!(parse_feed("plain text"), Err(ParseError::NotAFeed)));
    }

    #[test]
    fn mismatched_tags_are_xml_errors() {
        let xml = "<rss><channel><item><title>x</item></channel></rss>";
        assert!(matches!(parse_feed(xml), Err(ParseError::Xml(_))));
    }
}
