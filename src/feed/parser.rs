use chrono::DateTime;
use quick_xml::escape::{escape, unescape, EscapeError};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use thiserror::Error;

use crate::storage::RawEntry;

/// SEC-003: Maximum element nesting accepted in a feed document.
const MAX_XML_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("Document is not an RSS or Atom feed (root element <{0}>)")]
    UnrecognizedFormat(String),

    #[error("Feed nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),
}

/// Wire format an entry list was extracted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    /// `<item>` elements (RSS 0.9x/2.0 and RSS 1.0/RDF).
    Rss,
    /// `<entry>` elements.
    Atom,
}

impl FeedFormat {
    fn entry_tag(self) -> &'static [u8] {
        match self {
            FeedFormat::Rss => b"item",
            FeedFormat::Atom => b"entry",
        }
    }
}

#[derive(Debug)]
pub struct ParseResult {
    /// At most `max_entries` entries, in document order.
    pub entries: Vec<RawEntry>,
    /// Entries dropped for lacking any link or identifier.
    pub skipped: usize,
    pub format: FeedFormat,
}

/// Parses an RSS or Atom document into raw entries.
///
/// `<item>` extraction runs first; when it yields nothing the document is
/// re-read for `<entry>` elements. The first `max_entries` usable entries in
/// document order are kept. An empty result is not an error.
pub fn parse_feed(bytes: &[u8], max_entries: usize) -> Result<ParseResult, ParseError> {
    let rss = extract(bytes, FeedFormat::Rss, max_entries)?;
    if !rss.entries.is_empty() {
        return Ok(rss);
    }

    let mut atom = extract(bytes, FeedFormat::Atom, max_entries)?;
    if atom.entries.is_empty() {
        atom.skipped += rss.skipped;
    }
    Ok(atom)
}

#[derive(Default)]
struct EntryBuilder {
    title: String,
    link: Option<String>,
    guid: String,
    published: String,
    updated: String,
    author: String,
    author_name: String,
    content: String,
    summary: String,
}

/// Elements whose children are body markup (Atom `type="xhtml"`).
fn is_markup_body(name: &[u8]) -> bool {
    matches!(name, b"content" | b"content:encoded")
}

/// True for nodes below a body element, where child elements are markup.
fn in_markup(path: &[Vec<u8>]) -> bool {
    path.len() > 1 && is_markup_body(&path[0])
}

/// Resolves character references and the five XML entities. HTML entities
/// such as `&eacute;` and a bare `&` are kept as written for the HTML
/// cleaner.
fn unescape_lenient(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    loop {
        // `kept` is the span copied verbatim, `rest[..kept.start]` is clean
        let kept = match unescape(rest) {
            Ok(text) => {
                out.push_str(&text);
                return out;
            }
            Err(EscapeError::UnrecognizedEntity(name, _)) => name.start - 1..name.end + 1,
            Err(EscapeError::UnterminatedEntity(span)) => span.start..span.start + 1,
            Err(EscapeError::InvalidCharRef(_)) => {
                out.push_str(rest);
                return out;
            }
        };
        let clean = &rest[..kept.start];
        out.push_str(&unescape(clean).unwrap_or(Cow::Borrowed(clean)));
        out.push_str(&rest[kept.clone()]);
        rest = &rest[kept.end..];
    }
}

impl EntryBuilder {
    fn push_text(&mut self, path: &[Vec<u8>], text: &str) {
        let Some(first) = path.first() else {
            return;
        };
        let nested = path.len() > 1;

        match first.as_slice() {
            b"content:encoded" | b"content" => self.content.push_str(text),
            b"description" | b"summary" => self.summary.push_str(text),
            b"author" | b"dc:creator" if !nested => self.author.push_str(text),
            b"author" if path.len() == 2 && path[1] == b"name" => self.author_name.push_str(text),
            b"title" if !nested => self.title.push_str(text),
            b"link" if !nested => self.link.get_or_insert_with(String::new).push_str(text),
            b"guid" | b"id" if !nested => self.guid.push_str(text),
            b"pubDate" | b"published" | b"dc:date" | b"issued" if !nested => {
                self.published.push_str(text)
            }
            b"updated" | b"modified" if !nested => self.updated.push_str(text),
            _ => {}
        }
    }

    /// Atom-style `<link href=".." rel="alternate"/>`. The first alternate
    /// (or rel-less) link wins; a text link already captured is kept.
    fn link_from_attributes(&mut self, e: &BytesStart<'_>, reader: &Reader<&[u8]>) {
        if self.link.as_deref().is_some_and(|l| !l.trim().is_empty()) {
            return;
        }

        let mut href = None;
        let mut rel = None;
        for attr in e.attributes().flatten() {
            let Ok(value) = attr.decode_and_unescape_value(reader.decoder()) else {
                continue;
            };
            match attr.key.as_ref() {
                b"href" => href = Some(value.into_owned()),
                b"rel" => rel = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(href) = href {
            if matches!(rel.as_deref(), None | Some("alternate")) {
                self.link = Some(href);
            }
        }
    }

    fn build(self) -> Option<RawEntry> {
        let link = self
            .link
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .or_else(|| Some(self.guid.trim().to_string()).filter(|g| !g.is_empty()))?;

        let title = match self.title.trim() {
            "" => "Untitled".to_string(),
            t => t.to_string(),
        };

        let published = parse_timestamp(&self.published).or_else(|| parse_timestamp(&self.updated));

        let author = [self.author_name.trim(), self.author.trim()]
            .into_iter()
            .find(|a| !a.is_empty())
            .map(str::to_string);

        let body = if self.content.trim().is_empty() {
            self.summary
        } else {
            self.content
        };

        Some(RawEntry {
            title,
            link,
            published,
            author,
            body: body.trim().to_string(),
        })
    }
}

fn parse_timestamp(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .map(|dt| dt.timestamp())
        .ok()
}

fn is_feed_root(name: &[u8]) -> bool {
    matches!(name, b"rss" | b"rdf:RDF" | b"RDF" | b"feed" | b"channel")
}

fn extract(bytes: &[u8], format: FeedFormat, max_entries: usize) -> Result<ParseResult, ParseError> {
    // SEC-002: quick-xml (0.37) never expands <!ENTITY> declarations
    let mut reader = Reader::from_reader(bytes);

    let entry_tag = format.entry_tag();
    let mut entries = Vec::new();
    let mut skipped = 0usize;
    let mut buf = Vec::new();

    let mut depth = 0usize;
    let mut root_checked = false;
    // Element names below the current entry, entry element excluded
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut current: Option<(EntryBuilder, usize)> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ParseError::Xml(e.to_string()))?;

        match event {
            Event::Start(e) => {
                depth += 1;
                if depth > MAX_XML_DEPTH {
                    return Err(ParseError::MaxDepthExceeded(MAX_XML_DEPTH));
                }
                let name = e.name().as_ref().to_vec();

                if !root_checked {
                    root_checked = true;
                    if !is_feed_root(&name) {
                        return Err(ParseError::UnrecognizedFormat(
                            String::from_utf8_lossy(&name).into_owned(),
                        ));
                    }
                }

                match current.as_mut() {
                    None if name == entry_tag => {
                        current = Some((EntryBuilder::default(), depth));
                        path.clear();
                    }
                    Some((builder, _)) => {
                        if path.is_empty() && name == b"link" {
                            builder.link_from_attributes(&e, &reader);
                        }
                        if path.first().is_some_and(|body| is_markup_body(body)) {
                            builder.content.push_str(&format!("<{}>", String::from_utf8_lossy(&e)));
                        }
                        path.push(name);
                    }
                    None => {}
                }
            }
            Event::Empty(e) => {
                if let Some((builder, _)) = current.as_mut() {
                    if path.is_empty() && e.name().as_ref() == b"link" {
                        builder.link_from_attributes(&e, &reader);
                    }
                    if path.first().is_some_and(|body| is_markup_body(body)) {
                        builder.content.push_str(&format!("<{}/>", String::from_utf8_lossy(&e)));
                    }
                }
            }
            Event::Text(t) => {
                if let Some((builder, _)) = current.as_mut() {
                    let raw = String::from_utf8_lossy(&t);
                    // Text between xhtml children is already markup-escaped
                    let text = if in_markup(&path) {
                        raw.into_owned()
                    } else {
                        unescape_lenient(&raw)
                    };
                    builder.push_text(&path, &text);
                }
            }
            Event::CData(c) => {
                if let Some((builder, _)) = current.as_mut() {
                    let text = String::from_utf8_lossy(&c);
                    if in_markup(&path) {
                        builder.push_text(&path, &escape(text.as_ref()));
                    } else {
                        builder.push_text(&path, &text);
                    }
                }
            }
            Event::End(_) => {
                let closes_entry = matches!(current, Some((_, d)) if d == depth);
                depth = depth.saturating_sub(1);

                if closes_entry {
                    if let Some((builder, _)) = current.take() {
                        match builder.build() {
                            Some(entry) => entries.push(entry),
                            None => skipped += 1,
                        }
                    }
                    if entries.len() >= max_entries {
                        break;
                    }
                } else if let Some((builder, _)) = current.as_mut() {
                    if in_markup(&path) {
                        if let Some(name) = path.last() {
                            builder.content.push_str(&format!("</{}>", String::from_utf8_lossy(name)));
                        }
                    }
                    path.pop();
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if skipped > 0 {
        tracing::debug!(skipped = skipped, ?format, "Entries without link or id skipped");
    }

    entries.truncate(max_entries);
    Ok(ParseResult {
        entries,
        skipped,
        format,
    })
}
