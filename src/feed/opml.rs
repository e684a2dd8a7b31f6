use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::util::validate_url;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
const MAX_OPML_DEPTH: usize = 50;

#[derive(Debug, Error)]
pub enum OpmlError {
    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

/// A subscription from an `<outline xmlUrl=..>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpmlFeed {
    /// `title`, then `text`, then the URL itself.
    pub title: String,
    pub xml_url: String,
}

/// Extracts feed subscriptions from OPML content.
///
/// Folder outlines (no `xmlUrl`) are traversed at any depth but not
/// returned. Outlines whose URL fails validation (non-HTTP scheme,
/// localhost, private ranges) are skipped with a warning.
pub fn parse_opml(content: &str) -> Result<Vec<OpmlFeed>, OpmlError> {
    // SEC-002: quick-xml (0.37) resolves only the five XML builtin entities
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds = Vec::new();
    let mut buf = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                if let Some(feed) = outline_feed(&e, &reader) {
                    feeds.push(feed);
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                if let Some(feed) = outline_feed(&e, &reader) {
                    feeds.push(feed);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(feeds)
}

fn outline_feed(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Option<OpmlFeed> {
    let mut xml_url = None;
    let mut title = None;
    let mut text = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = match attr.decode_and_unescape_value(reader.decoder()) {
            Ok(v) => v.into_owned(),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable OPML attribute");
                continue;
            }
        };
        match attr.key.as_ref() {
            b"xmlUrl" => xml_url = Some(value),
            b"title" => title = Some(value),
            b"text" => text = Some(value),
            _ => {}
        }
    }

    let url = xml_url?;
    match validate_url(&url) {
        Ok(_) => Some(OpmlFeed {
            title: title.or(text).unwrap_or_else(|| url.clone()),
            xml_url: url,
        }),
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
            None
        }
    }
}
