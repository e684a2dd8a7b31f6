use scraper::Html;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

use super::normalize::normalize_for_speech;
use crate::util::strip_control_chars;

/// Raw bodies above this many bytes are refused outright.
pub const MAX_INPUT_BYTES: usize = 500_000;
/// Cleaned text shorter than this (in characters) is not worth speaking.
pub const MIN_CLEAN_CHARS: usize = 50;

/// Elements whose content is never spoken.
const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "template", "iframe", "svg", "canvas", "head", "object",
    "button", "form", "nav",
];

/// Elements that start a new paragraph.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre",
    "section", "article", "header", "footer", "aside", "figure", "figcaption", "table", "tr",
    "td", "th", "dd", "dt", "main",
];

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("Input too large: {size} bytes (max {limit})")]
    InputTooLarge { size: usize, limit: usize },

    #[error("Cleaning failed: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanerConfig {
    pub max_input_bytes: usize,
    pub min_chars: usize,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: MAX_INPUT_BYTES,
            min_chars: MIN_CLEAN_CHARS,
        }
    }
}

/// Turns one raw HTML body into speech-ready text.
///
/// `Ok(None)` means "nothing worth speaking" (link-only stubs and the like)
/// and is the expected outcome for a fair share of entries. `Err` is reserved
/// for input refused before any processing.
pub trait ContentCleaner: Send + Sync {
    fn clean(&self, raw_html: &str) -> Result<Option<String>, CleanError>;
}

#[derive(Debug, Clone, Default)]
pub struct SpeechCleaner {
    config: CleanerConfig,
}

impl SpeechCleaner {
    pub fn new(config: CleanerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> CleanerConfig {
        self.config
    }
}

impl ContentCleaner for SpeechCleaner {
    fn clean(&self, raw_html: &str) -> Result<Option<String>, CleanError> {
        // SEC: size gate runs before the HTML parser sees a single byte
        if raw_html.len() > self.config.max_input_bytes {
            return Err(CleanError::InputTooLarge {
                size: raw_html.len(),
                limit: self.config.max_input_bytes,
            });
        }

        let min_chars = self.config.min_chars;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let text = html_to_text(raw_html);
            let text = strip_control_chars(&text);
            let text = normalize_for_speech(&text);
            if text.chars().count() < min_chars {
                None
            } else {
                Some(text)
            }
        }));

        match outcome {
            Ok(text) => Ok(text),
            Err(_) => {
                tracing::warn!(bytes = raw_html.len(), "Cleaner panicked, rejecting entry");
                Ok(None)
            }
        }
    }
}

/// Extracts visible text from an HTML fragment.
///
/// Entities are decoded by the parser. Text under [`SKIPPED_ELEMENTS`] is
/// dropped; a blank line separates text belonging to different block
/// elements, and `<br>` becomes a single newline.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len() / 2);
    let mut last_block = None;

    for node in fragment.root_element().descendants() {
        if let Some(element) = node.value().as_element() {
            if matches!(element.name(), "br" | "hr") {
                out.push('\n');
            }
            continue;
        }
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let mut block = None;
        let mut skipped = false;
        for ancestor in node.ancestors() {
            if let Some(element) = ancestor.value().as_element() {
                let name = element.name();
                if SKIPPED_ELEMENTS.contains(&name) {
                    skipped = true;
                    break;
                }
                if block.is_none() && BLOCK_ELEMENTS.contains(&name) {
                    block = Some(ancestor.id());
                }
            }
        }
        if skipped {
            continue;
        }

        if block != last_block {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            last_block = block;
        }
        out.push_str(text);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ARTICLE: &str = r#"
        <div class="post">
          <h2>Morning update</h2>
          <p>The council met on Tuesday &amp; agreed a budget of $2.5 million, e.g. for roads.</p>
          <script>trackVisitor();</script>
          <style>.post { color: red; }</style>
          <p>Read more at <a href="https://example.com">https://example.com/story</a> [1].</p>
        </div>"#;

    #[test]
    fn test_html_to_text_drops_scripts_and_splits_blocks() {
        let text = html_to_text("<p>One <b>bold</b> line</p><p>Two</p><script>x()</script>");
        assert_eq!(text, "One bold line\n\nTwo");
    }

    #[test]
    fn test_html_to_text_decodes_entities() {
        assert_eq!(html_to_text("Fish &amp; chips &mdash; &#8220;hot&#8221;"), "Fish & chips — “hot”");
    }

    #[test]
    fn test_line_breaks_inside_paragraph() {
        assert_eq!(html_to_text("<p>a<br>b</p>"), "a\nb");
    }

    #[test]
    fn test_clean_full_article() {
        let cleaner = SpeechCleaner::default();
        let text = cleaner.clean(ARTICLE).unwrap().unwrap();
        assert_eq!(
            text,
            "Morning update\n\n\
             The council met on Tuesday and agreed a budget of 2.5 million dollars, for example for roads.\n\n\
             Read more at."
        );
    }

    #[test]
    fn test_short_result_is_rejection_not_error() {
        let cleaner = SpeechCleaner::default();
        assert_eq!(cleaner.clean("<p>Link only</p>").unwrap(), None);
        assert_eq!(cleaner.clean("").unwrap(), None);
    }

    #[test]
    fn test_oversized_input_is_refused() {
        let cleaner = SpeechCleaner::default();
        let raw = "a".repeat(600_000);
        match cleaner.clean(&raw) {
            Err(CleanError::InputTooLarge { size, limit }) => {
                assert_eq!(size, 600_000);
                assert_eq!(limit, MAX_INPUT_BYTES);
            }
            other => panic!("expected InputTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_control_characters_removed() {
        let cleaner = SpeechCleaner::new(CleanerConfig {
            max_input_bytes: MAX_INPUT_BYTES,
            min_chars: 5,
        });
        let text = cleaner.clean("<p>bell\u{7} and \u{1b}[31mred\u{1b}[0m text</p>").unwrap();
        assert_eq!(text.as_deref(), Some("bell and red text"));
    }
}
