use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const ELLIPSIS: &str = "...";

/// Terminal columns occupied by `s` (CJK and emoji count double, combining
/// marks count zero).
///
/// ```
/// use feedvoice::util::display_width;
///
/// assert_eq!(display_width("Hello"), 5);
/// assert_eq!(display_width("日本"), 4);
/// ```
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Shortens `s` to at most `max_width` columns, ending in `...` when cut.
///
/// Widths too narrow for one character plus the ellipsis (3 or less) get
/// as many whole characters as fit and no ellipsis. A string that already
/// fits is returned borrowed.
///
/// ```
/// use feedvoice::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if display_width(s) <= max_width {
        return Cow::Borrowed(s);
    }

    let budget = if max_width > ELLIPSIS.len() {
        max_width - ELLIPSIS.len()
    } else {
        max_width
    };

    let mut used = 0;
    let end = s
        .char_indices()
        .find(|&(_, c)| {
            used += c.width().unwrap_or(0);
            used > budget
        })
        .map_or(s.len(), |(idx, _)| idx);

    if max_width > ELLIPSIS.len() {
        Cow::Owned(format!("{}{ELLIPSIS}", &s[..end]))
    } else {
        Cow::Owned(s[..end].to_string())
    }
}

fn is_stripped_control(c: char) -> bool {
    c.is_control() && !matches!(c, '\t' | '\n' | '\r')
}

/// SEC-001: Removes control characters and ANSI escape sequences.
///
/// Feed bodies occasionally carry raw escape sequences and C0/C1 control
/// characters that a speech engine would either read out or choke on.
/// CSI (`ESC [ ... final`) and OSC (`ESC ] ... BEL | ESC \`) sequences are
/// dropped whole, as is a bare ESC. Tab, newline and carriage return stay.
///
/// Returns `Cow::Borrowed` when nothing needs stripping.
///
/// ```
/// use feedvoice::util::strip_control_chars;
///
/// assert_eq!(strip_control_chars("\u{1b}[1mbold\u{1b}[0m\u{7}"), "bold");
/// ```
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\u{1b}' => match chars.peek() {
                Some('[') => {
                    chars.next();
                    // Parameters and intermediates, up to the final byte
                    for c in chars.by_ref() {
                        if ('\u{40}'..='\u{7e}').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\u{7}' {
                            break;
                        }
                        if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            },
            c if is_stripped_control(c) => {}
            c => out.push(c),
        }
    }

    Cow::Owned(out)
}
