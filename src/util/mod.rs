//! Small shared helpers.
//!
//! - **URL validation**: SSRF guard applied to subscription URLs
//! - **Text processing**: control-character stripping for untrusted feed
//!   text, and Unicode-aware width and truncation for terminal output
//!
//! ```
//! use feedvoice::util::{strip_control_chars, truncate_to_width, validate_url};
//!
//! assert!(validate_url("https://example.com/feed.xml").is_ok());
//! assert_eq!(strip_control_chars("ok\u{7}"), "ok");
//! assert_eq!(truncate_to_width("A long entry title", 10), "A long ...");
//! ```

mod text;
mod url_validator;

pub use text::{display_width, strip_control_chars, truncate_to_width};
pub use url_validator::{validate_url, UrlValidationError};
