//! Entry body cleaning for speech synthesis.
//!
//! [`SpeechCleaner`] strips markup, decodes entities, removes control
//! characters and then runs the [`normalize`] pass (abbreviations, symbols,
//! URLs, citation markers, whitespace).

mod cleaner;
pub mod normalize;

pub use cleaner::{
    html_to_text, CleanError, CleanerConfig, ContentCleaner, SpeechCleaner, MAX_INPUT_BYTES,
    MIN_CLEAN_CHARS,
};
