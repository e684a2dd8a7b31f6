//! feedvoice: concurrent feed ingestion that turns RSS/Atom entries into
//! speech-ready text.
//!
//! - [`feed`] - document fetching, RSS/Atom parsing, OPML feed directory
//! - [`content`] - HTML cleaning and speech normalization
//! - [`storage`] - entry store, feed state tracker, read state
//! - [`pipeline`] - two-level worker pools and the orchestrator
//! - [`events`] - push updates for every state change

pub mod config;
pub mod content;
pub mod events;
pub mod feed;
pub mod pipeline;
pub mod storage;
pub mod util;
