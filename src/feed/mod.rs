//! Feed retrieval and parsing.
//!
//! - [`fetcher`] - raw document retrieval with a hard per-fetch ceiling
//! - [`parser`] - RSS/Atom entry extraction with format fallback
//! - [`directory`] - where the subscribed feed list comes from (OPML or fixed)

mod directory;
mod fetcher;
mod opml;
mod parser;

pub use directory::{DirectoryError, FeedDirectory, OpmlDirectory, StaticDirectory};
pub use fetcher::{
    fetch_with_timeout, http_client, CredentialSource, DocumentFetcher, FetchError, HttpFetcher,
    StaticCredential, FETCH_TIMEOUT, MAX_DOCUMENT_SIZE,
};
pub use opml::{parse_opml, OpmlError, OpmlFeed};
pub use parser::{parse_feed, FeedFormat, ParseError, ParseResult};
