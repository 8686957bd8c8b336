//! RSS/Atom retrieval for the digest.
//!
//! - [`parser`] - document parsing with `feed-rs`, reduced to [`Entry`] values
//! - [`fetcher`] - HTTP retrieval with bounded retry, mirror fallback and
//!   history filtering
//!
//! Feeds are fetched strictly one after another; nothing here spawns tasks.

mod fetcher;
mod parser;

pub use fetcher::{FeedFetcher, FetchError, FetchOutcome, RetryPolicy};
pub use parser::{parse_feed, Entry, ParseResult, UNTITLED};
