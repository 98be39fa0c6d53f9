//! Concurrent feed retrieval and full-text extraction
//!
//! Two bounded worker pools: one fetches and parses feeds (default width
//! 10, 30 s per feed), one enriches articles with extracted page content
//! (default width 5, 15 s per page). A failing feed or page affects only
//! itself.

mod extract;
mod rss;

pub use extract::{extract_main_text, ContentExtractor};
pub use rss::{parse_feed, FeedFetcher, RETENTION_DAYS};
