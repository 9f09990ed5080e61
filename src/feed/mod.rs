//! Feed retrieval: per-feed download and parsing, plus the bounded fan-out
//! over every configured feed.
//!
//! - [`parser`] - Lenient RSS/Atom parsing into [`Article`](crate::article::Article)s using `feed-rs`
//! - [`fetcher`] - HTTP retrieval with retries, size limits and URL validation
//! - [`coordinator`] - Concurrent fetch of all enabled feeds with failure isolation
//! - [`opml`] - OPML subscription lists for seeding the feed configuration

pub mod coordinator;
pub mod fetcher;
pub mod opml;
pub mod parser;

pub use coordinator::{filter_recent, FetchCoordinator, FetchReport, DEFAULT_WORKERS};
pub use fetcher::{FeedSource, FetchError, FetchSettings, HttpFeedSource};
pub use opml::{feed_id_for_url, OpmlError};
pub use parser::{parse_feed, ParseResult};
