//! Persistence for the two pipeline documents.
//!
//! Both documents are JSON bodies held in an [`ObjectStore`] under a fixed
//! key. [`Database`] is the SQLite-backed store used by the binary; tests swap
//! in their own implementations.

mod feeds;
mod history;
mod schema;
mod types;

pub use feeds::{FeedConfigStore, FEEDS_KEY};
pub use history::{compute_statistics, fingerprint, new_batch_id, prune, HistoryStore, HISTORY_KEY};
pub use schema::{Database, ObjectStore};
pub use types::{
    DocumentError, FeedConfigDocument, FeedDescriptor, FeedStatistics, HistoryDocument,
    HistoryEntry, HistoryStatistics, RetentionConfig, StoreError, DOCUMENT_VERSION,
    MAX_WINDOW_DAYS,
};
