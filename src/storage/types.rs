use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use crate::article::ArticleMetadata;

/// Schema version stamped on every persisted document.
pub const DOCUMENT_VERSION: &str = "2.1";

/// Upper bound on any day-based window read from stored or configured data.
pub const MAX_WINDOW_DAYS: i64 = 36_500;

// ============================================================================
// Error Types
// ============================================================================

/// Object-store level failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process holds the SQLite file
    #[error("Another instance of feedrelay appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Backend-specific failure that has no richer representation
    #[error("Object store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StoreError::InstanceLocked;
        }

        StoreError::Database(err)
    }
}

/// Failures loading or saving one of the JSON documents.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("storage error on '{key}': {source}")]
    Store {
        key: &'static str,
        #[source]
        source: StoreError,
    },

    /// The stored object is not valid JSON for its schema (missing required fields, wrong types)
    #[error("malformed document '{key}': {source}")]
    Malformed {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not encode document '{key}': {source}")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The document parsed but violates a structural rule
    #[error("invalid document '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Feed Configuration
// ============================================================================

fn default_enabled() -> bool {
    true
}

fn default_priority() -> u8 {
    5
}

/// Configuration record identifying one feed source.
///
/// Owned by the feed configuration document; the pipeline only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedDescriptor {
    pub id: String,
    pub url: String,
    pub title: String,
    pub category: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
}

/// Aggregate counters kept alongside the feed list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedStatistics {
    pub total_feeds: usize,
    pub active_feeds: usize,
    /// Articles delivered across all cycles
    pub total_articles_processed: u64,
    /// Cycles that delivered at least one article
    pub total_notifications_sent: u64,
    pub avg_articles_per_notification: f64,
}

/// The persisted `feeds.json` document.
///
/// `version` and `feeds` are required; a stored object missing either is a
/// configuration error rather than something to paper over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfigDocument {
    pub version: String,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    pub feeds: Vec<FeedDescriptor>,
    #[serde(default)]
    pub statistics: FeedStatistics,
}

impl FeedConfigDocument {
    pub fn empty() -> Self {
        Self {
            version: DOCUMENT_VERSION.to_string(),
            updated_at: Utc::now(),
            feeds: Vec::new(),
            statistics: FeedStatistics::default(),
        }
    }

    pub fn enabled_feeds(&self) -> Vec<FeedDescriptor> {
        self.feeds.iter().filter(|f| f.enabled).cloned().collect()
    }
}

// ============================================================================
// Notification History
// ============================================================================

/// Retention rules stored inside the history document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Maximum number of entries kept (oldest evicted first)
    pub max_history_size: usize,
    /// Entries notified longer ago than this are dropped
    pub cleanup_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_history_size: 1000,
            cleanup_days: 30,
        }
    }
}

impl RetentionConfig {
    /// Both limits must be positive and the age window within [`MAX_WINDOW_DAYS`].
    /// Anything else empties the history on the next append.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_history_size == 0 {
            return Err("max_history_size must be at least 1".to_string());
        }
        if !(1..=MAX_WINDOW_DAYS).contains(&self.cleanup_days) {
            return Err(format!(
                "cleanup_days must be between 1 and {MAX_WINDOW_DAYS}, got {}",
                self.cleanup_days
            ));
        }
        Ok(())
    }

    /// Age window, or `None` when `cleanup_days` is out of range.
    pub fn window(&self) -> Option<Duration> {
        if (1..=MAX_WINDOW_DAYS).contains(&self.cleanup_days) {
            Duration::try_days(self.cleanup_days)
        } else {
            None
        }
    }
}

/// One delivered article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub title: String,
    pub link: String,
    pub feed_id: String,
    pub feed_title: String,
    pub category: String,
    pub notified_at: DateTime<Utc>,
    #[serde(default)]
    pub article_published_at: Option<DateTime<Utc>>,
    /// `sha256:` followed by 16 hex chars of SHA-256(title ‖ link)
    pub article_hash: String,
    pub notification_batch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ArticleMetadata>,
}

/// Aggregates recomputed after every prune.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryStatistics {
    pub total_notifications: usize,
    pub oldest_record: Option<DateTime<Utc>>,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub avg_daily_notifications: f64,
    pub category_stats: BTreeMap<String, usize>,
}

/// The persisted `history.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryDocument {
    pub version: String,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub config: RetentionConfig,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub statistics: HistoryStatistics,
}

impl HistoryDocument {
    pub fn empty(config: RetentionConfig) -> Self {
        let now = Utc::now();
        Self {
            version: DOCUMENT_VERSION.to_string(),
            updated_at: now,
            config,
            history: Vec::new(),
            statistics: HistoryStatistics {
                last_cleanup: Some(now),
                ..HistoryStatistics::default()
            },
        }
    }

    /// Existence check keyed by link equality.
    pub fn is_notified(&self, link: &str) -> bool {
        self.history.iter().any(|h| h.link == link)
    }

    /// All notified links, for bulk checks against a whole batch.
    pub fn notified_links(&self) -> HashSet<&str> {
        self.history.iter().map(|h| h.link.as_str()).collect()
    }
}
