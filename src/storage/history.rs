use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::schema::ObjectStore;
use super::types::{
    DocumentError, HistoryDocument, HistoryEntry, HistoryStatistics, RetentionConfig,
    DOCUMENT_VERSION,
};
use crate::article::Article;

/// Object key of the notification history document.
pub const HISTORY_KEY: &str = "history.json";

/// Durable record of which links have already been delivered.
///
/// The whole history lives in one object, so a save is all-or-nothing: a
/// failed write leaves the previous version in place.
#[derive(Clone)]
pub struct HistoryStore {
    store: Arc<dyn ObjectStore>,
    defaults: RetentionConfig,
}

impl HistoryStore {
    /// `defaults` only applies when the history document is created.
    pub fn new(store: Arc<dyn ObjectStore>, defaults: RetentionConfig) -> Self {
        Self { store, defaults }
    }

    /// Load the history document, creating it on first access.
    ///
    /// # Errors
    ///
    /// A read failure other than "not found" and an undecodable document are
    /// both returned; the caller cannot safely deduplicate without history.
    pub async fn load(&self) -> Result<HistoryDocument, DocumentError> {
        let body = self
            .store
            .get_object(HISTORY_KEY)
            .await
            .map_err(|source| DocumentError::Store {
                key: HISTORY_KEY,
                source,
            })?;

        let Some(body) = body else {
            validate_retention(&self.defaults)?;
            tracing::info!(key = HISTORY_KEY, "No notification history found, creating default");
            let doc = HistoryDocument::empty(self.defaults);
            if let Err(e) = self.save(&doc).await {
                tracing::warn!(error = %e, "Failed to persist default notification history");
            }
            return Ok(doc);
        };

        let doc: HistoryDocument =
            serde_json::from_str(&body).map_err(|source| DocumentError::Malformed {
                key: HISTORY_KEY,
                source,
            })?;
        validate_retention(&doc.config)?;
        tracing::debug!(entries = doc.history.len(), "Loaded notification history");
        Ok(doc)
    }

    /// Existence check against the full stored history.
    pub async fn is_notified(&self, link: &str) -> Result<bool, DocumentError> {
        Ok(self.load().await?.is_notified(link))
    }

    /// Load, append `articles` under `batch_id`, prune and persist.
    ///
    /// Returns the number of entries appended.
    pub async fn append(&self, articles: &[Article], batch_id: &str) -> Result<usize, DocumentError> {
        let doc = self.load().await?;
        self.record(doc, articles, batch_id, Utc::now()).await
    }

    /// Append to an already-loaded document and persist it.
    ///
    /// Retention pruning and statistics recomputation run before the single
    /// write. On a write failure nothing is visible to later readers.
    pub async fn record(
        &self,
        mut doc: HistoryDocument,
        articles: &[Article],
        batch_id: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, DocumentError> {
        validate_retention(&doc.config)?;
        for article in articles {
            doc.history.push(history_entry(article, batch_id, now));
        }

        prune(&mut doc, now);
        doc.statistics = compute_statistics(&doc.history, now, Some(now));

        self.save(&doc).await?;
        tracing::info!(
            appended = articles.len(),
            retained = doc.history.len(),
            batch_id = %batch_id,
            "Recorded notification history"
        );
        Ok(articles.len())
    }

    /// Entries notified within the last `days` days, newest first.
    ///
    /// A window too large to represent returns the whole history.
    pub async fn recent(&self, days: i64) -> Result<Vec<HistoryEntry>, DocumentError> {
        let doc = self.load().await?;
        let cutoff = Duration::try_days(days.max(0)).and_then(|d| Utc::now().checked_sub_signed(d));
        let mut recent: Vec<HistoryEntry> = doc
            .history
            .into_iter()
            .filter(|h| cutoff.map_or(true, |cutoff| h.notified_at > cutoff))
            .collect();
        recent.sort_by(|a, b| b.notified_at.cmp(&a.notified_at));
        Ok(recent)
    }

    async fn save(&self, doc: &HistoryDocument) -> Result<(), DocumentError> {
        let mut stamped = doc.clone();
        stamped.version = DOCUMENT_VERSION.to_string();
        stamped.updated_at = Utc::now();

        let body =
            serde_json::to_string_pretty(&stamped).map_err(|source| DocumentError::Encode {
                key: HISTORY_KEY,
                source,
            })?;
        self.store
            .put_object(HISTORY_KEY, &body)
            .await
            .map_err(|source| DocumentError::Store {
                key: HISTORY_KEY,
                source,
            })
    }
}

fn validate_retention(config: &RetentionConfig) -> Result<(), DocumentError> {
    config.validate().map_err(|reason| DocumentError::Invalid {
        key: HISTORY_KEY,
        reason,
    })
}

/// `sha256:` + first 16 hex chars of SHA-256(title ‖ link).
pub fn fingerprint(title: &str, link: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(link.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("sha256:{}", &digest[..16])
}

/// Batch ids sort by time and stay unique across overlapping runs.
pub fn new_batch_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("batch_{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8])
}

fn history_entry(article: &Article, batch_id: &str, now: DateTime<Utc>) -> HistoryEntry {
    HistoryEntry {
        id: format!("hist_{}", uuid::Uuid::new_v4().simple()),
        title: article.title.clone(),
        link: article.link.clone(),
        feed_id: article.feed_id.clone(),
        feed_title: article.feed_title.clone(),
        category: article.category_key().to_string(),
        notified_at: now,
        article_published_at: (!article.published_inferred).then_some(article.published),
        article_hash: fingerprint(&article.title, &article.link),
        notification_batch_id: batch_id.to_string(),
        metadata: article.metadata.clone(),
    }
}

/// Apply both retention rules.
///
/// Size: keep the `max_history_size` most recently notified entries.
/// Age: drop anything notified more than `cleanup_days` before `now`.
/// Both run on every call. A zero size or an out-of-range `cleanup_days`
/// skips that rule instead of emptying the history.
pub fn prune(doc: &mut HistoryDocument, now: DateTime<Utc>) {
    let max = doc.config.max_history_size;
    if max > 0 && doc.history.len() > max {
        // Stable: entries sharing a timestamp keep insertion order
        doc.history.sort_by_key(|h| h.notified_at);
        let evicted = doc.history.len() - max;
        doc.history.drain(..evicted);
        tracing::info!(evicted, max, "Evicted oldest history entries over size limit");
    }

    let Some(cutoff) = doc.config.window().and_then(|w| now.checked_sub_signed(w)) else {
        tracing::warn!(
            retention_days = doc.config.cleanup_days,
            "Retention window out of range, skipping age pruning"
        );
        return;
    };
    let before = doc.history.len();
    doc.history.retain(|h| h.notified_at > cutoff);
    let expired = before - doc.history.len();
    if expired > 0 {
        tracing::info!(
            expired,
            retention_days = doc.config.cleanup_days,
            "Dropped history entries past retention window"
        );
    }
}

/// Recompute aggregates from the full entry set.
pub fn compute_statistics(
    entries: &[HistoryEntry],
    now: DateTime<Utc>,
    last_cleanup: Option<DateTime<Utc>>,
) -> HistoryStatistics {
    let oldest_record = entries.iter().map(|h| h.notified_at).min();

    let mut category_stats = BTreeMap::new();
    for entry in entries {
        *category_stats.entry(entry.category.clone()).or_insert(0) += 1;
    }

    let avg_daily_notifications = match oldest_record {
        Some(oldest) => {
            let days = (now - oldest).num_days().max(1);
            let avg = entries.len() as f64 / days as f64;
            (avg * 10.0).round() / 10.0
        }
        None => 0.0,
    };

    HistoryStatistics {
        total_notifications: entries.len(),
        oldest_record,
        last_cleanup,
        avg_daily_notifications,
        category_stats,
    }
}
