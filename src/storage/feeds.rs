use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use super::schema::ObjectStore;
use super::types::{
    DocumentError, FeedConfigDocument, FeedDescriptor, FeedStatistics, DOCUMENT_VERSION,
};

/// Object key of the feed configuration document.
pub const FEEDS_KEY: &str = "feeds.json";

/// Loads and saves the feed configuration document.
#[derive(Clone)]
pub struct FeedConfigStore {
    store: Arc<dyn ObjectStore>,
}

impl FeedConfigStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Load the feed configuration.
    ///
    /// An absent document is first-run state: an empty configuration is
    /// created, persisted and returned. A document that is present but
    /// structurally invalid is an error; the cycle must not touch the network.
    pub async fn load(&self) -> Result<FeedConfigDocument, DocumentError> {
        let body = self
            .store
            .get_object(FEEDS_KEY)
            .await
            .map_err(|source| DocumentError::Store {
                key: FEEDS_KEY,
                source,
            })?;

        let Some(body) = body else {
            tracing::info!(key = FEEDS_KEY, "No feed configuration found, creating default");
            let mut doc = FeedConfigDocument::empty();
            if let Err(e) = self.save(&mut doc).await {
                tracing::warn!(error = %e, "Failed to persist default feed configuration");
            }
            return Ok(doc);
        };

        let doc: FeedConfigDocument =
            serde_json::from_str(&body).map_err(|source| DocumentError::Malformed {
                key: FEEDS_KEY,
                source,
            })?;
        validate(&doc)?;

        tracing::info!(feeds = doc.feeds.len(), "Loaded feed configuration");
        Ok(doc)
    }

    /// Validate, stamp and persist the document.
    ///
    /// `version`, `updated_at` and the feed counts are refreshed in place so
    /// the caller's copy matches what was written.
    pub async fn save(&self, doc: &mut FeedConfigDocument) -> Result<(), DocumentError> {
        validate(doc)?;

        doc.version = DOCUMENT_VERSION.to_string();
        doc.updated_at = Utc::now();
        doc.statistics.total_feeds = doc.feeds.len();
        doc.statistics.active_feeds = doc.feeds.iter().filter(|f| f.enabled).count();

        let body = serde_json::to_string_pretty(doc).map_err(|source| DocumentError::Encode {
            key: FEEDS_KEY,
            source,
        })?;
        self.store
            .put_object(FEEDS_KEY, &body)
            .await
            .map_err(|source| DocumentError::Store {
                key: FEEDS_KEY,
                source,
            })?;

        tracing::debug!(feeds = doc.feeds.len(), "Saved feed configuration");
        Ok(())
    }

    /// Fold one delivered batch into the running statistics and persist.
    pub async fn record_delivery(
        &self,
        doc: &mut FeedConfigDocument,
        delivered: usize,
    ) -> Result<(), DocumentError> {
        doc.statistics.record_delivery(delivered);
        self.save(doc).await
    }

    /// Add descriptors whose URL is not configured yet. Returns how many were added.
    pub async fn merge_feeds(&self, incoming: Vec<FeedDescriptor>) -> Result<usize, DocumentError> {
        let mut doc = self.load().await?;
        let mut known_urls: HashSet<String> = doc.feeds.iter().map(|f| f.url.clone()).collect();
        let mut known_ids: HashSet<String> = doc.feeds.iter().map(|f| f.id.clone()).collect();

        let mut added = 0;
        for feed in incoming {
            if known_urls.contains(&feed.url) || known_ids.contains(&feed.id) {
                tracing::debug!(url = %feed.url, "Feed already configured, skipping");
                continue;
            }
            known_urls.insert(feed.url.clone());
            known_ids.insert(feed.id.clone());
            doc.feeds.push(feed);
            added += 1;
        }

        if added > 0 {
            self.save(&mut doc).await?;
        }
        Ok(added)
    }
}

impl FeedStatistics {
    /// Count one delivered batch of `delivered` articles.
    pub fn record_delivery(&mut self, delivered: usize) {
        self.total_notifications_sent += 1;
        self.total_articles_processed += delivered as u64;
        let avg = self.total_articles_processed as f64 / self.total_notifications_sent as f64;
        self.avg_articles_per_notification = (avg * 10.0).round() / 10.0;
    }
}

/// Structural checks serde cannot express.
fn validate(doc: &FeedConfigDocument) -> Result<(), DocumentError> {
    let mut ids = HashSet::new();
    for (index, feed) in doc.feeds.iter().enumerate() {
        let invalid = |reason: String| DocumentError::Invalid {
            key: FEEDS_KEY,
            reason,
        };
        if feed.id.trim().is_empty() {
            return Err(invalid(format!("feed {index} has an empty 'id'")));
        }
        if feed.url.trim().is_empty() {
            return Err(invalid(format!("feed {index} ('{}') has an empty 'url'", feed.id)));
        }
        if !ids.insert(feed.id.as_str()) {
            return Err(invalid(format!("duplicate feed id '{}'", feed.id)));
        }
    }
    Ok(())
}
