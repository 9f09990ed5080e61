//! One notification cycle: fetch, score, deduplicate, deliver, record.

use chrono::{Duration, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::analysis::{rank_by_category, Classifier};
use crate::delivery::{Deliver, DeliveryError};
use crate::feed::{filter_recent, FetchCoordinator};
use crate::storage::{new_batch_id, DocumentError, FeedConfigStore, FeedDescriptor, HistoryStore};

pub const DEFAULT_FRESHNESS_HOURS: i64 = 24;

/// What one cycle did, for relay to whoever triggered it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSummary {
    pub notified_count: usize,
    /// Categories that had at least one delivered article
    pub categories: Vec<String>,
    pub feeds_succeeded: usize,
    pub feeds_failed: usize,
    /// Articles left after the freshness window, before deduplication
    pub fresh_articles: usize,
    /// Set only when something was delivered
    pub batch_id: Option<String>,
    /// False when delivery succeeded but the history write did not
    pub history_recorded: bool,
}

/// Failures that abort a cycle. `Display` is the user-facing message.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Could not load feed configuration: {0}")]
    Config(#[source] DocumentError),
    #[error("Could not read notification history: {0}")]
    History(#[source] DocumentError),
    #[error("Delivery failed: {0}")]
    Delivery(#[source] DeliveryError),
}

/// Composes the fetch, scoring, history and delivery stages.
///
/// Runs are not serialized against each other: two overlapping cycles can
/// both deliver the same article. Trigger one cycle at a time.
pub struct Pipeline {
    feeds: FeedConfigStore,
    history: HistoryStore,
    coordinator: FetchCoordinator,
    classifier: Classifier,
    delivery: Arc<dyn Deliver>,
    freshness: Duration,
}

impl Pipeline {
    pub fn new(
        feeds: FeedConfigStore,
        history: HistoryStore,
        coordinator: FetchCoordinator,
        classifier: Classifier,
        delivery: Arc<dyn Deliver>,
    ) -> Self {
        Self {
            feeds,
            history,
            coordinator,
            classifier,
            delivery,
            freshness: Duration::hours(DEFAULT_FRESHNESS_HOURS),
        }
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    /// Current feed descriptors, enabled or not.
    pub async fn feeds(&self) -> Result<Vec<FeedDescriptor>, DocumentError> {
        Ok(self.feeds.load().await?.feeds)
    }

    /// Run one cycle. A failure is also reported through the delivery
    /// channel before it is returned.
    pub async fn run_cycle(&self) -> Result<CycleSummary, CycleError> {
        match self.cycle().await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                tracing::error!(error = %e, "Notification cycle failed");
                self.delivery.report_failure(&e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn cycle(&self) -> Result<CycleSummary, CycleError> {
        let mut config = self.feeds.load().await.map_err(CycleError::Config)?;
        let enabled = config.enabled_feeds();
        if enabled.is_empty() {
            tracing::info!("No enabled feeds, nothing to do");
            return Ok(CycleSummary::default());
        }

        let report = self.coordinator.fetch_all(&enabled).await;
        let mut summary = CycleSummary {
            feeds_succeeded: report.feeds_succeeded,
            feeds_failed: report.feeds_failed,
            ..CycleSummary::default()
        };

        let now = Utc::now();
        let fresh = filter_recent(report.articles, now, self.freshness);
        summary.fresh_articles = fresh.len();
        if fresh.is_empty() {
            tracing::info!("No fresh articles");
            return Ok(summary);
        }

        let ranked = rank_by_category(self.classifier.classify(fresh, now));

        let history = self.history.load().await.map_err(CycleError::History)?;
        let unseen = {
            let notified = history.notified_links();
            ranked.retain_unseen(|link| notified.contains(link))
        };
        if unseen.is_empty() {
            tracing::info!(fresh = summary.fresh_articles, "All fresh articles already notified");
            return Ok(summary);
        }

        self.delivery.deliver(&unseen).await.map_err(CycleError::Delivery)?;

        let delivered: Vec<_> = unseen.articles().cloned().collect();
        let batch_id = new_batch_id(now);
        summary.notified_count = delivered.len();
        summary.categories = unseen.categories();

        match self.history.record(history, &delivered, &batch_id, now).await {
            Ok(_) => summary.history_recorded = true,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    batch_id = %batch_id,
                    delivered = delivered.len(),
                    "Delivered articles could not be recorded; they may be notified again"
                );
            }
        }
        summary.batch_id = Some(batch_id);

        if let Err(e) = self.feeds.record_delivery(&mut config, delivered.len()).await {
            tracing::warn!(error = %e, "Failed to update feed statistics");
        }

        tracing::info!(
            notified = summary.notified_count,
            categories = summary.categories.len(),
            feeds_failed = summary.feeds_failed,
            "Notification cycle complete"
        );
        Ok(summary)
    }
}
