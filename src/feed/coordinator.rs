use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;

use crate::article::Article;
use crate::feed::fetcher::{FeedSource, FetchError};
use crate::storage::FeedDescriptor;

pub const DEFAULT_WORKERS: usize = 10;

/// Aggregate outcome of one fan-out over the configured feeds.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Articles from every feed that succeeded; unordered across feeds
    pub articles: Vec<Article>,
    pub feeds_succeeded: usize,
    pub feeds_failed: usize,
}

/// Runs a [`FeedSource`] over many descriptors with bounded parallelism.
#[derive(Clone)]
pub struct FetchCoordinator {
    source: Arc<dyn FeedSource>,
    workers: usize,
}

impl FetchCoordinator {
    pub fn new(source: Arc<dyn FeedSource>, workers: usize) -> Self {
        Self {
            source,
            workers: workers.max(1),
        }
    }

    /// Fetch every enabled descriptor.
    ///
    /// Each fetch runs in its own task, so a panic inside one source is
    /// contained and counted like any other per-feed failure. Waits for every
    /// dispatched fetch; a failure never cancels its siblings.
    pub async fn fetch_all(&self, feeds: &[FeedDescriptor]) -> FetchReport {
        let enabled: Vec<FeedDescriptor> = feeds.iter().filter(|f| f.enabled).cloned().collect();
        if enabled.is_empty() {
            tracing::info!("No enabled feeds to fetch");
            return FetchReport::default();
        }

        let total = enabled.len();
        let outcomes: Vec<(FeedDescriptor, Result<Vec<Article>, FetchError>)> =
            stream::iter(enabled)
                .map(|feed| {
                    let source = Arc::clone(&self.source);
                    async move {
                        let task_feed = feed.clone();
                        let handle =
                            tokio::spawn(async move { source.fetch(&task_feed).await });
                        let result = match handle.await {
                            Ok(result) => result,
                            Err(join_err) => Err(FetchError::Aborted(join_err.to_string())),
                        };
                        (feed, result)
                    }
                })
                .buffer_unordered(self.workers)
                .collect()
                .await;

        let mut report = FetchReport::default();
        for (feed, result) in outcomes {
            match result {
                Ok(mut articles) => {
                    report.feeds_succeeded += 1;
                    report.articles.append(&mut articles);
                }
                Err(e) => {
                    report.feeds_failed += 1;
                    tracing::warn!(
                        feed_id = %feed.id,
                        title = %feed.title,
                        url = %feed.url,
                        error = %e,
                        "Feed fetch failed"
                    );
                }
            }
        }

        tracing::info!(
            total,
            succeeded = report.feeds_succeeded,
            failed = report.feeds_failed,
            articles = report.articles.len(),
            "Fetched feeds"
        );
        report
    }
}

/// Drop articles published more than `window` before `now`.
///
/// Articles whose publish time had to be inferred are kept: without a real
/// timestamp there is nothing to judge them by. A window reaching past the
/// representable range keeps everything.
pub fn filter_recent(articles: Vec<Article>, now: DateTime<Utc>, window: Duration) -> Vec<Article> {
    let cutoff = now.checked_sub_signed(window);
    let before = articles.len();
    let fresh: Vec<Article> = articles
        .into_iter()
        .filter(|a| a.published_inferred || cutoff.map_or(true, |cutoff| a.published >= cutoff))
        .collect();

    tracing::debug!(before, after = fresh.len(), "Applied freshness window");
    fresh
}
