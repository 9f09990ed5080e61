//! Integration tests for the notification cycle: fetch, dedup, deliver, record.
//!
//! Each test runs the full pipeline against its own in-memory SQLite object
//! store, with a scripted feed source and a recording delivery channel in
//! place of the network.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use feedrelay::analysis::Classifier;
use feedrelay::article::{Article, CategorizedArticles, SourceMeta};
use feedrelay::delivery::{Deliver, DeliveryError};
use feedrelay::feed::{FeedSource, FetchCoordinator, FetchError};
use feedrelay::pipeline::{CycleError, Pipeline};
use feedrelay::storage::{
    Database, FeedConfigStore, FeedDescriptor, HistoryStore, ObjectStore, RetentionConfig,
    StoreError, FEEDS_KEY, HISTORY_KEY,
};

// ============================================================================
// Fakes
// ============================================================================

/// Object store that can be told to reject writes to the history document.
struct FlakyStore {
    inner: Database,
    fail_history_puts: AtomicBool,
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn get_object(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get_object(key).await
    }

    async fn put_object(&self, key: &str, body: &str) -> Result<(), StoreError> {
        if key == HISTORY_KEY && self.fail_history_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("bucket offline".to_string()));
        }
        self.inner.put_object(key, body).await
    }
}

#[derive(Default)]
struct ScriptedSource {
    articles: HashMap<String, Vec<Article>>,
    failing: Vec<String>,
    calls: AtomicUsize,
}

#[async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch(&self, feed: &FeedDescriptor) -> Result<Vec<Article>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&feed.id) {
            return Err(FetchError::HttpStatus(503));
        }
        Ok(self.articles.get(&feed.id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct RecordingDelivery {
    batches: Mutex<Vec<CategorizedArticles>>,
    failures: Mutex<Vec<String>>,
    reject: bool,
}

impl RecordingDelivery {
    fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    fn delivered_links(&self) -> Vec<Vec<String>> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(|batch| batch.articles().map(|a| a.link.clone()).collect())
            .collect()
    }
}

#[async_trait]
impl Deliver for RecordingDelivery {
    async fn deliver(&self, articles: &CategorizedArticles) -> Result<(), DeliveryError> {
        if self.reject {
            return Err(DeliveryError::HttpStatus(502));
        }
        self.batches.lock().unwrap().push(articles.clone());
        Ok(())
    }

    async fn report_failure(&self, message: &str) {
        self.failures.lock().unwrap().push(message.to_string());
    }
}

// ============================================================================
// Fixtures
// ============================================================================

struct Harness {
    store: Arc<FlakyStore>,
    source: Arc<ScriptedSource>,
    delivery: Arc<RecordingDelivery>,
    pipeline: Pipeline,
}

fn fresh_article(feed_id: &str, category: &str, title: &str, link: &str) -> Article {
    Article {
        title: title.to_string(),
        link: link.to_string(),
        description: format!("About {title}"),
        published: Utc::now() - Duration::hours(1),
        published_inferred: false,
        feed_id: feed_id.to_string(),
        feed_title: format!("Feed {feed_id}"),
        category: category.to_string(),
        image_url: None,
        source: SourceMeta::default(),
        metadata: None,
    }
}

fn descriptor(id: &str, category: &str, enabled: bool) -> FeedDescriptor {
    FeedDescriptor {
        id: id.to_string(),
        url: format!("https://{id}.example.com/rss"),
        title: format!("Feed {id}"),
        category: category.to_string(),
        enabled,
        priority: 5,
        added_at: None,
    }
}

async fn harness(
    feeds: Vec<FeedDescriptor>,
    source: ScriptedSource,
    delivery: RecordingDelivery,
) -> Harness {
    let store = Arc::new(FlakyStore {
        inner: Database::open(":memory:").await.unwrap(),
        fail_history_puts: AtomicBool::new(false),
    });
    let objects: Arc<dyn ObjectStore> = store.clone();

    let feed_store = FeedConfigStore::new(Arc::clone(&objects));
    feed_store.merge_feeds(feeds).await.unwrap();

    let source = Arc::new(source);
    let delivery = Arc::new(delivery);
    let pipeline = Pipeline::new(
        feed_store,
        HistoryStore::new(Arc::clone(&objects), RetentionConfig::default()),
        FetchCoordinator::new(source.clone(), 4),
        Classifier::default(),
        delivery.clone(),
    );

    Harness {
        store,
        source,
        delivery,
        pipeline,
    }
}

async fn history_len(store: &FlakyStore) -> usize {
    let body = store.get_object(HISTORY_KEY).await.unwrap().unwrap();
    let doc: serde_json::Value = serde_json::from_str(&body).unwrap();
    doc["history"].as_array().unwrap().len()
}

fn two_feed_source() -> ScriptedSource {
    let mut source = ScriptedSource::default();
    source.articles.insert(
        "a".to_string(),
        vec![
            fresh_article("a", "tech", "Rust 2.0 released", "https://a.example.com/1"),
            fresh_article("a", "tech", "Async traits explained", "https://a.example.com/2"),
        ],
    );
    source.articles.insert(
        "b".to_string(),
        vec![fresh_article("b", "science", "New exoplanet", "https://b.example.com/1")],
    );
    source
}

// ============================================================================
// Idempotent Delivery
// ============================================================================

#[tokio::test]
async fn test_second_cycle_delivers_nothing_new() {
    let h = harness(
        vec![descriptor("a", "tech", true), descriptor("b", "science", true)],
        two_feed_source(),
        RecordingDelivery::default(),
    )
    .await;

    let first = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(first.notified_count, 3);
    assert_eq!(first.categories, vec!["science".to_string(), "tech".to_string()]);
    assert!(first.history_recorded);
    assert!(first.batch_id.is_some());

    let second = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(second.notified_count, 0);
    assert_eq!(second.fresh_articles, 3);
    assert!(second.batch_id.is_none());

    assert_eq!(h.delivery.batches.lock().unwrap().len(), 1);
    assert_eq!(history_len(&h.store).await, 3);
}

#[tokio::test]
async fn test_only_new_links_are_delivered_after_feed_update() {
    let mut source = ScriptedSource::default();
    source.articles.insert(
        "a".to_string(),
        vec![fresh_article("a", "tech", "First", "https://a.example.com/1")],
    );
    let h = harness(vec![descriptor("a", "tech", true)], source, RecordingDelivery::default()).await;
    h.pipeline.run_cycle().await.unwrap();

    // Same link with a new title is still a duplicate
    let mut updated = ScriptedSource::default();
    updated.articles.insert(
        "a".to_string(),
        vec![
            fresh_article("a", "tech", "First (edited)", "https://a.example.com/1"),
            fresh_article("a", "tech", "Second", "https://a.example.com/2"),
        ],
    );
    let objects: Arc<dyn ObjectStore> = h.store.clone();
    let delivery = Arc::new(RecordingDelivery::default());
    let pipeline = Pipeline::new(
        FeedConfigStore::new(Arc::clone(&objects)),
        HistoryStore::new(objects, RetentionConfig::default()),
        FetchCoordinator::new(Arc::new(updated), 4),
        Classifier::default(),
        delivery.clone(),
    );

    let summary = pipeline.run_cycle().await.unwrap();
    assert_eq!(summary.notified_count, 1);
    assert_eq!(delivery.delivered_links(), vec![vec!["https://a.example.com/2".to_string()]]);
}

// ============================================================================
// No-op Cycles
// ============================================================================

#[tokio::test]
async fn test_no_enabled_feeds_skips_fetch_delivery_and_history() {
    let h = harness(
        vec![descriptor("a", "tech", false)],
        two_feed_source(),
        RecordingDelivery::default(),
    )
    .await;

    let summary = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(summary.notified_count, 0);
    assert_eq!(summary.feeds_succeeded, 0);
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 0);
    assert!(h.delivery.batches.lock().unwrap().is_empty());
    assert!(h.store.get_object(HISTORY_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn test_stale_articles_are_not_delivered() {
    let mut source = ScriptedSource::default();
    let mut old = fresh_article("a", "tech", "Old news", "https://a.example.com/old");
    old.published = Utc::now() - Duration::hours(48);
    source.articles.insert("a".to_string(), vec![old]);

    let h = harness(vec![descriptor("a", "tech", true)], source, RecordingDelivery::default()).await;

    let summary = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(summary.fresh_articles, 0);
    assert_eq!(summary.feeds_succeeded, 1);
    assert!(h.delivery.batches.lock().unwrap().is_empty());
    assert!(h.store.get_object(HISTORY_KEY).await.unwrap().is_none());
}

// ============================================================================
// Failure Handling
// ============================================================================

#[tokio::test]
async fn test_partial_feed_failure_still_delivers_the_rest() {
    let mut source = two_feed_source();
    source.failing.push("b".to_string());
    let h = harness(
        vec![descriptor("a", "tech", true), descriptor("b", "science", true)],
        source,
        RecordingDelivery::default(),
    )
    .await;

    let summary = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(summary.feeds_succeeded, 1);
    assert_eq!(summary.feeds_failed, 1);
    assert_eq!(summary.notified_count, 2);
    assert_eq!(summary.categories, vec!["tech".to_string()]);
}

#[tokio::test]
async fn test_delivery_failure_records_nothing_and_is_reported() {
    let h = harness(
        vec![descriptor("a", "tech", true)],
        two_feed_source(),
        RecordingDelivery::rejecting(),
    )
    .await;

    let err = h.pipeline.run_cycle().await.unwrap_err();
    assert!(matches!(err, CycleError::Delivery(DeliveryError::HttpStatus(502))));
    assert_eq!(history_len(&h.store).await, 0);

    let failures = h.delivery.failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("Delivery failed"));
}

#[tokio::test]
async fn test_history_write_failure_is_not_fatal() {
    let h = harness(
        vec![descriptor("a", "tech", true)],
        two_feed_source(),
        RecordingDelivery::default(),
    )
    .await;
    h.store.fail_history_puts.store(true, Ordering::SeqCst);

    let summary = h.pipeline.run_cycle().await.unwrap();
    assert_eq!(summary.notified_count, 2);
    assert!(summary.batch_id.is_some());
    assert!(!summary.history_recorded);
    assert_eq!(h.delivery.batches.lock().unwrap().len(), 1);
    assert!(h.store.get_object(HISTORY_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn test_malformed_feed_config_aborts_before_fetch() {
    let h = harness(
        vec![descriptor("a", "tech", true)],
        two_feed_source(),
        RecordingDelivery::default(),
    )
    .await;
    h.store.put_object(FEEDS_KEY, "{ \"feeds\": [").await.unwrap();

    let err = h.pipeline.run_cycle().await.unwrap_err();
    assert!(matches!(err, CycleError::Config(_)));
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 0);
    assert!(h.delivery.batches.lock().unwrap().is_empty());
    assert_eq!(h.delivery.failures.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_feed_statistics_track_deliveries() {
    let h = harness(
        vec![descriptor("a", "tech", true), descriptor("b", "science", true)],
        two_feed_source(),
        RecordingDelivery::default(),
    )
    .await;
    h.pipeline.run_cycle().await.unwrap();

    let objects: Arc<dyn ObjectStore> = h.store.clone();
    let doc = FeedConfigStore::new(objects).load().await.unwrap();
    assert_eq!(doc.statistics.total_notifications_sent, 1);
    assert_eq!(doc.statistics.total_articles_processed, 3);
    assert_eq!(doc.statistics.active_feeds, 2);
}
