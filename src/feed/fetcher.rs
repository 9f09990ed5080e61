use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;

use crate::article::Article;
use crate::feed::parser::{parse_feed, ParseResult};
use crate::storage::FeedDescriptor;
use crate::util::{validate_feed_url, UrlValidationError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while retrieving one feed.
///
/// Every variant is a per-feed source error: the coordinator logs it and
/// moves on, it never aborts the batch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Descriptor URL failed validation; no request was made
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Fetch task panicked or was cancelled
    #[error("Fetch task aborted: {0}")]
    Aborted(String),
}

/// Knobs for [`HttpFeedSource`].
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub max_retries: u32,
    /// First backoff delay; doubled on every further retry
    pub retry_base_delay: Duration,
    pub max_feed_size: usize,
    pub user_agent: String,
    /// Permit loopback and private-network feed URLs
    pub allow_private_hosts: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_secs(1),
            max_feed_size: DEFAULT_MAX_FEED_SIZE,
            user_agent: concat!("feedrelay/", env!("CARGO_PKG_VERSION")).to_string(),
            allow_private_hosts: false,
        }
    }
}

/// Anything that can turn one feed descriptor into normalized articles.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, feed: &FeedDescriptor) -> Result<Vec<Article>, FetchError>;
}

/// [`FeedSource`] that downloads feeds over HTTP(S).
#[derive(Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl HttpFeedSource {
    pub fn new(client: reqwest::Client, settings: FetchSettings) -> Self {
        Self { client, settings }
    }

    /// Build a client tuned for feed polling from `settings`.
    pub fn from_settings(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(redirect_policy())
            .user_agent(settings.user_agent.clone())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .timeout(settings.timeout)
            .build()?;
        Ok(Self::new(client, settings))
    }

    /// Backoff before retry number `attempt` (0-based): base, 2x base, 4x base...
    fn backoff(&self, attempt: u32) -> Duration {
        self.settings
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    async fn download(&self, feed: &FeedDescriptor) -> Result<Vec<u8>, FetchError> {
        let url = validate_feed_url(&feed.url, self.settings.allow_private_hosts)?;
        let max_retries = self.settings.max_retries;
        let mut retry_count = 0;

        loop {
            let response = tokio::time::timeout(self.settings.timeout, self.client.get(url.clone()).send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::Network)?;

            let status = response.status();

            // Rate limiting: exponential backoff, distinct error once exhausted
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= max_retries {
                    return Err(FetchError::RateLimited(max_retries));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    feed_id = %feed.id,
                    url = %feed.url,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= max_retries {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    feed_id = %feed.id,
                    url = %feed.url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // 4xx and other non-success codes fail immediately
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            match read_limited_bytes(response, self.settings.max_feed_size).await {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    if retry_count >= max_retries {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }
                    let delay = self.backoff(retry_count);
                    tracing::debug!(
                        feed_id = %feed.id,
                        expected,
                        received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, feed: &FeedDescriptor) -> Result<Vec<Article>, FetchError> {
        let bytes = self.download(feed).await?;

        let ParseResult {
            articles,
            skipped,
            warning,
        } = parse_feed(&bytes, feed, Utc::now());

        if let Some(warning) = warning {
            tracing::warn!(feed_id = %feed.id, url = %feed.url, warning = %warning, "Feed document malformed");
        }
        if skipped > 0 {
            tracing::debug!(feed_id = %feed.id, skipped, "Entries without title or link skipped");
        }
        tracing::debug!(feed_id = %feed.id, articles = articles.len(), "Fetched feed");

        Ok(articles)
    }
}

/// Limit redirects to 3 hops and reject loops.
fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // A connection cut mid-body leaves fewer bytes than advertised
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{any, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Test</title>
    <item><guid>1</guid><title>Test</title><link>https://example.com/1</link></item>
</channel></rss>"#;

    fn source() -> HttpFeedSource {
        HttpFeedSource::from_settings(FetchSettings {
            retry_base_delay: Duration::ZERO,
            allow_private_hosts: true,
            ..FetchSettings::default()
        })
        .unwrap()
    }

    fn descriptor(url: String) -> FeedDescriptor {
        FeedDescriptor {
            id: "test".to_string(),
            url,
            title: "Test".to_string(),
            category: "tech".to_string(),
            enabled: true,
            priority: 5,
            added_at: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&mock_server)
            .await;

        let feed = descriptor(format!("{}/feed", mock_server.uri()));
        let articles = source().fetch(&feed).await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].feed_id, "test");
        assert_eq!(articles[0].category, "tech");
    }

    #[tokio::test]
    async fn test_fetch_404_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let feed = descriptor(format!("{}/feed", mock_server.uri()));
        match source().fetch(&feed).await.unwrap_err() {
            FetchError::HttpStatus(404) => {}
            e => panic!("Expected HttpStatus(404), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_fetch_500_error_retries_then_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // Initial request + 3 retries
            .mount(&mock_server)
            .await;

        let feed = descriptor(format!("{}/feed", mock_server.uri()));
        match source().fetch(&feed).await.unwrap_err() {
            FetchError::HttpStatus(500) => {}
            e => panic!("Expected HttpStatus(500), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_fetch_503_retry_then_success() {
        let mock_server = MockServer::start().await;

        // First two requests return 503, third succeeds
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;

        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let feed = descriptor(format!("{}/feed", mock_server.uri()));
        assert_eq!(source().fetch(&feed).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_rate_limited_after_retries() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(429))
            .expect(4)
            .mount(&mock_server)
            .await;

        let feed = descriptor(format!("{}/feed", mock_server.uri()));
        assert!(matches!(
            source().fetch(&feed).await.unwrap_err(),
            FetchError::RateLimited(3)
        ));
    }

    #[tokio::test]
    async fn test_fetch_oversized_body_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(2048)))
            .mount(&mock_server)
            .await;

        let source = HttpFeedSource::from_settings(FetchSettings {
            max_feed_size: 1024,
            allow_private_hosts: true,
            ..FetchSettings::default()
        })
        .unwrap();
        let feed = descriptor(format!("{}/feed", mock_server.uri()));
        assert!(matches!(
            source.fetch(&feed).await.unwrap_err(),
            FetchError::ResponseTooLarge
        ));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let source = HttpFeedSource::from_settings(FetchSettings {
            timeout: Duration::from_millis(200),
            allow_private_hosts: true,
            ..FetchSettings::default()
        })
        .unwrap();
        let feed = descriptor(format!("{}/feed", mock_server.uri()));
        let err = source.fetch(&feed).await.unwrap_err();
        assert!(
            matches!(err, FetchError::Timeout | FetchError::Network(_)),
            "Expected timeout, got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_private_host_rejected_without_request() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(0)
            .mount(&mock_server)
            .await;

        let strict = HttpFeedSource::from_settings(FetchSettings::default()).unwrap();
        let feed = descriptor(format!("{}/feed", mock_server.uri()));
        assert!(matches!(
            strict.fetch(&feed).await.unwrap_err(),
            FetchError::InvalidUrl(_)
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_is_not_an_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let feed = descriptor(format!("{}/feed", mock_server.uri()));
        assert!(source().fetch(&feed).await.unwrap().is_empty());
    }

    #[test]
    fn test_backoff_doubles() {
        let source = HttpFeedSource::new(
            reqwest::Client::new(),
            FetchSettings {
                retry_base_delay: Duration::from_millis(100),
                ..FetchSettings::default()
            },
        );
        assert_eq!(source.backoff(0), Duration::from_millis(100));
        assert_eq!(source.backoff(1), Duration::from_millis(200));
        assert_eq!(source.backoff(2), Duration::from_millis(400));
    }
}
