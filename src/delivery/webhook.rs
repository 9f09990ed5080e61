use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use url::Url;

use super::{Deliver, DeliveryError};
use crate::article::CategorizedArticles;

pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Serialize)]
struct DigestPayload<'a> {
    batch_total: usize,
    categories: &'a CategorizedArticles,
}

#[derive(Serialize)]
struct FailurePayload<'a> {
    error: &'a str,
}

/// Posts each digest as JSON to a webhook endpoint.
pub struct WebhookDelivery {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<SecretString>,
    timeout: Duration,
}

impl std::fmt::Debug for WebhookDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDelivery")
            .field("endpoint", &self.endpoint.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl WebhookDelivery {
    /// Plain HTTP is only accepted for localhost, so a bearer token never
    /// crosses the network unencrypted.
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| DeliveryError::InvalidEndpoint(e.to_string()))?;

        match endpoint.scheme() {
            "https" => {}
            "http" => {
                let local = matches!(endpoint.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
                if !local {
                    tracing::error!(endpoint = %endpoint, "Rejecting non-HTTPS webhook endpoint");
                    return Err(DeliveryError::InsecureEndpoint);
                }
                tracing::warn!(endpoint = %endpoint, "Using non-HTTPS webhook endpoint (localhost only)");
            }
            other => {
                return Err(DeliveryError::InvalidEndpoint(format!(
                    "unsupported scheme '{other}'"
                )))
            }
        }

        Ok(Self {
            client,
            endpoint,
            token,
            timeout,
        })
    }

    async fn post<T: Serialize + Sync>(&self, body: &T) -> Result<(), DeliveryError> {
        let mut request = self.client.post(self.endpoint.clone()).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| DeliveryError::Timeout)?
            .map_err(DeliveryError::Network)?;

        if !response.status().is_success() {
            return Err(DeliveryError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl Deliver for WebhookDelivery {
    async fn deliver(&self, articles: &CategorizedArticles) -> Result<(), DeliveryError> {
        let payload = DigestPayload {
            batch_total: articles.total(),
            categories: articles,
        };
        self.post(&payload).await?;
        tracing::info!(articles = payload.batch_total, "Delivered digest to webhook");
        Ok(())
    }

    async fn report_failure(&self, message: &str) {
        if let Err(e) = self.post(&FailurePayload { error: message }).await {
            tracing::warn!(error = %e, "Failed to report cycle failure to webhook");
        }
    }
}
