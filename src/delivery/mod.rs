//! Delivery collaborators: where a cycle's unseen articles are handed off.

mod console;
mod webhook;

use async_trait::async_trait;
use thiserror::Error;

use crate::article::CategorizedArticles;

pub use console::{render_digest, ConsoleDelivery};
pub use webhook::{WebhookDelivery, DEFAULT_WEBHOOK_TIMEOUT};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Delivery timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Delivery endpoint returned status {0}")]
    HttpStatus(u16),
    #[error("Invalid delivery endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Insecure delivery endpoint: HTTPS required (except localhost)")]
    InsecureEndpoint,
    #[error("Failed to write digest: {0}")]
    Io(#[from] std::io::Error),
}

/// Downstream channel that receives ranked, deduplicated articles.
///
/// `deliver` returning `Ok` is the acknowledgment the pipeline waits for
/// before it records anything in history.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, articles: &CategorizedArticles) -> Result<(), DeliveryError>;

    /// Relay a cycle failure to the channel. Best effort.
    async fn report_failure(&self, _message: &str) {}
}
