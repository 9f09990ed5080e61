use async_trait::async_trait;
use std::fmt::Write as _;
use std::io::Write;

use super::{Deliver, DeliveryError};
use crate::article::CategorizedArticles;

/// Prints the digest to stdout. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleDelivery;

#[async_trait]
impl Deliver for ConsoleDelivery {
    async fn deliver(&self, articles: &CategorizedArticles) -> Result<(), DeliveryError> {
        let digest = render_digest(articles);
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(digest.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }

    async fn report_failure(&self, message: &str) {
        eprintln!("❌ feedrelay cycle failed\n\n{message}");
    }
}

/// Plain-text digest: one block per category, articles in rank order.
pub fn render_digest(articles: &CategorizedArticles) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "📰 {} new articles", articles.total());

    for (category, group) in articles.iter() {
        let _ = writeln!(out, "\n## {category} ({})", group.len());
        for article in group {
            match &article.metadata {
                Some(meta) => {
                    let _ = writeln!(
                        out,
                        "{}. {} {} [{:.0}] ({} min, {})",
                        meta.rank,
                        meta.content_type.icon(),
                        article.title,
                        meta.priority_score,
                        meta.reading_minutes,
                        meta.difficulty
                    );
                }
                None => {
                    let _ = writeln!(out, "- {}", article.title);
                }
            }
            let _ = writeln!(out, "   {}", article.link);
        }
    }
    out
}
