//! Normalized article model shared by the fetch, scoring and delivery stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Catch-all bucket for articles whose feed has no category label.
pub const OTHER_CATEGORY: &str = "other";

/// Source metadata carried through from the feed entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMeta {
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub guid: Option<String>,
}

/// Content-type tag assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Trend,
    Explainer,
    Tool,
    Analysis,
    News,
}

impl ContentType {
    pub fn label(self) -> &'static str {
        match self {
            ContentType::Trend => "trend",
            ContentType::Explainer => "explainer",
            ContentType::Tool => "tool",
            ContentType::Analysis => "analysis",
            ContentType::News => "news",
        }
    }

    /// Short marker used in digests.
    pub fn icon(self) -> &'static str {
        match self {
            ContentType::Trend => "🔥",
            ContentType::Explainer => "⚡",
            ContentType::Tool => "🛠️",
            ContentType::Analysis => "📊",
            ContentType::News => "📰",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Difficulty tag assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn label(self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Enrichment block written by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleMetadata {
    pub content_type: ContentType,
    pub difficulty: Difficulty,
    /// Estimated reading time in whole minutes
    pub reading_minutes: u32,
    /// Priority score, always within `[0, 100]`
    pub priority_score: f64,
    /// 1-based position within the article's category after ranking (0 = unranked)
    pub rank: usize,
    pub analyzed_at: DateTime<Utc>,
}

/// A normalized feed entry.
///
/// `title` and `link` are never empty; entries missing either are dropped by
/// the parser. `link` is the natural deduplication key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published: DateTime<Utc>,
    /// True when the feed gave no usable timestamp and `published` is the ingestion time
    pub published_inferred: bool,
    pub feed_id: String,
    pub feed_title: String,
    pub category: String,
    pub image_url: Option<String>,
    pub source: SourceMeta,
    pub metadata: Option<ArticleMetadata>,
}

impl Article {
    /// Priority score, or 0.0 before classification.
    pub fn score(&self) -> f64 {
        self.metadata.as_ref().map_or(0.0, |m| m.priority_score)
    }

    /// Grouping key: the feed category, or [`OTHER_CATEGORY`] when blank.
    pub fn category_key(&self) -> &str {
        let category = self.category.trim();
        if category.is_empty() {
            OTHER_CATEGORY
        } else {
            category
        }
    }
}

/// Ranked articles grouped by category label.
///
/// Categories iterate in label order; articles within a category are kept in
/// ranking order (descending score, ties in discovery order).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CategorizedArticles {
    groups: BTreeMap<String, Vec<Article>>,
}

impl CategorizedArticles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the article list of `category`.
    pub fn insert(&mut self, category: impl Into<String>, articles: Vec<Article>) {
        self.groups.insert(category.into(), articles);
    }

    pub fn get(&self, category: &str) -> Option<&[Article]> {
        self.groups.get(category).map(Vec::as_slice)
    }

    pub fn categories(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Article])> {
        self.groups
            .iter()
            .map(|(category, articles)| (category.as_str(), articles.as_slice()))
    }

    /// All articles, category by category.
    pub fn articles(&self) -> impl Iterator<Item = &Article> {
        self.groups.values().flatten()
    }

    pub fn total(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Keeps only articles whose link is not `already_notified`.
    ///
    /// A link that shows up in more than one category (the same story in two
    /// feeds) is kept only at its first occurrence. Ranks are renumbered and
    /// categories left empty are dropped.
    pub fn retain_unseen<F>(self, already_notified: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        let mut delivered_links: HashSet<String> = HashSet::new();
        let mut groups = BTreeMap::new();

        for (category, articles) in self.groups {
            let mut kept: Vec<Article> = articles
                .into_iter()
                .filter(|a| !already_notified(&a.link) && delivered_links.insert(a.link.clone()))
                .collect();

            if kept.is_empty() {
                continue;
            }

            for (idx, article) in kept.iter_mut().enumerate() {
                if let Some(meta) = article.metadata.as_mut() {
                    meta.rank = idx + 1;
                }
            }
            groups.insert(category, kept);
        }

        Self { groups }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;

    pub fn article(title: &str, link: &str, category: &str) -> Article {
        Article {
            title: title.to_string(),
            link: link.to_string(),
            description: String::new(),
            published: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            published_inferred: false,
            feed_id: "feed-1".to_string(),
            feed_title: "Test Feed".to_string(),
            category: category.to_string(),
            image_url: None,
            source: SourceMeta::default(),
            metadata: None,
        }
    }

    pub fn scored(title: &str, link: &str, category: &str, score: f64, rank: usize) -> Article {
        let mut a = article(title, link, category);
        a.metadata = Some(ArticleMetadata {
            content_type: ContentType::News,
            difficulty: Difficulty::Intermediate,
            reading_minutes: 1,
            priority_score: score,
            rank,
            analyzed_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        });
        a
    }
}
