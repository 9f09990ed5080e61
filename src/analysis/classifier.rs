use chrono::{DateTime, Utc};
use thiserror::Error;

use super::keywords::{contains_any, KeywordTables, ScoreWeights};
use crate::article::{Article, ArticleMetadata, ContentType, Difficulty};

/// Score given to an article whose scoring failed.
pub const NEUTRAL_SCORE: f64 = 50.0;

#[derive(Debug, Error, PartialEq)]
pub enum ScoreError {
    /// A weight produced NaN or infinity
    #[error("score is not a finite number ({0})")]
    NonFinite(f64),
}

/// Deterministic keyword classifier and priority scorer.
///
/// Holds its keyword tables and weights by value; two classifiers built from
/// the same data always agree.
#[derive(Debug, Clone)]
pub struct Classifier {
    keywords: KeywordTables,
    weights: ScoreWeights,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(KeywordTables::default(), ScoreWeights::default())
    }
}

impl Classifier {
    pub fn new(keywords: KeywordTables, weights: ScoreWeights) -> Self {
        Self {
            keywords: keywords.normalized(),
            weights,
        }
    }

    /// Attach a metadata block to every article.
    ///
    /// Never fails: an article whose score cannot be computed gets the
    /// neutral score with news/intermediate tags.
    pub fn classify(&self, articles: Vec<Article>, now: DateTime<Utc>) -> Vec<Article> {
        articles
            .into_iter()
            .map(|mut article| {
                article.metadata = Some(self.analyze(&article, now));
                article
            })
            .collect()
    }

    pub fn analyze(&self, article: &Article, now: DateTime<Utc>) -> ArticleMetadata {
        let content_type = self.content_type(article);
        let difficulty = self.difficulty(article);
        let reading_minutes = reading_minutes(&article.description);

        let (content_type, difficulty, priority_score) =
            match self.score(article, content_type, difficulty, now) {
                Ok(score) => (content_type, difficulty, score),
                Err(e) => {
                    tracing::warn!(link = %article.link, error = %e, "Scoring failed, using neutral score");
                    (ContentType::News, Difficulty::Intermediate, NEUTRAL_SCORE)
                }
            };

        ArticleMetadata {
            content_type,
            difficulty,
            reading_minutes,
            priority_score,
            rank: 0,
            analyzed_at: now,
        }
    }

    /// First matching keyword set wins; no match is news.
    pub fn content_type(&self, article: &Article) -> ContentType {
        let title = article.title.to_lowercase();
        let k = &self.keywords;

        if contains_any(&title, &k.trend) {
            ContentType::Trend
        } else if contains_any(&title, &k.explainer) {
            ContentType::Explainer
        } else if contains_any(&title, &k.tool) {
            ContentType::Tool
        } else if contains_any(&title, &k.analysis) {
            ContentType::Analysis
        } else {
            ContentType::News
        }
    }

    pub fn difficulty(&self, article: &Article) -> Difficulty {
        let text = format!("{} {}", article.title, article.description).to_lowercase();

        if contains_any(&text, &self.keywords.beginner) {
            Difficulty::Beginner
        } else if contains_any(&text, &self.keywords.advanced) {
            Difficulty::Advanced
        } else {
            Difficulty::Intermediate
        }
    }

    /// Priority score in `[0, 100]`.
    pub fn score(
        &self,
        article: &Article,
        content_type: ContentType,
        difficulty: Difficulty,
        now: DateTime<Utc>,
    ) -> Result<f64, ScoreError> {
        let w = &self.weights;
        let title = article.title.to_lowercase();
        let mut score = w.base;

        score += match content_type {
            ContentType::Trend => w.trend,
            ContentType::News => w.news,
            ContentType::Explainer => w.explainer,
            ContentType::Tool => w.tool,
            ContentType::Analysis => w.analysis,
        };

        score += match difficulty {
            Difficulty::Beginner => w.beginner,
            Difficulty::Intermediate => w.intermediate,
            Difficulty::Advanced => w.advanced,
        };

        if contains_any(&title, &self.keywords.hot_words) {
            score += w.hot_word_bonus;
        }
        if contains_any(&title, &self.keywords.action_words) {
            score += w.action_word_bonus;
        }

        let hours_ago = (now - article.published).num_seconds() as f64 / 3600.0;
        if hours_ago <= 6.0 {
            score += w.within_6h;
        } else if hours_ago <= 12.0 {
            score += w.within_12h;
        } else if hours_ago <= 24.0 {
            score += w.within_24h;
        }

        let title_len = article.title.chars().count();
        if (20..=60).contains(&title_len) {
            score += w.title_length_bonus;
        } else if title_len > 80 {
            score -= w.long_title_penalty;
        }

        if !score.is_finite() {
            return Err(ScoreError::NonFinite(score));
        }
        Ok(score.clamp(0.0, 100.0))
    }
}

/// Estimated minutes to read a description of this length.
pub fn reading_minutes(description: &str) -> u32 {
    let chars = description.chars().count();
    match chars {
        0..=299 => 1,
        300..=599 => 2,
        600..=1199 => 3,
        1200..=1799 => 5,
        _ => u32::try_from(chars / 300).unwrap_or(u32::MAX).max(5),
    }
}
