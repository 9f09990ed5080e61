//! Content classification, priority scoring and per-category ranking.

mod classifier;
mod keywords;
mod ranking;

pub use classifier::{reading_minutes, Classifier, ScoreError, NEUTRAL_SCORE};
pub use keywords::{KeywordTables, ScoreWeights};
pub use ranking::rank_by_category;
