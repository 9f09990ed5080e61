use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::article::{Article, CategorizedArticles};

/// Group scored articles by category and rank each group.
///
/// Within a category articles are ordered by descending score; equal scores
/// keep their input order. Ranks are 1-based.
pub fn rank_by_category(articles: Vec<Article>) -> CategorizedArticles {
    let mut groups: BTreeMap<String, Vec<Article>> = BTreeMap::new();
    for article in articles {
        groups
            .entry(article.category_key().to_string())
            .or_default()
            .push(article);
    }

    let mut ranked = CategorizedArticles::new();
    for (category, mut group) in groups {
        // sort_by is stable
        group.sort_by(|a, b| b.score().partial_cmp(&a.score()).unwrap_or(Ordering::Equal));
        for (idx, article) in group.iter_mut().enumerate() {
            if let Some(meta) = article.metadata.as_mut() {
                meta.rank = idx + 1;
            }
        }
        ranked.insert(category, group);
    }
    ranked
}
