//! Category inference.
//!
//! Precedence is the same for every provider: an explicit provider label that
//! maps onto a [`Category`] wins, then keyword-overlap scoring against the
//! provider's own table, then `MarketNews`. Ties between non-zero scores go to
//! the category listed first in the table.

use crate::ingest::types::Category;

/// Per-provider keyword table: category plus the lowercase terms that vote for it.
pub type KeywordTable = &'static [(Category, &'static [&'static str])];

/// Pick a category for an article.
///
/// `labels` are provider-supplied category/tag strings (may be empty);
/// `text` is the title + body haystack (any case).
pub fn infer_category<S: AsRef<str>>(labels: &[S], text: &str, table: KeywordTable) -> Category {
    if let Some(cat) = labels
        .iter()
        .filter_map(|l| Category::from_label(l.as_ref()))
        .find(|c| *c != Category::MarketNews)
    {
        return cat;
    }
    score_keywords(text, table).unwrap_or(Category::MarketNews)
}

/// Highest-scoring category by keyword hits; `None` on a zero score.
pub fn score_keywords(text: &str, table: KeywordTable) -> Option<Category> {
    let hay = text.to_lowercase();
    let mut best: Option<(Category, usize)> = None;
    for (cat, words) in table {
        let score = words.iter().filter(|w| hay.contains(*w)).count();
        if score == 0 {
            continue;
        }
        match best {
            Some((_, s)) if s >= score => {}
            _ => best = Some((*cat, score)),
        }
    }
    best.map(|(c, _)| c)
}
