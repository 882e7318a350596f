// src/ingest/mod.rs
pub mod adapter;
pub mod category;
pub mod providers;
pub mod rate_limiter;
pub mod scheduler;
pub mod types;

use chrono::{DateTime, Utc};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};

use crate::ingest::types::{Article, Category};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_fetch_total", "Provider fetch attempts.");
        describe_counter!(
            "ingest_fetch_errors_total",
            "Provider fetch attempts that failed (network or parse)."
        );
        describe_counter!(
            "ingest_articles_total",
            "Articles returned by providers after local filtering."
        );
        describe_counter!("ingest_cycles_total", "Completed collection cycles.");
        describe_histogram!("ingest_fetch_ms", "Provider fetch time in milliseconds.");
        describe_gauge!(
            "ingest_cycle_last_run_ts",
            "Unix ts when the last collection cycle finished."
        );
        describe_counter!("health_alerts_total", "Health alerts raised, by kind.");
    });
}

/// Normalize text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Short summary: first `max_chars` characters of the body, cut on a word boundary.
pub fn summarize(body: &str, max_chars: usize) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    if body.chars().count() <= max_chars {
        return Some(body.to_string());
    }
    let cut: String = body.chars().take(max_chars).collect();
    let trimmed = match cut.rfind(' ') {
        Some(pos) if pos > max_chars / 2 => &cut[..pos],
        _ => cut.as_str(),
    };
    Some(format!("{}...", trimmed.trim_end()))
}

/// Source-qualified article id. Providers with a stable id pass it as `key`
/// with `hash = false`; otherwise the key (link or title) is hashed.
pub fn article_id(source: &str, key: &str, hash: bool) -> String {
    if !hash {
        return format!("{source}:{key}");
    }
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(source.len() + 17);
    out.push_str(source);
    out.push(':');
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Shared filter predicate used by adapters (local post-filter) and by the
/// orchestrator's buffer queries. Empty lists match everything.
pub fn matches_filters(
    article: &Article,
    sources: &[String],
    categories: &[Category],
    keywords: &[String],
    since: Option<DateTime<Utc>>,
) -> bool {
    if !sources.is_empty() && !sources.iter().any(|s| s.eq_ignore_ascii_case(&article.source)) {
        return false;
    }
    if !categories.is_empty() && !categories.contains(&article.category) {
        return false;
    }
    if let Some(since) = since {
        if article.published_at < since {
            return false;
        }
    }
    if !keywords.is_empty() {
        let hay = article.search_text();
        let hit = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .any(|k| hay.contains(&k));
        if !hit {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn article(source: &str, title: &str, category: Category) -> Article {
        Article {
            id: format!("{source}:{title}"),
            title: title.into(),
            content: "body text".into(),
            summary: None,
            author: None,
            published_at: Utc::now(),
            source: source.into(),
            url: None,
            category,
            tags: vec!["ETF".into()],
            sentiment_score: None,
            relevance_score: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn normalize_text_strips_tags_and_entities() {
        let s = "  <p>Bitcoin&nbsp;&nbsp; <b>rallies</b></p>\n\n again ";
        assert_eq!(normalize_text(s), "Bitcoin rallies again");
    }

    #[test]
    fn summarize_cuts_on_word_boundary() {
        let body = "alpha beta gamma delta epsilon";
        assert_eq!(summarize(body, 100).as_deref(), Some(body));
        assert_eq!(summarize(body, 14).as_deref(), Some("alpha beta..."));
        assert_eq!(summarize("", 10), None);
    }

    #[test]
    fn hashed_ids_are_stable_and_source_qualified() {
        let a = article_id("decrypt", "https://decrypt.co/1", true);
        let b = article_id("decrypt", "https://decrypt.co/1", true);
        assert_eq!(a, b);
        assert!(a.starts_with("decrypt:"));
        assert_eq!(a.len(), "decrypt:".len() + 16);
        assert_eq!(article_id("coindesk", "42", false), "coindesk:42");
    }

    #[test]
    fn filter_predicate_checks_every_dimension() {
        let a = article("coindesk", "Bitcoin ETF inflows", Category::Bitcoin);
        assert!(matches_filters(&a, &[], &[], &[], None));
        assert!(matches_filters(&a, &["CoinDesk".into()], &[], &[], None));
        assert!(!matches_filters(&a, &["decrypt".into()], &[], &[], None));
        assert!(!matches_filters(&a, &[], &[Category::Nft], &[], None));
        assert!(matches_filters(&a, &[], &[], &["etf".into()], None));
        assert!(!matches_filters(&a, &[], &[], &["solana".into()], None));
        let later = Utc::now() + chrono::Duration::hours(1);
        assert!(!matches_filters(&a, &[], &[], &[], Some(later)));
    }
}
