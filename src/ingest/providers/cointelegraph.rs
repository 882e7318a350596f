// src/ingest/providers/cointelegraph.rs
//! CoinTelegraph RSS feed.
//!
//! The feed has no search; a category narrows the request to
//! `{base_url}/tag/{slug}` and keywords/since are applied locally.

use std::collections::HashMap;

use async_trait::async_trait;
use metrics::counter;
use reqwest::Client;

use crate::error::Result;
use crate::ingest::adapter::{finish_query, AdapterCore, SourceAdapter};
use crate::ingest::category::{infer_category, KeywordTable};
use crate::ingest::providers::rss::{parse_feed, RssItem};
use crate::ingest::types::{Article, Category, NewsQuery, SourceConfig};
use crate::ingest::{article_id, normalize_text, summarize};

pub const SOURCE_TYPE: &str = "cointelegraph";

const CATEGORY_KEYWORDS: KeywordTable = &[
    (Category::Bitcoin, &["bitcoin", "btc", "lightning network"]),
    (Category::Ethereum, &["ethereum", "ether", "eth "]),
    (Category::Altcoins, &["altcoin", "solana", "xrp", "memecoin", "dogecoin"]),
    (Category::Defi, &["defi", "dex", "lending protocol", "staking"]),
    (Category::Nft, &["nft", "metaverse", "collectible"]),
    (Category::Regulation, &["regulat", "sec ", "lawmakers", "bill", "court"]),
    (Category::Exchanges, &["exchange", "listing", "binance", "coinbase"]),
    (Category::Mining, &["mining", "miners", "hashrate"]),
    (Category::Technology, &["blockchain", "ai ", "layer-2", "scaling"]),
];

pub struct CoinTelegraphAdapter {
    config: SourceConfig,
    core: AdapterCore,
}

impl CoinTelegraphAdapter {
    pub fn new(config: SourceConfig, client: Client) -> Self {
        let core = AdapterCore::new(&config, client);
        Self { config, core }
    }

    fn feed_url(&self, category: Option<Category>) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match category {
            Some(Category::MarketNews) | None => base.to_string(),
            Some(cat) => format!("{base}/tag/{}", cat.as_str().replace('_', "-")),
        }
    }

    /// Parse a feed body into articles (feed order).
    pub fn parse_body(&self, xml: &str) -> Result<Vec<Article>> {
        let items = parse_feed(&self.config.name, xml)?;
        Ok(items
            .into_iter()
            .filter_map(|it| self.map_item(it))
            .collect())
    }

    fn map_item(&self, it: RssItem) -> Option<Article> {
        let source = self.config.name.as_str();
        let title = normalize_text(it.title.as_deref().unwrap_or_default());
        if title.is_empty() {
            return None;
        }
        let key = it.key()?.to_string();
        let content = normalize_text(it.description.as_deref().unwrap_or_default());
        let category =
            infer_category(&it.categories, &format!("{title} {content}"), CATEGORY_KEYWORDS);

        let mut metadata = HashMap::new();
        metadata.insert("feed".to_string(), serde_json::json!("rss"));
        if let Some(g) = &it.guid {
            metadata.insert("guid".to_string(), serde_json::json!(g));
        }

        let mut article = Article {
            id: article_id(source, &key, true),
            summary: summarize(&content, 280),
            author: it.creator.clone().filter(|a| !a.trim().is_empty()),
            published_at: it.published_at(),
            source: source.to_string(),
            url: it.link.clone(),
            category,
            tags: Vec::new(),
            sentiment_score: None,
            relevance_score: None,
            metadata,
            title,
            content,
        };
        for c in &it.categories {
            article.add_tag(c);
        }
        Some(article)
    }

    async fn fetch_inner(&self, query: &NewsQuery) -> Result<Vec<Article>> {
        let body = self
            .core
            .get_text(&self.feed_url(query.category), &[], &[])
            .await?;
        let articles = finish_query(self.parse_body(&body)?, query);
        counter!("ingest_articles_total", "source" => self.config.name.clone())
            .increment(articles.len() as u64);
        Ok(articles)
    }
}

#[async_trait]
impl SourceAdapter for CoinTelegraphAdapter {
    fn config(&self) -> &SourceConfig {
        &self.config
    }

    fn core(&self) -> &AdapterCore {
        &self.core
    }

    async fn fetch_news(&self, query: &NewsQuery) -> Result<Vec<Article>> {
        let outcome = self.fetch_inner(query).await;
        self.core.track(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> CoinTelegraphAdapter {
        CoinTelegraphAdapter::new(
            SourceConfig::new("cointelegraph", SOURCE_TYPE, "https://cointelegraph.com/rss/"),
            Client::new(),
        )
    }

    #[test]
    fn category_selects_tag_feed() {
        let a = adapter();
        assert_eq!(a.feed_url(None), "https://cointelegraph.com/rss");
        assert_eq!(
            a.feed_url(Some(Category::Defi)),
            "https://cointelegraph.com/rss/tag/defi"
        );
        assert_eq!(
            a.feed_url(Some(Category::MarketNews)),
            "https://cointelegraph.com/rss"
        );
    }

    #[test]
    fn items_without_title_or_key_are_skipped() {
        let xml = r#"<rss><channel>
            <item><title>Solana memecoin frenzy</title><link>https://ct/1</link></item>
            <item><description>no title</description><link>https://ct/2</link></item>
        </channel></rss>"#;
        let items = adapter().parse_body(xml).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].category, Category::Altcoins);
        assert!(items[0].id.starts_with("cointelegraph:"));
    }
}
