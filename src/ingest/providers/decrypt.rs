// src/ingest/providers/decrypt.rs
//! Decrypt RSS feed. Full article bodies arrive in `content:encoded`;
//! keywords are forwarded as the feed's `s` search parameter.

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

pub const SOURCE_TYPE: &str = "decrypt";

const CATEGORY_KEYWORDS: KeywordTable = &[
    (Category::Nft, &["nft", "digital art", "collectible", "gaming"]),
    (Category::Defi, &["defi", "protocol", "yield", "dao"]),
    (Category::Bitcoin, &["bitcoin", "btc"]),
    (Category::Ethereum, &["ethereum", "ether ", "eth "]),
    (Category::Regulation, &["regulat", "sec ", "senate", "policy"]),
    (Category::Technology, &["web3", "ai ", "blockchain", "wallet"]),
    (Category::Exchanges, &["exchange", "coinbase", "binance"]),
    (Category::Mining, &["mining", "miner"]),
    (Category::Altcoins, &["solana", "dogecoin", "xrp", "memecoin"]),
];

pub struct DecryptAdapter {
    config: SourceConfig,
    core: AdapterCore,
}

impl DecryptAdapter {
    pub fn new(config: SourceConfig, client: Client) -> Self {
        let core = AdapterCore::new(&config, client);
        Self { config, core }
    }

    fn params(query: &NewsQuery) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if !query.keywords.is_empty() {
            params.push(("s", query.keywords.join(" ")));
        }
        if let Some(cat) = query.category {
            params.push(("category", cat.as_str().replace('_', "-")));
        }
        params
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
        let key = it.key()?.to_string();
        if title.is_empty() {
            return None;
        }
        let description = normalize_text(it.description.as_deref().unwrap_or_default());
        let content = it
            .content_encoded
            .as_deref()
            .map(normalize_text)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| description.clone());
        let category =
            infer_category(&it.categories, &format!("{title} {content}"), CATEGORY_KEYWORDS);

        let mut metadata = HashMap::new();
        metadata.insert("feed".to_string(), serde_json::json!("rss"));
        metadata.insert(
            "has_full_body".to_string(),
            serde_json::json!(it.content_encoded.is_some()),
        );

        let summary = if description.is_empty() {
            summarize(&content, 280)
        } else {
            Some(description)
        };

        let mut article = Article {
            id: article_id(source, &key, true),
            summary,
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
            .get_text(&self.config.base_url, &Self::params(query), &[])
            .await?;
        let articles = finish_query(self.parse_body(&body)?, query);
        counter!("ingest_articles_total", "source" => self.config.name.clone())
            .increment(articles.len() as u64);
        Ok(articles)
    }
}

#[async_trait]
impl SourceAdapter for DecryptAdapter {
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
