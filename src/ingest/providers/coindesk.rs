// src/ingest/providers/coindesk.rs
//! CoinDesk data API (REST/JSON).
//!
//! `GET {base_url}/news/v1/article/list?lang=EN&limit=..&categories=..&search=..&from_ts=..`
//! with `Authorization: Apikey <key>` when a key is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{IngestError, Result};
use crate::ingest::adapter::{finish_query, AdapterCore, SourceAdapter};
use crate::ingest::category::{infer_category, KeywordTable};
use crate::ingest::types::{Article, Category, NewsQuery, SourceConfig};
use crate::ingest::{article_id, normalize_text, summarize};

pub const SOURCE_TYPE: &str = "coindesk";

const CATEGORY_KEYWORDS: KeywordTable = &[
    (Category::Bitcoin, &["bitcoin", "btc", "satoshi", "halving"]),
    (Category::Ethereum, &["ethereum", "ether", "vitalik", "eth staking"]),
    (Category::Regulation, &["sec", "regulat", "lawsuit", "congress", "cftc"]),
    (Category::Defi, &["defi", "lending", "yield", "liquidity pool"]),
    (Category::Nft, &["nft", "collectible", "opensea"]),
    (Category::Exchanges, &["exchange", "binance", "coinbase", "kraken"]),
    (Category::Mining, &["miner", "mining", "hashrate"]),
    (Category::Technology, &["protocol", "upgrade", "layer 2", "developer"]),
    (Category::Altcoins, &["solana", "xrp", "cardano", "dogecoin", "altcoin"]),
];

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(rename = "Data", default)]
    data: Vec<RawArticle>,
    #[serde(rename = "Err", default)]
    err: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawArticle {
    #[serde(rename = "ID")]
    id: u64,
    #[serde(rename = "TITLE")]
    title: String,
    #[serde(rename = "BODY", default)]
    body: String,
    #[serde(rename = "SUBTITLE", default)]
    subtitle: Option<String>,
    #[serde(rename = "AUTHORS", default)]
    authors: Option<String>,
    #[serde(rename = "PUBLISHED_ON")]
    published_on: i64,
    #[serde(rename = "URL", default)]
    url: Option<String>,
    #[serde(rename = "KEYWORDS", default)]
    keywords: Option<String>,
    #[serde(rename = "CATEGORY_DATA", default)]
    category_data: Vec<CategoryData>,
    #[serde(rename = "SENTIMENT", default)]
    sentiment: Option<String>,
    #[serde(rename = "UPVOTES", default)]
    upvotes: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CategoryData {
    #[serde(rename = "CATEGORY")]
    category: String,
}

pub struct CoinDeskAdapter {
    config: SourceConfig,
    core: AdapterCore,
}

impl CoinDeskAdapter {
    pub fn new(config: SourceConfig, client: Client) -> Self {
        let core = AdapterCore::new(&config, client);
        Self { config, core }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/news/v1/article/list",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn params(query: &NewsQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("lang", "EN".to_string()),
            ("limit", query.limit.max(1).to_string()),
        ];
        if let Some(cat) = query.category {
            params.push(("categories", cat.as_str().to_ascii_uppercase()));
        }
        if !query.keywords.is_empty() {
            params.push(("search", query.keywords.join(" OR ")));
        }
        if let Some(since) = query.since {
            params.push(("from_ts", since.to_rfc3339()));
        }
        params
    }

    /// Parse a list response body into articles (provider order).
    pub fn parse_body(&self, body: &str) -> Result<Vec<Article>> {
        let resp: ListResponse =
            serde_json::from_str(body).map_err(|e| IngestError::parse(&self.config.name, e))?;
        if let Some(ApiError { message }) = resp.err {
            if let Some(msg) = message.filter(|m| !m.is_empty()) {
                return Err(IngestError::parse(&self.config.name, msg));
            }
        }
        Ok(resp
            .data
            .into_iter()
            .map(|raw| self.map_article(raw))
            .collect())
    }

    fn map_article(&self, raw: RawArticle) -> Article {
        let source = self.config.name.as_str();
        let title = normalize_text(&raw.title);
        let content = normalize_text(&raw.body);
        let labels: Vec<&str> = raw
            .category_data
            .iter()
            .map(|c| c.category.as_str())
            .collect();
        let category = infer_category(&labels, &format!("{title} {content}"), CATEGORY_KEYWORDS);

        let mut metadata = HashMap::new();
        metadata.insert("provider_id".to_string(), serde_json::json!(raw.id));
        if let Some(s) = raw.sentiment {
            metadata.insert("provider_sentiment".to_string(), serde_json::json!(s));
        }
        if let Some(v) = raw.upvotes {
            metadata.insert("upvotes".to_string(), serde_json::json!(v));
        }

        let mut article = Article {
            id: article_id(source, &raw.id.to_string(), false),
            summary: raw
                .subtitle
                .map(|s| normalize_text(&s))
                .filter(|s| !s.is_empty())
                .or_else(|| summarize(&content, 280)),
            author: raw.authors.filter(|a| !a.trim().is_empty()),
            published_at: DateTime::<Utc>::from_timestamp(raw.published_on, 0)
                .unwrap_or_else(Utc::now),
            source: source.to_string(),
            url: raw.url,
            category,
            tags: Vec::new(),
            sentiment_score: None,
            relevance_score: None,
            metadata,
            title,
            content,
        };
        for l in &labels {
            article.add_tag(l);
        }
        for kw in raw.keywords.as_deref().unwrap_or_default().split('|') {
            article.add_tag(kw);
        }
        article
    }

    async fn fetch_inner(&self, query: &NewsQuery) -> Result<Vec<Article>> {
        let mut headers = Vec::new();
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            headers.push(("Authorization", format!("Apikey {key}")));
        }
        let body = self
            .core
            .get_text(&self.endpoint(), &Self::params(query), &headers)
            .await?;
        let articles = finish_query(self.parse_body(&body)?, query);
        counter!("ingest_articles_total", "source" => self.config.name.clone())
            .increment(articles.len() as u64);
        Ok(articles)
    }
}

#[async_trait]
impl SourceAdapter for CoinDeskAdapter {
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
