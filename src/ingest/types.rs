// src/ingest/types.rs
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed set of article categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Bitcoin,
    Ethereum,
    Altcoins,
    Defi,
    Nft,
    Regulation,
    Technology,
    Exchanges,
    Mining,
    MarketNews,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Bitcoin,
        Category::Ethereum,
        Category::Altcoins,
        Category::Defi,
        Category::Nft,
        Category::Regulation,
        Category::Technology,
        Category::Exchanges,
        Category::Mining,
        Category::MarketNews,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Bitcoin => "bitcoin",
            Category::Ethereum => "ethereum",
            Category::Altcoins => "altcoins",
            Category::Defi => "defi",
            Category::Nft => "nft",
            Category::Regulation => "regulation",
            Category::Technology => "technology",
            Category::Exchanges => "exchanges",
            Category::Mining => "mining",
            Category::MarketNews => "market_news",
        }
    }

    /// Map a provider-supplied label ("BTC", "Policy & Regulation", "NFTs", ...)
    /// onto a category. Case-insensitive; `None` when nothing fits.
    pub fn from_label(label: &str) -> Option<Category> {
        let l = label.trim().to_ascii_lowercase();
        let l = l.as_str();
        let cat = match l {
            "bitcoin" | "btc" => Category::Bitcoin,
            "ethereum" | "eth" | "ether" => Category::Ethereum,
            "altcoins" | "altcoin" | "alts" => Category::Altcoins,
            "defi" | "decentralized finance" => Category::Defi,
            "nft" | "nfts" => Category::Nft,
            "regulation" | "policy" | "policy & regulation" | "policy and regulation" | "law" => {
                Category::Regulation
            }
            "technology" | "tech" | "blockchain" => Category::Technology,
            "exchanges" | "exchange" => Category::Exchanges,
            "mining" => Category::Mining,
            "market_news" | "market news" | "markets" | "market" | "price analysis" => {
                Category::MarketNews
            }
            _ => return None,
        };
        Some(cat)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::from_label(s).ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// Normalized news article. Built once by an adapter's parse step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    /// Source-qualified id, e.g. `coindesk:123456`.
    pub id: String,
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    pub source: String,
    pub url: Option<String>,
    pub category: Category,
    #[serde(default)]
    pub tags: Vec<String>,
    pub sentiment_score: Option<f64>,
    pub relevance_score: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Article {
    /// Lowercased title + body + tags, the haystack for keyword/search matching.
    pub fn search_text(&self) -> String {
        let mut s = String::with_capacity(self.title.len() + self.content.len() + 32);
        s.push_str(&self.title);
        s.push(' ');
        s.push_str(&self.content);
        for t in &self.tags {
            s.push(' ');
            s.push_str(t);
        }
        s.to_lowercase()
    }

    /// Push a tag unless an equal one (case-insensitive) is already present.
    pub fn add_tag(&mut self, tag: &str) {
        let t = tag.trim();
        if t.is_empty() || self.tags.iter().any(|x| x.eq_ignore_ascii_case(t)) {
            return;
        }
        self.tags.push(t.to_string());
    }
}

fn default_rate_limit() -> u32 {
    60
}
fn default_timeout() -> u64 {
    30
}
fn default_enabled() -> bool {
    true
}
fn default_priority() -> u32 {
    1
}

/// Per-source configuration. Immutable once an adapter has been built from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    #[serde(alias = "sourceType")]
    pub source_type: String,
    #[serde(alias = "baseUrl")]
    pub base_url: String,
    #[serde(default, alias = "apiKey")]
    pub api_key: Option<String>,
    #[serde(default = "default_rate_limit", alias = "rateLimitPerMinute")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_timeout", alias = "timeoutSeconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Lower is preferred.
    #[serde(default = "default_priority")]
    pub priority: u32,
}

impl SourceConfig {
    pub fn new(
        name: impl Into<String>,
        source_type: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            base_url: base_url.into(),
            api_key: None,
            rate_limit_per_minute: default_rate_limit(),
            timeout_seconds: default_timeout(),
            enabled: default_enabled(),
            priority: default_priority(),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_seconds = secs;
        self
    }

    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit_per_minute = per_minute;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

/// Connectivity state of one source, as last observed by the connection manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionStatus {
    pub source: String,
    pub connected: bool,
    pub latency_ms: f64,
    pub last_checked: DateTime<Utc>,
    pub error: Option<String>,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    /// Seed status for a freshly registered adapter.
    pub fn seeded(source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            source: source.into(),
            connected: true,
            latency_ms: 0.0,
            last_checked: now,
            error: None,
            consecutive_failures: 0,
            last_success: Some(now),
        }
    }

    /// Healthy as far as alerting is concerned: connected and no failure streak.
    pub fn is_fully_healthy(&self) -> bool {
        self.connected && self.consecutive_failures == 0
    }

    pub fn latency(&self) -> Duration {
        Duration::from_secs_f64(self.latency_ms.max(0.0) / 1_000.0)
    }
}

/// Query handed to a single adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewsQuery {
    pub limit: usize,
    pub category: Option<Category>,
    pub keywords: Vec<String>,
    pub since: Option<DateTime<Utc>>,
}

impl NewsQuery {
    pub fn latest(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    /// One-item query used for liveness probes.
    pub fn probe() -> Self {
        Self::latest(1)
    }
}

/// Consumer-side filter over the orchestrator's buffers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleFilter {
    pub limit: usize,
    pub sources: Vec<String>,
    pub categories: Vec<Category>,
    pub keywords: Vec<String>,
    pub since: Option<DateTime<Utc>>,
}

impl ArticleFilter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn categories(mut self, categories: impl IntoIterator<Item = Category>) -> Self {
        self.categories = categories.into_iter().collect();
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }
}
