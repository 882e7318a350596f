//! Source adapter contract and the plumbing every provider shares.
//!
//! A provider implements [`SourceAdapter::fetch_news`] on top of an
//! [`AdapterCore`], which owns the HTTP client, the token bucket and the
//! failure streak. `test_connection`/`is_healthy` come for free.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use parking_lot::Mutex;
use reqwest::Client;

use crate::error::{IngestError, Result};
use crate::ingest::rate_limiter::RateLimiter;
use crate::ingest::types::{Article, ConnectionStatus, NewsQuery, SourceConfig};

/// An adapter is unhealthy once this many calls in a row have failed.
pub const UNHEALTHY_AFTER_FAILURES: u32 = 3;

/// Builds an adapter for one `source_type`. Registered with the connection manager.
pub type AdapterFactory =
    Arc<dyn Fn(SourceConfig, Client) -> Result<Arc<dyn SourceAdapter>> + Send + Sync>;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn config(&self) -> &SourceConfig;

    fn core(&self) -> &AdapterCore;

    fn name(&self) -> &str {
        &self.config().name
    }

    fn source_type(&self) -> &str {
        &self.config().source_type
    }

    /// One rate-limited request, parsed into articles and filtered locally
    /// (category, keywords, since), truncated to `query.limit`.
    async fn fetch_news(&self, query: &NewsQuery) -> Result<Vec<Article>>;

    /// One-item fetch used as a liveness probe.
    async fn test_connection(&self) -> ConnectionStatus {
        let started = Instant::now();
        let outcome = self.fetch_news(&NewsQuery::probe()).await;
        let latency = started.elapsed();
        self.core().status_after(latency, outcome.err().as_ref())
    }

    fn is_healthy(&self) -> bool {
        self.core().is_healthy()
    }

    fn consecutive_failures(&self) -> u32 {
        self.core().consecutive_failures()
    }

    /// Release resources. Adapters hold no sockets beyond the shared client pool.
    async fn close(&self) {
        tracing::debug!(source = %self.name(), "adapter closed");
    }
}

/// HTTP client, token bucket and failure bookkeeping for one source.
#[derive(Debug)]
pub struct AdapterCore {
    name: String,
    client: Client,
    limiter: RateLimiter,
    timeout: Duration,
    failures: AtomicU32,
    last_success: Mutex<Option<DateTime<Utc>>>,
}

impl AdapterCore {
    pub fn new(config: &SourceConfig, client: Client) -> Self {
        Self {
            name: config.name.clone(),
            client,
            limiter: RateLimiter::per_minute(config.rate_limit_per_minute),
            timeout: config.timeout(),
            failures: AtomicU32::new(0),
            last_success: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Rate-limited GET returning the response body. Non-2xx is a network error.
    pub async fn get_text(
        &self,
        url: &str,
        params: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<String> {
        self.limiter.acquire().await;

        let mut req = self.client.get(url).timeout(self.timeout);
        if !params.is_empty() {
            req = req.query(params);
        }
        for (k, v) in headers {
            req = req.header(*k, v);
        }

        let t0 = Instant::now();
        counter!("ingest_fetch_total", "source" => self.name.clone()).increment(1);
        let resp = req
            .send()
            .await
            .map_err(|e| IngestError::network(&self.name, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(IngestError::network(
                &self.name,
                format!("HTTP {status} from {url}"),
            ));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| IngestError::network(&self.name, e))?;
        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(body)
    }

    /// Update the failure streak from a call's outcome and pass it through.
    pub fn track<T>(&self, outcome: Result<T>) -> Result<T> {
        match &outcome {
            Ok(_) => self.record_success(),
            Err(e) => self.record_failure(e),
        }
        outcome
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::SeqCst);
        *self.last_success.lock() = Some(Utc::now());
    }

    pub fn record_failure(&self, err: &IngestError) {
        let n = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        counter!("ingest_fetch_errors_total", "source" => self.name.clone()).increment(1);
        tracing::warn!(source = %self.name, failures = n, error = %err, "source call failed");
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures() < UNHEALTHY_AFTER_FAILURES
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.lock()
    }

    /// Snapshot of this source's connectivity after a call that took `latency`.
    pub fn status_after(&self, latency: Duration, err: Option<&IngestError>) -> ConnectionStatus {
        ConnectionStatus {
            source: self.name.clone(),
            connected: err.is_none(),
            latency_ms: latency.as_secs_f64() * 1_000.0,
            last_checked: Utc::now(),
            error: err.map(|e| e.to_string()),
            consecutive_failures: self.consecutive_failures(),
            last_success: self.last_success(),
        }
    }
}

/// Apply the shared filter predicate and the limit to a provider's parsed output,
/// keeping the provider's order.
pub fn finish_query(articles: Vec<Article>, query: &NewsQuery) -> Vec<Article> {
    let categories: Vec<_> = query.category.into_iter().collect();
    let limit = if query.limit == 0 { usize::MAX } else { query.limit };
    articles
        .into_iter()
        .filter(|a| crate::ingest::matches_filters(a, &[], &categories, &query.keywords, query.since))
        .take(limit)
        .collect()
}
