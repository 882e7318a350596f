//! # Collection Orchestrator
//! Periodic collection across healthy adapters, bounded article buffers and
//! the query/search API consumed by downstream analysis.
//!
//! One cycle: healthy adapters → one concurrent `fetch_news` each under a
//! shared deadline → per-source failures are recorded, never propagated →
//! survivors replace `latest` and are appended to `history`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::connection::{ConnectionManager, StatusSnapshot};
use crate::error::{IngestError, Result};
use crate::health::{HealthMonitor, HealthSummary};
use crate::ingest::adapter::SourceAdapter;
use crate::ingest::scheduler::{spawn_periodic, BackgroundTask};
use crate::ingest::types::{Article, ArticleFilter, ConnectionStatus, NewsQuery, SourceConfig};
use crate::ingest::{ensure_metrics_described, matches_filters};

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Articles requested from each source per cycle.
    pub per_source_limit: usize,
    /// Deadline for the whole cycle; sources still running are abandoned.
    pub cycle_timeout: Duration,
    pub latest_capacity: usize,
    pub history_capacity: usize,
    /// Evict history entries collected longer ago than this.
    pub history_max_age: Option<Duration>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            per_source_limit: 20,
            cycle_timeout: Duration::from_secs(60),
            latest_capacity: 100,
            history_capacity: 1_000,
            history_max_age: Some(Duration::from_secs(72 * 3600)),
        }
    }
}

/// What happened in one collection cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: usize,
    pub failed: Vec<String>,
    pub timed_out: Vec<String>,
    pub articles: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectorStats {
    pub running: bool,
    pub cycles: u64,
    pub active_sources: usize,
    pub latest: usize,
    pub history: usize,
    pub last_cycle: Option<CycleReport>,
}

#[derive(Default)]
struct Buffers {
    latest: Vec<Article>,
    /// `(collected_at, article)`, oldest first, unique ids.
    history: VecDeque<(DateTime<Utc>, Article)>,
    history_ids: HashSet<String>,
    last_cycle: Option<CycleReport>,
}

pub struct CollectionOrchestrator {
    manager: Arc<ConnectionManager>,
    monitor: Arc<HealthMonitor>,
    settings: CollectorSettings,
    buffers: RwLock<Buffers>,
    collection: tokio::sync::Mutex<Option<BackgroundTask>>,
    cycles: AtomicU64,
}

impl CollectionOrchestrator {
    pub fn new(
        manager: Arc<ConnectionManager>,
        monitor: Arc<HealthMonitor>,
        settings: CollectorSettings,
    ) -> Self {
        ensure_metrics_described();
        Self {
            manager,
            monitor,
            settings,
            buffers: RwLock::new(Buffers::default()),
            collection: tokio::sync::Mutex::new(None),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// Create adapters for every enabled source. Returns how many were added.
    pub async fn initialize(&self, configs: Vec<SourceConfig>) -> usize {
        let mut added = 0;
        for cfg in configs {
            if !cfg.enabled {
                tracing::info!(source = %cfg.name, "source disabled; skipping");
                continue;
            }
            if self.add_source(cfg).await {
                added += 1;
            }
        }
        tracing::info!(added, "sources initialized");
        added
    }

    pub async fn add_source(&self, config: SourceConfig) -> bool {
        let name = config.name.clone();
        match self.manager.create_adapter(config).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(source = %name, error = %e, "failed to add source");
                false
            }
        }
    }

    pub async fn remove_source(&self, name: &str) -> bool {
        let removed = self.manager.remove_adapter(name).await;
        if removed {
            self.monitor.forget(name);
        }
        removed
    }

    /// Run one collection cycle and return the articles it produced.
    pub async fn collect_news(&self) -> Vec<Article> {
        let started_at = Utc::now();
        let adapters = self.manager.healthy_adapters();
        if adapters.is_empty() {
            // Still a cycle: `latest` must not keep serving the previous one.
            tracing::warn!(target: "ingest", "no healthy sources; collection cycle is empty");
        }

        let deadline = Instant::now() + self.settings.cycle_timeout;
        let query = NewsQuery::latest(self.settings.per_source_limit);
        let mut pending: HashMap<String, Arc<dyn SourceAdapter>> = HashMap::new();
        let mut set = JoinSet::new();
        for adapter in adapters {
            let q = query.clone();
            let a = adapter.clone();
            pending.insert(adapter.name().to_string(), adapter);
            set.spawn(async move {
                let t0 = Instant::now();
                let res = AssertUnwindSafe(a.fetch_news(&q)).catch_unwind().await;
                (a.name().to_string(), t0.elapsed(), res.ok())
            });
        }
        let sources = pending.len();

        let mut per_source: Vec<Vec<Article>> = Vec::new();
        let mut failed = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((name, latency, res)))) => {
                    let adapter = pending.remove(&name);
                    let res = res.unwrap_or_else(|| {
                        let err = IngestError::network(&name, "fetch panicked");
                        if let Some(a) = &adapter {
                            a.core().record_failure(&err);
                        }
                        Err(err)
                    });
                    if let Some(status) =
                        self.manager
                            .record_fetch_outcome(&name, latency, res.as_ref().err())
                    {
                        self.monitor.observe_and_notify(&status).await;
                    }
                    match res {
                        Ok(items) => per_source.push(items),
                        Err(e) => {
                            tracing::warn!(target: "ingest", source = %name, error = %e, "source fetch failed");
                            failed.push(name);
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    tracing::error!(target: "ingest", error = %e, "fetch task aborted");
                }
                Ok(None) => break,
                Err(_) => {
                    set.abort_all();
                    break;
                }
            }
        }

        // Sources that missed the deadline count as network failures.
        let mut timed_out: Vec<String> = pending.keys().cloned().collect();
        timed_out.sort();
        for (name, adapter) in pending {
            let err = IngestError::network(&name, "collection cycle timed out");
            adapter.core().record_failure(&err);
            if let Some(status) =
                self.manager
                    .record_fetch_outcome(&name, self.settings.cycle_timeout, Some(&err))
            {
                self.monitor.observe_and_notify(&status).await;
            }
        }

        let merged = self.merge_cycle(per_source.into_iter().flatten().collect());

        let finished_at = Utc::now();
        let report = CycleReport {
            started_at,
            finished_at,
            sources,
            failed,
            timed_out,
            articles: merged.len(),
        };
        self.cycles.fetch_add(1, Ordering::SeqCst);
        counter!("ingest_cycles_total").increment(1);
        gauge!("ingest_cycle_last_run_ts").set(finished_at.timestamp() as f64);
        tracing::info!(
            target: "ingest",
            sources = report.sources,
            failed = report.failed.len(),
            timed_out = report.timed_out.len(),
            articles = report.articles,
            "collection cycle finished"
        );
        self.buffers.write().last_cycle = Some(report);
        merged
    }

    /// Replace `latest` with this cycle's output and append new ids to `history`.
    fn merge_cycle(&self, articles: Vec<Article>) -> Vec<Article> {
        let mut seen = HashSet::new();
        let cycle: Vec<Article> = articles
            .into_iter()
            .filter(|a| seen.insert(a.id.clone()))
            .collect();

        let now = Utc::now();
        let mut buf = self.buffers.write();
        buf.latest = cycle
            .iter()
            .take(self.settings.latest_capacity)
            .cloned()
            .collect();

        for a in &cycle {
            if buf.history_ids.insert(a.id.clone()) {
                buf.history.push_back((now, a.clone()));
            }
        }

        let cap = self.settings.history_capacity;
        let cutoff = self
            .settings
            .history_max_age
            .and_then(|age| chrono::Duration::from_std(age).ok())
            .map(|age| now - age);
        while let Some((collected_at, front)) = buf.history.front() {
            let too_old = cutoff.is_some_and(|c| *collected_at < c);
            if buf.history.len() <= cap && !too_old {
                break;
            }
            let id = front.id.clone();
            buf.history.pop_front();
            buf.history_ids.remove(&id);
        }
        cycle
    }

    /// Query the buffers (no network I/O). `latest` first, backfilled from
    /// `history` (newest first) when `latest` has fewer than `limit` matches.
    pub fn fetch_news(&self, filter: &ArticleFilter) -> Vec<Article> {
        let limit = if filter.limit == 0 { usize::MAX } else { filter.limit };
        let matches = |a: &Article| {
            matches_filters(
                a,
                &filter.sources,
                &filter.categories,
                &filter.keywords,
                filter.since,
            )
        };

        let buf = self.buffers.read();
        let mut out: Vec<Article> = Vec::new();
        let mut ids = HashSet::new();
        for a in buf.latest.iter().filter(|a| matches(a)) {
            if out.len() >= limit {
                break;
            }
            if ids.insert(a.id.as_str()) {
                out.push(a.clone());
            }
        }
        if out.len() < limit {
            for (_, a) in buf.history.iter().rev().filter(|(_, a)| matches(a)) {
                if out.len() >= limit {
                    break;
                }
                if ids.insert(a.id.as_str()) {
                    out.push(a.clone());
                }
            }
        }
        out
    }

    /// Case-insensitive substring search over title, body and tags of the
    /// id-deduplicated union of `latest` and `history`.
    pub fn search_news(&self, query: &str, limit: usize) -> Vec<Article> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let limit = if limit == 0 { usize::MAX } else { limit };
        let buf = self.buffers.read();
        let mut ids = HashSet::new();
        buf.latest
            .iter()
            .chain(buf.history.iter().rev().map(|(_, a)| a))
            .filter(|a| ids.insert(a.id.as_str()))
            .filter(|a| a.search_text().contains(&needle))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Start the periodic collection loop. A second call while running only warns.
    pub async fn start_collection(self: &Arc<Self>, interval: Duration) {
        let mut slot = self.collection.lock().await;
        if slot.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::warn!("collection already running");
            return;
        }
        let orchestrator = Arc::downgrade(self);
        *slot = Some(spawn_periodic("collection", interval, move || {
            let orchestrator = orchestrator.clone();
            async move {
                if let Some(o) = orchestrator.upgrade() {
                    o.collect_news().await;
                }
            }
        }));
        tracing::info!(interval_secs = interval.as_secs(), "collection started");
    }

    /// Stop the periodic loop. A cycle in progress finishes first. Idempotent.
    pub async fn stop_collection(&self) {
        if let Some(task) = self.collection.lock().await.take() {
            task.stop().await;
            tracing::info!("collection stopped");
        }
    }

    pub async fn is_collecting(&self) -> bool {
        self.collection
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    pub fn get_health_summary(&self) -> std::collections::BTreeMap<String, HealthSummary> {
        self.monitor.get_health_summary()
    }

    pub fn get_connection_status(&self) -> StatusSnapshot {
        self.manager.connection_statuses()
    }

    pub async fn test_source_connection(&self, name: &str) -> Result<ConnectionStatus> {
        let status = self.manager.test_connection(name).await?;
        self.monitor.observe_and_notify(&status).await;
        Ok(status)
    }

    /// Remove and recreate a source from its current config, then probe it.
    pub async fn restart_source(&self, name: &str) -> bool {
        let Some(adapter) = self.manager.adapter(name) else {
            tracing::warn!(source = %name, "restart requested for unknown source");
            return false;
        };
        let config = adapter.config().clone();
        drop(adapter);

        self.manager.remove_adapter(name).await;
        if let Err(e) = self.manager.create_adapter(config).await {
            tracing::warn!(source = %name, error = %e, "restart failed to recreate adapter");
            return false;
        }
        match self.test_source_connection(name).await {
            Ok(status) => {
                tracing::info!(source = %name, connected = status.connected, "source restarted");
                status.connected
            }
            Err(e) => {
                tracing::warn!(source = %name, error = %e, "restart probe failed");
                false
            }
        }
    }

    pub async fn stats(&self) -> CollectorStats {
        let running = self.is_collecting().await;
        let buf = self.buffers.read();
        CollectorStats {
            running,
            cycles: self.cycles.load(Ordering::SeqCst),
            active_sources: self.manager.active_connections(),
            latest: buf.latest.len(),
            history: buf.history.len(),
            last_cycle: buf.last_cycle.clone(),
        }
    }

    /// Stop both loops and close every adapter.
    pub async fn shutdown(&self) {
        self.stop_collection().await;
        self.monitor.stop_monitoring().await;
        self.manager.close_all().await;
        tracing::info!("collector shut down");
    }
}
