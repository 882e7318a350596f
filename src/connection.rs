//! # Connection Manager
//! Adapter factory + registry, connection ceiling, connectivity probes.
//!
//! The registry (adapters, statuses, active count) sits behind one
//! `parking_lot::Mutex`. Critical sections never await, so a cancelled task
//! can never leave the registry half-updated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::broadcast;

use crate::error::{IngestError, Result};
use crate::ingest::adapter::{AdapterFactory, SourceAdapter};
use crate::ingest::scheduler::{spawn_periodic, BackgroundTask};
use crate::ingest::types::{ConnectionStatus, SourceConfig};

/// Snapshot of every source's status, published after each probe round.
pub type StatusSnapshot = HashMap<String, ConnectionStatus>;

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub max_connections: usize,
    /// Poll period while waiting for a free slot.
    pub poll_interval: Duration,
    /// Give up waiting for a slot after this long; `None` waits forever.
    pub admission_timeout: Option<Duration>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            poll_interval: Duration::from_millis(100),
            admission_timeout: Some(Duration::from_secs(300)),
        }
    }
}

#[derive(Default)]
struct Registry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
    statuses: HashMap<String, ConnectionStatus>,
    active: usize,
}

pub struct ConnectionManager {
    settings: ConnectionSettings,
    client: Client,
    factories: Mutex<HashMap<String, AdapterFactory>>,
    registry: Mutex<Registry>,
    snapshots: broadcast::Sender<StatusSnapshot>,
    health_task: tokio::sync::Mutex<Option<BackgroundTask>>,
}

impl ConnectionManager {
    pub fn new(settings: ConnectionSettings) -> Self {
        let client = Client::builder()
            .user_agent(concat!("crypto-news-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self::with_client(settings, client)
    }

    pub fn with_client(settings: ConnectionSettings, client: Client) -> Self {
        let (snapshots, _) = broadcast::channel(16);
        Self {
            settings,
            client,
            factories: Mutex::new(HashMap::new()),
            registry: Mutex::new(Registry::default()),
            snapshots,
            health_task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Register (or replace) the constructor for a source type.
    pub fn register_factory(&self, source_type: &str, factory: AdapterFactory) {
        self.factories
            .lock()
            .insert(source_type.to_ascii_lowercase(), factory);
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut v: Vec<String> = self.factories.lock().keys().cloned().collect();
        v.sort();
        v
    }

    /// Build and register an adapter for `config`.
    ///
    /// At the connection ceiling this waits, polling, until a slot frees
    /// (or the admission timeout elapses).
    pub async fn create_adapter(&self, config: SourceConfig) -> Result<Arc<dyn SourceAdapter>> {
        if !config.enabled {
            return Err(IngestError::SourceDisabled(config.name));
        }
        let factory = self
            .factories
            .lock()
            .get(&config.source_type.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| IngestError::UnknownSourceType(config.source_type.clone()))?;

        let started = Instant::now();
        let mut logged_wait = false;
        loop {
            {
                let mut reg = self.registry.lock();
                if reg.adapters.contains_key(&config.name) {
                    return Err(IngestError::DuplicateSource(config.name));
                }
                if reg.active < self.settings.max_connections {
                    let adapter = factory(config.clone(), self.client.clone())?;
                    reg.adapters.insert(config.name.clone(), adapter.clone());
                    reg.statuses
                        .insert(config.name.clone(), ConnectionStatus::seeded(&config.name));
                    reg.active += 1;
                    tracing::info!(
                        source = %config.name,
                        source_type = %config.source_type,
                        active = reg.active,
                        "adapter created"
                    );
                    return Ok(adapter);
                }
            }

            if let Some(limit) = self.settings.admission_timeout {
                if started.elapsed() >= limit {
                    return Err(IngestError::ConnectionCeilingReached {
                        max: self.settings.max_connections,
                        waited_secs: started.elapsed().as_secs(),
                    });
                }
            }
            if !logged_wait {
                tracing::info!(
                    source = %config.name,
                    max = self.settings.max_connections,
                    "connection ceiling reached; waiting for a free slot"
                );
                logged_wait = true;
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Unregister and close an adapter. Returns false if it was not registered.
    pub async fn remove_adapter(&self, name: &str) -> bool {
        let removed = {
            let mut reg = self.registry.lock();
            let adapter = reg.adapters.remove(name);
            if adapter.is_some() {
                reg.statuses.remove(name);
                reg.active = reg.active.saturating_sub(1);
            }
            adapter
        };
        match removed {
            Some(adapter) => {
                adapter.close().await;
                tracing::info!(source = %name, "adapter removed");
                true
            }
            None => false,
        }
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.registry.lock().adapters.get(name).cloned()
    }

    pub fn adapters(&self) -> Vec<Arc<dyn SourceAdapter>> {
        self.registry.lock().adapters.values().cloned().collect()
    }

    /// Healthy adapters, best priority first (ties by name).
    pub fn healthy_adapters(&self) -> Vec<Arc<dyn SourceAdapter>> {
        let mut v: Vec<_> = self
            .adapters()
            .into_iter()
            .filter(|a| a.is_healthy())
            .collect();
        v.sort_by(|a, b| {
            a.config()
                .priority
                .cmp(&b.config().priority)
                .then_with(|| a.name().cmp(b.name()))
        });
        v
    }

    /// Highest-priority healthy adapter, optionally restricted to one source type.
    pub fn get_healthy_adapter(&self, source_type: Option<&str>) -> Option<Arc<dyn SourceAdapter>> {
        self.healthy_adapters().into_iter().find(|a| {
            source_type.map_or(true, |t| a.source_type().eq_ignore_ascii_case(t))
        })
    }

    /// Like [`get_healthy_adapter`](Self::get_healthy_adapter) but an error when none qualifies.
    pub fn require_healthy_adapter(&self, source_type: Option<&str>) -> Result<Arc<dyn SourceAdapter>> {
        self.get_healthy_adapter(source_type)
            .ok_or_else(|| IngestError::NoHealthyAdapter(source_type.map(str::to_string)))
    }

    pub fn active_connections(&self) -> usize {
        self.registry.lock().active
    }

    pub fn connection_statuses(&self) -> StatusSnapshot {
        self.registry.lock().statuses.clone()
    }

    pub fn connection_status(&self, name: &str) -> Option<ConnectionStatus> {
        self.registry.lock().statuses.get(name).cloned()
    }

    /// Store a status, unless the source was removed meanwhile.
    fn store_status(&self, status: ConnectionStatus) {
        let mut reg = self.registry.lock();
        if reg.adapters.contains_key(&status.source) {
            reg.statuses.insert(status.source.clone(), status);
        }
    }

    /// Record the outcome of a collection fetch against the source's status.
    pub fn record_fetch_outcome(
        &self,
        name: &str,
        latency: Duration,
        err: Option<&IngestError>,
    ) -> Option<ConnectionStatus> {
        let adapter = self.adapter(name)?;
        let status = adapter.core().status_after(latency, err);
        self.store_status(status.clone());
        Some(status)
    }

    /// Probe one source.
    pub async fn test_connection(&self, name: &str) -> Result<ConnectionStatus> {
        let adapter = self
            .adapter(name)
            .ok_or_else(|| IngestError::SourceNotFound(name.to_string()))?;
        let status = adapter.test_connection().await;
        self.store_status(status.clone());
        Ok(status)
    }

    /// Probe every registered adapter concurrently. One probe failing never
    /// stops the others. Publishes the resulting snapshot to subscribers.
    pub async fn test_all_connections(&self) -> StatusSnapshot {
        let adapters = self.adapters();
        let probes = adapters.iter().map(|a| {
            let a = a.clone();
            async move {
                let timeout = a.config().timeout() + Duration::from_secs(1);
                match tokio::time::timeout(timeout, a.test_connection()).await {
                    Ok(status) => status,
                    // The dropped fetch never reached `track`; count the timeout here.
                    Err(_) => {
                        let err = IngestError::network(a.name(), "probe timed out");
                        a.core().record_failure(&err);
                        a.core().status_after(timeout, Some(&err))
                    }
                }
            }
        });
        for status in join_all(probes).await {
            if !status.connected {
                tracing::debug!(source = %status.source, error = ?status.error, "probe failed");
            }
            self.store_status(status);
        }

        let snapshot = self.connection_statuses();
        // No subscribers is fine.
        let _ = self.snapshots.send(snapshot.clone());
        snapshot
    }

    /// Receive every snapshot produced by [`test_all_connections`](Self::test_all_connections).
    pub fn subscribe(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.snapshots.subscribe()
    }

    /// Start the periodic probe loop. No-op (returns false) if already running.
    pub async fn start_health_checks(self: &Arc<Self>, interval: Duration) -> bool {
        let mut slot = self.health_task.lock().await;
        if slot.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::warn!("health checks already running");
            return false;
        }
        let manager = Arc::downgrade(self);
        *slot = Some(spawn_periodic("health-checks", interval, move || {
            let manager = manager.clone();
            async move {
                if let Some(m) = manager.upgrade() {
                    m.test_all_connections().await;
                }
            }
        }));
        tracing::info!(interval_secs = interval.as_secs(), "health checks started");
        true
    }

    pub async fn stop_health_checks(&self) {
        if let Some(task) = self.health_task.lock().await.take() {
            task.stop().await;
            tracing::info!("health checks stopped");
        }
    }

    pub async fn health_checks_running(&self) -> bool {
        self.health_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Stop probing and close every adapter.
    pub async fn close_all(&self) {
        self.stop_health_checks().await;
        let names: Vec<String> = self.registry.lock().adapters.keys().cloned().collect();
        for name in names {
            self.remove_adapter(&name).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::adapter::AdapterCore;
    use crate::ingest::types::{Article, NewsQuery};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeAdapter {
        config: SourceConfig,
        core: AdapterCore,
        fail: AtomicBool,
        hang: bool,
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn config(&self) -> &SourceConfig {
            &self.config
        }
        fn core(&self) -> &AdapterCore {
            &self.core
        }
        async fn fetch_news(&self, _q: &NewsQuery) -> Result<Vec<Article>> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let outcome = if self.fail.load(Ordering::SeqCst) {
                Err(IngestError::network(&self.config.name, "down"))
            } else {
                Ok(Vec::new())
            };
            self.core.track(outcome)
        }
    }

    fn manager(max: usize) -> Arc<ConnectionManager> {
        let m = ConnectionManager::new(ConnectionSettings {
            max_connections: max,
            poll_interval: Duration::from_millis(10),
            admission_timeout: None,
        });
        m.register_factory(
            "fake",
            Arc::new(|cfg: SourceConfig, client: Client| {
                let fail = cfg.base_url.contains("fail");
                let hang = cfg.base_url.contains("hang");
                Ok(Arc::new(FakeAdapter {
                    core: AdapterCore::new(&cfg, client),
                    config: cfg,
                    fail: AtomicBool::new(fail),
                    hang,
                }) as Arc<dyn SourceAdapter>)
            }),
        );
        Arc::new(m)
    }

    fn cfg(name: &str, url: &str, priority: u32) -> SourceConfig {
        SourceConfig::new(name, "fake", url).with_priority(priority)
    }

    #[tokio::test]
    async fn unknown_type_and_disabled_sources_are_rejected() {
        let m = manager(4);
        let err = m
            .create_adapter(SourceConfig::new("x", "nope", "http://x"))
            .await
            .err();
        assert_eq!(err, Some(IngestError::UnknownSourceType("nope".into())));

        let err = m.create_adapter(cfg("y", "ok", 1).disabled()).await.err();
        assert_eq!(err, Some(IngestError::SourceDisabled("y".into())));
        assert_eq!(m.active_connections(), 0);
    }

    #[tokio::test]
    async fn create_seeds_connected_status_and_rejects_duplicates() {
        let m = manager(4);
        m.create_adapter(cfg("a", "ok", 1)).await.unwrap();
        let st = m.connection_status("a").unwrap();
        assert!(st.connected);
        assert_eq!(st.latency_ms, 0.0);
        assert_eq!(st.consecutive_failures, 0);
        assert!(matches!(
            m.create_adapter(cfg("a", "ok", 1)).await,
            Err(IngestError::DuplicateSource(_))
        ));
        assert_eq!(m.active_connections(), 1);
    }

    #[tokio::test]
    async fn healthy_adapter_respects_priority_and_health() {
        let m = manager(4);
        m.create_adapter(cfg("slow", "ok", 5)).await.unwrap();
        m.create_adapter(cfg("best", "fail", 1)).await.unwrap();
        assert_eq!(m.get_healthy_adapter(None).unwrap().name(), "best");

        for _ in 0..3 {
            m.test_connection("best").await.unwrap();
        }
        assert_eq!(m.get_healthy_adapter(None).unwrap().name(), "slow");
        assert!(m.get_healthy_adapter(Some("other")).is_none());
        assert_eq!(
            m.require_healthy_adapter(Some("other")).err(),
            Some(IngestError::NoHealthyAdapter(Some("other".into())))
        );
    }

    #[tokio::test]
    async fn test_all_isolates_failures_and_publishes_snapshot() {
        let m = manager(4);
        let mut rx = m.subscribe();
        m.create_adapter(cfg("good", "ok", 1)).await.unwrap();
        m.create_adapter(cfg("bad", "fail", 1)).await.unwrap();

        let snap = m.test_all_connections().await;
        assert!(snap["good"].connected);
        assert!(!snap["bad"].connected);
        assert_eq!(snap["bad"].consecutive_failures, 1);
        assert_eq!(rx.recv().await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_probes_count_as_failures() {
        let m = manager(2);
        m.create_adapter(cfg("stuck", "hang", 1).with_timeout_secs(1))
            .await
            .unwrap();

        for n in 1..=3u32 {
            let snap = m.test_all_connections().await;
            let st = &snap["stuck"];
            assert!(!st.connected);
            assert_eq!(st.consecutive_failures, n);
            assert_eq!(st.error.as_deref(), Some("network error from stuck: probe timed out"));
        }
        let stuck = m.adapter("stuck").unwrap();
        assert!(!stuck.is_healthy());
        assert!(m.get_healthy_adapter(None).is_none());
    }

    #[tokio::test]
    async fn create_waits_for_a_free_slot() {
        let m = manager(1);
        m.create_adapter(cfg("first", "ok", 1)).await.unwrap();

        let m2 = m.clone();
        let pending = tokio::spawn(async move { m2.create_adapter(cfg("second", "ok", 1)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        assert!(m.remove_adapter("first").await);
        let created = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("admitted within poll interval")
            .unwrap();
        assert!(created.is_ok());
        assert_eq!(m.active_connections(), 1);
        assert!(m.connection_status("first").is_none());
    }

    #[tokio::test]
    async fn admission_timeout_is_terminal() {
        let m = ConnectionManager::new(ConnectionSettings {
            max_connections: 0,
            poll_interval: Duration::from_millis(5),
            admission_timeout: Some(Duration::from_millis(20)),
        });
        m.register_factory(
            "fake",
            Arc::new(|cfg: SourceConfig, client: Client| {
                Ok(Arc::new(FakeAdapter {
                    core: AdapterCore::new(&cfg, client),
                    config: cfg,
                    fail: AtomicBool::new(false),
                    hang: false,
                }) as Arc<dyn SourceAdapter>)
            }),
        );
        let err = m.create_adapter(cfg("x", "ok", 1)).await.err();
        assert!(matches!(
            err,
            Some(IngestError::ConnectionCeilingReached { max: 0, .. })
        ));
    }

    #[tokio::test]
    async fn health_loop_starts_once_and_stops() {
        let m = manager(2);
        m.create_adapter(cfg("bad", "fail", 1)).await.unwrap();
        assert!(m.start_health_checks(Duration::from_millis(20)).await);
        assert!(!m.start_health_checks(Duration::from_millis(20)).await);
        tokio::time::sleep(Duration::from_millis(70)).await;
        m.stop_health_checks().await;
        assert!(!m.health_checks_running().await);
        assert!(m.connection_status("bad").unwrap().consecutive_failures >= 2);

        m.close_all().await;
        assert_eq!(m.active_connections(), 0);
    }
}
