// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod orchestrator;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::connection::{ConnectionManager, ConnectionSettings};
pub use crate::error::{IngestError, Result};
pub use crate::health::{Alert, AlertKind, HealthMonitor, HealthThresholds, Severity};
pub use crate::ingest::adapter::SourceAdapter;
pub use crate::ingest::rate_limiter::RateLimiter;
pub use crate::ingest::types::{
    Article, ArticleFilter, Category, ConnectionStatus, NewsQuery, SourceConfig,
};
pub use crate::notify::NotifierMux;
pub use crate::orchestrator::{CollectionOrchestrator, CollectorSettings};

use std::sync::Arc;

/// Everything the service runs, wired together.
pub struct Engine {
    pub manager: Arc<ConnectionManager>,
    pub monitor: Arc<HealthMonitor>,
    pub orchestrator: Arc<CollectionOrchestrator>,
}

impl Engine {
    /// Build the manager (with the built-in providers registered), the monitor
    /// (alerts fanned out through `notifier`) and the orchestrator.
    pub fn build(settings: &config::Settings, notifier: Option<Arc<dyn notify::AlertNotifier>>) -> Self {
        let manager = Arc::new(ConnectionManager::new(settings.connection.clone()));
        ingest::providers::register_builtin(&manager);

        let mut monitor = HealthMonitor::new(manager.clone(), settings.health.clone());
        if let Some(n) = notifier {
            monitor = monitor.with_notifier(n);
        }
        let monitor = Arc::new(monitor);

        let orchestrator = Arc::new(CollectionOrchestrator::new(
            manager.clone(),
            monitor.clone(),
            settings.collector.clone(),
        ));
        Self {
            manager,
            monitor,
            orchestrator,
        }
    }

    /// Add the sources and start both background loops.
    pub async fn start(&self, settings: &config::Settings, sources: Vec<SourceConfig>) -> usize {
        let added = self.orchestrator.initialize(sources).await;
        self.monitor
            .start_monitoring(settings.health_check_interval)
            .await;
        self.orchestrator
            .start_collection(settings.collection_interval)
            .await;
        added
    }
}
