//! # Health Monitor
//! Rolling per-source status history, threshold alerts and recovery detection.
//!
//! Observations come from the connection manager: its probe loop publishes
//! snapshots which the monitor consumes, and the collector forwards the status
//! produced by each fetch.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::connection::ConnectionManager;
use crate::ingest::types::ConnectionStatus;
use crate::notify::AlertNotifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ConnectionFailed,
    SlowResponse,
    ConsecutiveFailures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub source: String,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct HealthThresholds {
    /// Latency above this raises `SlowResponse`.
    pub max_latency: Duration,
    /// Streak length that raises `ConsecutiveFailures`.
    pub failure_threshold: u32,
    /// Per-source history cap.
    pub history_cap: usize,
    /// Total alerts kept (resolved ones are dropped first).
    pub alert_cap: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_latency: Duration::from_secs(5),
            failure_threshold: 3,
            history_cap: 100,
            alert_cap: 1_000,
        }
    }
}

/// Per-source summary returned by [`HealthMonitor::get_health_summary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    pub source: String,
    pub connected: bool,
    pub uptime_percent: f64,
    pub avg_latency_ms: f64,
    pub active_alerts: usize,
    pub consecutive_failures: u32,
    pub last_checked: DateTime<Utc>,
}

/// Derived metrics over one source's rolling history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthMetrics {
    pub source: String,
    pub samples: usize,
    pub uptime_percent: f64,
    pub avg_latency_ms: f64,
    pub success_rate: f64,
    pub errors_24h: usize,
}

#[derive(Default)]
struct MonitorState {
    history: HashMap<String, VecDeque<ConnectionStatus>>,
    alerts: Vec<Alert>,
}

pub struct HealthMonitor {
    manager: Arc<ConnectionManager>,
    thresholds: HealthThresholds,
    notifier: Option<Arc<dyn AlertNotifier>>,
    state: Mutex<MonitorState>,
    next_id: AtomicU64,
    consumer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(manager: Arc<ConnectionManager>, thresholds: HealthThresholds) -> Self {
        Self {
            manager,
            thresholds,
            notifier: None,
            state: Mutex::new(MonitorState::default()),
            next_id: AtomicU64::new(1),
            consumer: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Record one observation and evaluate alert rules. Returns the alerts
    /// newly raised by this observation.
    pub fn observe(&self, status: &ConnectionStatus) -> Vec<Alert> {
        let mut raised = Vec::new();
        let mut st = self.state.lock();

        let hist = st.history.entry(status.source.clone()).or_default();
        hist.push_back(status.clone());
        while hist.len() > self.thresholds.history_cap.max(1) {
            hist.pop_front();
        }

        let slow = status.latency() > self.thresholds.max_latency;

        // Recovery: a slow-response alert stays open while the source is still slow.
        if status.is_fully_healthy() {
            let now = Utc::now();
            let mut n = 0;
            for a in st.alerts.iter_mut().filter(|a| {
                !a.resolved
                    && a.source == status.source
                    && !(slow && a.kind == AlertKind::SlowResponse)
            }) {
                a.resolved = true;
                a.resolved_at = Some(now);
                n += 1;
            }
            if n > 0 {
                tracing::info!(source = %status.source, resolved = n, "source recovered; alerts resolved");
            }
        }

        if !status.connected {
            let severity = if status.consecutive_failures >= 3 {
                Severity::Critical
            } else {
                Severity::High
            };
            let msg = format!(
                "connection to {} failed: {}",
                status.source,
                status.error.as_deref().unwrap_or("unknown error")
            );
            raised.extend(self.raise(&mut st, &status.source, AlertKind::ConnectionFailed, severity, msg));
        }

        if slow {
            let msg = format!(
                "{} responded in {:.0} ms (threshold {} ms)",
                status.source,
                status.latency_ms,
                self.thresholds.max_latency.as_millis()
            );
            raised.extend(self.raise(&mut st, &status.source, AlertKind::SlowResponse, Severity::Medium, msg));
        }

        if status.consecutive_failures >= self.thresholds.failure_threshold {
            let msg = format!(
                "{} failed {} times in a row",
                status.source, status.consecutive_failures
            );
            raised.extend(self.raise(
                &mut st,
                &status.source,
                AlertKind::ConsecutiveFailures,
                Severity::High,
                msg,
            ));
        }

        self.enforce_alert_cap(&mut st);
        raised
    }

    /// Create an alert unless an unresolved one of the same (source, kind) exists.
    fn raise(
        &self,
        st: &mut MonitorState,
        source: &str,
        kind: AlertKind,
        severity: Severity,
        message: String,
    ) -> Option<Alert> {
        if st
            .alerts
            .iter()
            .any(|a| !a.resolved && a.source == source && a.kind == kind)
        {
            return None;
        }
        let alert = Alert {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            source: source.to_string(),
            kind,
            severity,
            message,
            created_at: Utc::now(),
            resolved: false,
            resolved_at: None,
        };
        tracing::warn!(
            source = %alert.source,
            kind = ?alert.kind,
            severity = ?alert.severity,
            "{}",
            alert.message
        );
        counter!("health_alerts_total", "kind" => format!("{kind:?}")).increment(1);
        st.alerts.push(alert.clone());
        Some(alert)
    }

    fn enforce_alert_cap(&self, st: &mut MonitorState) {
        let cap = self.thresholds.alert_cap.max(1);
        while st.alerts.len() > cap {
            let idx = st.alerts.iter().position(|a| a.resolved).unwrap_or(0);
            st.alerts.remove(idx);
        }
    }

    /// Observe, then forward freshly raised alerts to the notifier.
    pub async fn observe_and_notify(&self, status: &ConnectionStatus) {
        let raised = self.observe(status);
        if let Some(n) = &self.notifier {
            for alert in &raised {
                if let Err(e) = n.send(alert).await {
                    tracing::warn!(error = %e, source = %alert.source, "alert notification failed");
                }
            }
        }
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.state
            .lock()
            .alerts
            .iter()
            .filter(|a| !a.resolved)
            .cloned()
            .collect()
    }

    /// Most recent alerts first.
    pub fn alert_history(&self, limit: usize) -> Vec<Alert> {
        self.state
            .lock()
            .alerts
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Manually resolve one alert. False if unknown or already resolved.
    pub fn resolve_alert(&self, id: u64) -> bool {
        let mut st = self.state.lock();
        match st.alerts.iter_mut().find(|a| a.id == id && !a.resolved) {
            Some(a) => {
                a.resolved = true;
                a.resolved_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    pub fn history(&self, source: &str) -> Vec<ConnectionStatus> {
        self.state
            .lock()
            .history
            .get(source)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop history and alerts of a source that is gone.
    pub fn forget(&self, source: &str) {
        let mut st = self.state.lock();
        st.history.remove(source);
        st.alerts.retain(|a| a.source != source);
    }

    pub fn health_metrics(&self, source: &str) -> Option<HealthMetrics> {
        let st = self.state.lock();
        let hist = st.history.get(source)?;
        if hist.is_empty() {
            return None;
        }
        let n = hist.len() as f64;
        let connected = hist.iter().filter(|s| s.connected).count() as f64;
        let ok = hist.iter().filter(|s| s.error.is_none()).count() as f64;
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        Some(HealthMetrics {
            source: source.to_string(),
            samples: hist.len(),
            uptime_percent: connected / n * 100.0,
            avg_latency_ms: hist.iter().map(|s| s.latency_ms).sum::<f64>() / n,
            success_rate: ok / n,
            errors_24h: hist
                .iter()
                .filter(|s| s.error.is_some() && s.last_checked >= cutoff)
                .count(),
        })
    }

    /// Summary for every registered source.
    pub fn get_health_summary(&self) -> BTreeMap<String, HealthSummary> {
        let statuses = self.manager.connection_statuses();
        let st = self.state.lock();
        statuses
            .into_iter()
            .map(|(name, status)| {
                let (uptime, avg_latency) = match st.history.get(&name).filter(|h| !h.is_empty()) {
                    Some(h) => {
                        let n = h.len() as f64;
                        (
                            h.iter().filter(|s| s.connected).count() as f64 / n * 100.0,
                            h.iter().map(|s| s.latency_ms).sum::<f64>() / n,
                        )
                    }
                    None => (if status.connected { 100.0 } else { 0.0 }, status.latency_ms),
                };
                let active = st
                    .alerts
                    .iter()
                    .filter(|a| !a.resolved && a.source == name)
                    .count();
                let summary = HealthSummary {
                    source: name.clone(),
                    connected: status.connected,
                    uptime_percent: uptime,
                    avg_latency_ms: avg_latency,
                    active_alerts: active,
                    consecutive_failures: status.consecutive_failures,
                    last_checked: status.last_checked,
                };
                (name, summary)
            })
            .collect()
    }

    /// Start the manager's probe loop and consume its snapshots. No-op if running.
    pub async fn start_monitoring(self: &Arc<Self>, interval: Duration) {
        let mut slot = self.consumer.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::warn!("health monitoring already running");
            return;
        }
        let mut rx = self.manager.subscribe();
        let monitor = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(snapshot) => {
                        let Some(m) = monitor.upgrade() else { break };
                        for status in snapshot.values() {
                            m.observe_and_notify(status).await;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "health monitor lagged behind probe snapshots");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
        drop(slot);
        self.manager.start_health_checks(interval).await;
    }

    /// Stop probing and consuming. Safe to call repeatedly.
    pub async fn stop_monitoring(&self) {
        self.manager.stop_health_checks().await;
        if let Some(handle) = self.consumer.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionSettings;

    fn monitor() -> HealthMonitor {
        let mgr = Arc::new(ConnectionManager::new(ConnectionSettings::default()));
        HealthMonitor::new(
            mgr,
            HealthThresholds {
                max_latency: Duration::from_millis(500),
                failure_threshold: 3,
                history_cap: 5,
                alert_cap: 100,
            },
        )
    }

    fn status(source: &str, connected: bool, failures: u32, latency_ms: f64) -> ConnectionStatus {
        ConnectionStatus {
            source: source.into(),
            connected,
            latency_ms,
            last_checked: Utc::now(),
            error: (!connected).then(|| "refused".to_string()),
            consecutive_failures: failures,
            last_success: None,
        }
    }

    #[test]
    fn duplicate_conditions_yield_one_alert() {
        let m = monitor();
        assert_eq!(m.observe(&status("decrypt", false, 1, 10.0)).len(), 1);
        assert!(m.observe(&status("decrypt", false, 2, 10.0)).is_empty());
        let active = m.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].kind, AlertKind::ConnectionFailed);
        assert_eq!(active[0].severity, Severity::High);
    }

    #[test]
    fn streak_escalates_and_recovery_resolves_everything() {
        let m = monitor();
        let raised = m.observe(&status("decrypt", false, 3, 900.0));
        let kinds: Vec<_> = raised.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AlertKind::ConnectionFailed,
                AlertKind::SlowResponse,
                AlertKind::ConsecutiveFailures
            ]
        );
        assert_eq!(raised[0].severity, Severity::Critical);

        assert!(m.observe(&status("decrypt", true, 0, 20.0)).is_empty());
        assert!(m.active_alerts().is_empty());
        assert!(m.alert_history(10).iter().all(|a| a.resolved_at.is_some()));

        // a new failure after recovery raises again
        assert_eq!(m.observe(&status("decrypt", false, 1, 20.0)).len(), 1);
    }

    #[test]
    fn slow_but_connected_source_is_not_recovered() {
        let m = monitor();
        assert_eq!(m.observe(&status("coindesk", true, 0, 800.0)).len(), 1);
        assert_eq!(m.active_alerts()[0].kind, AlertKind::SlowResponse);
        assert!(m.observe(&status("coindesk", true, 0, 900.0)).is_empty());
        m.observe(&status("coindesk", true, 0, 100.0));
        assert!(m.active_alerts().is_empty());
    }

    #[test]
    fn history_is_capped_and_metrics_derived() {
        let m = monitor();
        for i in 0..8 {
            m.observe(&status("coindesk", i % 2 == 0, 0, 100.0));
        }
        assert_eq!(m.history("coindesk").len(), 5);
        let metrics = m.health_metrics("coindesk").unwrap();
        assert_eq!(metrics.samples, 5);
        // entries 3..8 → connected at 4 and 6
        assert!((metrics.uptime_percent - 40.0).abs() < 1e-9);
        assert!((metrics.avg_latency_ms - 100.0).abs() < 1e-9);
        assert_eq!(metrics.errors_24h, 3);
        assert!(m.health_metrics("nope").is_none());
    }

    #[test]
    fn manual_resolve_and_forget() {
        let m = monitor();
        let a = m.observe(&status("x", false, 1, 1.0)).remove(0);
        assert!(m.resolve_alert(a.id));
        assert!(!m.resolve_alert(a.id));
        m.forget("x");
        assert!(m.alert_history(10).is_empty());
        assert!(m.history("x").is_empty());
    }
}
