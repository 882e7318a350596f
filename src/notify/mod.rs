// src/notify/mod.rs
//! Outbound alert notifications (Discord / Slack webhooks).

pub mod discord;
pub mod slack;

use anyhow::Result;

use crate::health::{Alert, Severity};

#[async_trait::async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// One-line human text shared by every channel.
pub fn alert_text(alert: &Alert) -> String {
    format!(
        "[{}] {} ({:?}): {} @ {}",
        severity_label(alert.severity),
        alert.source,
        alert.kind,
        alert.message,
        alert.created_at.to_rfc3339()
    )
}

fn severity_label(s: Severity) -> &'static str {
    match s {
        Severity::Low => "LOW",
        Severity::Medium => "MEDIUM",
        Severity::High => "HIGH",
        Severity::Critical => "CRITICAL",
    }
}

/// Fan-out to every configured channel; one channel failing does not stop the rest.
#[derive(Default)]
pub struct NotifierMux {
    channels: Vec<Box<dyn AlertNotifier>>,
}

impl NotifierMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels enabled by `DISCORD_WEBHOOK_URL` / `SLACK_WEBHOOK_URL`.
    pub fn from_env() -> Self {
        let mut mux = Self::new();
        if let Ok(url) = std::env::var("DISCORD_WEBHOOK_URL") {
            if !url.trim().is_empty() {
                mux = mux.with(discord::DiscordNotifier::new(url));
            }
        }
        if let Ok(url) = std::env::var("SLACK_WEBHOOK_URL") {
            if !url.trim().is_empty() {
                mux = mux.with(slack::SlackNotifier::new(url));
            }
        }
        mux
    }

    pub fn with<N: AlertNotifier + 'static>(mut self, n: N) -> Self {
        self.channels.push(Box::new(n));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

#[async_trait::async_trait]
impl AlertNotifier for NotifierMux {
    async fn send(&self, alert: &Alert) -> Result<()> {
        for ch in &self.channels {
            if let Err(e) = ch.send(alert).await {
                tracing::warn!(channel = ch.name(), error = %e, "alert channel failed");
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mux"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::AlertKind;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<String>>>);

    #[async_trait::async_trait]
    impl AlertNotifier for Recorder {
        async fn send(&self, alert: &Alert) -> Result<()> {
            self.0.lock().unwrap().push(alert_text(alert));
            Ok(())
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Broken;

    #[async_trait::async_trait]
    impl AlertNotifier for Broken {
        async fn send(&self, _alert: &Alert) -> Result<()> {
            anyhow::bail!("webhook down")
        }
        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn mux_continues_past_failing_channel() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mux = NotifierMux::new().with(Broken).with(Recorder(seen.clone()));
        let alert = Alert {
            id: 1,
            source: "decrypt".into(),
            kind: AlertKind::ConnectionFailed,
            severity: Severity::Critical,
            message: "connection to decrypt failed".into(),
            created_at: Utc::now(),
            resolved: false,
            resolved_at: None,
        };
        mux.send(&alert).await.unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("[CRITICAL] decrypt (ConnectionFailed)"));
    }
}
