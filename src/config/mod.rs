// src/config/mod.rs
//! Runtime settings from the environment (`.env` is loaded by the binary).

pub mod sources;

use std::time::Duration;

use crate::connection::ConnectionSettings;
use crate::health::HealthThresholds;
use crate::orchestrator::CollectorSettings;

#[derive(Debug, Clone)]
pub struct Settings {
    pub collection_interval: Duration,
    pub health_check_interval: Duration,
    pub connection: ConnectionSettings,
    pub collector: CollectorSettings,
    pub health: HealthThresholds,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(60),
            connection: ConnectionSettings::default(),
            collector: CollectorSettings::default(),
            health: HealthThresholds::default(),
        }
    }
}

impl Settings {
    /// Defaults overridden by env vars. Unparsable values keep the default
    /// and log a warning.
    pub fn from_env() -> Self {
        let d = Self::default();

        let admission_secs = env_u64(
            "CONNECTION_ADMISSION_TIMEOUT_SECS",
            d.connection
                .admission_timeout
                .map(|t| t.as_secs())
                .unwrap_or(0),
        );
        let max_age_hours = env_u64(
            "HISTORY_MAX_AGE_HOURS",
            d.collector
                .history_max_age
                .map(|t| t.as_secs() / 3600)
                .unwrap_or(0),
        );

        Self {
            collection_interval: secs("COLLECTION_INTERVAL_SECS", d.collection_interval),
            health_check_interval: secs("HEALTH_CHECK_INTERVAL_SECS", d.health_check_interval),
            connection: ConnectionSettings {
                max_connections: env_u64(
                    "MAX_CONNECTIONS",
                    d.connection.max_connections as u64,
                )
                .max(1) as usize,
                poll_interval: Duration::from_millis(
                    env_u64(
                        "CONNECTION_POLL_MS",
                        d.connection.poll_interval.as_millis() as u64,
                    )
                    .max(1),
                ),
                admission_timeout: (admission_secs > 0)
                    .then(|| Duration::from_secs(admission_secs)),
            },
            collector: CollectorSettings {
                per_source_limit: env_u64(
                    "PER_SOURCE_LIMIT",
                    d.collector.per_source_limit as u64,
                ) as usize,
                cycle_timeout: secs("CYCLE_TIMEOUT_SECS", d.collector.cycle_timeout),
                latest_capacity: env_u64("LATEST_CAPACITY", d.collector.latest_capacity as u64)
                    as usize,
                history_capacity: env_u64(
                    "HISTORY_CAPACITY",
                    d.collector.history_capacity as u64,
                ) as usize,
                history_max_age: (max_age_hours > 0)
                    .then(|| Duration::from_secs(max_age_hours * 3600)),
            },
            health: HealthThresholds {
                max_latency: Duration::from_millis(env_u64(
                    "SLOW_RESPONSE_MS",
                    d.health.max_latency.as_millis() as u64,
                )),
                failure_threshold: env_u64(
                    "FAILURE_THRESHOLD",
                    d.health.failure_threshold as u64,
                ) as u32,
                history_cap: env_u64("HEALTH_HISTORY_CAP", d.health.history_cap as u64)
                    as usize,
                ..d.health
            },
        }
    }
}

fn secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_u64(key, default.as_secs()))
}

fn env_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, default, "invalid number in env; using default");
                default
            }
        },
        Err(_) => default,
    }
}
