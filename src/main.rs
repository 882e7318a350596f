//! Crypto news ingestion service — binary entrypoint.
//! Boots the collectors and health loops, then serves the Axum HTTP API.

use std::sync::Arc;

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crypto_news_ingest::config::{sources, Settings};
use crypto_news_ingest::metrics::Metrics;
use crypto_news_ingest::notify::{AlertNotifier, NotifierMux};
use crypto_news_ingest::{api, Engine};

/// Compact logs by default; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("crypto_news_ingest=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // Shuttle may have installed a subscriber already; keep theirs.
    let _ = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::from_env();
    let source_list = sources::load_sources_default()?;

    let mux = NotifierMux::from_env();
    let notifier: Option<Arc<dyn AlertNotifier>> = if mux.is_empty() {
        None
    } else {
        tracing::info!(channels = mux.len(), "alert notifications enabled");
        Some(Arc::new(mux))
    };

    let metrics = Metrics::init()?;
    let engine = Engine::build(&settings, notifier);
    let added = engine.start(&settings, source_list).await;
    tracing::info!(sources = added, "news ingestion started");

    let router = api::router(api::AppState::new(engine.orchestrator.clone())).merge(metrics.router());
    Ok(router.into())
}
