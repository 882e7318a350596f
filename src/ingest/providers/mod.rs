// src/ingest/providers/mod.rs
pub mod coindesk;
pub mod cointelegraph;
pub mod decrypt;
pub mod rss;

use std::sync::Arc;

use reqwest::Client;

use crate::connection::ConnectionManager;
use crate::ingest::adapter::{AdapterFactory, SourceAdapter};
use crate::ingest::types::SourceConfig;

/// Wrap an infallible adapter constructor as a factory.
pub fn factory<A, F>(build: F) -> AdapterFactory
where
    A: SourceAdapter + 'static,
    F: Fn(SourceConfig, Client) -> A + Send + Sync + 'static,
{
    Arc::new(move |cfg: SourceConfig, client: Client| {
        Ok(Arc::new(build(cfg, client)) as Arc<dyn SourceAdapter>)
    })
}

/// Built-in `(source_type, factory)` pairs.
pub fn builtin_factories() -> Vec<(&'static str, AdapterFactory)> {
    vec![
        (coindesk::SOURCE_TYPE, factory(coindesk::CoinDeskAdapter::new)),
        (
            cointelegraph::SOURCE_TYPE,
            factory(cointelegraph::CoinTelegraphAdapter::new),
        ),
        (decrypt::SOURCE_TYPE, factory(decrypt::DecryptAdapter::new)),
    ]
}

/// Register every built-in provider with the manager.
pub fn register_builtin(manager: &ConnectionManager) {
    for (source_type, factory) in builtin_factories() {
        manager.register_factory(source_type, factory);
    }
}
