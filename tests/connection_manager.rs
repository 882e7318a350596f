// tests/connection_manager.rs
//
// ConnectionManager with the built-in providers against mock servers.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crypto_news_ingest::ingest::providers::register_builtin;
use crypto_news_ingest::{ConnectionManager, ConnectionSettings, IngestError, SourceConfig};

const DECRYPT_XML: &str = include_str!("fixtures/decrypt_rss.xml");

fn manager(settings: ConnectionSettings) -> Arc<ConnectionManager> {
    let m = ConnectionManager::new(settings);
    register_builtin(&m);
    Arc::new(m)
}

async fn feed_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DECRYPT_XML))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn builtin_types_are_registered_case_insensitively() {
    let m = manager(ConnectionSettings::default());
    let mut types = m.registered_types();
    types.sort();
    assert_eq!(types, vec!["coindesk", "cointelegraph", "decrypt"]);

    let a = m
        .create_adapter(SourceConfig::new("dc", "Decrypt", "http://127.0.0.1:9"))
        .await
        .unwrap();
    assert_eq!(a.name(), "dc");

    let err = m
        .create_adapter(SourceConfig::new("x", "unknown-feed", "http://127.0.0.1:9"))
        .await
        .err()
        .unwrap();
    assert_eq!(err, IngestError::UnknownSourceType("unknown-feed".into()));
    assert_eq!(m.active_connections(), 1);
}

#[tokio::test]
async fn probes_isolate_failures_and_select_healthy_by_priority() {
    let server = feed_server().await;
    let m = manager(ConnectionSettings::default());
    m.create_adapter(
        SourceConfig::new("down", "decrypt", "http://127.0.0.1:9/feed")
            .with_priority(1)
            .with_timeout_secs(2),
    )
    .await
    .unwrap();
    m.create_adapter(SourceConfig::new("up", "decrypt", format!("{}/feed", server.uri())).with_priority(5))
        .await
        .unwrap();

    let mut rx = m.subscribe();
    for _ in 0..3 {
        let snap = m.test_all_connections().await;
        assert_eq!(snap.len(), 2);
        assert!(snap["up"].connected);
        assert!(!snap["down"].connected);
    }
    assert_eq!(rx.recv().await.unwrap().len(), 2);

    let statuses = m.connection_statuses();
    assert_eq!(statuses["down"].consecutive_failures, 3);
    assert_eq!(statuses["up"].consecutive_failures, 0);
    assert!(statuses["up"].last_success.is_some());

    // "down" has the better priority but is now unhealthy.
    let chosen = m.get_healthy_adapter(Some("decrypt")).unwrap();
    assert_eq!(chosen.name(), "up");
    assert!(m.get_healthy_adapter(Some("coindesk")).is_none());
    assert!(matches!(
        m.require_healthy_adapter(Some("coindesk")).err(),
        Some(IngestError::NoHealthyAdapter(_))
    ));
}

#[tokio::test]
async fn ceiling_with_short_admission_timeout_fails_and_frees_after_removal() {
    let m = manager(ConnectionSettings {
        max_connections: 1,
        poll_interval: Duration::from_millis(10),
        admission_timeout: Some(Duration::from_millis(100)),
    });
    m.create_adapter(SourceConfig::new("a", "decrypt", "http://127.0.0.1:9"))
        .await
        .unwrap();

    let err = m
        .create_adapter(SourceConfig::new("b", "decrypt", "http://127.0.0.1:9"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, IngestError::ConnectionCeilingReached { max: 1, .. }));

    assert!(m.remove_adapter("a").await);
    assert!(!m.remove_adapter("a").await);
    m.create_adapter(SourceConfig::new("b", "decrypt", "http://127.0.0.1:9"))
        .await
        .unwrap();
    assert_eq!(m.active_connections(), 1);
    assert!(m.connection_status("a").is_none());
}

#[tokio::test]
async fn test_connection_on_unknown_source_is_not_found() {
    let m = manager(ConnectionSettings::default());
    assert_eq!(
        m.test_connection("nope").await.err(),
        Some(IngestError::SourceNotFound("nope".into()))
    );
}

#[tokio::test]
async fn close_all_stops_loop_and_clears_registry() {
    let server = feed_server().await;
    let m = manager(ConnectionSettings::default());
    m.create_adapter(SourceConfig::new("up", "decrypt", format!("{}/feed", server.uri())))
        .await
        .unwrap();
    assert!(m.start_health_checks(Duration::from_secs(3600)).await);
    assert!(!m.start_health_checks(Duration::from_secs(3600)).await);

    m.close_all().await;
    assert!(!m.health_checks_running().await);
    assert_eq!(m.active_connections(), 0);
    assert!(m.connection_statuses().is_empty());
}
