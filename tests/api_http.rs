// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

use serde_json::Value as Json;
use http::{Request, StatusCode};
use shuttle_axum::axum::{
    body::{self, Body},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crypto_news_ingest::config::Settings;
use crypto_news_ingest::metrics::Metrics;
use crypto_news_ingest::{api, Engine, SourceConfig};

const BODY_LIMIT: usize = 1024 * 1024;
const COINDESK_JSON: &str = include_str!("fixtures/coindesk.json");

/// Router over an engine with one mocked coindesk source, after one cycle.
async fn test_router() -> (Router, MockServer) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/news/v1/article/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(COINDESK_JSON))
        .mount(&server)
        .await;

    let engine = Engine::build(&Settings::default(), None);
    engine
        .orchestrator
        .initialize(vec![SourceConfig::new("coindesk", "coindesk", server.uri())])
        .await;
    engine.orchestrator.collect_news().await;

    let router = api::router(api::AppState::new(engine.orchestrator.clone()))
        .merge(Metrics::detached().router());
    (router, server)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Json>) -> (StatusCode, Json) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .clone()
        .oneshot(req.body(body).expect("build request"))
        .await
        .expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let json = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Json::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, json)
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let (app, _server) = test_router().await;
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Json::String("OK".into()));
}

#[tokio::test]
async fn news_filters_by_source_category_and_limit() {
    let (app, _server) = test_router().await;

    let (status, body) = send(&app, "GET", "/news?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (_, body) = send(&app, "GET", "/news?categories=regulation&sources=coindesk", None).await;
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], "coindesk:102");
    assert_eq!(items[0]["category"], "regulation");

    let (status, body) = send(&app, "GET", "/news?categories=weather", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("weather"));
}

#[tokio::test]
async fn search_is_case_insensitive() {
    let (app, _server) = test_router().await;
    let (status, body) = send(&app, "GET", "/news/search?q=ETF", None).await;
    assert_eq!(status, StatusCode::OK);
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], "coindesk:101");
}

#[tokio::test]
async fn status_health_and_stats_report_the_source() {
    let (app, _server) = test_router().await;

    let (_, body) = send(&app, "GET", "/sources/status", None).await;
    assert_eq!(body["coindesk"]["connected"], true);
    assert_eq!(body["coindesk"]["consecutive_failures"], 0);

    let (_, body) = send(&app, "GET", "/sources/health", None).await;
    assert_eq!(body["coindesk"]["active_alerts"], 0);

    let (_, body) = send(&app, "GET", "/stats", None).await;
    assert_eq!(body["cycles"], 1);
    assert_eq!(body["latest"], 3);

    let (_, body) = send(&app, "GET", "/alerts", None).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn source_lifecycle_over_http() {
    let (app, server) = test_router().await;

    let cfg = serde_json::json!({
        "name": "coindesk-2",
        "sourceType": "coindesk",
        "baseUrl": server.uri(),
    });
    let (status, body) = send(&app, "POST", "/sources", Some(cfg.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["ok"], true);

    let (status, _) = send(&app, "POST", "/sources", Some(cfg)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let bad = serde_json::json!({"name": "x", "sourceType": "fax", "baseUrl": "http://x"});
    let (status, _) = send(&app, "POST", "/sources", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "POST", "/sources/coindesk-2/test", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connected"], true);

    let (status, body) = send(&app, "POST", "/sources/coindesk-2/restart", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, _) = send(&app, "DELETE", "/sources/coindesk-2", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "DELETE", "/sources/coindesk-2", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "POST", "/sources/coindesk-2/test", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_route_is_mounted() {
    let (app, _server) = test_router().await;
    let (status, _) = send(&app, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
}
