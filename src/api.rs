use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::error::IngestError;
use crate::health::HealthMonitor;
use crate::ingest::types::{ArticleFilter, Category, SourceConfig};
use crate::orchestrator::CollectionOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CollectionOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<CollectionOrchestrator>) -> Self {
        Self { orchestrator }
    }

    fn monitor(&self) -> &Arc<HealthMonitor> {
        self.orchestrator.monitor()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/news", get(news))
        .route("/news/search", get(search))
        .route("/stats", get(stats))
        .route("/sources", post(add_source))
        .route("/sources/status", get(sources_status))
        .route("/sources/health", get(sources_health))
        .route("/sources/{name}", delete(remove_source))
        .route("/sources/{name}/test", post(test_source))
        .route("/sources/{name}/restart", post(restart_source))
        .route("/sources/{name}/metrics", get(source_metrics))
        .route("/alerts", get(alerts))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Error body `{ "error": "..." }` with a status derived from the error kind.
struct ApiError(StatusCode, String);

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        let code = match &e {
            IngestError::SourceNotFound(_) => StatusCode::NOT_FOUND,
            IngestError::DuplicateSource(_) => StatusCode::CONFLICT,
            IngestError::UnknownSourceType(_)
            | IngestError::SourceDisabled(_)
            | IngestError::Config(_) => StatusCode::BAD_REQUEST,
            IngestError::ConnectionCeilingReached { .. } | IngestError::NoHealthyAdapter(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            IngestError::Network { .. } | IngestError::Parse { .. } => StatusCode::BAD_GATEWAY,
        };
        ApiError(code, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[derive(Deserialize)]
struct NewsParams {
    #[serde(default = "default_limit")]
    limit: usize,
    sources: Option<String>,
    categories: Option<String>,
    keywords: Option<String>,
    since: Option<chrono::DateTime<chrono::Utc>>,
}

fn default_limit() -> usize {
    50
}

async fn news(
    State(state): State<AppState>,
    Query(p): Query<NewsParams>,
) -> Result<Json<Vec<crate::ingest::types::Article>>, ApiError> {
    let mut categories = Vec::new();
    for label in split_list(p.categories.as_deref()) {
        let c = label
            .parse::<Category>()
            .map_err(|_| ApiError(StatusCode::BAD_REQUEST, format!("unknown category: {label}")))?;
        categories.push(c);
    }
    let mut filter = ArticleFilter::new(p.limit)
        .sources(split_list(p.sources.as_deref()))
        .categories(categories)
        .keywords(split_list(p.keywords.as_deref()));
    if let Some(since) = p.since {
        filter = filter.since(since);
    }
    Ok(Json(state.orchestrator.fetch_news(&filter)))
}

#[derive(Deserialize)]
struct SearchParams {
    q: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

async fn search(
    State(state): State<AppState>,
    Query(p): Query<SearchParams>,
) -> Json<Vec<crate::ingest::types::Article>> {
    Json(state.orchestrator.search_news(&p.q, p.limit))
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.stats().await)
}

async fn sources_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.get_connection_status())
}

async fn sources_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.get_health_summary())
}

async fn source_metrics(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .monitor()
        .health_metrics(&name)
        .map(Json)
        .ok_or_else(|| ApiError::from(IngestError::SourceNotFound(name)))
}

#[derive(Deserialize)]
struct AlertParams {
    #[serde(default)]
    all: bool,
    #[serde(default = "default_limit")]
    limit: usize,
}

async fn alerts(State(state): State<AppState>, Query(p): Query<AlertParams>) -> impl IntoResponse {
    if p.all {
        Json(state.monitor().alert_history(p.limit))
    } else {
        Json(state.monitor().active_alerts())
    }
}

#[derive(Serialize)]
struct Outcome {
    source: String,
    ok: bool,
}

async fn add_source(
    State(state): State<AppState>,
    Json(cfg): Json<SourceConfig>,
) -> Result<(StatusCode, Json<Outcome>), ApiError> {
    let source = cfg.name.clone();
    state.orchestrator.manager().create_adapter(cfg).await?;
    Ok((StatusCode::CREATED, Json(Outcome { source, ok: true })))
}

async fn remove_source(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Outcome>, ApiError> {
    if state.orchestrator.remove_source(&name).await {
        Ok(Json(Outcome {
            source: name,
            ok: true,
        }))
    } else {
        Err(IngestError::SourceNotFound(name).into())
    }
}

async fn test_source(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.orchestrator.test_source_connection(&name).await?;
    Ok(Json(status))
}

async fn restart_source(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Outcome>, ApiError> {
    if state.orchestrator.manager().adapter(&name).is_none() {
        return Err(IngestError::SourceNotFound(name).into());
    }
    let ok = state.orchestrator.restart_source(&name).await;
    Ok(Json(Outcome { source: name, ok }))
}
