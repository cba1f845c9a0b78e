// src/api.rs
//! HTTP query surface over the engine: latest records, lookup by id,
//! counts, manual refresh and the Prometheus scrape endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::engine::{IngestEngine, RefreshOutcome};
use crate::model::{Category, IntelItem};

pub const DEFAULT_LIMIT: i64 = 10;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<IngestEngine>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(engine: Arc<IngestEngine>) -> Self {
        Self {
            engine,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/intel", get(latest))
        .route("/intel/{id}", get(by_id))
        .route("/stats", get(stats))
        .route("/refresh", post(refresh));

    if let Some(handle) = state.metrics.clone() {
        app = app.route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        );
    }

    app.layer(CorsLayer::very_permissive()).with_state(state)
}

#[derive(Debug, Deserialize)]
struct LatestQuery {
    category: Option<String>,
    limit: Option<i64>,
}

async fn latest(
    State(state): State<AppState>,
    Query(q): Query<LatestQuery>,
) -> Result<Json<Vec<IntelItem>>, Response> {
    let category = match q.category.as_deref().filter(|c| !c.trim().is_empty()) {
        Some(raw) => Some(
            raw.parse::<Category>()
                .map_err(|e| (StatusCode::BAD_REQUEST, e).into_response())?,
        ),
        None => None,
    };
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT);
    Ok(Json(state.engine.latest(category, limit).await))
}

async fn by_id(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.by_id(&id).await {
        Some(item) => Json(item).into_response(),
        None => (StatusCode::NOT_FOUND, format!("no record with id {id}")).into_response(),
    }
}

#[derive(Serialize)]
struct StatsOut {
    total: usize,
    by_category: BTreeMap<Category, usize>,
    sources: usize,
    running: bool,
}

async fn stats(State(state): State<AppState>) -> Json<StatsOut> {
    let engine = &state.engine;
    let mut by_category = BTreeMap::new();
    for c in Category::ALL {
        by_category.insert(c, engine.category_count(c).await);
    }
    Json(StatsOut {
        total: engine.total_count().await,
        by_category,
        sources: engine.sources().len(),
        running: engine.is_running(),
    })
}

async fn refresh(State(state): State<AppState>) -> Response {
    match state.engine.refresh_now().await {
        RefreshOutcome::Completed(report) => Json(report).into_response(),
        RefreshOutcome::Coalesced => Json(json!({ "coalesced": true })).into_response(),
    }
}
